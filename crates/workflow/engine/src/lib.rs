//! Document approval workflow engine
//!
//! The engine instantiates workflow templates against documents,
//! resolves assignees and deadlines, records human decisions, advances
//! the dependency frontier, and applies SLA actions from a periodic
//! monitor.
//!
//! # Key Principle
//!
//! **The engine coordinates, it never delivers.** Notification
//! transports, document storage, and the user directory live behind
//! collaborator traits; the engine only resolves recipients and fires
//! events.
//!
//! # Architecture
//!
//! The [`WorkflowEngine`] composes specialized components:
//!
//! - [`TemplateRegistry`] — Stores and validates workflow templates
//! - [`AssignmentResolver`] — Turns assignment rules into user ids
//! - [`DeadlineCalculator`] — Turns deadline rules into timestamps
//! - [`SlaMonitor`] — Detects deadline pressure on open steps
//! - [`WorkflowStore`] — Persistence with compare-and-swap step updates
//!
//! # Example
//!
//! ```rust
//! use docflow_engine::{
//!     InMemoryDirectory, InMemoryDocumentStore, InMemoryStore, LogDispatcher, WorkflowEngine,
//! };
//! use docflow_types::{AssignmentRule, DocumentId, StepDef, UserId, WorkflowTemplate};
//! use std::sync::Arc;
//!
//! let mut engine = WorkflowEngine::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryDocumentStore::new().with_document("doc-1")),
//!     Arc::new(InMemoryDirectory::new().with_user("alice", "reviewer", "legal")),
//!     Arc::new(LogDispatcher::new()),
//! );
//!
//! let mut template = WorkflowTemplate::new("Contract Review");
//! template
//!     .add_step(
//!         StepDef::review("review", "Legal Review")
//!             .with_assignment(AssignmentRule::user("alice")),
//!     )
//!     .unwrap();
//! let template_id = engine.register_template(template).unwrap();
//!
//! let instance = engine
//!     .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
//!     .unwrap();
//! assert!(instance.is_active());
//! assert_eq!(engine.steps_for(&instance.id).unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]

pub mod assignment;
pub mod deadline;
pub mod directory;
pub mod documents;
pub mod notify;
pub mod orchestrator;
pub mod sla;
pub mod store;
pub mod template_registry;

// Re-export main types
pub use assignment::{AssignmentContext, AssignmentResolver, DynamicAssigneeResolver};
pub use deadline::{DeadlineCalculator, DeadlineContext, DeadlineFormula};
pub use directory::{InMemoryDirectory, UserDirectory};
pub use documents::{DocumentStore, InMemoryDocumentStore};
pub use notify::{LogDispatcher, NotificationDispatcher, NotifyError};
pub use orchestrator::WorkflowEngine;
pub use sla::{SlaAction, SlaMonitor};
pub use store::{InMemoryStore, WorkflowStore};
pub use template_registry::TemplateRegistry;
