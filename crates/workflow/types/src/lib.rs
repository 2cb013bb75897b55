//! Workflow domain types for docflow
//!
//! The data contracts of the document-approval workflow core:
//!
//! - [`WorkflowTemplate`] — versioned DAG of [`StepDef`]s plus an
//!   [`SlaPolicy`]; authored once, instantiated many times
//! - [`WorkflowInstance`] — one execution of a template against one
//!   document, with an append-only audit history
//! - [`Step`] — one activated node of the DAG, carrying resolved
//!   assignees, the deadline, the append-only decision log, and SLA
//!   bookkeeping
//!
//! The engine that drives these types lives in `docflow-engine`.

#![deny(unsafe_code)]

pub mod errors;
pub mod instance;
pub mod step;
pub mod template;

pub use errors::{WorkflowError, WorkflowResult};
pub use instance::{
    AuditEntry, DocumentId, UserId, WorkflowId, WorkflowInstance, WorkflowStatus,
};
pub use step::{Decision, DecisionAction, Step, StepId, StepStatus};
pub use template::{
    AssignmentRule, ConditionOp, DeadlineRule, NotificationSpec, NotificationTrigger, SlaPolicy,
    StepAction, StepCondition, StepDef, StepDefId, StepType, TemplateId, WorkflowTemplate,
};
