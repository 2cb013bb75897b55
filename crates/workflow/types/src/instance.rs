//! Workflow instances: one execution of a template against one document
//!
//! A WorkflowInstance tracks the lifecycle of a run — active, completed,
//! cancelled, or errored — plus an append-only audit history of every
//! state transition. Step-level runtime state lives in [`crate::Step`].

use crate::TemplateId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user in the department directory
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored document
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Instance ────────────────────────────────────────────────

/// A running execution of a workflow template against a document
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance identifier
    pub id: WorkflowId,
    /// The template this instance was created from
    pub template_id: TemplateId,
    /// The document under approval
    pub document_id: DocumentId,
    /// Current lifecycle state
    pub status: WorkflowStatus,
    /// Who started this workflow
    pub initiator: UserId,
    /// The template's name at start time (templates are versioned)
    pub template_name: String,
    /// When the instance was started
    pub started_at: DateTime<Utc>,
    /// When the instance reached a terminal state (if it has)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Append-only audit history of state transitions
    pub history: Vec<AuditEntry>,
}

impl WorkflowInstance {
    /// Create a new active instance
    pub fn new(
        template_id: TemplateId,
        template_name: impl Into<String>,
        document_id: DocumentId,
        initiator: UserId,
    ) -> Self {
        let mut instance = Self {
            id: WorkflowId::generate(),
            template_id,
            document_id,
            status: WorkflowStatus::Active,
            initiator,
            template_name: template_name.into(),
            started_at: Utc::now(),
            completed_at: None,
            history: Vec::new(),
        };
        instance.record("workflow_started", "Workflow instance started");
        instance
    }

    /// Mark the workflow completed. Idempotent.
    pub fn complete(&mut self) {
        if self.status == WorkflowStatus::Completed {
            return;
        }
        self.status = WorkflowStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.record("workflow_completed", "All steps completed or skipped");
    }

    /// Cancel the workflow with a reason
    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.status = WorkflowStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.record(
            "workflow_cancelled",
            format!("Workflow cancelled: {}", reason.into()),
        );
    }

    /// Mark the workflow errored
    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.status = WorkflowStatus::Error;
        self.completed_at = Some(Utc::now());
        self.record("workflow_error", format!("Workflow error: {}", reason.into()));
    }

    /// Whether the workflow accepts new steps and decisions
    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    /// Whether the workflow has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append an audit entry
    pub fn record(&mut self, event_type: impl Into<String>, description: impl Into<String>) {
        self.history.push(AuditEntry {
            sequence: self.history.len() as u64,
            event_type: event_type.into(),
            description: description.into(),
            timestamp: Utc::now(),
        });
    }
}

// ── Workflow Status ──────────────────────────────────────────────────

/// Lifecycle state of a workflow instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Actively accepting decisions and creating steps
    #[default]
    Active,
    /// Every activated step ended completed or skipped
    Completed,
    /// Cancelled by an authorized actor
    Cancelled,
    /// Unrecoverable error
    Error,
}

impl WorkflowStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }
}

// ── Audit History ────────────────────────────────────────────────────

/// An entry in the instance's audit history
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonically increasing sequence number
    pub sequence: u64,
    /// Type of event
    pub event_type: String,
    /// Human-readable description
    pub description: String,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
}
