//! Error types for the workflow core

use crate::{DocumentId, StepDefId, StepId, TemplateId, WorkflowId};

/// Errors that can occur in workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow template not found: {0}")]
    TemplateNotFound(TemplateId),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Workflow instance not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    #[error("Step already closed: {0}")]
    StepAlreadyClosed(StepId),

    #[error("Workflow not active: {0}")]
    WorkflowNotActive(WorkflowId),

    #[error("Workflow already terminal: {0}")]
    AlreadyTerminal(WorkflowId),

    #[error("Concurrent update conflict on step: {0}")]
    Conflict(StepId),

    #[error("Duplicate step id in template: {0}")]
    DuplicateStepId(StepDefId),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: StepDefId, dependency: StepDefId },

    #[error("Step depends on itself: {0}")]
    SelfDependency(StepDefId),

    #[error("Cycle detected in template dependency graph")]
    CycleDetected,

    #[error("Template validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
