//! Notification dispatcher collaborator
//!
//! The engine resolves recipients and fires events; delivery (email,
//! push, SMS) belongs to the surrounding platform. Dispatch is
//! fire-and-forget from the engine's perspective: failures are logged
//! and swallowed, never allowed to roll back a state transition.

use docflow_types::UserId;

/// Delivery failure reported by a dispatcher backend
#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Dispatch contract consumed by the engine
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver `template` to `recipients` with the given context
    fn notify(
        &self,
        recipients: &[UserId],
        template: &str,
        context: &serde_json::Value,
    ) -> Result<(), NotifyError>;
}

/// Dispatcher that logs every notification via `tracing`
#[derive(Clone, Debug, Default)]
pub struct LogDispatcher;

impl LogDispatcher {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationDispatcher for LogDispatcher {
    fn notify(
        &self,
        recipients: &[UserId],
        template: &str,
        context: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            template,
            recipients = recipients.len(),
            %context,
            "Notification dispatched"
        );
        Ok(())
    }
}
