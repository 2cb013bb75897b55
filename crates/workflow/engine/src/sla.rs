//! SLA monitor: detects deadline pressure on open steps
//!
//! The monitor is a pure evaluator invoked on a scheduling tick. It
//! does NOT take action — it returns SLA actions for the orchestrator
//! to apply and notify on. Idempotency across overlapping runs comes
//! from the per-step bookkeeping fields (`warning_sent`,
//! `reminders_sent` + 24h spacing, `escalated`).

use chrono::{DateTime, Duration, Utc};
use docflow_types::{SlaPolicy, Step, UserId};

/// Reminders stop after this many sends; escalation takes over
pub const MAX_REMINDERS: u32 = 3;

/// Minimum spacing between reminders on the same step
pub const REMINDER_SPACING_HOURS: i64 = 24;

/// An SLA action for the orchestrator to act upon
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlaAction {
    /// Deadline is within the warning threshold; notify assignees once
    Warning,
    /// Periodic nudge to assignees while the step stays open, capped
    /// and spaced; runs independently of the warning threshold
    Reminder,
    /// Deadline breached; notify supervision and optionally reassign
    Escalate {
        /// Backup assignees to take over, when auto-reassign applies
        reassign_to: Option<Vec<UserId>>,
    },
}

/// Evaluates SLA state for open steps
#[derive(Clone, Debug, Default)]
pub struct SlaMonitor;

impl SlaMonitor {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one step against its template's SLA policy.
    ///
    /// Returns the actions due at `now`. Steps without a deadline, and
    /// steps that are not open, never produce actions. A single run can
    /// yield several actions (a freshly-breached step may get both a
    /// reminder and its escalation).
    pub fn evaluate(&self, step: &Step, policy: &SlaPolicy, now: DateTime<Utc>) -> Vec<SlaAction> {
        if !step.is_open() {
            return Vec::new();
        }
        let Some(deadline) = step.deadline else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        let days_until = step.days_until_deadline(now).unwrap_or(0);
        let in_warning_window = days_until <= policy.warning_threshold_days;
        let overdue = now > deadline;

        if in_warning_window && !step.warning_sent {
            actions.push(SlaAction::Warning);
        }

        if step.reminders_sent < MAX_REMINDERS && self.reminder_due(step, now) {
            actions.push(SlaAction::Reminder);
        }

        if overdue && !step.escalated {
            let reassign_to = if policy.auto_reassign {
                policy.backups_for(step.step_type).cloned()
            } else {
                None
            };
            actions.push(SlaAction::Escalate { reassign_to });
        }

        actions
    }

    fn reminder_due(&self, step: &Step, now: DateTime<Utc>) -> bool {
        match step.last_reminder_at {
            Some(last) => now - last >= Duration::hours(REMINDER_SPACING_HOURS),
            None => true,
        }
    }
}
