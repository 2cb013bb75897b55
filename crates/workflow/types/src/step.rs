//! Workflow steps: one activated node of the template DAG
//!
//! A Step is created when its dependencies clear. It collects human
//! decisions (append-only), carries the resolved assignee set and
//! deadline, and tracks SLA bookkeeping (reminders, warning, escalation).
//! The `version` field is the optimistic-concurrency counter bumped by
//! the store on every successful update.

use crate::{StepDef, StepDefId, StepType, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a workflow step
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
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

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Step ─────────────────────────────────────────────────────────────

/// One activated step of a workflow instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    /// Unique step identifier
    pub id: StepId,
    /// The owning workflow instance
    pub workflow_id: WorkflowId,
    /// The step definition this step was activated from
    pub step_def_id: StepDefId,
    /// The kind of step
    pub step_type: StepType,
    /// Human-readable name, copied from the definition
    pub name: String,
    /// Current status
    pub status: StepStatus,
    /// Assignees resolved at creation time
    pub assigned_to: Vec<UserId>,
    /// Prior assignee sets, recorded on each reassignment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_assignees: Vec<Vec<UserId>>,
    /// Absolute deadline, if a deadline rule resolved to one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// Append-only decision log
    pub decisions: Vec<Decision>,
    /// Form data merged in from decisions
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub form_data: serde_json::Map<String, serde_json::Value>,
    /// Number of SLA reminders sent so far
    pub reminders_sent: u32,
    /// When the last SLA reminder was sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reminder_at: Option<DateTime<Utc>>,
    /// Whether the pre-deadline SLA warning has been sent
    pub warning_sent: bool,
    /// Whether this step has been escalated past its deadline
    pub escalated: bool,
    /// When the step was escalated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
    /// Why the step was skipped, if it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// When the step was created
    pub created_at: DateTime<Utc>,
    /// When the step reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version, bumped by the store on update
    pub version: u64,
}

impl Step {
    /// Create a new pending step
    pub fn new(
        workflow_id: WorkflowId,
        def: &StepDef,
        assigned_to: Vec<UserId>,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: StepId::generate(),
            workflow_id,
            step_def_id: def.id.clone(),
            step_type: def.step_type,
            name: def.name.clone(),
            status: StepStatus::Pending,
            assigned_to,
            previous_assignees: Vec::new(),
            deadline,
            decisions: Vec::new(),
            form_data: serde_json::Map::new(),
            reminders_sent: 0,
            last_reminder_at: None,
            warning_sent: false,
            escalated: false,
            escalated_at: None,
            skip_reason: None,
            created_at: Utc::now(),
            completed_at: None,
            version: 0,
        }
    }

    /// Whether this step can still receive decisions
    pub fn is_open(&self) -> bool {
        matches!(self.status, StepStatus::Pending | StepStatus::InProgress)
    }

    /// Whether this step satisfies a dependency on it
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Completed | StepStatus::Skipped | StepStatus::Error
        )
    }

    /// Append a decision and merge its form data. Decisions are
    /// append-only; callers must check `is_open` first.
    pub fn record_decision(&mut self, decision: Decision) {
        self.decisions.push(decision);
        if self.status == StepStatus::Pending {
            self.status = StepStatus::InProgress;
        }
    }

    /// Merge form data from a decision into the step's form data
    pub fn merge_form_data(&mut self, data: serde_json::Map<String, serde_json::Value>) {
        for (key, value) in data {
            self.form_data.insert(key, value);
        }
    }

    /// Distinct users who decided `Approve`
    pub fn distinct_approvers(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.action == DecisionAction::Approve)
            .map(|d| &d.user_id)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Distinct assignees who have recorded a decision of any kind
    pub fn distinct_deciders(&self) -> usize {
        let assigned: HashSet<&UserId> = self.assigned_to.iter().collect();
        self.decisions
            .iter()
            .map(|d| &d.user_id)
            .filter(|u| assigned.contains(u))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Evaluate completion against the step definition.
    ///
    /// Parallel steps complete once the approval quorum is met by
    /// distinct approvers; sequential steps complete once every distinct
    /// assignee has decided. A user deciding twice never counts twice.
    pub fn completion_met(&self, def: &StepDef) -> bool {
        if def.parallel {
            self.distinct_approvers() >= def.required_approvals as usize
        } else {
            self.distinct_deciders() >= self.assigned_to.len()
        }
    }

    /// Mark the step completed
    pub fn complete(&mut self) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the step skipped with a reason
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.skip_reason = Some(reason.into());
        self.completed_at = Some(Utc::now());
    }

    /// Replace the assignee set, recording the prior set
    pub fn reassign(&mut self, new_assignees: Vec<UserId>) {
        let previous = std::mem::replace(&mut self.assigned_to, new_assignees);
        self.previous_assignees.push(previous);
    }

    /// Whole days until the deadline; negative once overdue
    pub fn days_until_deadline(&self, now: DateTime<Utc>) -> Option<i64> {
        self.deadline
            .map(|deadline| deadline.signed_duration_since(now).num_days())
    }

    /// Whether the deadline has passed
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|d| now > d).unwrap_or(false)
    }
}

// ── Step Status ──────────────────────────────────────────────────────

/// Status of a workflow step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Created, no decision recorded yet
    #[default]
    Pending,
    /// At least one decision recorded, completion not yet met
    InProgress,
    /// Completion criteria met; decision log frozen
    Completed,
    /// Skipped (failed condition or workflow cancellation)
    Skipped,
    /// Unrecoverable error
    Error,
}

// ── Decisions ────────────────────────────────────────────────────────

/// A single human decision recorded against a step
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    /// Who decided
    pub user_id: UserId,
    /// The decision taken
    pub action: DecisionAction,
    /// Free-form remarks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    /// When the decision was recorded
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn new(user_id: UserId, action: DecisionAction) -> Self {
        Self {
            user_id,
            action,
            remarks: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }
}

/// The action taken in a decision
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    /// Approve — counts toward parallel quorums
    Approve,
    /// Reject — recorded, never counts toward a quorum
    Reject,
    /// Acknowledge without an approval semantic (route/notify steps)
    Acknowledge,
}
