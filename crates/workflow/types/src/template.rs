//! Workflow templates: the blueprint for document-approval workflows
//!
//! A WorkflowTemplate is an ordered set of step definitions forming a
//! dependency DAG. Each step definition carries an assignment rule, a
//! deadline rule, quorum settings, and notification hooks; the template
//! carries the SLA policy applied to its steps.
//!
//! Templates are immutable once registered. To modify, register a new
//! version.

use crate::{UserId, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow template
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

impl TemplateId {
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

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a step definition within a template
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepDefId(pub String);

impl StepDefId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StepDefId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Template ────────────────────────────────────────────────

/// A workflow template — the static definition a document run is created from
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Unique identifier
    pub id: TemplateId,
    /// Human-readable name
    pub name: String,
    /// Version for tracking template evolution
    pub version: u32,
    /// The step definitions forming the dependency graph
    pub steps: Vec<StepDef>,
    /// SLA policy applied to this template's steps
    pub sla: SlaPolicy,
    /// Notification template fired when the workflow completes (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_notification: Option<String>,
    /// When this template was created
    pub created_at: DateTime<Utc>,
    /// Metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl WorkflowTemplate {
    /// Create a new workflow template
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TemplateId::generate(),
            name: name.into(),
            version: 1,
            steps: Vec::new(),
            sla: SlaPolicy::default(),
            completion_notification: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_sla(mut self, sla: SlaPolicy) -> Self {
        self.sla = sla;
        self
    }

    pub fn with_completion_notification(mut self, template: impl Into<String>) -> Self {
        self.completion_notification = Some(template.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a step definition to the template
    pub fn add_step(&mut self, step: StepDef) -> WorkflowResult<()> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(WorkflowError::DuplicateStepId(step.id));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Get a step definition by ID
    pub fn get_step(&self, id: &StepDefId) -> Option<&StepDef> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Step definitions with no dependencies — the initial frontier
    pub fn initial_steps(&self) -> Vec<&StepDef> {
        self.steps
            .iter()
            .filter(|s| s.dependencies.is_empty())
            .collect()
    }

    /// Total number of step definitions
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Validate the template for structural correctness.
    ///
    /// Checks step-ID uniqueness, that every dependency references a
    /// known step, that no step depends on itself, and that the
    /// dependency graph is acyclic. Called at registration time; the
    /// running engine never re-validates.
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.steps.is_empty() {
            return Err(WorkflowError::ValidationError(
                "template must have at least one step".into(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(&step.id) {
                return Err(WorkflowError::DuplicateStepId(step.id.clone()));
            }
        }

        for step in &self.steps {
            for dep in &step.dependencies {
                if dep == &step.id {
                    return Err(WorkflowError::SelfDependency(step.id.clone()));
                }
                if !seen.contains(dep) {
                    return Err(WorkflowError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            if step.parallel && step.required_approvals == 0 {
                return Err(WorkflowError::ValidationError(format!(
                    "parallel step '{}' must require at least one approval",
                    step.id
                )));
            }
        }

        self.check_acyclic()
    }

    /// Kahn's algorithm over the dependency edges
    fn check_acyclic(&self) -> WorkflowResult<()> {
        let mut in_degree: HashMap<&StepDefId, usize> = self
            .steps
            .iter()
            .map(|s| (&s.id, s.dependencies.len()))
            .collect();

        let mut ready: Vec<&StepDefId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;

        while let Some(current) = ready.pop() {
            visited += 1;
            for step in &self.steps {
                if step.dependencies.iter().any(|d| d == current) {
                    if let Some(degree) = in_degree.get_mut(&step.id) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(&step.id);
                        }
                    }
                }
            }
        }

        if visited != self.steps.len() {
            return Err(WorkflowError::CycleDetected);
        }
        Ok(())
    }
}

// ── Step Definition ──────────────────────────────────────────────────

/// A single step definition within a template
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepDef {
    /// Identifier, unique within the template
    pub id: StepDefId,
    /// Human-readable name
    pub name: String,
    /// The kind of step
    pub step_type: StepType,
    /// How assignees are resolved at activation time
    pub assign_to: AssignmentRule,
    /// How the deadline is computed at activation time (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DeadlineRule>,
    /// Step definitions that must complete (or be skipped) first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<StepDefId>,
    /// Whether assignees act in parallel (quorum) or all must decide
    #[serde(default)]
    pub parallel: bool,
    /// Approvals required to complete a parallel step
    #[serde(default)]
    pub required_approvals: u32,
    /// Activation predicates; all must pass or the step is skipped
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<StepCondition>,
    /// Actions attached to this step (carried as data)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<StepAction>,
    /// Extra notification hooks fired alongside the standard events
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<NotificationSpec>,
}

impl StepDef {
    /// Create a new step definition
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: StepDefId::new(id),
            name: name.into(),
            step_type,
            assign_to: AssignmentRule::User { users: Vec::new() },
            deadline: None,
            dependencies: Vec::new(),
            parallel: false,
            required_approvals: 0,
            conditions: Vec::new(),
            actions: Vec::new(),
            notifications: Vec::new(),
        }
    }

    /// Create an approval step
    pub fn approval(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, StepType::Approval)
    }

    /// Create a review step
    pub fn review(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, StepType::Review)
    }

    /// Create a signature step
    pub fn sign(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, StepType::Sign)
    }

    pub fn with_assignment(mut self, rule: AssignmentRule) -> Self {
        self.assign_to = rule;
        self
    }

    pub fn with_deadline(mut self, rule: DeadlineRule) -> Self {
        self.deadline = Some(rule);
        self
    }

    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(StepDefId::new(dep));
        self
    }

    /// Mark as parallel with the given approval quorum
    pub fn with_quorum(mut self, required_approvals: u32) -> Self {
        self.parallel = true;
        self.required_approvals = required_approvals;
        self
    }

    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: StepAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_notification(mut self, spec: NotificationSpec) -> Self {
        self.notifications.push(spec);
        self
    }
}

// ── Step Type ────────────────────────────────────────────────────────

/// The kind of a workflow step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Formal approval decision
    Approval,
    /// Content review
    Review,
    /// Signature collection
    Sign,
    /// Routing decision
    Route,
    /// Notification acknowledgement
    Notify,
    /// Conditional gate
    Condition,
    /// Generic action step
    Action,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepType::Approval => "approval",
            StepType::Review => "review",
            StepType::Sign => "sign",
            StepType::Route => "route",
            StepType::Notify => "notify",
            StepType::Condition => "condition",
            StepType::Action => "action",
        };
        write!(f, "{}", s)
    }
}

// ── Assignment Rule ──────────────────────────────────────────────────

/// How the assignees of a step are resolved at activation time
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssignmentRule {
    /// Literal user ids
    User { users: Vec<UserId> },
    /// All active users holding a role
    Role { role: String },
    /// All active users in a department
    Department { department: String },
    /// Resolved by an injected strategy, looked up by name
    Dynamic {
        resolver: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl AssignmentRule {
    /// Convenience constructor for a single literal assignee
    pub fn user(id: impl Into<String>) -> Self {
        Self::User {
            users: vec![UserId::new(id)],
        }
    }

    pub fn users(ids: impl IntoIterator<Item = UserId>) -> Self {
        Self::User {
            users: ids.into_iter().collect(),
        }
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self::Role { role: role.into() }
    }

    pub fn department(department: impl Into<String>) -> Self {
        Self::Department {
            department: department.into(),
        }
    }
}

// ── Deadline Rule ────────────────────────────────────────────────────

/// How a step's deadline is computed at activation time
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeadlineRule {
    /// Fixed offset from activation, in days
    Fixed { days: i64 },
    /// Evaluated by an injected formula evaluator; no deadline if absent
    Dynamic { formula: String },
}

// ── Conditions and Actions ───────────────────────────────────────────

/// An activation predicate evaluated against the workflow's form data
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepCondition {
    /// The form-data field to inspect
    pub field: String,
    /// The comparison to apply
    pub op: ConditionOp,
    /// The value compared against (ignored for `Exists`)
    #[serde(default)]
    pub value: serde_json::Value,
}

impl StepCondition {
    pub fn equals(field: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            op: ConditionOp::Eq,
            value,
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: ConditionOp::Exists,
            value: serde_json::Value::Null,
        }
    }

    /// Evaluate against a form-data object
    pub fn matches(&self, form_data: &serde_json::Map<String, serde_json::Value>) -> bool {
        match self.op {
            ConditionOp::Eq => form_data.get(&self.field) == Some(&self.value),
            ConditionOp::Ne => form_data.get(&self.field) != Some(&self.value),
            ConditionOp::Exists => form_data.contains_key(&self.field),
        }
    }
}

/// Comparison operator for step conditions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Exists,
}

/// An action attached to a step definition, carried as opaque data
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepAction {
    /// Action discriminator understood by downstream systems
    pub kind: String,
    /// Action parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A notification hook attached to a step definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationSpec {
    /// When the notification fires
    pub trigger: NotificationTrigger,
    /// The notification template to deliver
    pub template: String,
}

/// Step events a notification hook can bind to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTrigger {
    StepCreated,
    StepCompleted,
}

// ── SLA Policy ───────────────────────────────────────────────────────

/// SLA policy attached to a workflow template
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlaPolicy {
    /// Days before the deadline at which a warning is sent
    pub warning_threshold_days: i64,
    /// Whether breached steps are reassigned to backup assignees
    pub auto_reassign: bool,
    /// Backup assignees per step type, used when auto-reassigning
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub backup_assignees: HashMap<StepType, Vec<UserId>>,
}

impl SlaPolicy {
    pub fn new(warning_threshold_days: i64) -> Self {
        Self {
            warning_threshold_days,
            auto_reassign: false,
            backup_assignees: HashMap::new(),
        }
    }

    pub fn with_auto_reassign(mut self) -> Self {
        self.auto_reassign = true;
        self
    }

    pub fn with_backups(mut self, step_type: StepType, users: Vec<UserId>) -> Self {
        self.backup_assignees.insert(step_type, users);
        self
    }

    /// Backup assignees for a step type, if configured
    pub fn backups_for(&self, step_type: StepType) -> Option<&Vec<UserId>> {
        self.backup_assignees
            .get(&step_type)
            .filter(|v| !v.is_empty())
    }
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self::new(1)
    }
}
