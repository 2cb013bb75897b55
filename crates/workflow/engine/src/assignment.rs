//! Assignment resolution: from abstract rule to concrete user ids
//!
//! Resolution happens once, at step-creation time. `user`, `role`, and
//! `department` rules resolve against the [`UserDirectory`]; `dynamic`
//! rules dispatch to an injected [`DynamicAssigneeResolver`] strategy
//! looked up by name. An empty result is not an error — the step is
//! created unassigned (see the orchestrator).

use crate::directory::UserDirectory;
use docflow_types::{AssignmentRule, StepDef, UserId, WorkflowInstance};
use std::collections::HashMap;
use std::sync::Arc;

/// Context handed to dynamic resolution strategies
pub struct AssignmentContext<'a> {
    /// The workflow instance the step belongs to
    pub workflow: &'a WorkflowInstance,
    /// The step definition being activated
    pub step_def: &'a StepDef,
}

/// Template-defined assignment strategy, registered by name
pub trait DynamicAssigneeResolver: Send + Sync {
    /// Resolve the rule payload to a set of user ids
    fn resolve(&self, payload: &serde_json::Value, ctx: &AssignmentContext<'_>) -> Vec<UserId>;
}

/// Resolves assignment rules to concrete assignee sets
pub struct AssignmentResolver {
    directory: Arc<dyn UserDirectory>,
    dynamic: HashMap<String, Box<dyn DynamicAssigneeResolver>>,
}

impl AssignmentResolver {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            directory,
            dynamic: HashMap::new(),
        }
    }

    /// Register a dynamic strategy under a name referenced by templates
    pub fn register_dynamic(
        &mut self,
        name: impl Into<String>,
        resolver: Box<dyn DynamicAssigneeResolver>,
    ) {
        self.dynamic.insert(name.into(), resolver);
    }

    /// Resolve a rule to user ids. Literal users are filtered to active
    /// ones; an unknown dynamic resolver yields an empty set.
    pub fn resolve(&self, rule: &AssignmentRule, ctx: &AssignmentContext<'_>) -> Vec<UserId> {
        match rule {
            AssignmentRule::User { users } => users
                .iter()
                .filter(|u| self.directory.is_active(u))
                .cloned()
                .collect(),
            AssignmentRule::Role { role } => self.directory.users_by_role(role),
            AssignmentRule::Department { department } => {
                self.directory.users_by_department(department)
            }
            AssignmentRule::Dynamic { resolver, payload } => {
                match self.dynamic.get(resolver.as_str()) {
                    Some(strategy) => strategy.resolve(payload, ctx),
                    None => {
                        tracing::warn!(
                            resolver,
                            step_def = %ctx.step_def.id,
                            "Unknown dynamic assignee resolver"
                        );
                        Vec::new()
                    }
                }
            }
        }
    }
}
