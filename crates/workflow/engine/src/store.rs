//! Workflow storage abstraction
//!
//! The engine talks to storage through [`WorkflowStore`]. The contract
//! the backend must uphold is small: uniqueness of
//! `(workflow_id, step_def_id)` for idempotent activation, and a
//! compare-and-swap on the step version so concurrent decisions on the
//! same step are never lost.
//!
//! [`InMemoryStore`] is the reference implementation backing tests and
//! single-process deployments.

use docflow_types::{
    Step, StepDefId, StepId, WorkflowError, WorkflowId, WorkflowInstance, WorkflowResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Storage contract for workflow instances and steps
pub trait WorkflowStore: Send + Sync {
    /// Persist a new instance
    fn insert_instance(&self, instance: WorkflowInstance) -> WorkflowResult<()>;

    /// Load an instance
    fn instance(&self, id: &WorkflowId) -> WorkflowResult<WorkflowInstance>;

    /// Overwrite an instance (instances are only mutated by the engine)
    fn update_instance(&self, instance: &WorkflowInstance) -> WorkflowResult<()>;

    /// Persist a new step. Returns `false` without side effect when a
    /// step for this `(workflow_id, step_def_id)` already exists —
    /// the idempotent-activation guard.
    fn insert_step(&self, step: Step) -> WorkflowResult<bool>;

    /// Load a step
    fn step(&self, id: &StepId) -> WorkflowResult<Step>;

    /// All steps belonging to a workflow instance
    fn steps_for_workflow(&self, workflow_id: &WorkflowId) -> WorkflowResult<Vec<Step>>;

    /// Compare-and-swap update: succeeds only when the stored version
    /// matches `step.version`, then stores the step with the version
    /// bumped. Returns the stored step. Fails with
    /// [`WorkflowError::Conflict`] on a version mismatch.
    fn update_step(&self, step: &Step) -> WorkflowResult<Step>;

    /// All pending/in-progress steps across all workflows (SLA scan)
    fn open_steps(&self) -> WorkflowResult<Vec<Step>>;
}

// ── In-memory reference implementation ───────────────────────────────

#[derive(Default)]
struct Inner {
    instances: HashMap<WorkflowId, WorkflowInstance>,
    steps: HashMap<StepId, Step>,
    by_workflow: HashMap<WorkflowId, Vec<StepId>>,
    activated: HashSet<(WorkflowId, StepDefId)>,
}

/// Mutex-guarded in-memory store
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }
}

impl WorkflowStore for InMemoryStore {
    fn insert_instance(&self, instance: WorkflowInstance) -> WorkflowResult<()> {
        let mut inner = self.lock();
        inner.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    fn instance(&self, id: &WorkflowId) -> WorkflowResult<WorkflowInstance> {
        self.lock()
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::WorkflowNotFound(id.clone()))
    }

    fn update_instance(&self, instance: &WorkflowInstance) -> WorkflowResult<()> {
        let mut inner = self.lock();
        if !inner.instances.contains_key(&instance.id) {
            return Err(WorkflowError::WorkflowNotFound(instance.id.clone()));
        }
        inner.instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    fn insert_step(&self, step: Step) -> WorkflowResult<bool> {
        let mut inner = self.lock();
        let key = (step.workflow_id.clone(), step.step_def_id.clone());
        if !inner.activated.insert(key) {
            return Ok(false);
        }
        inner
            .by_workflow
            .entry(step.workflow_id.clone())
            .or_default()
            .push(step.id.clone());
        inner.steps.insert(step.id.clone(), step);
        Ok(true)
    }

    fn step(&self, id: &StepId) -> WorkflowResult<Step> {
        self.lock()
            .steps
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::StepNotFound(id.clone()))
    }

    fn steps_for_workflow(&self, workflow_id: &WorkflowId) -> WorkflowResult<Vec<Step>> {
        let inner = self.lock();
        let ids = inner.by_workflow.get(workflow_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| inner.steps.get(id).cloned())
            .collect())
    }

    fn update_step(&self, step: &Step) -> WorkflowResult<Step> {
        let mut inner = self.lock();
        let stored = inner
            .steps
            .get_mut(&step.id)
            .ok_or_else(|| WorkflowError::StepNotFound(step.id.clone()))?;
        if stored.version != step.version {
            return Err(WorkflowError::Conflict(step.id.clone()));
        }
        let mut updated = step.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    fn open_steps(&self) -> WorkflowResult<Vec<Step>> {
        Ok(self
            .lock()
            .steps
            .values()
            .filter(|s| s.is_open())
            .cloned()
            .collect())
    }
}
