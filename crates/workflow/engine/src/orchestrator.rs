//! Workflow engine: the main entry point for document approval workflows
//!
//! The engine owns the workflow lifecycle. It:
//! 1. Registers workflow templates
//! 2. Starts workflow instances against documents
//! 3. Records human decisions and evaluates step completion
//! 4. Advances the dependency frontier as steps close
//! 5. Applies SLA actions from the periodic monitor
//!
//! The engine is event-driven, not continuously running: `process_step`
//! is invoked synchronously by a human decision, `run_sla_check` by an
//! external scheduler tick. Step mutation goes through the store's
//! compare-and-swap so concurrent decisions on the same step are never
//! lost; on a version conflict the engine re-reads and retries.

use crate::{
    assignment::{AssignmentContext, AssignmentResolver, DynamicAssigneeResolver},
    deadline::{DeadlineCalculator, DeadlineContext, DeadlineFormula},
    directory::UserDirectory,
    documents::DocumentStore,
    notify::NotificationDispatcher,
    sla::{SlaAction, SlaMonitor},
    store::WorkflowStore,
    TemplateRegistry,
};
use chrono::{DateTime, Utc};
use docflow_types::{
    AssignmentRule, Decision, DecisionAction, DocumentId, NotificationTrigger, Step, StepDef,
    StepDefId, StepId, StepStatus, TemplateId, UserId, WorkflowError, WorkflowId,
    WorkflowInstance, WorkflowResult, WorkflowTemplate,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Retry budget for decision and reassignment compare-and-swaps
const MAX_UPDATE_RETRIES: usize = 5;

/// Retry budget per step during an SLA tick
const MAX_SLA_RETRIES: usize = 3;

/// The workflow engine — coordinates templates, steps, and decisions
pub struct WorkflowEngine {
    /// Registry of workflow templates
    registry: TemplateRegistry,
    /// Instance and step persistence
    store: Arc<dyn WorkflowStore>,
    /// Document existence checks
    documents: Arc<dyn DocumentStore>,
    /// User lookups for assignment and escalation
    directory: Arc<dyn UserDirectory>,
    /// Notification delivery (fire-and-forget)
    dispatcher: Arc<dyn NotificationDispatcher>,
    /// Assignment rule resolution
    assignment: AssignmentResolver,
    /// Deadline rule resolution
    deadlines: DeadlineCalculator,
    /// SLA evaluation
    sla: SlaMonitor,
}

impl WorkflowEngine {
    /// Create a new engine wired to its collaborators
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        documents: Arc<dyn DocumentStore>,
        directory: Arc<dyn UserDirectory>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            registry: TemplateRegistry::new(),
            store,
            documents,
            directory: directory.clone(),
            dispatcher,
            assignment: AssignmentResolver::new(directory),
            deadlines: DeadlineCalculator::new(),
            sla: SlaMonitor::new(),
        }
    }

    /// Install an evaluator for dynamic deadline formulas
    pub fn with_deadline_formula(mut self, formula: Box<dyn DeadlineFormula>) -> Self {
        self.deadlines = DeadlineCalculator::new().with_formula(formula);
        self
    }

    /// Register a dynamic assignee resolution strategy
    pub fn register_dynamic_resolver(
        &mut self,
        name: impl Into<String>,
        resolver: Box<dyn DynamicAssigneeResolver>,
    ) {
        self.assignment.register_dynamic(name, resolver);
    }

    // ── Template Management ──────────────────────────────────────────

    /// Register a workflow template
    pub fn register_template(&mut self, template: WorkflowTemplate) -> WorkflowResult<TemplateId> {
        self.registry.register(template)
    }

    /// Get a workflow template
    pub fn template(&self, id: &TemplateId) -> WorkflowResult<&WorkflowTemplate> {
        self.registry.get(id)
    }

    /// List all templates
    pub fn list_templates(&self) -> Vec<&WorkflowTemplate> {
        self.registry.list()
    }

    // ── Workflow Lifecycle ───────────────────────────────────────────

    /// Start a workflow instance for a document.
    ///
    /// Creates the instance and activates the initial frontier: every
    /// step definition with no dependencies. Fails when the template or
    /// the document does not exist.
    pub fn start(
        &self,
        document_id: DocumentId,
        template_id: &TemplateId,
        initiator: UserId,
    ) -> WorkflowResult<WorkflowInstance> {
        let template = self.registry.get(template_id)?;
        if !self.documents.exists(&document_id) {
            return Err(WorkflowError::DocumentNotFound(document_id));
        }

        let mut instance = WorkflowInstance::new(
            template_id.clone(),
            template.name.clone(),
            document_id,
            initiator,
        );
        self.store.insert_instance(instance.clone())?;

        for def in template.initial_steps() {
            self.create_step(&mut instance, def)?;
        }
        self.store.update_instance(&instance)?;

        // An initial step skipped by its conditions already satisfies its
        // dependents; advance immediately so they activate and completion
        // is evaluated.
        self.progress_workflow(&instance.id)?;
        let instance = self.store.instance(&instance.id)?;

        tracing::info!(
            workflow_id = %instance.id,
            template_id = %template_id,
            "Workflow started"
        );
        Ok(instance)
    }

    /// Record a decision on a step.
    ///
    /// Appends the decision, merges form data, and evaluates completion:
    /// a parallel step completes once its approval quorum is met by
    /// distinct approvers, a sequential step once every distinct assignee
    /// has decided. On completion the frontier is advanced. Conflicting
    /// concurrent decisions are retried against the store; a persistent
    /// conflict surfaces as [`WorkflowError::Conflict`].
    pub fn process_step(
        &self,
        step_id: &StepId,
        user: UserId,
        action: DecisionAction,
        remarks: Option<String>,
        form_data: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> WorkflowResult<Step> {
        for _ in 0..MAX_UPDATE_RETRIES {
            let mut step = self.store.step(step_id)?;
            if !step.is_open() {
                return Err(WorkflowError::StepAlreadyClosed(step_id.clone()));
            }

            let instance = self.store.instance(&step.workflow_id)?;
            if !instance.is_active() {
                return Err(WorkflowError::WorkflowNotActive(instance.id));
            }
            let template = self.registry.get(&instance.template_id)?;
            let def = template.get_step(&step.step_def_id).ok_or_else(|| {
                WorkflowError::ValidationError(format!(
                    "step definition '{}' missing from template '{}'",
                    step.step_def_id, template.id
                ))
            })?;

            let mut decision = Decision::new(user.clone(), action);
            if let Some(remarks) = remarks.clone() {
                decision = decision.with_remarks(remarks);
            }
            step.record_decision(decision);
            if let Some(data) = form_data.clone() {
                step.merge_form_data(data);
            }

            let completed = step.completion_met(def);
            if completed {
                step.complete();
            }

            match self.store.update_step(&step) {
                Ok(stored) => {
                    if completed {
                        self.on_step_completed(&stored, def)?;
                    }
                    return Ok(stored);
                }
                Err(WorkflowError::Conflict(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(WorkflowError::Conflict(step_id.clone()))
    }

    /// Advance the dependency frontier of a workflow.
    ///
    /// Activates every step definition whose dependencies are all
    /// completed or skipped, then completes the workflow once every
    /// activated step is terminal. Safe to call redundantly; activation
    /// is idempotent per `(workflow, step definition)`.
    pub fn progress_workflow(&self, workflow_id: &WorkflowId) -> WorkflowResult<()> {
        let mut instance = self.store.instance(workflow_id)?;
        if !instance.is_active() {
            return Ok(());
        }
        let template = self.registry.get(&instance.template_id)?;

        // Activation can cascade: a freshly-created step may be skipped
        // by its conditions, satisfying further dependencies.
        loop {
            let steps = self.store.steps_for_workflow(workflow_id)?;
            let satisfied: HashSet<&StepDefId> = steps
                .iter()
                .filter(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
                .map(|s| &s.step_def_id)
                .collect();
            let activated: HashSet<&StepDefId> = steps.iter().map(|s| &s.step_def_id).collect();

            let ready: Vec<&StepDef> = template
                .steps
                .iter()
                .filter(|def| {
                    !activated.contains(&def.id)
                        && def.dependencies.iter().all(|dep| satisfied.contains(dep))
                })
                .collect();
            if ready.is_empty() {
                break;
            }

            let mut created = false;
            for def in ready {
                if self.create_step(&mut instance, def)?.is_some() {
                    created = true;
                }
            }
            if !created {
                break;
            }
        }

        let steps = self.store.steps_for_workflow(workflow_id)?;
        let all_closed = !steps.is_empty()
            && steps
                .iter()
                .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped));
        if all_closed {
            self.complete_workflow(&mut instance, template)?;
        } else {
            self.store.update_instance(&instance)?;
        }
        Ok(())
    }

    /// Cancel a workflow, skipping every open step
    pub fn cancel_workflow(
        &self,
        workflow_id: &WorkflowId,
        reason: impl Into<String>,
    ) -> WorkflowResult<()> {
        let reason = reason.into();
        let mut instance = self.store.instance(workflow_id)?;
        if instance.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(workflow_id.clone()));
        }
        instance.cancel(&reason);

        for step in self.store.steps_for_workflow(workflow_id)? {
            if !step.is_open() {
                continue;
            }
            self.skip_step(&step.id, format!("Workflow cancelled: {}", reason))?;
            instance.record("step_skipped", format!("Step '{}' skipped", step.name));
            self.send(
                &step.assigned_to,
                "workflow_cancelled",
                self.step_context(&instance, &step, None),
            );
        }
        self.store.update_instance(&instance)?;

        tracing::info!(workflow_id = %workflow_id, reason, "Workflow cancelled");
        Ok(())
    }

    /// Reassign an open step to a new set of assignees.
    ///
    /// The prior assignee set is recorded on the step and the new
    /// assignees are notified.
    pub fn reassign_step(
        &self,
        step_id: &StepId,
        new_assignees: Vec<UserId>,
    ) -> WorkflowResult<Step> {
        for _ in 0..MAX_UPDATE_RETRIES {
            let mut step = self.store.step(step_id)?;
            if !step.is_open() {
                return Err(WorkflowError::StepAlreadyClosed(step_id.clone()));
            }
            step.reassign(new_assignees.clone());

            match self.store.update_step(&step) {
                Ok(stored) => {
                    let mut instance = self.store.instance(&stored.workflow_id)?;
                    instance.record(
                        "step_reassigned",
                        format!("Step '{}' reassigned", stored.name),
                    );
                    self.store.update_instance(&instance)?;
                    self.send(
                        &stored.assigned_to,
                        "step_reassigned",
                        self.step_context(&instance, &stored, None),
                    );
                    tracing::info!(step_id = %step_id, "Step reassigned");
                    return Ok(stored);
                }
                Err(WorkflowError::Conflict(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(WorkflowError::Conflict(step_id.clone()))
    }

    // ── SLA Tick ─────────────────────────────────────────────────────

    /// Evaluate SLA state for every open step and apply the due actions.
    ///
    /// Invoked by an external scheduler. Idempotent across overlapping
    /// runs: warnings fire once, reminders are capped and spaced, and a
    /// step escalates at most once. A conflicting concurrent update on a
    /// step re-evaluates rather than double-applying.
    pub fn run_sla_check(&self, now: DateTime<Utc>) -> WorkflowResult<()> {
        'steps: for step in self.store.open_steps()? {
            let instance = match self.store.instance(&step.workflow_id) {
                Ok(instance) => instance,
                Err(err) => {
                    tracing::warn!(step_id = %step.id, error = %err, "Orphaned step in SLA scan");
                    continue;
                }
            };
            if !instance.is_active() {
                continue;
            }
            let template = match self.registry.get(&instance.template_id) {
                Ok(template) => template,
                Err(err) => {
                    tracing::warn!(workflow_id = %instance.id, error = %err, "Template gone in SLA scan");
                    continue;
                }
            };

            for _ in 0..MAX_SLA_RETRIES {
                let mut current = self.store.step(&step.id)?;
                let actions = self.sla.evaluate(&current, &template.sla, now);
                if actions.is_empty() {
                    continue 'steps;
                }

                let assignees_at_breach = current.assigned_to.clone();
                for action in &actions {
                    match action {
                        SlaAction::Warning => current.warning_sent = true,
                        SlaAction::Reminder => {
                            current.reminders_sent += 1;
                            current.last_reminder_at = Some(now);
                        }
                        SlaAction::Escalate { reassign_to } => {
                            current.escalated = true;
                            current.escalated_at = Some(now);
                            if let Some(backups) = reassign_to {
                                current.reassign(backups.clone());
                            }
                        }
                    }
                }

                match self.store.update_step(&current) {
                    Ok(stored) => {
                        for action in &actions {
                            self.notify_sla(&stored, &instance, template, action, &assignees_at_breach);
                        }
                        continue 'steps;
                    }
                    Err(WorkflowError::Conflict(_)) => continue,
                    Err(err) => return Err(err),
                }
            }
            tracing::warn!(step_id = %step.id, "SLA update retries exhausted; will retry next tick");
        }
        Ok(())
    }

    // ── Query ────────────────────────────────────────────────────────

    /// Load a workflow instance
    pub fn instance(&self, id: &WorkflowId) -> WorkflowResult<WorkflowInstance> {
        self.store.instance(id)
    }

    /// Load a step
    pub fn step(&self, id: &StepId) -> WorkflowResult<Step> {
        self.store.step(id)
    }

    /// All steps of a workflow instance
    pub fn steps_for(&self, workflow_id: &WorkflowId) -> WorkflowResult<Vec<Step>> {
        self.store.steps_for_workflow(workflow_id)
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Activate a step definition for an instance.
    ///
    /// Resolves assignees and deadline, persists the step, and fires the
    /// creation notifications. Returns `None` when a step for this
    /// definition already exists (idempotent) or the instance is no
    /// longer active. A step whose conditions fail against the merged
    /// form data of completed steps is created already skipped, so
    /// dependencies on it still clear.
    fn create_step(
        &self,
        instance: &mut WorkflowInstance,
        def: &StepDef,
    ) -> WorkflowResult<Option<Step>> {
        if !instance.is_active() {
            return Ok(None);
        }

        if !def.conditions.is_empty() {
            let form_data = self.merged_form_data(&instance.id)?;
            if !def.conditions.iter().all(|c| c.matches(&form_data)) {
                let mut step = Step::new(instance.id.clone(), def, Vec::new(), None);
                step.skip("Conditions not met");
                if !self.store.insert_step(step.clone())? {
                    return Ok(None);
                }
                instance.record(
                    "step_skipped",
                    format!("Step '{}' skipped: conditions not met", def.name),
                );
                return Ok(Some(step));
            }
        }

        let ctx = AssignmentContext {
            workflow: instance,
            step_def: def,
        };
        let assignees = self.assignment.resolve(&def.assign_to, &ctx);
        if assignees.is_empty() {
            tracing::warn!(
                workflow_id = %instance.id,
                step_def = %def.id,
                "Step created without assignees"
            );
        }
        let deadline = self.deadlines.compute(
            def.deadline.as_ref(),
            &DeadlineContext {
                workflow: instance,
                step_def: def,
            },
            Utc::now(),
        );

        let step = Step::new(instance.id.clone(), def, assignees, deadline);
        if !self.store.insert_step(step.clone())? {
            return Ok(None);
        }
        instance.record("step_created", format!("Step '{}' created", def.name));

        let context = self.step_context(instance, &step, None);
        self.send(&step.assigned_to, "step_created", context.clone());
        for spec in &def.notifications {
            if spec.trigger == NotificationTrigger::StepCreated {
                self.send(&step.assigned_to, &spec.template, context.clone());
            }
        }

        tracing::debug!(
            workflow_id = %instance.id,
            step_id = %step.id,
            step_def = %def.id,
            "Step activated"
        );
        Ok(Some(step))
    }

    /// Audit, notify, and advance after a step completes
    fn on_step_completed(&self, step: &Step, def: &StepDef) -> WorkflowResult<()> {
        let mut instance = self.store.instance(&step.workflow_id)?;
        instance.record("step_completed", format!("Step '{}' completed", step.name));
        self.store.update_instance(&instance)?;

        let actor = step.decisions.last().map(|d| d.user_id.clone());
        let context = self.step_context(&instance, step, actor.as_ref());
        self.send(&step.assigned_to, "step_completed", context.clone());
        for spec in &def.notifications {
            if spec.trigger == NotificationTrigger::StepCompleted {
                self.send(&step.assigned_to, &spec.template, context.clone());
            }
        }

        tracing::info!(
            workflow_id = %step.workflow_id,
            step_id = %step.id,
            "Step completed"
        );
        self.progress_workflow(&step.workflow_id)
    }

    /// Mark the workflow completed and fire its completion notification
    fn complete_workflow(
        &self,
        instance: &mut WorkflowInstance,
        template: &WorkflowTemplate,
    ) -> WorkflowResult<()> {
        instance.complete();
        self.store.update_instance(instance)?;

        if let Some(notification) = &template.completion_notification {
            let context = serde_json::json!({
                "workflow_id": instance.id.to_string(),
                "document_id": instance.document_id.to_string(),
                "template_name": instance.template_name,
            });
            self.send(
                std::slice::from_ref(&instance.initiator),
                notification,
                context,
            );
        }

        tracing::info!(workflow_id = %instance.id, "Workflow completed");
        Ok(())
    }

    /// Skip one step with a compare-and-swap retry
    fn skip_step(&self, step_id: &StepId, reason: String) -> WorkflowResult<()> {
        for _ in 0..MAX_UPDATE_RETRIES {
            let mut step = self.store.step(step_id)?;
            if !step.is_open() {
                return Ok(());
            }
            step.skip(reason.clone());
            match self.store.update_step(&step) {
                Ok(_) => return Ok(()),
                Err(WorkflowError::Conflict(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(WorkflowError::Conflict(step_id.clone()))
    }

    /// Form data accumulated by all completed steps of a workflow
    fn merged_form_data(
        &self,
        workflow_id: &WorkflowId,
    ) -> WorkflowResult<serde_json::Map<String, serde_json::Value>> {
        let mut merged = serde_json::Map::new();
        for step in self.store.steps_for_workflow(workflow_id)? {
            if step.status == StepStatus::Completed {
                for (key, value) in step.form_data {
                    merged.insert(key, value);
                }
            }
        }
        Ok(merged)
    }

    /// Send the notifications for one applied SLA action
    fn notify_sla(
        &self,
        step: &Step,
        instance: &WorkflowInstance,
        template: &WorkflowTemplate,
        action: &SlaAction,
        assignees_at_breach: &[UserId],
    ) {
        match action {
            SlaAction::Warning => {
                self.send(
                    assignees_at_breach,
                    "sla_warning",
                    self.step_context(instance, step, None),
                );
            }
            SlaAction::Reminder => {
                self.send(
                    assignees_at_breach,
                    "sla_reminder",
                    self.step_context(instance, step, None),
                );
            }
            SlaAction::Escalate { reassign_to } => {
                let recipients =
                    self.escalation_recipients(instance, template, step, assignees_at_breach);
                self.send(
                    &recipients,
                    "sla_escalation",
                    self.step_context(instance, step, None),
                );
                if reassign_to.is_some() {
                    self.send(
                        &step.assigned_to,
                        "step_reassigned",
                        self.step_context(instance, step, None),
                    );
                }
                tracing::warn!(
                    workflow_id = %instance.id,
                    step_id = %step.id,
                    reassigned = reassign_to.is_some(),
                    "Step escalated"
                );
            }
        }
    }

    /// Who to notify when a step escalates: the initiator, the breaching
    /// assignees' supervisors, and the department head when the step was
    /// assigned by department. Missing contacts degrade silently.
    fn escalation_recipients(
        &self,
        instance: &WorkflowInstance,
        template: &WorkflowTemplate,
        step: &Step,
        assignees: &[UserId],
    ) -> Vec<UserId> {
        let mut recipients = vec![instance.initiator.clone()];
        for assignee in assignees {
            if let Some(supervisor) = self.directory.supervisor(assignee) {
                recipients.push(supervisor);
            }
        }
        if let Some(def) = template.get_step(&step.step_def_id) {
            if let AssignmentRule::Department { department } = &def.assign_to {
                if let Some(head) = self.directory.department_head(department) {
                    recipients.push(head);
                }
            }
        }
        recipients.sort();
        recipients.dedup();
        recipients
    }

    /// Notification context for step-scoped events
    fn step_context(
        &self,
        instance: &WorkflowInstance,
        step: &Step,
        actor: Option<&UserId>,
    ) -> serde_json::Value {
        let mut context = serde_json::json!({
            "workflow_id": instance.id.to_string(),
            "document_id": instance.document_id.to_string(),
            "step_id": step.id.to_string(),
            "step_name": step.name,
        });
        if let (Some(actor), Some(obj)) = (actor, context.as_object_mut()) {
            obj.insert("actor".into(), serde_json::Value::String(actor.to_string()));
        }
        context
    }

    /// Fire-and-forget delivery; failures are logged, never propagated
    fn send(&self, recipients: &[UserId], template: &str, context: serde_json::Value) {
        if recipients.is_empty() {
            return;
        }
        if let Err(err) = self.dispatcher.notify(recipients, template, &context) {
            tracing::warn!(template, error = %err, "Notification delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::documents::InMemoryDocumentStore;
    use crate::notify::NotifyError;
    use crate::store::InMemoryStore;
    use chrono::Duration;
    use docflow_types::{DeadlineRule, SlaPolicy, StepCondition, StepType, WorkflowStatus};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<(Vec<UserId>, String)>>,
    }

    impl RecordingDispatcher {
        fn count(&self, template: &str) -> usize {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, t)| t == template)
                .count()
        }

        fn recipients_of(&self, template: &str) -> Vec<UserId> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, t)| t == template)
                .flat_map(|(r, _)| r.clone())
                .collect()
        }
    }

    impl NotificationDispatcher for RecordingDispatcher {
        fn notify(
            &self,
            recipients: &[UserId],
            template: &str,
            _context: &serde_json::Value,
        ) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((recipients.to_vec(), template.to_string()));
            Ok(())
        }
    }

    fn users(names: &[&str]) -> Vec<UserId> {
        names.iter().map(|n| UserId::new(*n)).collect()
    }

    fn make_engine() -> (WorkflowEngine, Arc<RecordingDispatcher>) {
        let directory = InMemoryDirectory::new()
            .with_user("alice", "approver", "ops")
            .with_user("bob", "approver", "ops")
            .with_user("carol", "approver", "ops")
            .with_user("dave", "approver", "ops")
            .with_user("erin", "manager", "ops")
            .with_supervisor("alice", "erin")
            .with_department_head("ops", "frank");
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = WorkflowEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryDocumentStore::new().with_document("doc-1")),
            Arc::new(directory),
            dispatcher.clone(),
        );
        (engine, dispatcher)
    }

    fn two_step_template() -> WorkflowTemplate {
        let mut template = WorkflowTemplate::new("Two Step");
        template
            .add_step(
                StepDef::review("draft", "Draft Review").with_assignment(AssignmentRule::user("alice")),
            )
            .unwrap();
        template
            .add_step(
                StepDef::approval("final", "Final Approval")
                    .with_assignment(AssignmentRule::user("bob"))
                    .with_dependency("draft"),
            )
            .unwrap();
        template
    }

    fn step_by_def(engine: &WorkflowEngine, workflow_id: &WorkflowId, def: &str) -> Step {
        engine
            .steps_for(workflow_id)
            .unwrap()
            .into_iter()
            .find(|s| s.step_def_id == StepDefId::new(def))
            .unwrap()
    }

    fn approve(engine: &WorkflowEngine, step_id: &StepId, user: &str) -> WorkflowResult<Step> {
        engine.process_step(step_id, UserId::new(user), DecisionAction::Approve, None, None)
    }

    #[test]
    fn test_start_creates_initial_frontier() {
        let (mut engine, dispatcher) = make_engine();
        let template_id = engine.register_template(two_step_template()).unwrap();

        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        assert!(instance.is_active());

        let steps = engine.steps_for(&instance.id).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step_def_id, StepDefId::new("draft"));
        assert_eq!(steps[0].status, StepStatus::Pending);
        assert_eq!(steps[0].assigned_to, users(&["alice"]));
        assert_eq!(dispatcher.count("step_created"), 1);

        let stored = engine.instance(&instance.id).unwrap();
        assert!(stored.history.iter().any(|e| e.event_type == "workflow_started"));
        assert!(stored.history.iter().any(|e| e.event_type == "step_created"));
    }

    #[test]
    fn test_start_missing_template() {
        let (engine, _) = make_engine();
        let result = engine.start(
            DocumentId::new("doc-1"),
            &TemplateId::new("nonexistent"),
            UserId::new("ivan"),
        );
        assert!(matches!(result, Err(WorkflowError::TemplateNotFound(_))));
    }

    #[test]
    fn test_start_missing_document() {
        let (mut engine, _) = make_engine();
        let template_id = engine.register_template(two_step_template()).unwrap();
        let result = engine.start(
            DocumentId::new("no-such-doc"),
            &template_id,
            UserId::new("ivan"),
        );
        assert!(matches!(result, Err(WorkflowError::DocumentNotFound(_))));
    }

    #[test]
    fn test_two_step_flow_completes_workflow() {
        let (mut engine, dispatcher) = make_engine();
        let template_id = engine
            .register_template(two_step_template().with_completion_notification("review_done"))
            .unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();

        let draft = step_by_def(&engine, &instance.id, "draft");
        approve(&engine, &draft.id, "alice").unwrap();

        // Draft completion unlocks the final step
        let final_step = step_by_def(&engine, &instance.id, "final");
        assert_eq!(final_step.status, StepStatus::Pending);
        assert!(engine.instance(&instance.id).unwrap().is_active());

        approve(&engine, &final_step.id, "bob").unwrap();
        let done = engine.instance(&instance.id).unwrap();
        assert_eq!(done.status, WorkflowStatus::Completed);
        assert!(done.completed_at.is_some());

        assert_eq!(dispatcher.count("step_completed"), 2);
        assert_eq!(dispatcher.count("review_done"), 1);
        assert_eq!(dispatcher.recipients_of("review_done"), users(&["ivan"]));
    }

    #[test]
    fn test_progress_is_idempotent() {
        let (mut engine, _) = make_engine();
        let template_id = engine.register_template(two_step_template()).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();

        engine.progress_workflow(&instance.id).unwrap();
        engine.progress_workflow(&instance.id).unwrap();
        assert_eq!(engine.steps_for(&instance.id).unwrap().len(), 1);

        let draft = step_by_def(&engine, &instance.id, "draft");
        approve(&engine, &draft.id, "alice").unwrap();
        engine.progress_workflow(&instance.id).unwrap();
        engine.progress_workflow(&instance.id).unwrap();
        assert_eq!(engine.steps_for(&instance.id).unwrap().len(), 2);
    }

    #[test]
    fn test_sequential_completion_needs_every_assignee() {
        let (mut engine, _) = make_engine();
        let mut template = WorkflowTemplate::new("Sequential");
        template
            .add_step(
                StepDef::review("review", "Three Way Review")
                    .with_assignment(AssignmentRule::users(users(&["alice", "bob", "carol"]))),
            )
            .unwrap();
        let template_id = engine.register_template(template).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        let step = step_by_def(&engine, &instance.id, "review");

        let after_one = approve(&engine, &step.id, "alice").unwrap();
        assert_eq!(after_one.status, StepStatus::InProgress);
        let after_two = approve(&engine, &step.id, "bob").unwrap();
        assert_eq!(after_two.status, StepStatus::InProgress);

        let after_three = approve(&engine, &step.id, "carol").unwrap();
        assert_eq!(after_three.status, StepStatus::Completed);
        assert_eq!(
            engine.instance(&instance.id).unwrap().status,
            WorkflowStatus::Completed
        );
    }

    #[test]
    fn test_repeat_decider_cannot_complete_sequential_step() {
        let (mut engine, _) = make_engine();
        let mut template = WorkflowTemplate::new("Pair");
        template
            .add_step(
                StepDef::review("review", "Pair Review")
                    .with_assignment(AssignmentRule::users(users(&["alice", "bob"]))),
            )
            .unwrap();
        let template_id = engine.register_template(template).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        let step = step_by_def(&engine, &instance.id, "review");

        approve(&engine, &step.id, "alice").unwrap();
        let after_repeat = approve(&engine, &step.id, "alice").unwrap();
        assert_eq!(after_repeat.status, StepStatus::InProgress);
        assert_eq!(after_repeat.decisions.len(), 2);

        let done = approve(&engine, &step.id, "bob").unwrap();
        assert_eq!(done.status, StepStatus::Completed);
    }

    #[test]
    fn test_parallel_quorum() {
        let (mut engine, _) = make_engine();
        let mut template = WorkflowTemplate::new("Quorum");
        template
            .add_step(
                StepDef::approval("approve", "Board Approval")
                    .with_assignment(AssignmentRule::users(users(&[
                        "alice", "bob", "carol", "dave",
                    ])))
                    .with_quorum(2),
            )
            .unwrap();
        let template_id = engine.register_template(template).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        let step = step_by_def(&engine, &instance.id, "approve");

        approve(&engine, &step.id, "alice").unwrap();
        // A rejection never counts toward the quorum
        let after_reject = engine
            .process_step(
                &step.id,
                UserId::new("bob"),
                DecisionAction::Reject,
                Some("Budget concerns".into()),
                None,
            )
            .unwrap();
        assert_eq!(after_reject.status, StepStatus::InProgress);

        let done = approve(&engine, &step.id, "carol").unwrap();
        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(
            engine.instance(&instance.id).unwrap().status,
            WorkflowStatus::Completed
        );
    }

    #[test]
    fn test_frontier_requires_all_dependencies() {
        let (mut engine, _) = make_engine();
        let mut template = WorkflowTemplate::new("Diamond");
        template
            .add_step(StepDef::review("a", "A").with_assignment(AssignmentRule::user("alice")))
            .unwrap();
        template
            .add_step(StepDef::review("b", "B").with_assignment(AssignmentRule::user("bob")))
            .unwrap();
        template
            .add_step(
                StepDef::sign("c", "C")
                    .with_assignment(AssignmentRule::user("carol"))
                    .with_dependency("a")
                    .with_dependency("b"),
            )
            .unwrap();
        let template_id = engine.register_template(template).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        assert_eq!(engine.steps_for(&instance.id).unwrap().len(), 2);

        let a = step_by_def(&engine, &instance.id, "a");
        approve(&engine, &a.id, "alice").unwrap();
        assert_eq!(engine.steps_for(&instance.id).unwrap().len(), 2);

        let b = step_by_def(&engine, &instance.id, "b");
        approve(&engine, &b.id, "bob").unwrap();
        assert_eq!(engine.steps_for(&instance.id).unwrap().len(), 3);

        let c = step_by_def(&engine, &instance.id, "c");
        approve(&engine, &c.id, "carol").unwrap();
        assert_eq!(
            engine.instance(&instance.id).unwrap().status,
            WorkflowStatus::Completed
        );
    }

    #[test]
    fn test_decision_on_terminal_step_rejected() {
        let (mut engine, _) = make_engine();
        let template_id = engine.register_template(two_step_template()).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        let draft = step_by_def(&engine, &instance.id, "draft");
        approve(&engine, &draft.id, "alice").unwrap();

        let result = approve(&engine, &draft.id, "bob");
        assert!(matches!(result, Err(WorkflowError::StepAlreadyClosed(_))));
    }

    #[test]
    fn test_decision_on_missing_step_rejected() {
        let (engine, _) = make_engine();
        let result = approve(&engine, &StepId::new("nonexistent"), "alice");
        assert!(matches!(result, Err(WorkflowError::StepNotFound(_))));
    }

    #[test]
    fn test_cancel_skips_open_steps() {
        let (mut engine, dispatcher) = make_engine();
        let template_id = engine.register_template(two_step_template()).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();

        engine.cancel_workflow(&instance.id, "Document withdrawn").unwrap();

        let cancelled = engine.instance(&instance.id).unwrap();
        assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
        let draft = step_by_def(&engine, &instance.id, "draft");
        assert_eq!(draft.status, StepStatus::Skipped);
        assert!(draft.skip_reason.as_deref().unwrap().contains("cancelled"));
        assert_eq!(dispatcher.count("workflow_cancelled"), 1);

        // Dead end: no further decisions, no re-cancel
        let result = approve(&engine, &draft.id, "alice");
        assert!(matches!(result, Err(WorkflowError::StepAlreadyClosed(_))));
        let result = engine.cancel_workflow(&instance.id, "Again");
        assert!(matches!(result, Err(WorkflowError::AlreadyTerminal(_))));
    }

    #[test]
    fn test_reassign_step() {
        let (mut engine, dispatcher) = make_engine();
        let template_id = engine.register_template(two_step_template()).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        let draft = step_by_def(&engine, &instance.id, "draft");

        let reassigned = engine
            .reassign_step(&draft.id, users(&["carol", "dave"]))
            .unwrap();
        assert_eq!(reassigned.assigned_to, users(&["carol", "dave"]));
        assert_eq!(reassigned.previous_assignees, vec![users(&["alice"])]);
        assert_eq!(dispatcher.recipients_of("step_reassigned"), users(&["carol", "dave"]));

        // Completion now requires the new assignees
        approve(&engine, &draft.id, "carol").unwrap();
        let done = approve(&engine, &draft.id, "dave").unwrap();
        assert_eq!(done.status, StepStatus::Completed);
    }

    #[test]
    fn test_unresolvable_assignment_creates_unassigned_step() {
        let (mut engine, _) = make_engine();
        let mut template = WorkflowTemplate::new("Orphan");
        template
            .add_step(
                StepDef::review("review", "Review")
                    .with_assignment(AssignmentRule::role("nonexistent-role")),
            )
            .unwrap();
        let template_id = engine.register_template(template).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();

        let step = step_by_def(&engine, &instance.id, "review");
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.assigned_to.is_empty());
    }

    #[test]
    fn test_condition_skip_clears_dependencies() {
        let (mut engine, _) = make_engine();
        let mut template = WorkflowTemplate::new("Conditional");
        template
            .add_step(StepDef::review("intake", "Intake").with_assignment(AssignmentRule::user("alice")))
            .unwrap();
        template
            .add_step(
                StepDef::approval("exec", "Executive Approval")
                    .with_assignment(AssignmentRule::user("bob"))
                    .with_dependency("intake")
                    .with_condition(StepCondition::equals("high_value", serde_json::json!(true))),
            )
            .unwrap();
        let template_id = engine.register_template(template).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        let intake = step_by_def(&engine, &instance.id, "intake");

        let form = serde_json::json!({ "high_value": false });
        engine
            .process_step(
                &intake.id,
                UserId::new("alice"),
                DecisionAction::Approve,
                None,
                Some(form.as_object().unwrap().clone()),
            )
            .unwrap();

        let exec = step_by_def(&engine, &instance.id, "exec");
        assert_eq!(exec.status, StepStatus::Skipped);
        assert_eq!(
            engine.instance(&instance.id).unwrap().status,
            WorkflowStatus::Completed
        );
    }

    #[test]
    fn test_initial_condition_skip_activates_dependents() {
        let (mut engine, _) = make_engine();
        let mut template = WorkflowTemplate::new("Gated Start");
        template
            .add_step(
                StepDef::approval("gate", "High Value Gate")
                    .with_assignment(AssignmentRule::user("alice"))
                    .with_condition(StepCondition::equals("high_value", serde_json::json!(true))),
            )
            .unwrap();
        template
            .add_step(
                StepDef::review("after", "Standard Review")
                    .with_assignment(AssignmentRule::user("bob"))
                    .with_dependency("gate"),
            )
            .unwrap();
        let template_id = engine.register_template(template).unwrap();

        // No form data yet, so the gate is skipped at start; its
        // dependent must still activate rather than wait forever.
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        let gate = step_by_def(&engine, &instance.id, "gate");
        assert_eq!(gate.status, StepStatus::Skipped);
        let after = step_by_def(&engine, &instance.id, "after");
        assert_eq!(after.status, StepStatus::Pending);
        assert!(instance.is_active());

        approve(&engine, &after.id, "bob").unwrap();
        assert_eq!(
            engine.instance(&instance.id).unwrap().status,
            WorkflowStatus::Completed
        );
    }

    #[test]
    fn test_fully_skipped_start_completes_workflow() {
        let (mut engine, _) = make_engine();
        let mut template = WorkflowTemplate::new("All Gated");
        template
            .add_step(
                StepDef::approval("gate", "High Value Gate")
                    .with_assignment(AssignmentRule::user("alice"))
                    .with_condition(StepCondition::equals("high_value", serde_json::json!(true))),
            )
            .unwrap();
        let template_id = engine.register_template(template).unwrap();

        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert_eq!(
            step_by_def(&engine, &instance.id, "gate").status,
            StepStatus::Skipped
        );
    }

    // ── SLA ──────────────────────────────────────────────────────────

    fn sla_template(policy: SlaPolicy) -> WorkflowTemplate {
        let mut template = WorkflowTemplate::new("SLA").with_sla(policy);
        template
            .add_step(
                StepDef::approval("approve", "Approval")
                    .with_assignment(AssignmentRule::user("alice"))
                    .with_deadline(DeadlineRule::Fixed { days: 2 }),
            )
            .unwrap();
        template
    }

    #[test]
    fn test_sla_warning_and_reminder_idempotent() {
        let (mut engine, dispatcher) = make_engine();
        let template_id = engine.register_template(sla_template(SlaPolicy::new(1))).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();

        // Inside the warning window, before the deadline
        let tick = Utc::now() + Duration::days(1) + Duration::hours(1);
        engine.run_sla_check(tick).unwrap();
        engine.run_sla_check(tick).unwrap();

        assert_eq!(dispatcher.count("sla_warning"), 1);
        assert_eq!(dispatcher.count("sla_reminder"), 1);
        let step = step_by_def(&engine, &instance.id, "approve");
        assert!(step.warning_sent);
        assert_eq!(step.reminders_sent, 1);
        assert!(!step.escalated);
    }

    #[test]
    fn test_sla_reminder_outside_warning_window() {
        let (mut engine, dispatcher) = make_engine();
        let mut template = WorkflowTemplate::new("Long Lead").with_sla(SlaPolicy::new(1));
        template
            .add_step(
                StepDef::approval("approve", "Approval")
                    .with_assignment(AssignmentRule::user("alice"))
                    .with_deadline(DeadlineRule::Fixed { days: 10 }),
            )
            .unwrap();
        let template_id = engine.register_template(template).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();

        // Days before the warning threshold bites, the nudge cadence runs
        engine.run_sla_check(Utc::now() + Duration::days(5)).unwrap();

        assert_eq!(dispatcher.count("sla_reminder"), 1);
        assert_eq!(dispatcher.count("sla_warning"), 0);
        let step = step_by_def(&engine, &instance.id, "approve");
        assert_eq!(step.reminders_sent, 1);
        assert!(!step.warning_sent);
    }

    #[test]
    fn test_sla_reminders_capped() {
        let (mut engine, dispatcher) = make_engine();
        let template_id = engine.register_template(sla_template(SlaPolicy::new(1))).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();

        // Daily ticks long past the deadline
        for day in 3..10 {
            engine.run_sla_check(Utc::now() + Duration::days(day)).unwrap();
        }

        let step = step_by_def(&engine, &instance.id, "approve");
        assert_eq!(step.reminders_sent, 3);
        assert_eq!(dispatcher.count("sla_reminder"), 3);
    }

    #[test]
    fn test_sla_escalation_once() {
        let (mut engine, dispatcher) = make_engine();
        let template_id = engine.register_template(sla_template(SlaPolicy::new(1))).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();

        let tick = Utc::now() + Duration::days(3);
        engine.run_sla_check(tick).unwrap();
        engine.run_sla_check(tick).unwrap();
        engine.run_sla_check(tick + Duration::hours(1)).unwrap();

        let step = step_by_def(&engine, &instance.id, "approve");
        assert!(step.escalated);
        assert!(step.escalated_at.is_some());
        assert_eq!(dispatcher.count("sla_escalation"), 1);
        // Initiator plus alice's supervisor
        assert_eq!(dispatcher.recipients_of("sla_escalation"), users(&["erin", "ivan"]));
        // No auto-reassign configured: assignment untouched
        assert_eq!(step.assigned_to, users(&["alice"]));
    }

    #[test]
    fn test_sla_auto_reassign_to_backups() {
        let (mut engine, dispatcher) = make_engine();
        let policy = SlaPolicy::new(1)
            .with_auto_reassign()
            .with_backups(StepType::Approval, users(&["carol", "dave"]));
        let template_id = engine.register_template(sla_template(policy)).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();

        let tick = Utc::now() + Duration::days(3);
        engine.run_sla_check(tick).unwrap();
        engine.run_sla_check(tick).unwrap();

        let step = step_by_def(&engine, &instance.id, "approve");
        assert!(step.escalated);
        assert_eq!(step.assigned_to, users(&["carol", "dave"]));
        assert_eq!(step.previous_assignees, vec![users(&["alice"])]);
        assert_eq!(dispatcher.recipients_of("step_reassigned"), users(&["carol", "dave"]));

        // The backups can now complete the step
        approve(&engine, &step.id, "carol").unwrap();
        let done = approve(&engine, &step.id, "dave").unwrap();
        assert_eq!(done.status, StepStatus::Completed);
    }

    #[test]
    fn test_sla_ignores_steps_without_deadline() {
        let (mut engine, dispatcher) = make_engine();
        let template_id = engine.register_template(two_step_template()).unwrap();
        engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();

        engine.run_sla_check(Utc::now() + Duration::days(30)).unwrap();
        assert_eq!(dispatcher.count("sla_warning"), 0);
        assert_eq!(dispatcher.count("sla_escalation"), 0);
    }

    #[test]
    fn test_sla_ignores_cancelled_workflows() {
        let (mut engine, dispatcher) = make_engine();
        let template_id = engine.register_template(sla_template(SlaPolicy::new(1))).unwrap();
        let instance = engine
            .start(DocumentId::new("doc-1"), &template_id, UserId::new("ivan"))
            .unwrap();
        engine.cancel_workflow(&instance.id, "Withdrawn").unwrap();

        engine.run_sla_check(Utc::now() + Duration::days(3)).unwrap();
        assert_eq!(dispatcher.count("sla_warning"), 0);
        assert_eq!(dispatcher.count("sla_escalation"), 0);
    }
}
