//! Deadline resolution: from abstract rule to absolute timestamp
//!
//! `fixed` rules resolve to `now + days`. `dynamic` rules dispatch to an
//! injected [`DeadlineFormula`] evaluator; when none is configured (or
//! evaluation yields nothing) the step simply has no deadline and is
//! excluded from SLA tracking. That degradation is policy, not an error.

use chrono::{DateTime, Duration, Utc};
use docflow_types::{DeadlineRule, StepDef, WorkflowInstance};

/// Context handed to dynamic deadline formulas
pub struct DeadlineContext<'a> {
    pub workflow: &'a WorkflowInstance,
    pub step_def: &'a StepDef,
}

/// Template-supplied deadline formula evaluator
pub trait DeadlineFormula: Send + Sync {
    fn evaluate(
        &self,
        formula: &str,
        ctx: &DeadlineContext<'_>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>>;
}

/// Computes absolute step deadlines at activation time
#[derive(Default)]
pub struct DeadlineCalculator {
    formula: Option<Box<dyn DeadlineFormula>>,
}

impl DeadlineCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_formula(mut self, formula: Box<dyn DeadlineFormula>) -> Self {
        self.formula = Some(formula);
        self
    }

    /// Resolve a deadline rule, if any, to an absolute timestamp
    pub fn compute(
        &self,
        rule: Option<&DeadlineRule>,
        ctx: &DeadlineContext<'_>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match rule? {
            DeadlineRule::Fixed { days } => Some(now + Duration::days(*days)),
            DeadlineRule::Dynamic { formula } => match &self.formula {
                Some(evaluator) => evaluator.evaluate(formula, ctx, now),
                None => {
                    tracing::debug!(
                        step_def = %ctx.step_def.id,
                        "No deadline formula evaluator configured; step gets no deadline"
                    );
                    None
                }
            },
        }
    }
}
