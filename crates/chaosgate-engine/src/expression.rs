//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use indexmap::IndexSet;
use tracing::{debug, info};

use crate::model::{MetricCheck, Sample, TimeSeriesResult};

/// Judgement of the expression checks in one category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionOutcome {
    /// Expression ids that were judged, in declaration order.
    pub evaluated: IndexSet<String>,
    /// Expressions with at least one zero sample.
    pub failing: IndexSet<String>,
    /// Expressions whose series came back empty.
    pub missing: IndexSet<String>,
}

impl ExpressionOutcome {
    /// True iff at least one expression was judged and none refuted the claim.
    pub fn supported(&self) -> bool {
        self.found_expression() && self.failing.is_empty() && self.missing.is_empty()
    }

    /// An expression with an empty series carries no evidence either way.
    pub fn found_expression(&self) -> bool {
        self.evaluated.len() > self.missing.len()
    }

    pub fn no_expression_found(&self) -> bool {
        !self.found_expression()
    }
}

/// A series supports the claim when it is non-empty and has no exact zero.
pub fn judge_series(samples: &[Sample]) -> bool {
    !samples.is_empty() && samples.iter().all(|sample| sample.value != 0.0)
}

/// Judge every expression-role result. Raw results feed expressions on the
/// backend and are only logged.
pub fn evaluate(checks: &[MetricCheck], results: &[TimeSeriesResult]) -> ExpressionOutcome {
    let mut outcome = ExpressionOutcome::default();
    for result in results {
        let Some(check) = checks.iter().find(|check| check.id() == result.id) else {
            debug!(id = %result.id, "ignoring result for an undeclared check");
            continue;
        };
        if !check.is_expression() {
            debug!(id = %result.id, samples = result.samples.len(), "raw metric result");
            continue;
        }

        debug!(id = %result.id, samples = ?result.samples, "evaluating expression");
        outcome.evaluated.insert(result.id.clone());
        if result.is_empty() {
            info!(id = %result.id, "expression returned no samples");
            outcome.missing.insert(result.id.clone());
        } else if !judge_series(&result.samples) {
            info!(id = %result.id, "expression is false (0) and does not support the claim");
            outcome.failing.insert(result.id.clone());
        }
    }
    if outcome.no_expression_found() {
        info!("no expression found");
    }
    outcome
}
