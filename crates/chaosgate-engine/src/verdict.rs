//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! Business outcomes of an evaluation.
//!
//! A failed steady state and an unsupported hypothesis are values, not
//! [`EngineError`](crate::error::EngineError)s. Use
//! [`SteadyStateVerdict::into_result`] to turn a failed gate into an error
//! when aborting the caller.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::MetricFormat;
use crate::request::EvaluationMode;

/// Group of checks judged together, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckCategory {
    NativeMetric,
    RangeQuery,
    Alarms,
}

impl CheckCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckCategory::NativeMetric => "nativeMetric",
            CheckCategory::RangeQuery => "rangeQuery",
            CheckCategory::Alarms => "alarms",
        }
    }
}

impl From<MetricFormat> for CheckCategory {
    fn from(format: MetricFormat) -> Self {
        match format {
            MetricFormat::NativeMetric => CheckCategory::NativeMetric,
            MetricFormat::RangeQuery => CheckCategory::RangeQuery,
        }
    }
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    /// At least one expression had a zero sample.
    ExpressionsFalse,
    /// No expression carried any samples.
    NoExpressionFound,
    /// An alarm is in a bad state, or tripped during the window.
    AlarmsViolating,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::ExpressionsFalse => "expressions not satisfied",
            FailureReason::NoExpressionFound => "no expression found",
            FailureReason::AlarmsViolating => "alarms not in steady state",
        })
    }
}

/// Why a steady-state gate failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("steady state not confirmed, {reason} ({category}): [{}]", .violating_checks.join(", "))]
pub struct SteadyStateFailure {
    pub reason: FailureReason,
    pub category: CheckCategory,
    pub violating_checks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SteadyStateVerdict {
    Confirmed,
    Failed(SteadyStateFailure),
}

impl SteadyStateVerdict {
    pub(crate) fn failed(
        reason: FailureReason,
        category: CheckCategory,
        violating_checks: impl IntoIterator<Item = String>,
    ) -> Self {
        SteadyStateVerdict::Failed(SteadyStateFailure {
            reason,
            category,
            violating_checks: violating_checks.into_iter().collect(),
        })
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, SteadyStateVerdict::Confirmed)
    }

    /// Hard-gate view: a failed steady state becomes an error.
    pub fn into_result(self) -> Result<(), SteadyStateFailure> {
        match self {
            SteadyStateVerdict::Confirmed => Ok(()),
            SteadyStateVerdict::Failed(failure) => Err(failure),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SteadyStateVerdict::Confirmed => "confirmed",
            SteadyStateVerdict::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HypothesisOutcome {
    Supported,
    NotSupported,
}

/// Classification of a finished experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HypothesisVerdict {
    pub outcome: HypothesisOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refuted_by: Option<CheckCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failing_checks: Vec<String>,
}

impl HypothesisVerdict {
    pub fn supported() -> Self {
        Self {
            outcome: HypothesisOutcome::Supported,
            refuted_by: None,
            reason: None,
            failing_checks: Vec::new(),
        }
    }

    pub(crate) fn not_supported(
        category: CheckCategory,
        reason: FailureReason,
        failing_checks: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            outcome: HypothesisOutcome::NotSupported,
            refuted_by: Some(category),
            reason: Some(reason),
            failing_checks: failing_checks.into_iter().collect(),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.outcome == HypothesisOutcome::Supported
    }

    pub fn label(&self) -> &'static str {
        match self.outcome {
            HypothesisOutcome::Supported => "supported",
            HypothesisOutcome::NotSupported => "notSupported",
        }
    }
}

/// Result of [`EvaluationEngine::evaluate`](crate::engine::EvaluationEngine::evaluate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Verdict {
    SteadyState(SteadyStateVerdict),
    PostExperiment(HypothesisVerdict),
}

impl Verdict {
    pub fn mode(&self) -> EvaluationMode {
        match self {
            Verdict::SteadyState(_) => EvaluationMode::SteadyState,
            Verdict::PostExperiment(_) => EvaluationMode::PostExperiment,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::SteadyState(verdict) => verdict.label(),
            Verdict::PostExperiment(verdict) => verdict.label(),
        }
    }

    /// True when the calling workflow must stop here.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Verdict::SteadyState(SteadyStateVerdict::Failed(_)))
    }
}
