//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! Experiment test documents carried by the calling workflow.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use crate::error::Result;
use crate::request::{parse_json, CheckSet, EvaluationMode, EvaluationRequest, ExperimentWindow};

const STEADY_STATE_REFERENCE: &str = "steadyState";

/// Hypothesis checks: an explicit check set, or a reuse of the steady-state checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HypothesisInput", into = "HypothesisInput")]
pub enum HypothesisChecks {
    SteadyState,
    Checks(CheckSet),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum HypothesisInput {
    Reference(String),
    Checks(CheckSet),
}

impl TryFrom<HypothesisInput> for HypothesisChecks {
    type Error = String;

    fn try_from(input: HypothesisInput) -> std::result::Result<Self, Self::Error> {
        match input {
            HypothesisInput::Reference(name) if name == STEADY_STATE_REFERENCE => {
                Ok(HypothesisChecks::SteadyState)
            }
            HypothesisInput::Reference(name) => Err(format!(
                "hypothesis must be a check set or \"{STEADY_STATE_REFERENCE}\", got \"{name}\""
            )),
            HypothesisInput::Checks(checks) => Ok(HypothesisChecks::Checks(checks)),
        }
    }
}

impl From<HypothesisChecks> for HypothesisInput {
    fn from(checks: HypothesisChecks) -> Self {
        match checks {
            HypothesisChecks::SteadyState => {
                HypothesisInput::Reference(STEADY_STATE_REFERENCE.to_owned())
            }
            HypothesisChecks::Checks(checks) => HypothesisInput::Checks(checks),
        }
    }
}

/// A complete chaos test: what must hold before and after the fault.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_description: Option<String>,
    pub steady_state: CheckSet,
    pub hypothesis: HypothesisChecks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub lookback: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub recovery_delay: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub recovery_duration: Option<Duration>,
    #[serde(default, alias = "rangeQueryEndpoint", skip_serializing_if = "Option::is_none")]
    pub prometheus_url: Option<String>,
}

impl ExperimentDefinition {
    pub fn from_json(input: &str) -> Result<Self> {
        parse_json(input)
    }

    /// Checks the hypothesis is judged against, with the reference resolved.
    pub fn hypothesis_checks(&self) -> &CheckSet {
        match &self.hypothesis {
            HypothesisChecks::SteadyState => &self.steady_state,
            HypothesisChecks::Checks(checks) => checks,
        }
    }

    pub fn steady_state_request(&self) -> EvaluationRequest {
        EvaluationRequest {
            mode: EvaluationMode::SteadyState,
            lookback: self.lookback,
            experiment_window: None,
            recovery_delay: None,
            recovery_duration: None,
            checks: self.steady_state.clone(),
            range_query_endpoint: self.prometheus_url.clone(),
        }
    }

    pub fn hypothesis_request(&self, experiment_window: ExperimentWindow) -> EvaluationRequest {
        EvaluationRequest {
            mode: EvaluationMode::PostExperiment,
            lookback: None,
            experiment_window: Some(experiment_window),
            recovery_delay: self.recovery_delay,
            recovery_duration: self.recovery_duration,
            checks: self.hypothesis_checks().clone(),
            range_query_endpoint: self.prometheus_url.clone(),
        }
    }
}
