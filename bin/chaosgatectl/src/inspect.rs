//! ---
//! cg_section: "04-interfaces"
//! cg_subsection: "binary"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Control CLI for validating and running chaosgate evaluations."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chaosgate_common::EngineConfig;
use chaosgate_engine::{
    compute_window, partition, EvaluationRequest, ExperimentDefinition, ExperimentWindow,
    MetricFormat, Specification, Timing,
};
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args};

pub(crate) fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("unable to read {}", path.display()))
}

pub(crate) fn read_definition(path: &Path) -> Result<ExperimentDefinition> {
    ExperimentDefinition::from_json(&read_document(path)?)
        .with_context(|| format!("invalid experiment definition {}", path.display()))
}

pub(crate) fn prepare(request: EvaluationRequest, config: &EngineConfig) -> Result<Specification> {
    Ok(Specification::from_request(
        request,
        config.range_query.endpoint.as_deref(),
    )?)
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("input").required(true).args(["spec", "definition"])))]
pub struct ValidateCommand {
    /// Evaluation request document (JSON).
    #[arg(long, value_name = "FILE")]
    spec: Option<PathBuf>,
    /// Experiment definition document (JSON).
    #[arg(long, value_name = "FILE")]
    definition: Option<PathBuf>,
}

impl ValidateCommand {
    pub fn execute(&self, config: &EngineConfig) -> Result<()> {
        if let Some(path) = &self.spec {
            let request = EvaluationRequest::from_json(&read_document(path)?)
                .with_context(|| format!("invalid evaluation request {}", path.display()))?;
            print_summary("request", &prepare(request, config)?);
        }
        if let Some(path) = &self.definition {
            let definition = read_definition(path)?;
            if let Some(test_id) = &definition.test_id {
                println!("test: {test_id}");
            }
            print_summary(
                "steadyState",
                &prepare(definition.steady_state_request(), config)?,
            );
            // Only the checks matter here; any window would do.
            let now = Utc::now();
            let placeholder = ExperimentWindow { start: now, end: now };
            print_summary(
                "hypothesis",
                &prepare(definition.hypothesis_request(placeholder), config)?,
            );
        }
        println!("valid");
        Ok(())
    }
}

fn print_summary(label: &str, spec: &Specification) {
    println!("[{label}]");
    println!("mode: {}", spec.mode());
    match spec.timing() {
        Timing::Lookback(Some(lookback)) => println!("lookback: {}s", lookback.as_secs()),
        Timing::Lookback(None) => println!("lookback: default"),
        Timing::Experiment {
            recovery_delay,
            recovery_duration,
            ..
        } => match (recovery_delay, recovery_duration) {
            (Some(delay), Some(duration)) => println!(
                "recovery: delay {}s, duration {}s",
                delay.as_secs(),
                duration.as_secs()
            ),
            _ => println!("recovery: experiment window"),
        },
    }
    for format in MetricFormat::ALL {
        let ids: Vec<_> = partition(spec.metrics(), format)
            .iter()
            .map(|query| {
                if query.check.is_expression() {
                    format!("{} (expression)", query.id())
                } else {
                    query.id().to_owned()
                }
            })
            .collect();
        if !ids.is_empty() {
            println!("{format}: {}", ids.join(", "));
        }
    }
    if !spec.alarms().is_empty() {
        let names: Vec<_> = spec.alarms().iter().map(|alarm| alarm.name()).collect();
        println!("alarms: {}", names.join(", "));
    }
    if let Some(endpoint) = spec.range_query_endpoint() {
        println!("rangeQueryEndpoint: {endpoint}");
    }
}

#[derive(Debug, Args)]
pub struct WindowCommand {
    /// Experiment definition document (JSON).
    #[arg(long, value_name = "FILE")]
    definition: PathBuf,
    /// Observed experiment start (RFC 3339).
    #[arg(long, value_name = "RFC3339")]
    start: DateTime<Utc>,
    /// Observed experiment end (RFC 3339).
    #[arg(long, value_name = "RFC3339")]
    end: DateTime<Utc>,
}

impl WindowCommand {
    pub fn execute(&self, config: &EngineConfig) -> Result<()> {
        let definition = read_definition(&self.definition)?;
        let request = definition.hypothesis_request(ExperimentWindow {
            start: self.start,
            end: self.end,
        });
        let spec = prepare(request, config)?;
        let window = compute_window(
            spec.window_params(config.evaluation.default_lookback),
            Utc::now(),
            config.evaluation.alignment,
        )?;
        println!("{}", serde_json::to_string_pretty(&window)?);
        Ok(())
    }
}
