//! ---
//! cg_section: "04-interfaces"
//! cg_subsection: "binary"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Control CLI for validating and running chaosgate evaluations."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chaosgate_common::EngineConfig;
use chaosgate_engine::{
    EngineBuilder, EvaluationRequest, ExperimentWindow, FixedClock, RecordedBackend,
};
use chaosgate_metrics::{encode_text, new_registry, EvaluationMetrics};
use chrono::{DateTime, Utc};
use clap::{ArgAction, ArgGroup, Args, ValueEnum};
use tracing::info;

use crate::inspect::{read_definition, read_document};

/// Exit status for a steady state that was not confirmed.
const GATE_FAILED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Phase {
    SteadyState,
    Hypothesis,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("input").required(true).args(["spec", "definition"])))]
pub struct EvaluateCommand {
    /// Evaluation request document (JSON).
    #[arg(long, value_name = "FILE")]
    spec: Option<PathBuf>,
    /// Experiment definition document (JSON); requires --phase.
    #[arg(long, value_name = "FILE", requires = "phase")]
    definition: Option<PathBuf>,
    /// Which half of the definition to evaluate.
    #[arg(long, value_enum, requires = "definition")]
    phase: Option<Phase>,
    /// Observed experiment start (RFC 3339), for the hypothesis phase.
    #[arg(long, value_name = "RFC3339", requires = "end")]
    start: Option<DateTime<Utc>>,
    /// Observed experiment end (RFC 3339), for the hypothesis phase.
    #[arg(long, value_name = "RFC3339", requires = "start")]
    end: Option<DateTime<Utc>>,
    /// Replay native-metric and alarm responses from a recording (JSON).
    #[arg(long, value_name = "FILE")]
    recorded: Option<PathBuf>,
    /// Freeze the clock used for steady-state windows (RFC 3339).
    #[arg(long, value_name = "RFC3339")]
    now: Option<DateTime<Utc>>,
    /// Print evaluation metrics to stderr after the verdict.
    #[arg(long = "emit-metrics", action = ArgAction::SetTrue)]
    emit_metrics: bool,
}

impl EvaluateCommand {
    fn request(&self) -> Result<EvaluationRequest> {
        if let Some(path) = &self.spec {
            return EvaluationRequest::from_json(&read_document(path)?)
                .with_context(|| format!("invalid evaluation request {}", path.display()));
        }
        let path = self
            .definition
            .as_ref()
            .ok_or_else(|| anyhow!("either --spec or --definition is required"))?;
        let definition = read_definition(path)?;
        match self.phase {
            Some(Phase::SteadyState) => Ok(definition.steady_state_request()),
            Some(Phase::Hypothesis) => match (self.start, self.end) {
                (Some(start), Some(end)) => {
                    Ok(definition.hypothesis_request(ExperimentWindow { start, end }))
                }
                _ => Err(anyhow!("--start and --end are required for the hypothesis phase")),
            },
            None => Err(anyhow!("--phase is required with --definition")),
        }
    }

    pub async fn execute(&self, config: &EngineConfig) -> Result<ExitCode> {
        let mut builder = EngineBuilder::from_config(config)?;
        if let Some(path) = &self.recorded {
            let backend = Arc::new(RecordedBackend::from_path(path)?);
            builder = builder
                .with_native_client(backend.clone())
                .with_alarm_client(backend);
        }
        if let Some(now) = self.now {
            builder = builder.with_clock(FixedClock(now));
        }
        let registry = new_registry();
        if self.emit_metrics && config.metrics.enabled {
            builder = builder.with_metrics(EvaluationMetrics::new(registry.clone())?);
        }
        let engine = builder.build();
        let spec = engine.prepare(self.request()?)?;

        let verdict = engine.evaluate(&spec).await?;
        info!(mode = %verdict.mode(), verdict = verdict.label(), "evaluation finished");
        println!("{}", serde_json::to_string_pretty(&verdict)?);

        if self.emit_metrics {
            eprint!("{}", encode_text(&registry)?);
        }
        if verdict.is_blocking() {
            return Ok(ExitCode::from(GATE_FAILED));
        }
        Ok(ExitCode::SUCCESS)
    }
}
