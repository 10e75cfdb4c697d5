//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::model::EvaluationWindow;

/// Lookback applied when neither the request nor the configuration sets one.
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(300);

/// Boundary post-experiment windows are rounded up to.
pub const DEFAULT_ALIGNMENT: Duration = Duration::from_secs(60);

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a single instant, used for replays and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Inputs for [`compute_window`].
#[derive(Debug, Clone, Copy)]
pub enum WindowParams {
    SteadyState {
        lookback: Option<Duration>,
    },
    PostExperiment {
        experiment_start: DateTime<Utc>,
        experiment_end: DateTime<Utc>,
        recovery_delay: Option<Duration>,
        recovery_duration: Option<Duration>,
    },
}

/// Derive the evaluation interval.
///
/// Steady state ends at `now` and is never aligned. Post-experiment windows start
/// at `experiment_end + recovery_delay` when both recovery values are present,
/// otherwise they cover the experiment itself; their end is rounded up to
/// `alignment` so aligned-only backends still return the last datapoint.
pub fn compute_window(
    params: WindowParams,
    now: DateTime<Utc>,
    alignment: Duration,
) -> Result<EvaluationWindow> {
    match params {
        WindowParams::SteadyState { lookback } => {
            let lookback = to_chrono(lookback.unwrap_or(DEFAULT_LOOKBACK), "lookback")?;
            let end = now;
            let start = end
                .checked_sub_signed(lookback)
                .ok_or_else(|| EngineError::invalid("lookback reaches before the epoch"))?;
            EvaluationWindow::new(start, end)
        }
        WindowParams::PostExperiment {
            experiment_start,
            experiment_end,
            recovery_delay,
            recovery_duration,
        } => {
            let (start, end) = match (recovery_delay, recovery_duration) {
                (Some(delay), Some(duration)) => {
                    let start = experiment_end
                        .checked_add_signed(to_chrono(delay, "recoveryDelay")?)
                        .ok_or_else(|| EngineError::invalid("recoveryDelay is out of range"))?;
                    let end = start
                        .checked_add_signed(to_chrono(duration, "recoveryDuration")?)
                        .ok_or_else(|| EngineError::invalid("recoveryDuration is out of range"))?;
                    (start, end)
                }
                _ => {
                    if recovery_delay.is_some() || recovery_duration.is_some() {
                        debug!("recovery window ignored; both delay and duration are required");
                    }
                    (experiment_start, experiment_end)
                }
            };
            let end = ceil_to(end, alignment)?;
            EvaluationWindow::new(start, end)
        }
    }
}

/// Round `time` up to the next multiple of `step` since the Unix epoch.
/// Times already on a boundary are returned unchanged.
pub fn ceil_to(time: DateTime<Utc>, step: Duration) -> Result<DateTime<Utc>> {
    let step_micros = i64::try_from(step.as_micros())
        .map_err(|_| EngineError::invalid("alignment is too large"))?;
    if step_micros == 0 {
        return Ok(time);
    }
    let remainder = time.timestamp_micros().rem_euclid(step_micros);
    if remainder == 0 {
        return Ok(time);
    }
    let delta = chrono::Duration::microseconds(step_micros - remainder);
    let aligned = time.checked_add_signed(delta);
    aligned.ok_or_else(|| EngineError::invalid("aligned window end is out of range"))
}

fn to_chrono(value: Duration, field: &str) -> Result<chrono::Duration> {
    chrono::Duration::from_std(value)
        .map_err(|_| EngineError::invalid(format!("{field} is out of range")))
}
