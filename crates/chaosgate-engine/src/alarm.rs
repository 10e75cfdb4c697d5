//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! Current-state and transition-history judgement of named alarms.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chaosgate_metrics::EvaluationMetrics;
use futures::future::join_all;
use indexmap::IndexSet;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::model::{AlarmCheck, AlarmHistory, AlarmState, EvaluationWindow};

const BACKEND: &str = "alarm";

/// Transport for the alarm backend. Simple and composite alarms share one namespace.
#[async_trait]
pub trait AlarmClient: Send + Sync {
    /// Present state of the named alarms. Unknown names are omitted.
    async fn describe_alarms(&self, names: &[String]) -> anyhow::Result<Vec<AlarmState>>;

    /// State transitions of one alarm inside `window`, oldest first.
    async fn alarm_history(
        &self,
        name: &str,
        window: EvaluationWindow,
    ) -> anyhow::Result<AlarmHistory>;
}

/// Alarms that refuted the claim, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmOutcome {
    pub violating: IndexSet<String>,
}

impl AlarmOutcome {
    /// `steady` for current-state checks, `clean` for history checks.
    pub fn is_clean(&self) -> bool {
        self.violating.is_empty()
    }
}

#[derive(Clone)]
pub struct AlarmEvaluator {
    client: Arc<dyn AlarmClient>,
    timeout: Duration,
    metrics: Option<EvaluationMetrics>,
}

impl AlarmEvaluator {
    pub fn new(client: Arc<dyn AlarmClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: EvaluationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Any alarm currently in `ALARM` or `INSUFFICIENT_DATA` violates.
    pub async fn evaluate_current(&self, alarms: &[AlarmCheck]) -> Result<AlarmOutcome> {
        if alarms.is_empty() {
            return Ok(AlarmOutcome::default());
        }
        let names: Vec<String> = alarms.iter().map(|a| a.name().to_owned()).collect();
        let states = self.call(self.client.describe_alarms(&names)).await?;
        debug!(states = ?states, "current alarm states");

        let mut violating = IndexSet::new();
        for alarm in alarms {
            match states.iter().find(|state| state.name == alarm.name()) {
                Some(state) if state.state.is_bad() => {
                    info!(
                        alarm = alarm.name(),
                        state = ?state.state,
                        "alarm is not in steady state"
                    );
                    violating.insert(alarm.name().to_owned());
                }
                Some(_) => {}
                None => warn!(alarm = alarm.name(), "alarm not returned by backend"),
            }
        }
        Ok(AlarmOutcome { violating })
    }

    /// An alarm violates when it moved from `OK` to `ALARM` inside the window.
    pub async fn evaluate_history(
        &self,
        alarms: &[AlarmCheck],
        window: EvaluationWindow,
    ) -> Result<AlarmOutcome> {
        if alarms.is_empty() {
            return Ok(AlarmOutcome::default());
        }
        info!(
            start = %window.start(),
            end = %window.end(),
            alarms = alarms.len(),
            "retrieving alarm history"
        );
        let lookups = alarms
            .iter()
            .map(|alarm| self.call(self.client.alarm_history(alarm.name(), window)));
        let histories = join_all(lookups).await;

        let mut violating = IndexSet::new();
        for (alarm, history) in alarms.iter().zip(histories) {
            let history = history?;
            debug!(alarm = alarm.name(), transitions = ?history.transitions, "alarm history");
            let tripped = history.transitions.iter().any(|transition| {
                window.contains(transition.timestamp) && transition.is_ok_to_alarm()
            });
            if tripped {
                info!(
                    alarm = alarm.name(),
                    "alarm went from OK to ALARM during the window"
                );
                violating.insert(alarm.name().to_owned());
            }
        }
        Ok(AlarmOutcome { violating })
    }

    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> Result<T> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, fut).await;
        let success = matches!(outcome, Ok(Ok(_)));
        if let Some(metrics) = &self.metrics {
            metrics.observe_backend(BACKEND, success, started.elapsed());
        }
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(error = %format!("{err:#}"), "alarm backend call failed");
                Err(EngineError::backend(BACKEND, &err))
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "alarm backend call timed out"
                );
                Err(EngineError::timeout(BACKEND, self.timeout))
            }
        }
    }
}

impl std::fmt::Debug for AlarmEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmEvaluator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
