//! ---
//! cg_section: "03-observability"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Metrics collection and export utilities."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

/// Shared registry type used across crates.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every family in the registry using the text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&families)
        .map_err(|err| {
            error!(error = %err, "failed to encode metrics");
            err
        })
        .context("metrics encoding error")
}

/// Metrics published by the evaluation engine.
#[derive(Clone)]
pub struct EvaluationMetrics {
    registry: SharedRegistry,
    evaluations_total: IntCounterVec,
    backend_requests_total: IntCounterVec,
    backend_request_seconds: HistogramVec,
    failing_checks_total: IntCounterVec,
}

impl EvaluationMetrics {
    /// Register the evaluation metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let evaluations_total = IntCounterVec::new(
            Opts::new(
                "chaosgate_evaluations_total",
                "Completed evaluations by mode and verdict",
            ),
            &["mode", "verdict"],
        )?;
        registry.register(Box::new(evaluations_total.clone()))?;

        let backend_requests_total = IntCounterVec::new(
            Opts::new(
                "chaosgate_backend_requests_total",
                "Calls issued to monitoring backends by outcome",
            ),
            &["backend", "outcome"],
        )?;
        registry.register(Box::new(backend_requests_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "chaosgate_backend_request_seconds",
            "Latency of monitoring backend calls",
        )
        .buckets(prometheus::exponential_buckets(0.005, 2.0, 12)?);
        let backend_request_seconds = HistogramVec::new(histogram_opts, &["backend"])?;
        registry.register(Box::new(backend_request_seconds.clone()))?;

        let failing_checks_total = IntCounterVec::new(
            Opts::new(
                "chaosgate_failing_checks_total",
                "Checks that refuted a steady state or hypothesis, by category",
            ),
            &["category"],
        )?;
        registry.register(Box::new(failing_checks_total.clone()))?;

        Ok(Self {
            registry,
            evaluations_total,
            backend_requests_total,
            backend_request_seconds,
            failing_checks_total,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Count a finished evaluation.
    pub fn record_evaluation(&self, mode: &str, verdict: &str) {
        self.evaluations_total
            .with_label_values(&[mode, verdict])
            .inc();
    }

    /// Record one backend call and its latency.
    pub fn observe_backend(&self, backend: &str, success: bool, elapsed: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.backend_requests_total
            .with_label_values(&[backend, outcome])
            .inc();
        self.backend_request_seconds
            .with_label_values(&[backend])
            .observe(elapsed.as_secs_f64());
    }

    /// Add the number of checks that refuted the claim for a category.
    pub fn record_failing_checks(&self, category: &str, count: usize) {
        if count == 0 {
            return;
        }
        self.failing_checks_total
            .with_label_values(&[category])
            .inc_by(count as u64);
    }
}

impl std::fmt::Debug for EvaluationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;
