//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Metric source capability and per-backend adapters."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! Uniform query interface over the monitoring backends.
//!
//! Each backend implements [`MetricSource`] and is registered by its
//! [`MetricFormat`]. [`MetricSourceAdapter`] is the single entry point the
//! engine uses: it partitions checks, bounds every call with a timeout, maps
//! transport faults into [`EngineError::BackendUnavailable`], and normalises the
//! response to exactly one [`TimeSeriesResult`] per requested check.

pub mod native;
pub mod range;
pub mod recorded;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chaosgate_metrics::EvaluationMetrics;
use indexmap::IndexMap;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{EngineError, Result};
use crate::model::{EvaluationWindow, MetricCheck, MetricFormat, TimeSeriesResult};
use crate::partition::{partition, MetricQuery};

pub use native::{MetricDataResult, NativeMetricClient, NativeMetricSource};
pub use range::RangeQuerySource;
pub use recorded::RecordedBackend;

/// Everything a backend needs to run one partition.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub queries: &'a [MetricQuery<'a>],
    pub window: EvaluationWindow,
    /// Base URL for backends addressed per specification.
    pub endpoint: Option<&'a Url>,
}

/// A monitoring backend able to answer metric checks over a window.
#[async_trait]
pub trait MetricSource: Send + Sync {
    fn format(&self) -> MetricFormat;

    /// Return series for the requested checks. Missing ids are allowed; the
    /// adapter fills them with empty series.
    async fn fetch(&self, request: FetchRequest<'_>) -> anyhow::Result<Vec<TimeSeriesResult>>;
}

/// How the adapter treats a check that came back without samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesPolicy {
    /// Steady-state gate: evidence must exist.
    RequireSamples,
    /// Hypothesis check: an empty series is judged downstream.
    AllowEmpty,
}

/// Registry of sources keyed by format.
#[derive(Clone)]
pub struct MetricSourceAdapter {
    sources: IndexMap<MetricFormat, Arc<dyn MetricSource>>,
    timeout: Duration,
    metrics: Option<EvaluationMetrics>,
}

impl MetricSourceAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sources: IndexMap::new(),
            timeout,
            metrics: None,
        }
    }

    /// Register a source, replacing any previous one for the same format.
    pub fn with_source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.sources.insert(source.format(), source);
        self
    }

    pub fn with_metrics(mut self, metrics: EvaluationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn has_source(&self, format: MetricFormat) -> bool {
        self.sources.contains_key(&format)
    }

    pub fn formats(&self) -> impl Iterator<Item = MetricFormat> + '_ {
        self.sources.keys().copied()
    }

    /// Fetch every check declared for `format`.
    ///
    /// Returns an empty vector without touching the backend when no check
    /// targets `format`.
    pub async fn fetch(
        &self,
        checks: &[MetricCheck],
        format: MetricFormat,
        window: EvaluationWindow,
        endpoint: Option<&Url>,
        policy: SeriesPolicy,
    ) -> Result<Vec<TimeSeriesResult>> {
        let queries = partition(checks, format);
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let source = self
            .sources
            .get(&format)
            .ok_or(EngineError::NotConfigured {
                backend: format.as_str(),
            })?;

        info!(
            backend = format.as_str(),
            checks = queries.len(),
            start = %window.start(),
            end = %window.end(),
            "retrieving metrics"
        );
        let request = FetchRequest {
            queries: &queries,
            window,
            endpoint,
        };
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, source.fetch(request)).await;
        let elapsed = started.elapsed();

        let raw = match outcome {
            Ok(Ok(results)) => {
                self.observe(format, true, elapsed);
                results
            }
            Ok(Err(err)) => {
                self.observe(format, false, elapsed);
                warn!(
                    backend = format.as_str(),
                    error = %format!("{err:#}"),
                    "metric fetch failed"
                );
                return Err(EngineError::backend(format.as_str(), &err));
            }
            Err(_) => {
                self.observe(format, false, elapsed);
                warn!(
                    backend = format.as_str(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "metric fetch timed out"
                );
                return Err(EngineError::timeout(format.as_str(), self.timeout));
            }
        };

        let results = align_results(&queries, raw);
        debug!(backend = format.as_str(), results = ?results, "fetched metric series");

        if policy == SeriesPolicy::RequireSamples {
            if let Some(empty) = results.iter().find(|result| result.is_empty()) {
                return Err(EngineError::EmptySeries {
                    id: empty.id.clone(),
                });
            }
        }
        Ok(results)
    }

    fn observe(&self, format: MetricFormat, success: bool, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_backend(format.as_str(), success, elapsed);
        }
    }
}

impl std::fmt::Debug for MetricSourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSourceAdapter")
            .field("formats", &self.sources.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// One result per query, in query order. Unrequested ids are dropped.
fn align_results(queries: &[MetricQuery<'_>], raw: Vec<TimeSeriesResult>) -> Vec<TimeSeriesResult> {
    let mut by_id: IndexMap<String, TimeSeriesResult> = IndexMap::with_capacity(raw.len());
    for result in raw {
        if !queries.iter().any(|query| query.id() == result.id) {
            debug!(id = %result.id, "dropping series for an id that was not requested");
            continue;
        }
        by_id.entry(result.id.clone()).or_insert(result);
    }
    queries
        .iter()
        .map(|query| {
            by_id
                .shift_remove(query.id())
                .unwrap_or_else(|| TimeSeriesResult::empty(query.id()))
        })
        .collect()
}
