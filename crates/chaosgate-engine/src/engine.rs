//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! Verdict aggregation over every backend.
//!
//! Categories are fetched concurrently but always judged in the same order:
//! native-metric expressions, range-query expressions, then alarms. A category
//! with no declared checks is skipped. A fetch error in a later category is only
//! reported when every earlier category supported the claim.

use std::sync::Arc;
use std::time::Duration;

use chaosgate_common::{EngineConfig, EvaluationConfig};
use chaosgate_metrics::EvaluationMetrics;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::alarm::{AlarmClient, AlarmEvaluator, AlarmOutcome};
use crate::error::{EngineError, Result};
use crate::expression::{self, ExpressionOutcome};
use crate::model::{AlarmCheck, EvaluationWindow, MetricFormat, TimeSeriesResult};
use crate::request::{EvaluationMode, EvaluationRequest, Specification};
use crate::source::{
    MetricSource, MetricSourceAdapter, NativeMetricClient, NativeMetricSource, RangeQuerySource,
    SeriesPolicy,
};
use crate::verdict::{CheckCategory, FailureReason, HypothesisVerdict, SteadyStateVerdict, Verdict};
use crate::window::{compute_window, Clock, SystemClock, DEFAULT_ALIGNMENT, DEFAULT_LOOKBACK};

/// Tunables resolved from `[evaluation]` and `[range_query]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationSettings {
    pub default_lookback: Duration,
    pub backend_timeout: Duration,
    pub alignment: Duration,
    pub default_step: String,
    pub default_range_endpoint: Option<String>,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            default_lookback: DEFAULT_LOOKBACK,
            backend_timeout: Duration::from_secs(10),
            alignment: DEFAULT_ALIGNMENT,
            default_step: "60s".into(),
            default_range_endpoint: None,
        }
    }
}

impl From<&EvaluationConfig> for EvaluationSettings {
    fn from(config: &EvaluationConfig) -> Self {
        Self {
            default_lookback: config.default_lookback,
            backend_timeout: config.backend_timeout,
            alignment: config.alignment,
            default_step: config.default_step.clone(),
            default_range_endpoint: None,
        }
    }
}

/// Assembles an [`EvaluationEngine`] from injected backend handles.
pub struct EngineBuilder {
    settings: EvaluationSettings,
    sources: Vec<Arc<dyn MetricSource>>,
    alarm_client: Option<Arc<dyn AlarmClient>>,
    clock: Arc<dyn Clock>,
    metrics: Option<EvaluationMetrics>,
}

impl EngineBuilder {
    pub fn new(settings: EvaluationSettings) -> Self {
        Self {
            settings,
            sources: Vec::new(),
            alarm_client: None,
            clock: Arc::new(SystemClock),
            metrics: None,
        }
    }

    /// Settings plus an HTTP range-query source built from the configuration.
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let mut settings = EvaluationSettings::from(&config.evaluation);
        settings.default_range_endpoint = config.range_query.endpoint.clone();
        let range = RangeQuerySource::new(
            &config.range_query.user_agent,
            settings.default_step.clone(),
        )?;
        Ok(Self::new(settings).with_range_source(range))
    }

    pub fn with_native_client(self, client: Arc<dyn NativeMetricClient>) -> Self {
        self.with_source(Arc::new(NativeMetricSource::new(client)))
    }

    pub fn with_range_source(self, source: RangeQuerySource) -> Self {
        self.with_source(Arc::new(source))
    }

    /// Register any [`MetricSource`]; a later source replaces an earlier one of the same format.
    pub fn with_source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_alarm_client(mut self, client: Arc<dyn AlarmClient>) -> Self {
        self.alarm_client = Some(client);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_metrics(mut self, metrics: EvaluationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> EvaluationEngine {
        let timeout = self.settings.backend_timeout;
        let mut sources = MetricSourceAdapter::new(timeout);
        for source in self.sources {
            sources = sources.with_source(source);
        }
        let mut alarms = self
            .alarm_client
            .map(|client| AlarmEvaluator::new(client, timeout));
        if let Some(metrics) = &self.metrics {
            sources = sources.with_metrics(metrics.clone());
            alarms = alarms.map(|evaluator| evaluator.with_metrics(metrics.clone()));
        }
        EvaluationEngine {
            settings: self.settings,
            sources,
            alarms,
            clock: self.clock,
            metrics: self.metrics,
        }
    }
}

/// Stateless evaluator. Safe to share across concurrent evaluations.
#[derive(Clone)]
pub struct EvaluationEngine {
    settings: EvaluationSettings,
    sources: MetricSourceAdapter,
    alarms: Option<AlarmEvaluator>,
    clock: Arc<dyn Clock>,
    metrics: Option<EvaluationMetrics>,
}

impl EvaluationEngine {
    pub fn builder(settings: EvaluationSettings) -> EngineBuilder {
        EngineBuilder::new(settings)
    }

    pub fn settings(&self) -> &EvaluationSettings {
        &self.settings
    }

    /// Validate a request, falling back to the configured range-query endpoint.
    pub fn prepare(&self, request: EvaluationRequest) -> Result<Specification> {
        Specification::from_request(request, self.settings.default_range_endpoint.as_deref())
    }

    pub fn window(&self, spec: &Specification) -> Result<EvaluationWindow> {
        compute_window(
            spec.window_params(self.settings.default_lookback),
            self.clock.now(),
            self.settings.alignment,
        )
    }

    /// Run the evaluation selected by the specification's mode.
    pub async fn evaluate(&self, spec: &Specification) -> Result<Verdict> {
        match spec.mode() {
            EvaluationMode::SteadyState => {
                let verdict = self.check_steady_state(spec).await?;
                Ok(Verdict::SteadyState(verdict))
            }
            EvaluationMode::PostExperiment => {
                let verdict = self.evaluate_hypothesis(spec).await?;
                Ok(Verdict::PostExperiment(verdict))
            }
        }
    }

    /// Steady-state gate. Empty series are errors; a failed gate is a value.
    pub async fn check_steady_state(&self, spec: &Specification) -> Result<SteadyStateVerdict> {
        let span = evaluation_span(EvaluationMode::SteadyState);
        let outcome = self.run_steady_state(spec).instrument(span).await;
        self.record(
            EvaluationMode::SteadyState,
            outcome.as_ref().map(|v| v.label()),
        );
        if let Ok(SteadyStateVerdict::Failed(failure)) = &outcome {
            self.record_failing(failure.category, failure.violating_checks.len());
        }
        outcome
    }

    /// Post-experiment classification. `NotSupported` is a value, never an error.
    pub async fn evaluate_hypothesis(&self, spec: &Specification) -> Result<HypothesisVerdict> {
        let span = evaluation_span(EvaluationMode::PostExperiment);
        let outcome = self.run_hypothesis(spec).instrument(span).await;
        self.record(
            EvaluationMode::PostExperiment,
            outcome.as_ref().map(|v| v.label()),
        );
        if let Ok(HypothesisVerdict {
            refuted_by: Some(category),
            failing_checks,
            ..
        }) = &outcome
        {
            self.record_failing(*category, failing_checks.len());
        }
        outcome
    }

    async fn run_steady_state(&self, spec: &Specification) -> Result<SteadyStateVerdict> {
        let window = self.window(spec)?;
        info!(start = %window.start(), end = %window.end(), "checking steady state");

        let (native, range, alarms) = tokio::join!(
            self.fetch(
                spec,
                MetricFormat::NativeMetric,
                window,
                SeriesPolicy::RequireSamples,
            ),
            self.fetch(
                spec,
                MetricFormat::RangeQuery,
                window,
                SeriesPolicy::RequireSamples,
            ),
            self.current_alarms(spec.alarms()),
        );

        for (format, fetched) in [
            (MetricFormat::NativeMetric, native),
            (MetricFormat::RangeQuery, range),
        ] {
            let results = fetched?;
            if results.is_empty() {
                continue;
            }
            let outcome = expression::evaluate(spec.metrics(), &results);
            if let Some(verdict) = steady_state_expression_verdict(format, outcome) {
                info!(category = %CheckCategory::from(format), "steady state not confirmed");
                return Ok(verdict);
            }
        }

        let alarms = alarms?;
        if !alarms.is_clean() {
            info!(violating = ?alarms.violating, "alarms not in steady state");
            return Ok(SteadyStateVerdict::failed(
                FailureReason::AlarmsViolating,
                CheckCategory::Alarms,
                alarms.violating,
            ));
        }

        info!("steady state confirmed");
        Ok(SteadyStateVerdict::Confirmed)
    }

    async fn run_hypothesis(&self, spec: &Specification) -> Result<HypothesisVerdict> {
        let window = self.window(spec)?;
        info!(start = %window.start(), end = %window.end(), "evaluating hypothesis");

        let (native, range, alarms) = tokio::join!(
            self.fetch(
                spec,
                MetricFormat::NativeMetric,
                window,
                SeriesPolicy::AllowEmpty,
            ),
            self.fetch(
                spec,
                MetricFormat::RangeQuery,
                window,
                SeriesPolicy::AllowEmpty,
            ),
            self.alarm_history(spec.alarms(), window),
        );

        for (format, fetched) in [
            (MetricFormat::NativeMetric, native),
            (MetricFormat::RangeQuery, range),
        ] {
            let results = fetched?;
            if results.is_empty() {
                continue;
            }
            let outcome = expression::evaluate(spec.metrics(), &results);
            if let Some(verdict) = hypothesis_expression_verdict(format, outcome) {
                info!(category = %CheckCategory::from(format), "hypothesis not supported");
                return Ok(verdict);
            }
        }

        let alarms = alarms?;
        if !alarms.is_clean() {
            info!(violating = ?alarms.violating, "alarms do not support the hypothesis");
            return Ok(HypothesisVerdict::not_supported(
                CheckCategory::Alarms,
                FailureReason::AlarmsViolating,
                alarms.violating,
            ));
        }

        info!("hypothesis supported");
        Ok(HypothesisVerdict::supported())
    }

    async fn fetch(
        &self,
        spec: &Specification,
        format: MetricFormat,
        window: EvaluationWindow,
        policy: SeriesPolicy,
    ) -> Result<Vec<TimeSeriesResult>> {
        self.sources
            .fetch(
                spec.metrics(),
                format,
                window,
                spec.range_query_endpoint(),
                policy,
            )
            .await
    }

    async fn current_alarms(&self, alarms: &[AlarmCheck]) -> Result<AlarmOutcome> {
        if alarms.is_empty() {
            return Ok(AlarmOutcome::default());
        }
        self.alarm_evaluator()?.evaluate_current(alarms).await
    }

    async fn alarm_history(
        &self,
        alarms: &[AlarmCheck],
        window: EvaluationWindow,
    ) -> Result<AlarmOutcome> {
        if alarms.is_empty() {
            return Ok(AlarmOutcome::default());
        }
        let evaluator = self.alarm_evaluator()?;
        evaluator.evaluate_history(alarms, window).await
    }

    fn alarm_evaluator(&self) -> Result<&AlarmEvaluator> {
        self.alarms
            .as_ref()
            .ok_or(EngineError::NotConfigured { backend: "alarm" })
    }

    fn record(&self, mode: EvaluationMode, label: std::result::Result<&'static str, &EngineError>) {
        let verdict = match label {
            Ok(label) => label,
            Err(err) => {
                warn!(mode = mode.as_str(), error = %err, "evaluation aborted");
                "error"
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_evaluation(mode.as_str(), verdict);
        }
    }

    fn record_failing(&self, category: CheckCategory, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_failing_checks(category.as_str(), count);
        }
    }
}

impl std::fmt::Debug for EvaluationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationEngine")
            .field("settings", &self.settings)
            .field("sources", &self.sources)
            .field("alarms", &self.alarms.is_some())
            .finish_non_exhaustive()
    }
}

fn evaluation_span(mode: EvaluationMode) -> tracing::Span {
    let evaluation_id = Uuid::new_v4();
    info_span!("evaluation", %evaluation_id, mode = mode.as_str())
}

fn steady_state_expression_verdict(
    format: MetricFormat,
    outcome: ExpressionOutcome,
) -> Option<SteadyStateVerdict> {
    let category = CheckCategory::from(format);
    if !outcome.failing.is_empty() {
        return Some(SteadyStateVerdict::failed(
            FailureReason::ExpressionsFalse,
            category,
            outcome.failing,
        ));
    }
    if !outcome.supported() {
        return Some(SteadyStateVerdict::failed(
            FailureReason::NoExpressionFound,
            category,
            outcome.missing,
        ));
    }
    None
}

fn hypothesis_expression_verdict(
    format: MetricFormat,
    outcome: ExpressionOutcome,
) -> Option<HypothesisVerdict> {
    let category = CheckCategory::from(format);
    if !outcome.failing.is_empty() {
        return Some(HypothesisVerdict::not_supported(
            category,
            FailureReason::ExpressionsFalse,
            outcome.failing,
        ));
    }
    if !outcome.supported() {
        return Some(HypothesisVerdict::not_supported(
            category,
            FailureReason::NoExpressionFound,
            outcome.missing,
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlarmStateValue, Sample};
    use crate::source::RecordedBackend;
    use crate::window::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    fn series(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(at(i as u32), *v))
            .collect()
    }

    fn engine(backend: RecordedBackend) -> EvaluationEngine {
        let backend = Arc::new(backend);
        EvaluationEngine::builder(EvaluationSettings::default())
            .with_native_client(backend.clone())
            .with_alarm_client(backend)
            .with_clock(FixedClock(at(30)))
            .build()
    }

    const STEADY: &str = r#"{"mode":"steadyState","checks":{"metrics":[
        {"id":"m1","MetricStat":{"Stat":"Average"}},
        {"id":"e1","Expression":"IF(m1 > 1, 0, 1)"}
    ],"alarms":["latency"]}}"#;

    #[tokio::test]
    async fn steady_state_confirms_non_zero_expressions() {
        let backend = RecordedBackend::new()
            .with_series("m1", series(&[0.2, 0.4]))
            .with_series("e1", series(&[1.0, 1.0, 1.0]))
            .with_alarm("latency", AlarmStateValue::Ok);
        let spec = Specification::from_json(STEADY).unwrap();
        let verdict = engine(backend).check_steady_state(&spec).await.unwrap();
        assert!(verdict.is_confirmed());
    }

    #[tokio::test]
    async fn steady_state_fails_on_insufficient_data_alarm() {
        let backend = RecordedBackend::new()
            .with_series("m1", series(&[0.2]))
            .with_series("e1", series(&[1.0]))
            .with_alarm("latency", AlarmStateValue::InsufficientData);
        let spec = Specification::from_json(STEADY).unwrap();
        let failure = engine(backend)
            .check_steady_state(&spec)
            .await
            .unwrap()
            .into_result()
            .unwrap_err();
        assert_eq!(failure.category, CheckCategory::Alarms);
        assert_eq!(failure.violating_checks, ["latency"]);
    }

    #[tokio::test]
    async fn steady_state_requires_samples() {
        let backend = RecordedBackend::new().with_series("e1", series(&[1.0]));
        let spec = Specification::from_json(STEADY).unwrap();
        let err = engine(backend).check_steady_state(&spec).await.unwrap_err();
        assert!(matches!(err, EngineError::EmptySeries { ref id } if id == "m1"));
    }

    #[tokio::test]
    async fn steady_state_without_expression_fails() {
        let backend = RecordedBackend::new().with_series("m1", series(&[1.0]));
        let spec = Specification::from_json(
            r#"{"mode":"steadyState","checks":{"metrics":[{"id":"m1","MetricStat":{}}]}}"#,
        )
        .unwrap();
        let verdict = engine(backend).check_steady_state(&spec).await.unwrap();
        match verdict {
            SteadyStateVerdict::Failed(failure) => {
                assert_eq!(failure.reason, FailureReason::NoExpressionFound);
                assert!(failure.violating_checks.is_empty());
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[tokio::test]
    async fn hypothesis_treats_empty_expression_as_not_found() {
        let spec = Specification::from_json(
            r#"{"mode":"postExperiment",
                "experimentWindow":{"start":"2024-05-01T10:00:00Z","end":"2024-05-01T10:05:00Z"},
                "checks":{"metrics":[{"id":"e1","Expression":"1"}]}}"#,
        )
        .unwrap();
        let verdict = engine(RecordedBackend::new())
            .evaluate_hypothesis(&spec)
            .await
            .unwrap();
        assert!(!verdict.is_supported());
        assert_eq!(verdict.reason, Some(FailureReason::NoExpressionFound));
        assert_eq!(verdict.failing_checks, ["e1"]);
    }

    #[tokio::test]
    async fn alarms_without_client_are_not_configured() {
        let engine = EvaluationEngine::builder(EvaluationSettings::default()).build();
        let spec = Specification::from_json(r#"{"mode":"steadyState","checks":{"alarms":["a"]}}"#)
            .unwrap();
        let err = engine.check_steady_state(&spec).await.unwrap_err();
        assert!(matches!(err, EngineError::NotConfigured { backend: "alarm" }));
    }

    #[test]
    fn prepare_falls_back_to_configured_endpoint() {
        let mut config = EngineConfig::default();
        config.range_query.endpoint = Some("http://prom:9090".into());
        let engine = EngineBuilder::from_config(&config).unwrap().build();
        let request = EvaluationRequest::from_json(
            r#"{"mode":"steadyState","checks":{"metrics":[
                {"id":"e1","format":"RangeQuery","query":"up"}]}}"#,
        )
        .unwrap();
        let spec = engine.prepare(request).unwrap();
        assert_eq!(
            spec.range_query_endpoint().map(|url| url.as_str()),
            Some("http://prom:9090/")
        );
    }

    #[tokio::test]
    async fn metrics_count_verdicts() {
        let registry = chaosgate_metrics::new_registry();
        let metrics = EvaluationMetrics::new(registry.clone()).unwrap();
        let backend = RecordedBackend::new().with_alarm("latency", AlarmStateValue::Alarm);
        let engine = EvaluationEngine::builder(EvaluationSettings::default())
            .with_alarm_client(Arc::new(backend))
            .with_metrics(metrics)
            .build();
        let spec =
            Specification::from_json(r#"{"mode":"steadyState","checks":{"alarms":["latency"]}}"#)
                .unwrap();
        let verdict = engine.evaluate(&spec).await.unwrap();
        assert!(verdict.is_blocking());

        let text = chaosgate_metrics::encode_text(&registry).unwrap();
        assert!(text.contains(
            r#"chaosgate_evaluations_total{mode="steadyState",verdict="failed"} 1"#
        ));
        assert!(text.contains(r#"chaosgate_failing_checks_total{category="alarms"} 1"#));
    }
}
