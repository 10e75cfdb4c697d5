//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! Wire shape of an evaluation request and its validated form.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::error::{EngineError, Result};
use crate::model::{AlarmCheck, CheckRole, MetricCheck, MetricFormat};
use crate::window::WindowParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationMode {
    SteadyState,
    PostExperiment,
}

impl EvaluationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationMode::SteadyState => "steadyState",
            EvaluationMode::PostExperiment => "postExperiment",
        }
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed bounds of a finished fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Metric and alarm checks as written by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckSet {
    #[serde(default)]
    pub metrics: Vec<MetricCheckInput>,
    #[serde(default)]
    pub alarms: Vec<String>,
}

impl CheckSet {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.alarms.is_empty()
    }
}

/// One metric entry before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCheckInput {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(default, alias = "metricFormat", skip_serializing_if = "Option::is_none")]
    pub format: Option<MetricFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<CheckRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_step",
        skip_serializing_if = "Option::is_none"
    )]
    pub step: Option<String>,
    /// Backend-specific fields forwarded to the native backend.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MetricCheckInput {
    fn into_check(self) -> Result<MetricCheck> {
        let id = self.id.trim().to_owned();
        if id.is_empty() {
            return Err(EngineError::invalid("metric id must not be empty"));
        }
        let role = self.role.unwrap_or_else(|| CheckRole::infer_from_id(&id));
        match self.format.unwrap_or_default() {
            MetricFormat::NativeMetric => {
                let mut fields = self.fields;
                // Re-added by the partitioner for every native check.
                fields.remove("ReturnData");
                if fields.is_empty() {
                    return Err(EngineError::invalid(format!(
                        "native metric {id} declares no query fields"
                    )));
                }
                Ok(MetricCheck::native(id, role, fields))
            }
            MetricFormat::RangeQuery => {
                let query = self
                    .query
                    .map(|q| q.trim().to_owned())
                    .filter(|q| !q.is_empty())
                    .ok_or_else(|| {
                        EngineError::invalid(format!("range query {id} requires a query"))
                    })?;
                Ok(MetricCheck::range(id, role, query, self.step))
            }
        }
    }
}

fn deserialize_step<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;

    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("step as a duration string or a number of seconds")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value.to_owned()))
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_none<E>(self) -> std::result::Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> std::result::Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// The full input to one evaluation call.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub mode: EvaluationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub lookback: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_window: Option<ExperimentWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub recovery_delay: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub recovery_duration: Option<Duration>,
    #[serde(default)]
    pub checks: CheckSet,
    #[serde(default, alias = "prometheusUrl", skip_serializing_if = "Option::is_none")]
    pub range_query_endpoint: Option<String>,
}

impl EvaluationRequest {
    pub fn from_json(input: &str) -> Result<Self> {
        parse_json(input)
    }
}

/// Decode JSON, reporting the failing path as an invalid specification.
pub(crate) fn parse_json<T: DeserializeOwned>(input: &str) -> Result<T> {
    let deserializer = &mut serde_json::Deserializer::from_str(input);
    serde_path_to_error::deserialize(deserializer).map_err(|err| {
        let path = err.path().to_string();
        EngineError::invalid(format!("{} (at {})", err.into_inner(), path))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    Lookback(Option<Duration>),
    Experiment {
        window: ExperimentWindow,
        recovery_delay: Option<Duration>,
        recovery_duration: Option<Duration>,
    },
}

/// Validated, immutable evaluation input.
#[derive(Debug, Clone, PartialEq)]
pub struct Specification {
    mode: EvaluationMode,
    timing: Timing,
    metrics: Vec<MetricCheck>,
    alarms: Vec<AlarmCheck>,
    range_query_endpoint: Option<Url>,
}

impl Specification {
    /// Parse and validate a JSON request document.
    pub fn from_json(input: &str) -> Result<Self> {
        Self::from_request(EvaluationRequest::from_json(input)?, None)
    }

    /// Validate a request. `fallback_endpoint` applies when the request names no
    /// range-query endpoint.
    pub fn from_request(
        request: EvaluationRequest,
        fallback_endpoint: Option<&str>,
    ) -> Result<Self> {
        let timing = match request.mode {
            EvaluationMode::SteadyState => Timing::Lookback(request.lookback),
            EvaluationMode::PostExperiment => {
                let window = request.experiment_window.ok_or_else(|| {
                    EngineError::invalid("postExperiment mode requires experimentWindow")
                })?;
                if request.recovery_delay.is_some() != request.recovery_duration.is_some() {
                    debug!(
                        "only one of recoveryDelay/recoveryDuration supplied; \
                         using experiment window"
                    );
                }
                Timing::Experiment {
                    window,
                    recovery_delay: request.recovery_delay,
                    recovery_duration: request.recovery_duration,
                }
            }
        };

        let mut seen = IndexSet::new();
        let mut metrics = Vec::with_capacity(request.checks.metrics.len());
        for input in request.checks.metrics {
            let check = input.into_check()?;
            if !seen.insert(check.id().to_owned()) {
                return Err(EngineError::invalid(format!(
                    "metric id {} is declared more than once",
                    check.id()
                )));
            }
            metrics.push(check);
        }

        let mut alarm_names = IndexSet::new();
        for name in request.checks.alarms {
            let name = name.trim().to_owned();
            if name.is_empty() {
                return Err(EngineError::invalid("alarm names must not be empty"));
            }
            alarm_names.insert(name);
        }
        let alarms = alarm_names.into_iter().map(AlarmCheck::new).collect();

        let needs_endpoint = metrics
            .iter()
            .any(|check| check.format() == MetricFormat::RangeQuery);
        let endpoint = request
            .range_query_endpoint
            .as_deref()
            .or(fallback_endpoint)
            .filter(|raw| !raw.trim().is_empty());
        let range_query_endpoint = match endpoint {
            Some(raw) => Some(Url::parse(raw.trim()).map_err(|err| {
                EngineError::invalid(format!("range query endpoint '{raw}' is invalid: {err}"))
            })?),
            None if needs_endpoint => {
                return Err(EngineError::invalid(
                    "RangeQuery checks declared but no rangeQueryEndpoint supplied",
                ))
            }
            None => None,
        };

        Ok(Self {
            mode: request.mode,
            timing,
            metrics,
            alarms,
            range_query_endpoint,
        })
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn metrics(&self) -> &[MetricCheck] {
        &self.metrics
    }

    pub fn alarms(&self) -> &[AlarmCheck] {
        &self.alarms
    }

    pub fn range_query_endpoint(&self) -> Option<&Url> {
        self.range_query_endpoint.as_ref()
    }

    /// Window inputs; `default_lookback` fills a missing steady-state lookback.
    pub fn window_params(&self, default_lookback: Duration) -> WindowParams {
        match self.timing {
            Timing::Lookback(lookback) => WindowParams::SteadyState {
                lookback: Some(lookback.unwrap_or(default_lookback)),
            },
            Timing::Experiment {
                window,
                recovery_delay,
                recovery_duration,
            } => WindowParams::PostExperiment {
                experiment_start: window.start,
                experiment_end: window.end,
                recovery_delay,
                recovery_duration,
            },
        }
    }
}

impl TryFrom<EvaluationRequest> for Specification {
    type Error = EngineError;

    fn try_from(request: EvaluationRequest) -> Result<Self> {
        Self::from_request(request, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"{
        "mode": "steadyState",
        "lookback": 300,
        "prometheusUrl": "http://10.1.186.117:31793",
        "checks": {
            "metrics": [
                {
                    "Id": "m1",
                    "MetricStat": {
                        "Metric": {"Namespace": "AWS/X-Ray", "MetricName": "ResponseTime"},
                        "Period": 60,
                        "Stat": "p90"
                    }
                },
                {"Id": "e1", "Expression": "IF(m1 > 0.5, 0, 1)"},
                {
                    "Id": "e3",
                    "metricFormat": "Prometheus",
                    "query": "sum(rate(petsite_petsearches_total[2m])) * 60 > bool 100",
                    "step": "1m"
                }
            ],
            "alarms": ["PetSiteOkRate", "PetSiteOkRate"]
        }
    }"#;

    #[test]
    fn legacy_document_is_accepted() {
        let spec = Specification::from_json(LEGACY).unwrap();
        assert_eq!(spec.mode(), EvaluationMode::SteadyState);
        assert_eq!(
            spec.timing(),
            Timing::Lookback(Some(Duration::from_secs(300)))
        );
        let ids: Vec<_> = spec.metrics().iter().map(MetricCheck::id).collect();
        assert_eq!(ids, ["m1", "e1", "e3"]);
        assert_eq!(spec.metrics()[0].role(), CheckRole::Raw);
        assert_eq!(spec.metrics()[1].role(), CheckRole::Expression);
        assert_eq!(spec.metrics()[2].format(), MetricFormat::RangeQuery);
        assert_eq!(spec.alarms().len(), 1);
        assert_eq!(
            spec.range_query_endpoint().map(Url::as_str),
            Some("http://10.1.186.117:31793/")
        );
    }

    #[test]
    fn explicit_role_overrides_prefix() {
        let spec = Specification::from_json(
            r#"{"mode":"steadyState","checks":{"metrics":[
                {"id":"errorRate","role":"Expression","Expression":"IF(m1 > 1, 0, 1)"},
                {"id":"e_raw","role":"Raw","MetricStat":{}}
            ]}}"#,
        )
        .unwrap();
        assert!(spec.metrics()[0].is_expression());
        assert!(!spec.metrics()[1].is_expression());
    }

    #[test]
    fn numeric_step_is_normalised() {
        let spec = Specification::from_json(
            r#"{"mode":"steadyState","rangeQueryEndpoint":"http://prom:9090",
                "checks":{"metrics":[{"id":"e1","format":"RangeQuery","query":"up","step":30}]}}"#,
        )
        .unwrap();
        match spec.metrics()[0].query() {
            crate::model::QueryDescriptor::Range { step, .. } => {
                assert_eq!(step.as_deref(), Some("30"))
            }
            other => panic!("unexpected descriptor {other:?}"),
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = Specification::from_json(
            r#"{"mode":"steadyState","checks":{"metrics":[
                {"id":"e1","Expression":"1"},{"id":"e1","Expression":"2"}]}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn range_checks_need_an_endpoint() {
        let request = EvaluationRequest::from_json(
            r#"{"mode":"steadyState","checks":{"metrics":[
                {"id":"e1","format":"RangeQuery","query":"up"}]}}"#,
        )
        .unwrap();
        let err = Specification::from_request(request.clone(), None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSpecification(_)));
        let spec = Specification::from_request(request, Some("http://fallback:9090")).unwrap();
        assert_eq!(
            spec.range_query_endpoint().map(Url::as_str),
            Some("http://fallback:9090/")
        );
    }

    #[test]
    fn post_experiment_needs_a_window() {
        let err = Specification::from_json(r#"{"mode":"postExperiment"}"#).unwrap_err();
        assert!(err.to_string().contains("experimentWindow"));
    }

    #[test]
    fn parse_errors_name_the_path() {
        let err = Specification::from_json(r#"{"mode":"steadyState","lookback":"soon"}"#)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("invalid specification"));
        assert!(message.contains("lookback"), "{message}");
    }

    #[test]
    fn empty_native_check_is_rejected() {
        let err = Specification::from_json(
            r#"{"mode":"steadyState","checks":{"metrics":[{"id":"e1","ReturnData":true}]}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("declares no query fields"));
    }
}
