//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Metric source capability and per-backend adapters."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! Replay of captured backend responses.
//!
//! ```json
//! {
//!   "metrics": {"e1": [{"timestamp": "2024-05-01T10:01:00Z", "value": 1.0}]},
//!   "alarms": {"PetSiteOkRate": "OK"},
//!   "alarmHistory": {
//!     "PetSiteOkRate": [{"timestamp": "2024-05-01T10:02:00Z", "from": "OK", "to": "ALARM"}]
//!   }
//! }
//! ```

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::native::{MetricDataResult, NativeMetricClient};
use crate::alarm::AlarmClient;
use crate::model::{
    AlarmHistory, AlarmState, AlarmStateValue, AlarmTransition, EvaluationWindow, Sample,
};

/// Canned metric series and alarm data serving both native-metric and alarm calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedBackend {
    #[serde(default)]
    pub metrics: IndexMap<String, Vec<Sample>>,
    #[serde(default)]
    pub alarms: IndexMap<String, AlarmStateValue>,
    #[serde(default)]
    pub alarm_history: IndexMap<String, Vec<AlarmTransition>>,
}

impl RecordedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(input: &str) -> anyhow::Result<Self> {
        serde_json::from_str(input).context("failed to parse recorded backend data")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read recording {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid recording {}", path.display()))
    }

    pub fn with_series(mut self, id: impl Into<String>, samples: Vec<Sample>) -> Self {
        self.metrics.insert(id.into(), samples);
        self
    }

    pub fn with_alarm(mut self, name: impl Into<String>, state: AlarmStateValue) -> Self {
        self.alarms.insert(name.into(), state);
        self
    }

    pub fn with_transition(mut self, name: impl Into<String>, transition: AlarmTransition) -> Self {
        self.alarm_history
            .entry(name.into())
            .or_default()
            .push(transition);
        self
    }
}

#[async_trait]
impl NativeMetricClient for RecordedBackend {
    async fn get_metric_data(
        &self,
        queries: &[Value],
        _window: EvaluationWindow,
    ) -> anyhow::Result<Vec<MetricDataResult>> {
        queries
            .iter()
            .map(|query| {
                let id = query
                    .get("Id")
                    .and_then(Value::as_str)
                    .context("metric query without an Id")?;
                let samples = self.metrics.get(id).map(Vec::as_slice).unwrap_or_default();
                Ok(MetricDataResult {
                    id: id.to_owned(),
                    label: None,
                    timestamps: samples.iter().map(|s| s.timestamp).collect(),
                    values: samples.iter().map(|s| s.value).collect(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl AlarmClient for RecordedBackend {
    async fn describe_alarms(&self, names: &[String]) -> anyhow::Result<Vec<AlarmState>> {
        Ok(names
            .iter()
            .filter_map(|name| {
                self.alarms.get(name).map(|state| AlarmState {
                    name: name.clone(),
                    state: *state,
                })
            })
            .collect())
    }

    async fn alarm_history(
        &self,
        name: &str,
        window: EvaluationWindow,
    ) -> anyhow::Result<AlarmHistory> {
        let mut transitions: Vec<AlarmTransition> = self
            .alarm_history
            .get(name)
            .into_iter()
            .flatten()
            .filter(|transition| window.contains(transition.timestamp))
            .cloned()
            .collect();
        transitions.sort_by_key(|transition| transition.timestamp);
        Ok(AlarmHistory {
            name: name.to_owned(),
            transitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::io::Write;

    const RECORDING: &str = r#"{
        "metrics": {"e1": [{"timestamp": "2024-05-01T10:01:00Z", "value": 1.0}]},
        "alarms": {"PetSiteOkRate": "OK"},
        "alarmHistory": {
            "PetSiteOkRate": [
                {"timestamp": "2024-05-01T10:02:00Z", "from": "OK", "to": "ALARM"},
                {"timestamp": "2024-05-01T11:02:00Z", "from": "ALARM", "to": "OK"}
            ]
        }
    }"#;

    fn window() -> EvaluationWindow {
        EvaluationWindow::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_metric_ids_come_back_empty() {
        let backend = RecordedBackend::from_json(RECORDING).unwrap();
        let results = backend
            .get_metric_data(&[json!({"Id": "e1"}), json!({"Id": "m9"})], window())
            .await
            .unwrap();
        assert_eq!(results[0].values, [1.0]);
        assert!(results[1].values.is_empty());
    }

    #[tokio::test]
    async fn history_is_clipped_to_the_window() {
        let backend = RecordedBackend::from_json(RECORDING).unwrap();
        let history = backend
            .alarm_history("PetSiteOkRate", window())
            .await
            .unwrap();
        assert_eq!(history.transitions.len(), 1);
        assert!(history.transitions[0].is_ok_to_alarm());
        let states = backend
            .describe_alarms(&["PetSiteOkRate".into(), "Missing".into()])
            .await
            .unwrap();
        assert_eq!(states.len(), 1);
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RECORDING.as_bytes()).unwrap();
        let backend = RecordedBackend::from_path(file.path()).unwrap();
        assert_eq!(backend.alarms["PetSiteOkRate"], AlarmStateValue::Ok);
    }
}
