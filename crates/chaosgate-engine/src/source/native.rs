//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Metric source capability and per-backend adapters."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::{FetchRequest, MetricSource};
use crate::model::{EvaluationWindow, MetricFormat, QueryDescriptor, Sample, TimeSeriesResult};

/// One entry of a batched metric-data response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDataResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub timestamps: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub values: Vec<f64>,
}

/// Transport for a backend that evaluates metric math server side.
///
/// `queries` are complete query documents (`Id`, `ReturnData`, and the
/// caller's backend fields) sent as a single batch.
#[async_trait]
pub trait NativeMetricClient: Send + Sync {
    async fn get_metric_data(
        &self,
        queries: &[Value],
        window: EvaluationWindow,
    ) -> anyhow::Result<Vec<MetricDataResult>>;
}

/// [`MetricSource`] issuing one batched call per partition.
#[derive(Clone)]
pub struct NativeMetricSource {
    client: Arc<dyn NativeMetricClient>,
}

impl NativeMetricSource {
    pub fn new(client: Arc<dyn NativeMetricClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricSource for NativeMetricSource {
    fn format(&self) -> MetricFormat {
        MetricFormat::NativeMetric
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> anyhow::Result<Vec<TimeSeriesResult>> {
        let mut documents = Vec::with_capacity(request.queries.len());
        for query in request.queries {
            let QueryDescriptor::Native(fields) = query.check.query() else {
                bail!("check {} is not a native metric query", query.id());
            };
            let mut document = Map::with_capacity(fields.len() + 2);
            document.insert("Id".into(), Value::String(query.id().to_owned()));
            document.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            if query.return_data {
                document.insert("ReturnData".into(), Value::Bool(true));
            }
            documents.push(Value::Object(document));
        }

        let results = self
            .client
            .get_metric_data(&documents, request.window)
            .await?;
        Ok(results.into_iter().map(into_series).collect())
    }
}

fn into_series(result: MetricDataResult) -> TimeSeriesResult {
    if result.timestamps.len() != result.values.len() {
        warn!(
            id = %result.id,
            timestamps = result.timestamps.len(),
            values = result.values.len(),
            "metric data has mismatched timestamps and values"
        );
    }
    let mut samples: Vec<Sample> = result
        .timestamps
        .iter()
        .zip(result.values.iter())
        .map(|(timestamp, value)| Sample::new(*timestamp, *value))
        .collect();
    samples.sort_by_key(|sample| sample.timestamp);
    TimeSeriesResult::new(result.id, samples)
}
