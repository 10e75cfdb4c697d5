//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Metric source capability and per-backend adapters."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! HTTP range-query backend (`/api/v1/query_range`).

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::{FetchRequest, MetricSource};
use crate::model::{EvaluationWindow, MetricFormat, QueryDescriptor, Sample, TimeSeriesResult};
use crate::partition::MetricQuery;

const QUERY_RANGE_PATH: &str = "api/v1/query_range";
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryRangeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: Map<String, Value>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// [`MetricSource`] issuing one query per check, concurrently.
#[derive(Debug, Clone)]
pub struct RangeQuerySource {
    client: Client,
    default_step: String,
}

impl RangeQuerySource {
    pub fn new(user_agent: &str, default_step: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("failed to build range query http client")?;
        Ok(Self::with_client(client, default_step))
    }

    pub fn with_client(client: Client, default_step: impl Into<String>) -> Self {
        Self {
            client,
            default_step: default_step.into(),
        }
    }

    async fn query_one(
        &self,
        url: &str,
        query: &MetricQuery<'_>,
        window: EvaluationWindow,
    ) -> anyhow::Result<TimeSeriesResult> {
        let QueryDescriptor::Range { query: expr, step } = query.check.query() else {
            bail!("check {} is not a range query", query.id());
        };
        let step = step.as_deref().unwrap_or(&self.default_step);
        let start = window.start().format(TIME_FORMAT).to_string();
        let end = window.end().format(TIME_FORMAT).to_string();

        let response = self
            .client
            .get(url)
            .query(&[
                ("query", expr.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step),
            ])
            .send()
            .await
            .with_context(|| format!("query_range request for {} failed", query.id()))?
            .error_for_status()
            .with_context(|| format!("query_range rejected {}", query.id()))?;
        let body: QueryRangeResponse = response
            .json()
            .await
            .with_context(|| format!("query_range body for {} is not valid", query.id()))?;

        if body.status != "success" {
            bail!(
                "query_range for {} returned status {}: {}",
                query.id(),
                body.status,
                body.error.unwrap_or_default()
            );
        }
        let series = body.data.and_then(|data| data.result.into_iter().next());
        let Some(series) = series else {
            debug!(id = query.id(), "query_range returned no series");
            return Ok(TimeSeriesResult::empty(query.id()));
        };
        debug!(id = query.id(), labels = ?series.metric, "retagging first series");

        let samples = series
            .values
            .into_iter()
            .map(|(timestamp, value)| {
                Ok(Sample::new(
                    unix_to_utc(timestamp)?,
                    value
                        .parse::<f64>()
                        .with_context(|| format!("sample value '{value}' is not numeric"))?,
                ))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(TimeSeriesResult::new(query.id(), samples))
    }
}

#[async_trait]
impl MetricSource for RangeQuerySource {
    fn format(&self) -> MetricFormat {
        MetricFormat::RangeQuery
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> anyhow::Result<Vec<TimeSeriesResult>> {
        let endpoint = request
            .endpoint
            .ok_or_else(|| anyhow!("no range query endpoint supplied"))?;
        let url = query_range_url(endpoint);
        let calls = request
            .queries
            .iter()
            .map(|query| self.query_one(&url, query, request.window));
        // Every call runs to completion; the first failure in check order wins.
        join_all(calls).await.into_iter().collect()
    }
}

fn query_range_url(endpoint: &Url) -> String {
    format!(
        "{}/{QUERY_RANGE_PATH}",
        endpoint.as_str().trim_end_matches('/')
    )
}

fn unix_to_utc(timestamp: f64) -> anyhow::Result<DateTime<Utc>> {
    let secs = timestamp.trunc() as i64;
    let nanos = (timestamp.fract() * 1e9).round() as u32;
    Utc.timestamp_opt(secs, nanos.min(999_999_999))
        .single()
        .ok_or_else(|| anyhow!("timestamp {timestamp} is out of range"))
}
