//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! Core value types shared by every evaluation stage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

/// Backend a metric check is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MetricFormat {
    /// Server-side metric math over batched range queries.
    #[default]
    #[serde(alias = "CloudWatch")]
    NativeMetric,
    /// Ad-hoc query string evaluated over a range with a sampling step.
    #[serde(alias = "Prometheus")]
    RangeQuery,
}

impl MetricFormat {
    /// Fixed order in which formats are judged.
    pub const ALL: [MetricFormat; 2] = [MetricFormat::NativeMetric, MetricFormat::RangeQuery];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricFormat::NativeMetric => "NativeMetric",
            MetricFormat::RangeQuery => "RangeQuery",
        }
    }
}

impl fmt::Display for MetricFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a check is judged directly or only feeds other expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckRole {
    #[serde(alias = "RawMetric")]
    Raw,
    Expression,
}

impl CheckRole {
    /// Legacy convention: identifiers starting with `e` are expressions.
    pub fn infer_from_id(id: &str) -> Self {
        if id.starts_with('e') {
            CheckRole::Expression
        } else {
            CheckRole::Raw
        }
    }
}

/// Backend-specific part of a metric check.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryDescriptor {
    /// Fields forwarded verbatim to the native backend (`Expression`, `MetricStat`, ...).
    Native(Map<String, Value>),
    /// Query string plus optional step (`"1m"`, `"60"`).
    Range { query: String, step: Option<String> },
}

/// One declared metric or expression. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricCheck {
    id: String,
    role: CheckRole,
    query: QueryDescriptor,
}

impl MetricCheck {
    pub fn native(id: impl Into<String>, role: CheckRole, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            role,
            query: QueryDescriptor::Native(fields),
        }
    }

    pub fn range(
        id: impl Into<String>,
        role: CheckRole,
        query: impl Into<String>,
        step: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            query: QueryDescriptor::Range {
                query: query.into(),
                step,
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> CheckRole {
        self.role
    }

    pub fn format(&self) -> MetricFormat {
        match self.query {
            QueryDescriptor::Native(_) => MetricFormat::NativeMetric,
            QueryDescriptor::Range { .. } => MetricFormat::RangeQuery,
        }
    }

    pub fn query(&self) -> &QueryDescriptor {
        &self.query
    }

    pub fn is_expression(&self) -> bool {
        self.role == CheckRole::Expression
    }
}

/// A named alarm; simple and composite alarms are addressed the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmCheck(String);

impl AlarmCheck {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AlarmCheck {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Closed interval the backends are queried over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvaluationWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl EvaluationWindow {
    /// Fails with [`EngineError::InvalidWindow`] when `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(EngineError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

impl fmt::Display for EvaluationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Normalised output of a single metric check, whatever the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesResult {
    pub id: String,
    pub samples: Vec<Sample>,
}

impl TimeSeriesResult {
    pub fn new(id: impl Into<String>, samples: Vec<Sample>) -> Self {
        Self {
            id: id.into(),
            samples,
        }
    }

    pub fn empty(id: impl Into<String>) -> Self {
        Self::new(id, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmStateValue {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ALARM")]
    Alarm,
    #[serde(rename = "INSUFFICIENT_DATA")]
    InsufficientData,
}

impl AlarmStateValue {
    /// States that disqualify a steady state.
    pub fn is_bad(&self) -> bool {
        matches!(
            self,
            AlarmStateValue::Alarm | AlarmStateValue::InsufficientData
        )
    }
}

/// Present state of an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmState {
    pub name: String,
    pub state: AlarmStateValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmTransition {
    pub timestamp: DateTime<Utc>,
    pub from: AlarmStateValue,
    pub to: AlarmStateValue,
}

impl AlarmTransition {
    pub fn is_ok_to_alarm(&self) -> bool {
        self.from == AlarmStateValue::Ok && self.to == AlarmStateValue::Alarm
    }
}

/// State changes of one alarm within a window, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmHistory {
    pub name: String,
    pub transitions: Vec<AlarmTransition>,
}
