//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use crate::model::{MetricCheck, MetricFormat};

/// Read-only view of a check selected for one backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricQuery<'a> {
    pub check: &'a MetricCheck,
    /// Ask the backend to return this query's own series.
    pub return_data: bool,
}

impl<'a> MetricQuery<'a> {
    pub fn id(&self) -> &'a str {
        self.check.id()
    }
}

/// Select the checks declared for `format`, preserving declaration order.
pub fn partition(checks: &[MetricCheck], format: MetricFormat) -> Vec<MetricQuery<'_>> {
    checks
        .iter()
        .filter(|check| check.format() == format)
        .map(|check| MetricQuery {
            check,
            return_data: format == MetricFormat::NativeMetric,
        })
        .collect()
}
