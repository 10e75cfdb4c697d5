//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! Steady-state gating and hypothesis classification for chaos experiments.
//!
//! An evaluation computes a window, fetches metric and alarm data from the
//! injected backends, and judges it:
//!
//! ```text
//! Specification -> compute_window -> partition -> MetricSource::fetch
//!               -> expression / alarm evaluators -> Verdict
//! ```

pub mod alarm;
pub mod definition;
pub mod engine;
pub mod error;
pub mod expression;
pub mod model;
pub mod partition;
pub mod request;
pub mod source;
pub mod verdict;
pub mod window;

pub use alarm::{AlarmClient, AlarmEvaluator, AlarmOutcome};
pub use definition::{ExperimentDefinition, HypothesisChecks};
pub use engine::{EngineBuilder, EvaluationEngine, EvaluationSettings};
pub use error::{EngineError, Result};
pub use expression::{judge_series, ExpressionOutcome};
pub use model::{
    AlarmCheck, AlarmHistory, AlarmState, AlarmStateValue, AlarmTransition, CheckRole,
    EvaluationWindow, MetricCheck, MetricFormat, QueryDescriptor, Sample, TimeSeriesResult,
};
pub use partition::{partition, MetricQuery};
pub use request::{
    CheckSet, EvaluationMode, EvaluationRequest, ExperimentWindow, MetricCheckInput, Specification,
    Timing,
};
pub use source::{
    FetchRequest, MetricDataResult, MetricSource, MetricSourceAdapter, NativeMetricClient,
    NativeMetricSource, RangeQuerySource, RecordedBackend, SeriesPolicy,
};
pub use verdict::{
    CheckCategory, FailureReason, HypothesisOutcome, HypothesisVerdict, SteadyStateFailure,
    SteadyStateVerdict, Verdict,
};
pub use window::{ceil_to, compute_window, Clock, FixedClock, SystemClock, WindowParams};

/// Crate prelude collecting the types needed to run an evaluation.
pub mod prelude {
    pub use super::engine::{EngineBuilder, EvaluationEngine, EvaluationSettings};
    pub use super::request::{EvaluationRequest, Specification};
    pub use super::verdict::{HypothesisVerdict, SteadyStateVerdict, Verdict};
    pub use super::window::{Clock, FixedClock, SystemClock};
}
