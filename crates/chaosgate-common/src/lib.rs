//! ---
//! cg_section: "01-core-functionality"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Shared primitives and utilities for the evaluation engine."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
//! Shared primitives for the chaosgate workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the engine and the control CLI.

pub mod config;
pub mod logging;

pub use config::{
    EngineConfig, EvaluationConfig, LoadedEngineConfig, LoggingConfig, MetricsConfig,
    RangeQueryConfig,
};
pub use logging::{init_tracing, LogFormat, LogTarget};
