//! ---
//! cg_section: "02-evaluation-engine"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Steady-state and hypothesis evaluation routines."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Infrastructure faults. A refuted steady state or hypothesis is never one of these.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("evaluation window start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("invalid specification: {0}")]
    InvalidSpecification(String),
    #[error("{backend} backend unavailable: {message}")]
    BackendUnavailable {
        backend: &'static str,
        message: String,
    },
    #[error("the metric {id} does not return any values")]
    EmptySeries { id: String },
    #[error("no {backend} backend configured for this engine")]
    NotConfigured { backend: &'static str },
}

impl EngineError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidSpecification(message.into())
    }

    /// Wrap a transport error, keeping the full cause chain in the message.
    pub(crate) fn backend(backend: &'static str, err: &anyhow::Error) -> Self {
        EngineError::BackendUnavailable {
            backend,
            message: format!("{err:#}"),
        }
    }

    pub(crate) fn timeout(backend: &'static str, after: Duration) -> Self {
        EngineError::BackendUnavailable {
            backend,
            message: format!("call timed out after {}ms", after.as_millis()),
        }
    }

    /// True for faults raised by a monitoring backend rather than by the caller's input.
    pub fn is_backend_fault(&self) -> bool {
        matches!(self, EngineError::BackendUnavailable { .. })
    }
}
