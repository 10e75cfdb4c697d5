//! ---
//! cg_section: "01-core-functionality"
//! cg_subsection: "module"
//! cg_type: "source"
//! cg_scope: "code"
//! cg_description: "Shared primitives and utilities for the evaluation engine."
//! cg_version: "v0.1.0"
//! cg_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::{LogFormat, LogTarget};

fn default_lookback() -> Duration {
    Duration::from_secs(300)
}

fn default_backend_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_alignment() -> Duration {
    Duration::from_secs(60)
}

fn default_step() -> String {
    "60s".to_owned()
}

fn default_user_agent() -> String {
    concat!("chaosgate/", env!("CARGO_PKG_VERSION")).to_owned()
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

/// Primary configuration object for the evaluation engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub range_query: RangeQueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`EngineConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedEngineConfig {
    pub config: EngineConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl EngineConfig {
    pub const ENV_CONFIG_PATH: &'static str = "CHAOSGATE_CONFIG";

    /// Load configuration from disk, respecting the `CHAOSGATE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `CHAOSGATE_CONFIG` path must exist. Candidate paths are
    /// optional and defaults apply when none of them is present.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedEngineConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedEngineConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedEngineConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedEngineConfig {
            config: Self::default(),
            source: None,
        })
    }

    /// Read and validate a single configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<EngineConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.evaluation.validate()?;
        self.range_query.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for EngineConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: EngineConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Timing and backend limits applied to every evaluation.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Lookback used by steady-state checks that do not declare one.
    #[serde(default = "default_lookback")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub default_lookback: Duration,
    /// Upper bound for every individual backend call.
    #[serde(default = "default_backend_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub backend_timeout: Duration,
    /// Boundary the post-experiment window end is rounded up to.
    #[serde(default = "default_alignment")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub alignment: Duration,
    /// Step passed to range queries that do not declare one.
    #[serde(default = "default_step")]
    pub default_step: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            default_lookback: default_lookback(),
            backend_timeout: default_backend_timeout(),
            alignment: default_alignment(),
            default_step: default_step(),
        }
    }
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend_timeout.is_zero() {
            return Err(anyhow!("evaluation.backend_timeout must be greater than zero"));
        }
        if self.alignment.is_zero() {
            return Err(anyhow!("evaluation.alignment must be greater than zero"));
        }
        if self.default_step.trim().is_empty() {
            return Err(anyhow!("evaluation.default_step must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeQueryConfig {
    /// Endpoint used when a specification omits `rangeQueryEndpoint`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RangeQueryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            user_agent: default_user_agent(),
        }
    }
}

impl RangeQueryConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint).with_context(|| {
                format!("range_query.endpoint '{}' is not a valid url", endpoint)
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub target: LogTarget,
    /// Directory for the rolling JSON log file; stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            target: LogTarget::default(),
            directory: None,
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}
