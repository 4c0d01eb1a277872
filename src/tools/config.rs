//! Facade configuration: scoped overrides and the environment

use crate::backend::BackendKind;
use crate::core::{Result, ThreadError};
use crate::tools::api::ToolsApi;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Environment variable consulted by `initialize(0)`
pub const MAX_THREADS_ENV: &str = "SMP_MAX_THREADS";

/// Parse a thread-count override; empty, zero or malformed values mean "default"
pub fn parse_max_threads(value: &str) -> Option<usize> {
    match value.trim().parse::<usize>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

/// Thread-count override from [`MAX_THREADS_ENV`], read once per process
pub fn max_threads_from_env() -> Option<usize> {
    static CACHED: OnceLock<Option<usize>> = OnceLock::new();
    *CACHED.get_or_init(|| {
        let value = std::env::var(MAX_THREADS_ENV).ok()?;
        let parsed = parse_max_threads(&value);
        if parsed.is_none() {
            log::warn!(
                "Ignoring {}={:?}: not a positive integer",
                MAX_THREADS_ENV,
                value
            );
        }
        parsed
    })
}

/// Settings applied for the duration of [`ToolsApi::local_scope`].
///
/// A default config requests the default thread count with nested
/// parallelism *off* and leaves the backend alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Desired thread count (0 = default)
    pub max_number_of_threads: usize,
    /// Whether nested parallel regions may fan out
    pub nested_parallelism: bool,
    /// Backend to request; only the compiled backend is accepted
    pub backend: Option<BackendKind>,
}

impl ScopeConfig {
    /// Config with every field given
    pub fn new(max_number_of_threads: usize, backend: BackendKind, nested_parallelism: bool) -> Self {
        Self {
            max_number_of_threads,
            nested_parallelism,
            backend: Some(backend),
        }
    }

    /// Config requesting `max_number_of_threads` threads
    pub fn with_threads(max_number_of_threads: usize) -> Self {
        Self {
            max_number_of_threads,
            ..Self::default()
        }
    }

    /// Config setting only the nested-parallelism flag
    pub fn with_nested(nested_parallelism: bool) -> Self {
        Self {
            nested_parallelism,
            ..Self::default()
        }
    }

    /// Current settings of `api`
    pub fn snapshot(api: &ToolsApi) -> Self {
        Self {
            max_number_of_threads: api.desired_number_of_threads(),
            nested_parallelism: api.nested_parallelism(),
            backend: Some(api.backend_kind()),
        }
    }

    /// Parse a config from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ThreadError::invalid_config("scope_config", e.to_string()))
    }

    /// Serialize the config to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ThreadError::invalid_config("scope_config", e.to_string()))
    }
}
