//! Factories configuration: the default mapping, user overrides and the
//! merge between the two.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{FactoryError, Result};
use crate::ports;

/// Endpoint daemons forward their logs to.
///
/// The receiving side is not part of this crate; daemons are merely
/// configured with this host/port/level triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogServer {
    pub host: String,
    pub port: u16,
    pub level: String,
}

impl LogServer {
    pub fn new(host: impl Into<String>, port: u16, level: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            level: level.into(),
        }
    }

    /// A localhost endpoint on a freshly allocated unused port, logging at
    /// `error` level.
    pub fn allocate() -> Result<Self> {
        Ok(Self::new("localhost", ports::get_unused_localhost_port()?, "error"))
    }
}

/// The factories configuration mapping.
///
/// Exactly these keys take part in the default/override merge consumed by
/// [`FactoriesManager`](crate::manager::FactoriesManager) construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactoriesConfig {
    pub code_dir: Option<PathBuf>,
    pub inject_coverage: bool,
    pub inject_sitecustomize: bool,
    pub log_server_host: String,
    pub log_server_port: u16,
    pub log_server_level: String,
}

impl FactoriesConfig {
    /// The default mapping: code dir from the current working directory
    /// (the consuming crate's root under `cargo test`), inject flags on,
    /// log-server values from `log_server`.
    pub fn default_with(log_server: &LogServer) -> Self {
        Self {
            code_dir: std::env::current_dir().ok(),
            inject_coverage: true,
            inject_sitecustomize: true,
            log_server_host: log_server.host.clone(),
            log_server_port: log_server.port,
            log_server_level: log_server.level.clone(),
        }
    }

    /// Merge `overrides` over `self`, key by key, override values winning.
    ///
    /// Emits debug lines with the default, override and merged mappings
    /// whenever `overrides` is non-empty.
    ///
    /// # Errors
    ///
    /// [`FactoryError::InvalidConfiguration`] when `overrides` is not a
    /// mapping, names an unknown key, or carries a wrongly-typed value.
    pub fn merge(self, overrides: &Value) -> Result<FactoriesConfig> {
        let Value::Object(override_map) = overrides else {
            return Err(FactoryError::InvalidConfiguration(format!(
                "The factories configuration overrides must be a mapping, got: {overrides}"
            )));
        };
        if override_map.is_empty() {
            return Ok(self);
        }

        debug!(
            "Default factories configuration:\n{}",
            serde_json::to_string_pretty(&self)?
        );
        debug!(
            "Factories configuration overrides:\n{}",
            serde_json::to_string_pretty(overrides)?
        );

        let mut merged = match serde_json::to_value(&self)? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in override_map {
            merged.insert(key.clone(), value.clone());
        }
        debug!(
            "Merged factories configuration:\n{}",
            serde_json::to_string_pretty(&merged)?
        );

        serde_json::from_value(Value::Object(merged)).map_err(|err| {
            FactoryError::InvalidConfiguration(format!(
                "The merged factories configuration is invalid: {err}"
            ))
        })
    }
}
