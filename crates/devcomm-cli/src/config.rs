//! Gateway configuration.
//!
//! Layers, later ones winning: compiled defaults, an optional TOML file,
//! then `DEVCOMM_*` environment variables. Nested keys use `__`, so
//! `DEVCOMM_DISPATCH__MAX_CONCURRENCY=4` sets `dispatch.max_concurrency`.

use devcomm_dispatch::DispatchConfig;
use devcomm_storage::DatabaseConfig;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use std::path::Path;

pub const ENV_PREFIX: &str = "DEVCOMM_";
pub const DEFAULT_LOG_FILTER: &str = "info,devcomm=debug";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,

    /// Used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            dispatch: DispatchConfig::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load from `path` (if any) with environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file_exact(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Load from TOML text only, without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, figment::Error> {
        Figment::new().merge(Toml::string(toml)).extract()
    }
}
