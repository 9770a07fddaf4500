use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::auth::AuthConfig;
use super::logging::LoggingConfig;
use crate::identity::IdentityConfig;

/// Prefix for environment overrides; `__` separates nested keys,
/// e.g. `AUTHFETCH_API__BASE_URL`.
pub const ENV_PREFIX: &str = "AUTHFETCH_";

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    #[serde(default)]
    pub auth: AuthConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub identity: Option<IdentityConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where outbound API requests go.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct ApiConfig {
    /// Prepended verbatim to every request endpoint.
    pub base_url: String,
}

/// Builds the layered configuration: defaults, then the YAML file at `path`
/// (silently skipped when absent), then the bare `AUTH_ENABLED` / `API_URL`
/// variables, then `AUTHFETCH_` prefixed overrides.
pub fn figment(path: impl AsRef<Path>) -> Figment {
    Figment::from(Serialized::default("version", "1.0.0"))
        .merge(Yaml::file(path.as_ref()))
        .merge(
            Env::raw()
                .only(&["AUTH_ENABLED"])
                .map(|_| "auth.enabled".into()),
        )
        .merge(Env::raw().only(&["API_URL"]).map(|_| "api.base_url".into()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load config from the YAML file at `path` plus the environment.
pub fn load_config(path: impl AsRef<Path>) -> Result<ConfigV1, figment::Error> {
    extract(figment(path))
}

/// Extract a [`ConfigV1`] from an already assembled figment.
pub fn extract(figment: Figment) -> Result<ConfigV1, figment::Error> {
    match figment.extract::<Config>()? {
        Config::ConfigV1(c) => Ok(c),
    }
    // handle configuration migration between versions here when necessary
}

/// The JSON schema for the configuration.
pub fn config_schema() -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(schema_for!(Config))
}
