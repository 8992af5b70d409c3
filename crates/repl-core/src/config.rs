//! Layered configuration: defaults, then an optional config file, then
//! environment variables, then CLI flags, assembled once at startup into an
//! immutable [`ReplConfig`] via the `config` crate and validated with
//! `validator`.

use std::fmt;

use serde::Deserialize;
use validator::Validate;

use crate::error::ReplError;

/// SQL Server authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Sql,
    WindowsIntegrated,
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::Sql
    }
}

/// TLS negotiation mode tried in order against the source, per
/// `source_driver_preference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Required,
    Preferred,
    Off,
}

/// A credential that never prints its value, even via `{:?}`.
#[derive(Clone, Deserialize, Default)]
#[serde(transparent)]
pub struct Secret(pub String);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "Secret(<empty>)")
        } else {
            write!(f, "Secret(<redacted>)")
        }
    }
}

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SourceConfig {
    #[validate(length(min = 1, message = "source_host must not be empty"))]
    pub source_host: String,
    #[validate(length(min = 1, message = "source_database must not be empty"))]
    pub source_database: String,
    #[validate(length(min = 1, message = "source_user must not be empty"))]
    pub source_user: String,
    #[serde(default)]
    pub source_password: Secret,
    #[serde(default)]
    pub source_auth_mode: AuthMode,
    #[serde(default = "default_driver_preference")]
    pub source_driver_preference: Vec<TlsMode>,
}

fn default_driver_preference() -> Vec<TlsMode> {
    vec![TlsMode::Required, TlsMode::Preferred, TlsMode::Off]
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TargetConfig {
    #[validate(length(min = 1, message = "target_host must not be empty"))]
    pub target_host: String,
    #[serde(default = "default_target_port")]
    pub target_port: u16,
    #[validate(length(min = 1, message = "target_user must not be empty"))]
    pub target_user: String,
    #[serde(default)]
    pub target_password: Secret,
    #[validate(length(min = 1, message = "target_database must not be empty"))]
    pub target_database: String,
    #[serde(default = "default_target_timezone")]
    pub target_timezone: String,
}

fn default_target_port() -> u16 {
    8123
}

fn default_target_timezone() -> String {
    "UTC".to_string()
}

/// The full, validated, immutable configuration for one replication run.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReplConfig {
    #[validate]
    #[serde(flatten)]
    pub source: SourceConfig,
    #[validate]
    #[serde(flatten)]
    pub target: TargetConfig,

    #[validate(range(min = 1, message = "chunk_size must be positive"))]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub target_table_prefix: String,
    #[serde(default = "default_true")]
    pub incremental: bool,
    #[serde(default = "default_identity_column")]
    pub preferred_identity_column: String,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_true")]
    pub use_replacing_engine: bool,
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_table_prefixes: Vec<String>,
    #[serde(default)]
    pub tables_filter: Option<Vec<String>>,
    #[serde(default)]
    pub max_rows_per_table: Option<u64>,
}

fn default_chunk_size() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_identity_column() -> String {
    "Id".to_string()
}

fn default_lookback_days() -> i64 {
    7
}

fn default_excluded_prefixes() -> Vec<String> {
    vec!["TMP_".to_string()]
}

impl ReplConfig {
    /// Assemble configuration from (in increasing precedence) built-in
    /// defaults, an optional config file, environment variables prefixed
    /// `REPL_`, and CLI overrides already merged into `cli_overrides` by the
    /// caller. Fails fast with [`ReplError::Configuration`] on a missing
    /// required field or a validation violation.
    pub fn load(config_file: Option<&str>, cli_overrides: config::Config) -> Result<Self, ReplError> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("REPL").separator("__"));
        builder = builder.add_source(cli_overrides);

        let raw = builder.build().map_err(|e| ReplError::Configuration {
            option: "<assembly>".to_string(),
            detail: e.to_string(),
        })?;

        let cfg: ReplConfig = raw.try_deserialize().map_err(|e| ReplError::Configuration {
            option: "<deserialize>".to_string(),
            detail: e.to_string(),
        })?;

        cfg.validate().map_err(|e| ReplError::Configuration {
            option: "<validation>".to_string(),
            detail: e.to_string(),
        })?;

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_never_leaks_value() {
        let s = Secret("hunter2".to_string());
        assert_eq!(format!("{s:?}"), "Secret(<redacted>)");
        assert!(!format!("{s:?}").contains("hunter2"));
    }

    #[test]
    fn empty_secret_debug_is_distinguishable() {
        let s = Secret::default();
        assert_eq!(format!("{s:?}"), "Secret(<empty>)");
    }

    #[test]
    fn default_auth_mode_is_sql() {
        assert_eq!(AuthMode::default(), AuthMode::Sql);
    }
}
