//! Typed configuration model, defaults, and validation.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Process configuration loaded at boot.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlotillaConfig {
    /// HTTP bind address, e.g. `127.0.0.1:7070`.
    #[serde(default = "defaults::http_bind")]
    pub http_bind: String,
    /// SQLite database file path.
    #[serde(default = "defaults::database_path")]
    pub database_path: PathBuf,
    /// Base64-encoded 32-byte key for credential encryption at rest.
    pub session_secret: String,
    /// Absolute paths (files or directory prefixes) rules may execute.
    #[serde(default)]
    pub program_allow_list: Vec<PathBuf>,
    /// Snapshot freshness window in milliseconds.
    #[serde(default = "defaults::refresh_ttl_ms")]
    pub refresh_ttl_ms: u64,
    /// Per-hash detail cache window in milliseconds.
    #[serde(default = "defaults::micro_cache_ttl_ms")]
    pub micro_cache_ttl_ms: u64,
    /// Default evaluation interval for rules that do not set one.
    #[serde(default = "defaults::default_rule_interval_secs")]
    pub default_rule_interval_secs: u64,
    /// Worker tasks draining due rule ticks.
    #[serde(default = "defaults::rule_workers")]
    pub rule_workers: usize,
    /// Upper bound for any single upstream request, in seconds.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Log filter, e.g. `info` or `flotilla_sync=debug,info`.
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

mod defaults {
    use std::path::PathBuf;

    pub(super) fn http_bind() -> String {
        "127.0.0.1:7070".to_string()
    }

    pub(super) fn database_path() -> PathBuf {
        PathBuf::from("flotilla.db")
    }

    pub(super) const fn refresh_ttl_ms() -> u64 {
        5_000
    }

    pub(super) const fn micro_cache_ttl_ms() -> u64 {
        2_000
    }

    pub(super) const fn default_rule_interval_secs() -> u64 {
        900
    }

    pub(super) const fn rule_workers() -> usize {
        4
    }

    pub(super) const fn request_timeout_secs() -> u64 {
        60
    }

    pub(super) fn log_level() -> String {
        "info".to_string()
    }
}

impl FlotillaConfig {
    /// Load a config file, apply `FLOTILLA_*` environment overrides, and
    /// validate the result.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is unreadable, unparseable, or a
    /// field fails validation.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(http_bind = %config.http_bind, db = %config.database_path.display(), "configuration loaded");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("FLOTILLA_HTTP_BIND") {
            self.http_bind = bind;
        }
        if let Ok(db) = std::env::var("FLOTILLA_DATABASE_PATH") {
            self.database_path = PathBuf::from(db);
        }
        if let Ok(secret) = std::env::var("FLOTILLA_SESSION_SECRET") {
            self.session_secret = secret;
        }
        if let Ok(level) = std::env::var("FLOTILLA_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Validate every field; called by [`FlotillaConfig::load`].
    ///
    /// # Errors
    ///
    /// Returns the first field failure encountered.
    pub fn validate(&self) -> ConfigResult<()> {
        self.http_bind
            .parse::<SocketAddr>()
            .map_err(|err| ConfigError::invalid("http_bind", err.to_string()))?;
        self.decode_session_secret()?;
        for entry in &self.program_allow_list {
            if !entry.is_absolute() {
                return Err(ConfigError::invalid(
                    "program_allow_list",
                    format!("entry {} must be absolute", entry.display()),
                ));
            }
        }
        if self.rule_workers == 0 {
            return Err(ConfigError::invalid("rule_workers", "must be at least 1"));
        }
        if self.refresh_ttl_ms == 0 {
            return Err(ConfigError::invalid("refresh_ttl_ms", "must be positive"));
        }
        if self.default_rule_interval_secs < 60 {
            return Err(ConfigError::invalid(
                "default_rule_interval_secs",
                "must be at least 60",
            ));
        }
        Ok(())
    }

    /// Decode the credential key; exactly 32 bytes of base64.
    ///
    /// # Errors
    ///
    /// Returns an error when the secret is malformed.
    pub fn decode_session_secret(&self) -> ConfigResult<[u8; 32]> {
        let decoded = BASE64
            .decode(self.session_secret.trim())
            .map_err(|_| ConfigError::invalid("session_secret", "not valid base64"))?;
        <[u8; 32]>::try_from(decoded.as_slice()).map_err(|_| {
            ConfigError::invalid(
                "session_secret",
                format!("must decode to 32 bytes, got {}", decoded.len()),
            )
        })
    }

    /// The parsed HTTP bind address; valid after [`FlotillaConfig::validate`].
    ///
    /// # Errors
    ///
    /// Returns an error for an unparseable bind string.
    pub fn bind_addr(&self) -> ConfigResult<SocketAddr> {
        self.http_bind
            .parse()
            .map_err(|_| ConfigError::invalid("http_bind", "unparseable bind address"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> String {
        BASE64.encode([5u8; 32])
    }

    fn minimal(secret: &str) -> String {
        format!("session_secret = \"{secret}\"\n")
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config: FlotillaConfig = toml::from_str(&minimal(&secret())).expect("parse");
        config.validate().expect("validate");
        assert_eq!(config.http_bind, "127.0.0.1:7070");
        assert_eq!(config.refresh_ttl_ms, 5_000);
        assert_eq!(config.rule_workers, 4);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn short_secret_is_rejected() {
        let short = BASE64.encode([1u8; 16]);
        let config: FlotillaConfig = toml::from_str(&minimal(&short)).expect("parse");
        let err = config.validate().expect_err("must reject");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "session_secret",
                ..
            }
        ));
    }

    #[test]
    fn relative_allow_list_entries_are_rejected() {
        let raw = format!(
            "session_secret = \"{}\"\nprogram_allow_list = [\"bin/notify\"]\n",
            secret()
        );
        let config: FlotillaConfig = toml::from_str(&raw).expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn sub_minute_intervals_are_rejected() {
        let raw = format!(
            "session_secret = \"{}\"\ndefault_rule_interval_secs = 30\n",
            secret()
        );
        let config: FlotillaConfig = toml::from_str(&raw).expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_fields_fail_parse() {
        let raw = format!("session_secret = \"{}\"\nmystery = 1\n", secret());
        assert!(toml::from_str::<FlotillaConfig>(&raw).is_err());
    }

    #[test]
    fn load_reads_file_and_validates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("flotilla.toml");
        std::fs::write(&path, minimal(&secret())).expect("write");
        let config = FlotillaConfig::load(&path).expect("load");
        assert_eq!(config.log_level, "info");
    }
}
