//! Configuration module for the LSAT proxy.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// CLI arguments for the proxy server.
#[derive(Parser, Debug)]
#[command(name = "lsat-proxy")]
#[command(about = "Authenticating reverse proxy gating backends behind paid LSAT tokens")]
struct CliArgs {
    /// Path to the JSON configuration file.
    #[arg(long, short, env = "LSAT_PROXY_CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Top-level proxy configuration.
///
/// Constructed once at startup and passed by reference into each
/// component's constructor. The service list here seeds the initial
/// [`crate::registry::ServiceRegistry`] snapshot; hot reconfiguration
/// afterward goes through the registry, not through a mutated `Config`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen_addr: SocketAddr,
    #[serde(default = "config_defaults::default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    pub authenticator: PaymentNodeConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "config_defaults::default_drain_timeout")]
    pub drain_timeout_secs: u64,
    #[serde(default = "config_defaults::default_challenge_timeout")]
    pub challenge_timeout_secs: u64,
    #[serde(default = "config_defaults::default_unhealthy_threshold")]
    pub unhealthy_threshold_secs: u64,
}

impl Config {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.challenge_timeout_secs)
    }

    pub fn unhealthy_threshold(&self) -> Duration {
        Duration::from_secs(self.unhealthy_threshold_secs)
    }
}

/// A single configured backend service, as read from the config file.
///
/// Regexps are validated and compiled when this is turned into a
/// [`crate::dispatcher::Service`] by [`crate::registry::ServiceRegistry::update`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub host_regexp: String,
    pub path_regexp: String,
    #[serde(default)]
    pub price_msat: u64,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub backend: String,
    #[serde(default = "config_defaults::default_backend_timeout")]
    pub timeout_secs: u64,
}

/// Connection parameters for the external payment node.
///
/// The wire shape of this collaborator is out of scope; only the
/// credentials needed to stand one up are modeled here. Secret-shaped
/// fields accept either a literal value or a `$VAR`/`${VAR}` environment
/// variable reference, resolved at deserialization time.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentNodeConfig {
    pub rpc_url: LiteralOrEnv<String>,
    #[serde(default)]
    pub macaroon: Option<LiteralOrEnv<String>>,
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
}

/// Where the secret store (C1) persists token-signing secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

/// TLS termination strategy for the primary listener.
///
/// Certificate acquisition/renewal itself is out of scope; this only
/// names which strategy a deployment uses so the interface that yields
/// certificates can be wired up externally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TlsConfig {
    #[default]
    Disabled,
    AutoCert {
        email: String,
        cache_dir: PathBuf,
    },
    SelfSigned {
        cert_path: PathBuf,
        key_path: PathBuf,
    },
}

// ============================================================================
// Environment Variable Resolution
// ============================================================================

/// A transparent wrapper that resolves environment variables during deserialization.
///
/// Supports both literal values and environment variable references:
/// - Literal: `"http://localhost:10009"`
/// - Simple env var: `"$PAYMENT_NODE_MACAROON"`
/// - Braced env var: `"${PAYMENT_NODE_MACAROON}"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if let Some(inner) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            Some(inner.to_string())
        } else if let Some(var_name) = s.strip_prefix('$') {
            if !var_name.is_empty() && var_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                Some(var_name.to_string())
            } else {
                None
            }
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "environment variable '{}' not found (referenced as '{}')",
                    var_name, s
                ))
            })?
        } else {
            s
        };
        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("failed to parse value: {}", e)))?;
        Ok(LiteralOrEnv(parsed))
    }
}

impl<T> Serialize for LiteralOrEnv<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

pub mod config_defaults {
    use std::path::PathBuf;

    pub fn default_base_dir() -> PathBuf {
        PathBuf::from(".")
    }

    pub fn default_drain_timeout() -> u64 {
        30
    }

    pub fn default_challenge_timeout() -> u64 {
        10
    }

    pub fn default_unhealthy_threshold() -> u64 {
        60
    }

    pub fn default_backend_timeout() -> u64 {
        30
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by `--config`/`-c`, falling back
    /// to the `LSAT_PROXY_CONFIG` environment variable, then `config.json`.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_or_env_parses_literal() {
        let v: LiteralOrEnv<u64> =
            serde_json::from_str("\"1000\"").expect("literal should parse");
        assert_eq!(*v, 1000);
    }

    #[test]
    fn literal_or_env_resolves_braced_env_var() {
        // SAFETY: test runs single-threaded wrt this var; no other test reads it.
        unsafe { std::env::set_var("LSAT_PROXY_TEST_VAR", "42") };
        let v: LiteralOrEnv<u64> =
            serde_json::from_str("\"${LSAT_PROXY_TEST_VAR}\"").expect("env var should resolve");
        assert_eq!(*v, 42);
        unsafe { std::env::remove_var("LSAT_PROXY_TEST_VAR") };
    }

    #[test]
    fn literal_or_env_missing_var_errors() {
        let result: Result<LiteralOrEnv<String>, _> =
            serde_json::from_str("\"$LSAT_PROXY_DOES_NOT_EXIST\"");
        assert!(result.is_err());
    }

    #[test]
    fn service_config_defaults_are_permissive() {
        let json = r#"{
            "name": "echo",
            "host_regexp": ".*",
            "path_regexp": "^/echo",
            "backend": "http://backend.local"
        }"#;
        let svc: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(svc.price_msat, 0);
        assert!(!svc.auth_required);
        assert_eq!(svc.timeout_secs, 30);
    }
}
