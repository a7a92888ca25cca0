// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Gateway configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment.
//! The upstream token normally arrives through `FLESPI_TOKEN` so it never has
//! to be written to disk.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http_server::HttpServerConfig;

/// Environment variable holding the flespi token
pub const ENV_TOKEN: &str = "FLESPI_TOKEN";
/// Environment variable overriding the flespi endpoint
pub const ENV_ENDPOINT: &str = "FLESPI_ENDPOINT";
/// Environment variable overriding the bind address
pub const ENV_BIND: &str = "FGW_BIND";
/// Environment variable overriding the listen port
pub const ENV_PORT: &str = "FGW_PORT";

const TOKEN_SCHEME: &str = "FlespiToken";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter string understood by `env_logger`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Upstream provider settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// REST gateway base URL
    pub endpoint: String,
    /// Access token, with or without the `FlespiToken` scheme
    pub token: String,
    /// Path probed once at startup
    pub probe_path: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://flespi.io".into(),
            token: String::new(),
            probe_path: "/platform/customer".into(),
        }
    }
}

impl UpstreamConfig {
    /// `Authorization` header value
    pub fn authorization(&self) -> String {
        let token = self.token.trim();
        if token.starts_with(TOKEN_SCHEME) {
            token.to_string()
        } else {
            format!("{} {}", TOKEN_SCHEME, token)
        }
    }
}

/// Full gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub log_level: LogLevel,
    pub server: HttpServerConfig,
    pub upstream: UpstreamConfig,
}

impl GatewayConfig {
    /// Load from TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// File (if given) then process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally `std::env::var`)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(ENV_TOKEN) {
            self.upstream.token = token;
        }
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.upstream.endpoint = endpoint;
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind_address = bind;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} is not a port: {}", ENV_PORT, port))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let token = self.upstream.token.trim();
        if token.is_empty() || token == TOKEN_SCHEME {
            return Err(ConfigError::Invalid(format!(
                "upstream token is empty (set {} or upstream.token)",
                ENV_TOKEN
            )));
        }
        let endpoint = &self.upstream.endpoint;
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(ConfigError::Invalid(format!(
                "upstream endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }
        if !self.server.rpc_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.rpc_path must start with '/', got '{}'",
                self.server.rpc_path
            )));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Generate sample config
    pub fn sample_toml() -> String {
        r#"# flespi RPC gateway configuration
log_level = "Info"

[server]
bind_address = "127.0.0.1"
port = 8080
rpc_path = "/"
max_body_size = 1048576
request_logging = true
request_timeout_secs = 30

[upstream]
endpoint = "https://flespi.io"
# Prefer the FLESPI_TOKEN environment variable over storing the token here.
# token = "FlespiToken xxxxxxxx"
probe_path = "/platform/customer"
"#
        .into()
    }
}
