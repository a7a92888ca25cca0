// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Error types for the flespi RPC gateway

use std::io;
use thiserror::Error;

use crate::config::ConfigError;
use crate::registry::RegistryError;
use crate::upstream::UpstreamError;

/// Result type alias for gateway setup and serving paths
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
///
/// Request handling never surfaces this type to callers: dispatch failures
/// are turned into JSON-RPC error objects by [`crate::rpc::RpcServer`].
#[derive(Error, Debug)]
pub enum GatewayError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Network error (binding, upstream client construction)
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid capability registry
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Upstream provider error
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}
