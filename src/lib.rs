// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! flespi RPC gateway
//!
//! Exposes a fixed allow-list of flespi REST gateway operations as JSON-RPC
//! 2.0 methods on a single HTTP endpoint. A call to
//! `http.gw.devices.telemetry.get` with params `[1234]` becomes
//! `GET /gw/devices/1234/telemetry/all` against the configured flespi
//! endpoint, and the `result` array of the provider's reply comes back as the
//! JSON-RPC result.
//!
//! # Architecture
//!
//! - [`registry`]: the allow-list of dotted method names
//! - [`upstream`]: the capability tree, the flespi REST client and its lifecycle signals
//! - [`dispatch`]: binds registered names to capabilities once, then invokes them
//! - [`rpc`]: JSON-RPC 2.0 framing and error codes
//! - [`http_server`]: the HTTP/1.1 listener
//! - [`config`]: TOML and environment configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fgwlib::{CapabilityRegistry, Dispatcher, GatewayConfig, RpcServer};
//! use fgwlib::upstream::flespi::FlespiClient;
//!
//! # async fn run() -> fgwlib::Result<()> {
//! let config = GatewayConfig::load(None)?;
//! let client = Arc::new(FlespiClient::new(&config.upstream)?);
//! let dispatcher = Dispatcher::new(client, CapabilityRegistry::flespi());
//! let rpc = RpcServer::new(Arc::new(dispatcher));
//!
//! let reply = rpc
//!     .receive_str(r#"{"jsonrpc":"2.0","method":"http.gw.devices.get","params":["all"],"id":1}"#)
//!     .await;
//! println!("{:?}", reply);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http_server;
pub mod registry;
pub mod rpc;
pub mod upstream;

pub use config::{ConfigError, GatewayConfig, LogLevel, UpstreamConfig};
pub use dispatch::{DispatchError, Dispatcher, FailureKind, ResolveError};
pub use error::{GatewayError, Result};
pub use http_server::{BoundServer, HttpServer, HttpServerConfig};
pub use registry::{CapabilityRegistry, RegistryError, FLESPI_METHODS};
pub use rpc::{RpcError, RpcRequest, RpcResponse, RpcServer};
pub use upstream::{
    Capability, CapabilityNode, ConnectionState, Lifecycle, LifecycleEvent, LifecycleLogger,
    ResponseEnvelope, UpstreamClient, UpstreamError,
};
