// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Upstream client boundary
//!
//! The gateway only sees the upstream provider through [`UpstreamClient`]: a
//! tree of named capabilities plus a [`Lifecycle`] signal source. The real
//! implementation is [`flespi::FlespiClient`]; [`stub::StubClient`] stands in
//! for it in tests and benchmarks.
//!
//! # Capability tree
//!
//! ```text
//! http
//! └── gw
//!     ├── channels ── get, messages.get, logs.get, ...
//!     └── devices ─── get, telemetry.get, settings.put, ...
//! ```
//!
//! A dotted method name such as `http.gw.devices.telemetry.get` is a path
//! through this tree. Leaves are [`CapabilityNode::Function`]s that take
//! positional JSON arguments and yield a [`ResponseEnvelope`].

pub mod flespi;
pub mod lifecycle;
pub mod stub;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use lifecycle::{ConnectionState, Lifecycle, LifecycleEvent, LifecycleLogger};

/// Errors raised by an upstream capability call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    /// The call was rejected with a plain message
    #[error("{0}")]
    Rejected(String),

    /// Transport failure (connect, TLS, broken connection)
    #[error("{0}")]
    Transport(String),

    /// Provider answered with a non-success status
    #[error("Request failed with status code {status}: {reason}")]
    Provider { status: u16, reason: String },

    /// Positional arguments do not fit the capability
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Provider body could not be decoded
    #[error("Malformed response body: {0}")]
    Decode(String),
}

/// Provider response wrapper; `data` is the decoded body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub data: Value,
}

impl ResponseEnvelope {
    /// Envelope with status 200
    pub fn ok(data: Value) -> Self {
        Self { status: 200, data }
    }

    /// The payload at `data.result`, if the envelope has that shape
    pub fn result(&self) -> Option<&Value> {
        self.data.as_object().and_then(|body| body.get("result"))
    }

    pub fn into_result(self) -> Option<Value> {
        match self.data {
            Value::Object(mut body) => body.remove("result"),
            _ => None,
        }
    }
}

/// A single invocable upstream operation
#[async_trait]
pub trait Capability: Send + Sync {
    /// Invoke with positional arguments
    async fn call(&self, args: Vec<Value>) -> Result<ResponseEnvelope, UpstreamError>;
}

/// Node of the capability tree
#[derive(Clone)]
pub enum CapabilityNode {
    /// Named members
    Namespace(BTreeMap<String, CapabilityNode>),
    /// Invocable leaf
    Function(Arc<dyn Capability>),
    /// A present but non-invocable member
    Value(Value),
}

impl std::fmt::Debug for CapabilityNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Namespace(members) => f
                .debug_tuple("Namespace")
                .field(&members.keys().collect::<Vec<_>>())
                .finish(),
            Self::Function(_) => write!(f, "Function"),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

impl Default for CapabilityNode {
    fn default() -> Self {
        Self::namespace()
    }
}

impl CapabilityNode {
    /// Empty namespace
    pub fn namespace() -> Self {
        Self::Namespace(BTreeMap::new())
    }

    pub fn function<C: Capability + 'static>(capability: C) -> Self {
        Self::Function(Arc::new(capability))
    }

    /// Insert `node` at a dotted `path`, creating intermediate namespaces.
    ///
    /// An intermediate member that is not a namespace is replaced by one.
    pub fn insert(&mut self, path: &str, node: CapabilityNode) {
        let segments: Vec<&str> = path.split('.').collect();
        self.insert_segments(&segments, node);
    }

    fn insert_segments(&mut self, segments: &[&str], node: CapabilityNode) {
        let Some((first, rest)) = segments.split_first() else {
            *self = node;
            return;
        };
        if !matches!(self, Self::Namespace(_)) {
            *self = Self::namespace();
        }
        if let Self::Namespace(members) = self {
            members
                .entry(first.to_string())
                .or_insert_with(Self::namespace)
                .insert_segments(rest, node);
        }
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, path: &str, node: CapabilityNode) -> Self {
        self.insert(path, node);
        self
    }

    /// Look up a direct member by name
    pub fn member(&self, name: &str) -> Option<&CapabilityNode> {
        match self {
            Self::Namespace(members) => members.get(name),
            _ => None,
        }
    }

    /// Dotted paths of every function below this node, sorted
    pub fn function_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths(String::new(), &mut out);
        out
    }

    fn collect_paths(&self, prefix: String, out: &mut Vec<String>) {
        match self {
            Self::Function(_) => out.push(prefix),
            Self::Value(_) => {}
            Self::Namespace(members) => {
                for (name, child) in members {
                    let path = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{}.{}", prefix, name)
                    };
                    child.collect_paths(path, out);
                }
            }
        }
    }
}

/// The upstream provider as seen by the dispatcher
pub trait UpstreamClient: Send + Sync {
    /// Root of the capability tree
    fn capabilities(&self) -> &CapabilityNode;

    /// Connection lifecycle signals
    fn lifecycle(&self) -> &Lifecycle;
}
