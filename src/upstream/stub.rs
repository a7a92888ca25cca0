// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! In-memory upstream client for tests and benchmarks

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    Capability, CapabilityNode, Lifecycle, ResponseEnvelope, UpstreamClient, UpstreamError,
};

#[derive(Debug, Clone)]
enum Reply {
    Envelope(ResponseEnvelope),
    Fail(UpstreamError),
}

/// Capability with a canned reply that records every call's arguments
#[derive(Debug, Clone)]
pub struct StubCapability {
    reply: Reply,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl StubCapability {
    /// Reply with `{data: {result: <result>}}`
    pub fn replying(result: Value) -> Self {
        Self::with_envelope(ResponseEnvelope::ok(json!({ "result": result })))
    }

    /// Reply with an arbitrary envelope
    pub fn with_envelope(envelope: ResponseEnvelope) -> Self {
        Self {
            reply: Reply::Envelope(envelope),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reject with `UpstreamError::Rejected(message)`
    pub fn failing(message: impl Into<String>) -> Self {
        Self::failing_with(UpstreamError::Rejected(message.into()))
    }

    pub fn failing_with(error: UpstreamError) -> Self {
        Self {
            reply: Reply::Fail(error),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep before replying
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Arguments of every call so far; clones share the record
    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn node(&self) -> CapabilityNode {
        CapabilityNode::Function(Arc::new(self.clone()))
    }
}

#[async_trait]
impl Capability for StubCapability {
    async fn call(&self, args: Vec<Value>) -> Result<ResponseEnvelope, UpstreamError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(args);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Reply::Envelope(envelope) => Ok(envelope.clone()),
            Reply::Fail(error) => Err(error.clone()),
        }
    }
}

/// Upstream client over a hand-built capability tree
#[derive(Debug, Default)]
pub struct StubClient {
    root: CapabilityNode,
    lifecycle: Lifecycle,
}

impl StubClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `node` at a dotted path
    pub fn with(mut self, path: &str, node: CapabilityNode) -> Self {
        self.root.insert(path, node);
        self
    }

    /// Mount a stub capability at a dotted path
    pub fn with_capability(self, path: &str, capability: &StubCapability) -> Self {
        self.with(path, capability.node())
    }
}

impl UpstreamClient for StubClient {
    fn capabilities(&self) -> &CapabilityNode {
        &self.root
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}
