// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Method dispatch
//!
//! The [`Dispatcher`] resolves every registered method name against the
//! upstream capability tree once, at construction, and keeps the outcome in a
//! lookup table. A call is then a table lookup, one upstream invocation, and
//! the unwrap of `envelope.data.result`.
//!
//! Every failure after the lookup is flattened into
//! `Error processing '<method>': <detail>`, whatever its cause. The
//! [`FailureKind`] survives on the error value for logging but is never sent
//! to callers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::registry::CapabilityRegistry;
use crate::upstream::{Capability, CapabilityNode, UpstreamClient, UpstreamError};

/// A registered name that does not lead to an invocable capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Method '{0}' not found in upstream client")]
    NotFound(String),
    #[error("'{0}' is not a function")]
    NotAFunction(String),
}

/// Where a dispatch failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Registry and client disagree on the capability tree
    Resolve,
    /// The upstream call rejected
    Upstream,
    /// Upstream answered without `data.result`
    Envelope,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The name is not in the registry. The RPC front filters these first.
    #[error("Method '{0}' is not registered")]
    NotRegistered(String),

    #[error("Error processing '{method}': {detail}")]
    Processing {
        method: String,
        kind: FailureKind,
        detail: String,
    },
}

impl DispatchError {
    fn processing(method: &str, kind: FailureKind, detail: impl ToString) -> Self {
        Self::Processing {
            method: method.to_string(),
            kind,
            detail: detail.to_string(),
        }
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::NotRegistered(_) => None,
            Self::Processing { kind, .. } => Some(*kind),
        }
    }
}

/// Walk `root` along the dotted `method` path
pub fn resolve(
    root: &CapabilityNode,
    method: &str,
) -> Result<Arc<dyn Capability>, ResolveError> {
    let mut node = root;
    for segment in method.split('.') {
        node = node
            .member(segment)
            .ok_or_else(|| ResolveError::NotFound(method.to_string()))?;
    }
    match node {
        CapabilityNode::Function(capability) => Ok(capability.clone()),
        _ => Err(ResolveError::NotAFunction(method.to_string())),
    }
}

type Binding = Result<Arc<dyn Capability>, ResolveError>;

/// Registered method names bound to upstream capabilities
pub struct Dispatcher {
    // Keeps the connection alive for as long as any binding can be called.
    _client: Arc<dyn UpstreamClient>,
    registry: CapabilityRegistry,
    bindings: HashMap<String, Binding>,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn UpstreamClient>, registry: CapabilityRegistry) -> Self {
        let bindings: HashMap<String, Binding> = registry
            .iter()
            .map(|method| {
                let binding = resolve(client.capabilities(), method);
                if let Err(err) = &binding {
                    log::warn!("registered method does not resolve upstream: {}", err);
                }
                (method.to_string(), binding)
            })
            .collect();

        log::debug!(
            "dispatcher bound {}/{} registered methods",
            bindings.values().filter(|b| b.is_ok()).count(),
            registry.len()
        );

        Self {
            _client: client,
            registry,
            bindings,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn is_registered(&self, method: &str) -> bool {
        self.bindings.contains_key(method)
    }

    /// Call `method` with positional `params` and return `data.result`
    pub async fn invoke(&self, method: &str, params: Vec<Value>) -> Result<Value, DispatchError> {
        let binding = self
            .bindings
            .get(method)
            .ok_or_else(|| DispatchError::NotRegistered(method.to_string()))?;

        let capability = binding
            .as_ref()
            .map_err(|err| DispatchError::processing(method, FailureKind::Resolve, err))?;

        let envelope = capability.call(params).await.map_err(|err: UpstreamError| {
            DispatchError::processing(method, FailureKind::Upstream, err)
        })?;

        envelope.into_result().ok_or_else(|| {
            DispatchError::processing(
                method,
                FailureKind::Envelope,
                "response envelope has no data.result field",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FLESPI_METHODS;
    use crate::upstream::stub::{StubCapability, StubClient};
    use crate::upstream::ResponseEnvelope;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn dispatcher(client: StubClient, methods: &[&str]) -> Dispatcher {
        Dispatcher::new(
            Arc::new(client),
            CapabilityRegistry::new(methods.iter().copied()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_every_registered_method_returns_result() {
        let mut client = StubClient::new();
        let mut stubs = Vec::new();
        for (i, method) in FLESPI_METHODS.iter().enumerate() {
            let stub = StubCapability::replying(json!({ "method": method, "n": i }));
            client = client.with_capability(method, &stub);
            stubs.push(stub);
        }
        let dispatcher = Dispatcher::new(Arc::new(client), CapabilityRegistry::flespi());

        for (i, method) in FLESPI_METHODS.iter().enumerate() {
            let result = dispatcher.invoke(method, vec![]).await.unwrap();
            assert_eq!(result, json!({ "method": method, "n": i }));
            assert_eq!(stubs[i].calls().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_missing_first_segment_is_not_found() {
        let dispatcher = dispatcher(StubClient::new(), &["http.gw.devices.get"]);
        let err = dispatcher
            .invoke("http.gw.devices.get", vec![])
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("http.gw.devices.get"));
        assert!(message.contains("not found"));
        assert_eq!(err.kind(), Some(FailureKind::Resolve));
        assert_eq!(
            message,
            "Error processing 'http.gw.devices.get': \
             Method 'http.gw.devices.get' not found in upstream client"
        );
    }

    #[tokio::test]
    async fn test_missing_middle_segment_is_not_found() {
        let stub = StubCapability::replying(json!(1));
        let client = StubClient::new().with_capability("http.gw.channels.get", &stub);
        let dispatcher = dispatcher(client, &["http.gw.devices.get"]);
        let err = dispatcher.invoke("http.gw.devices.get", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_non_function_terminal() {
        let client = StubClient::new().with("a.b.version", CapabilityNode::Value(json!("2.1")));
        let dispatcher = dispatcher(client, &["a.b.version", "a.b"]);

        let err = dispatcher.invoke("a.b.version", vec![]).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("a.b.version"));
        assert!(message.contains("not a function"));

        // A namespace is not callable either
        let err = dispatcher.invoke("a.b", vec![]).await.unwrap_err();
        assert!(err.to_string().contains("'a.b' is not a function"));
    }

    #[tokio::test]
    async fn test_upstream_rejection_message_is_flattened() {
        let stub = StubCapability::failing("boom");
        let client = StubClient::new().with_capability("http.gw.devices.get", &stub);
        let dispatcher = dispatcher(client, &["http.gw.devices.get"]);

        let err = dispatcher.invoke("http.gw.devices.get", vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "Error processing 'http.gw.devices.get': boom");
        assert_eq!(err.kind(), Some(FailureKind::Upstream));
    }

    #[tokio::test]
    async fn test_provider_error_keeps_provider_message() {
        let stub = StubCapability::failing_with(UpstreamError::Provider {
            status: 403,
            reason: "access denied".into(),
        });
        let client = StubClient::new().with_capability("x.get", &stub);
        let dispatcher = dispatcher(client, &["x.get"]);
        let err = dispatcher.invoke("x.get", vec![]).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error processing 'x.get': Request failed with status code 403: access denied"
        );
    }

    #[tokio::test]
    async fn test_params_are_passed_positionally_in_order() {
        let stub = StubCapability::replying(json!(null));
        let client = StubClient::new().with_capability("http.gw.devices.settings.put", &stub);
        let dispatcher = dispatcher(client, &["http.gw.devices.settings.put"]);

        let params = vec![json!("a"), json!({"b": 2}), json!([3])];
        dispatcher
            .invoke("http.gw.devices.settings.put", params.clone())
            .await
            .unwrap();
        assert_eq!(stub.calls(), vec![params]);
    }

    #[tokio::test]
    async fn test_envelope_without_result_fails_descriptively() {
        let stub = StubCapability::with_envelope(ResponseEnvelope::ok(json!({"errors": []})));
        let client = StubClient::new().with_capability("x.get", &stub);
        let dispatcher = dispatcher(client, &["x.get"]);

        let err = dispatcher.invoke("x.get", vec![]).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error processing 'x.get': response envelope has no data.result field"
        );
        assert_eq!(err.kind(), Some(FailureKind::Envelope));
    }

    #[tokio::test]
    async fn test_null_result_is_a_result() {
        let stub = StubCapability::replying(Value::Null);
        let client = StubClient::new().with_capability("x.get", &stub);
        let dispatcher = dispatcher(client, &["x.get"]);
        assert_eq!(dispatcher.invoke("x.get", vec![]).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_unregistered_name_is_rejected_even_if_upstream_has_it() {
        let stub = StubCapability::replying(json!(1));
        let client = StubClient::new().with_capability("http.gw.devices.delete", &stub);
        let dispatcher = dispatcher(client, &["http.gw.devices.get"]);

        let err = dispatcher
            .invoke("http.gw.devices.delete", vec![json!("all")])
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::NotRegistered("http.gw.devices.delete".into()));
        assert!(stub.calls().is_empty());
        assert!(!dispatcher.is_registered("http.gw.devices.delete"));
    }

    #[tokio::test]
    async fn test_concurrent_invocations_are_independent() {
        let slow = StubCapability::replying(json!("slow")).delayed(Duration::from_millis(500));
        let fast = StubCapability::replying(json!("fast"));
        let client = StubClient::new()
            .with_capability("http.gw.devices.get", &slow)
            .with_capability("http.gw.channels.get", &fast);
        let dispatcher = Arc::new(dispatcher(
            client,
            &["http.gw.devices.get", "http.gw.channels.get"],
        ));

        let slow_task = {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.invoke("http.gw.devices.get", vec![]).await })
        };
        let started = Instant::now();
        let fast_result = dispatcher.invoke("http.gw.channels.get", vec![]).await.unwrap();
        assert_eq!(fast_result, json!("fast"));
        assert!(started.elapsed() < Duration::from_millis(400));

        assert_eq!(slow_task.await.unwrap().unwrap(), json!("slow"));
    }

    #[test]
    fn test_resolve_walks_tree() {
        let stub = StubCapability::replying(json!(1));
        let root = CapabilityNode::namespace().with("a.b.c", stub.node());
        assert!(resolve(&root, "a.b.c").is_ok());
        assert_eq!(
            resolve(&root, "a.x.c").err(),
            Some(ResolveError::NotFound("a.x.c".into()))
        );
        assert_eq!(
            resolve(&root, "a.b.c.d").err(),
            Some(ResolveError::NotFound("a.b.c.d".into()))
        );
    }
}
