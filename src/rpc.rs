// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! JSON-RPC 2.0 front
//!
//! Turns one request object into at most one response object. Only names in
//! the dispatcher's registry are routed; anything else is answered with the
//! standard `-32601` before the dispatcher is involved.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatch::{DispatchError, Dispatcher};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// Code attached to dispatch failures (generic server error)
pub const DISPATCH_ERROR: i32 = 0;

/// Validated inbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    /// `None` for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(PARSE_ERROR, format!("Parse error: {}", detail))
    }

    pub fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::new(INVALID_REQUEST, format!("Invalid Request: {}", detail))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {}", detail))
    }
}

impl From<DispatchError> for RpcError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotRegistered(method) => Self::method_not_found(&method),
            other @ DispatchError::Processing { .. } => {
                Self::new(DISPATCH_ERROR, other.to_string())
            }
        }
    }
}

/// Outbound response. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// Validate a raw payload. On failure returns the id to answer with.
fn parse_request(payload: Value) -> Result<RpcRequest, (Value, RpcError)> {
    let mut object: Map<String, Value> = match payload {
        Value::Object(object) => object,
        Value::Array(_) => {
            return Err((Value::Null, RpcError::invalid_request("batch requests are not supported")))
        }
        _ => return Err((Value::Null, RpcError::invalid_request("expected an object"))),
    };

    let id = object.remove("id");
    let reply_id = id.clone().unwrap_or(Value::Null);
    let valid_id = |v: &&Value| matches!(v, Value::Null | Value::String(_) | Value::Number(_));
    if let Some(bad) = id.as_ref().filter(|v| !valid_id(v)) {
        return Err((Value::Null, RpcError::invalid_request(format!("invalid id {}", bad))));
    }

    match object.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        _ => return Err((reply_id, RpcError::invalid_request("jsonrpc must be \"2.0\""))),
    }

    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        _ => return Err((reply_id, RpcError::invalid_request("method must be a string"))),
    };

    let params = match object.remove("params") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(params)) => params,
        Some(_) => {
            return Err((reply_id, RpcError::invalid_params("params must be a positional array")))
        }
    };

    Ok(RpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        method,
        params,
        id,
    })
}

/// JSON-RPC server bound to a dispatcher
pub struct RpcServer {
    dispatcher: Arc<Dispatcher>,
}

impl RpcServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Methods this server answers, in registration order
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.dispatcher.registry().iter()
    }

    /// Handle a raw body. `None` means no response (notification).
    pub async fn receive_str(&self, body: &str) -> Option<RpcResponse> {
        self.receive_bytes(body.as_bytes()).await
    }

    /// Handle raw body bytes; invalid UTF-8 is a parse error like any bad JSON
    pub async fn receive_bytes(&self, body: &[u8]) -> Option<RpcResponse> {
        match serde_json::from_slice::<Value>(body) {
            Ok(payload) => self.receive(payload).await,
            Err(err) => Some(RpcResponse::failure(Value::Null, RpcError::parse_error(err))),
        }
    }

    /// Handle a decoded payload. `None` means no response (notification).
    pub async fn receive(&self, payload: Value) -> Option<RpcResponse> {
        log::debug!("RPC payload: {}", payload);
        match parse_request(payload) {
            Ok(request) => self.handle(request).await,
            Err((id, error)) => {
                log::info!("rejected RPC request: {}", error.message);
                Some(RpcResponse::failure(id, error))
            }
        }
    }

    /// Handle a validated request
    pub async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        log::info!(
            "RPC request received: method={} id={}",
            request.method,
            request.id.as_ref().map(Value::to_string).unwrap_or_else(|| "-".into())
        );

        let outcome = if self.dispatcher.is_registered(&request.method) {
            self.dispatcher
                .invoke(&request.method, request.params)
                .await
                .map_err(|err| {
                    log::warn!("{} ({:?})", err, err.kind());
                    RpcError::from(err)
                })
        } else {
            Err(RpcError::method_not_found(&request.method))
        };

        let id = request.id?;
        Some(match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => RpcResponse::failure(id, error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CapabilityRegistry;
    use crate::upstream::stub::{StubCapability, StubClient};
    use serde_json::json;

    fn server_with(path: &str, stub: &StubCapability) -> RpcServer {
        let client = StubClient::new().with_capability(path, stub);
        let dispatcher = Dispatcher::new(Arc::new(client), CapabilityRegistry::flespi());
        RpcServer::new(Arc::new(dispatcher))
    }

    #[tokio::test]
    async fn test_success_response() {
        let stub = StubCapability::replying(json!([{"id": 1}]));
        let server = server_with("http.gw.devices.get", &stub);

        let response = server
            .receive(json!({
                "jsonrpc": "2.0", "method": "http.gw.devices.get", "params": [{}], "id": 1
            }))
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"jsonrpc": "2.0", "result": [{"id": 1}], "id": 1})
        );
        assert_eq!(stub.calls(), vec![vec![json!({})]]);
    }

    #[tokio::test]
    async fn test_unregistered_method_is_method_not_found() {
        let stub = StubCapability::replying(json!(1));
        let server = server_with("foo.bar", &stub);

        let response = server
            .receive(json!({"jsonrpc": "2.0", "method": "foo.bar", "params": [], "id": "a"}))
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert!(!error.message.contains("Error processing"));
        assert_eq!(response.id, json!("a"));
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_uses_flattened_message() {
        let stub = StubCapability::failing("boom");
        let server = server_with("http.gw.devices.logs.get", &stub);

        let response = server
            .receive(json!({
                "jsonrpc": "2.0", "method": "http.gw.devices.logs.get", "params": ["all"], "id": 7
            }))
            .await
            .unwrap();
        assert_eq!(response.result, None);
        assert_eq!(
            response.error,
            Some(RpcError::new(
                DISPATCH_ERROR,
                "Error processing 'http.gw.devices.logs.get': boom"
            ))
        );
    }

    #[tokio::test]
    async fn test_registered_but_unresolved_is_not_method_not_found() {
        let stub = StubCapability::replying(json!(1));
        let server = server_with("http.gw.devices.get", &stub);

        let response = server
            .receive(json!({"jsonrpc": "2.0", "method": "http.gw.channels.get", "id": 2}))
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, DISPATCH_ERROR);
        assert!(error.message.contains("not found"));
        assert!(error.message.starts_with("Error processing 'http.gw.channels.get'"));
    }

    #[tokio::test]
    async fn test_parse_error() {
        let stub = StubCapability::replying(json!(1));
        let server = server_with("http.gw.devices.get", &stub);
        let response = server.receive_str("{not json").await.unwrap();
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
        assert_eq!(response.id, Value::Null);
    }

    #[tokio::test]
    async fn test_invalid_utf8_bytes_are_parse_error() {
        let stub = StubCapability::replying(json!(1));
        let server = server_with("http.gw.devices.get", &stub);
        let response = server.receive_bytes(&[0xff, 0xfe, b'{']).await.unwrap();
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
        assert_eq!(response.id, Value::Null);
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_is_invalid_request() {
        let stub = StubCapability::replying(json!(1));
        let server = server_with("http.gw.devices.get", &stub);
        let response = server
            .receive(json!([{"jsonrpc": "2.0", "method": "http.gw.devices.get", "id": 1}]))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_envelope_fields() {
        let stub = StubCapability::replying(json!(1));
        let server = server_with("http.gw.devices.get", &stub);

        let missing_version = server
            .receive(json!({"method": "http.gw.devices.get", "id": 3}))
            .await
            .unwrap();
        assert_eq!(missing_version.error.unwrap().code, INVALID_REQUEST);
        assert_eq!(missing_version.id, json!(3));

        let numeric_method = server
            .receive(json!({"jsonrpc": "2.0", "method": 5, "id": 4}))
            .await
            .unwrap();
        assert_eq!(numeric_method.error.unwrap().code, INVALID_REQUEST);

        let object_id = server
            .receive(json!({"jsonrpc": "2.0", "method": "http.gw.devices.get", "id": {}}))
            .await
            .unwrap();
        assert_eq!(object_id.error.unwrap().code, INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_named_params_are_invalid() {
        let stub = StubCapability::replying(json!(1));
        let server = server_with("http.gw.devices.get", &stub);
        let response = server
            .receive(json!({
                "jsonrpc": "2.0",
                "method": "http.gw.devices.get",
                "params": {"selector": "all"},
                "id": 5
            }))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_params_means_no_arguments() {
        let stub = StubCapability::replying(json!("ok"));
        let server = server_with("http.gw.devices.get", &stub);
        let response = server
            .receive(json!({"jsonrpc": "2.0", "method": "http.gw.devices.get", "id": 6}))
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!("ok")));
        assert_eq!(stub.calls(), vec![Vec::<Value>::new()]);
    }

    #[tokio::test]
    async fn test_notification_runs_without_response() {
        let stub = StubCapability::replying(json!("ok"));
        let server = server_with("http.gw.devices.get", &stub);
        let response = server
            .receive(json!({"jsonrpc": "2.0", "method": "http.gw.devices.get", "params": ["all"]}))
            .await;
        assert!(response.is_none());
        assert_eq!(stub.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_null_id_is_answered() {
        let stub = StubCapability::replying(json!("ok"));
        let server = server_with("http.gw.devices.get", &stub);
        let response = server
            .receive(json!({"jsonrpc": "2.0", "method": "http.gw.devices.get", "id": null}))
            .await
            .unwrap();
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.result, Some(json!("ok")));
    }

    #[test]
    fn test_error_response_serialization_has_no_result() {
        let response = RpcResponse::failure(json!(1), RpcError::method_not_found("foo.bar"));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32601, "message": "Method not found: foo.bar"},
                "id": 1
            })
        );
    }

    #[test]
    fn test_server_lists_registry_methods() {
        let stub = StubCapability::replying(json!(1));
        let server = server_with("http.gw.devices.get", &stub);
        assert_eq!(server.methods().count(), 9);
    }
}
