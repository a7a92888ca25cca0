// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! flespi REST gateway client
//!
//! One pooled `reqwest::Client` carries every call, so the keep-alive pool is
//! the persistent upstream connection. Each REST route is mounted in the
//! capability tree under its dotted name (`http.gw.devices.telemetry.get`
//! maps to `GET /gw/devices/{selector}/telemetry/{param}`).
//!
//! # Positional arguments
//!
//! Every call takes, in order:
//! 1. one argument per selector slot of the route (string, number, or an
//!    array joined with `,`); optional slots fall back to `all` when the next
//!    argument is not a selector. On `post` and `put` routes an array fills an
//!    optional slot only when another argument follows it, so a lone array
//!    is sent as the body,
//! 2. the JSON request body, for `post` and `put` routes only,
//! 3. an optional object of query parameters (strings verbatim, anything else
//!    JSON-encoded).
//!
//! Extra arguments are ignored.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Url};
use serde_json::Value;

use super::{
    Capability, CapabilityNode, ConnectionState, Lifecycle, LifecycleEvent, ResponseEnvelope,
    UpstreamClient, UpstreamError,
};
use crate::config::UpstreamConfig;
use crate::error::{GatewayError, Result};

/// Default for optional selector slots
const SELECT_ALL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    fn method(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
            Self::Delete => Method::DELETE,
        }
    }

    fn has_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

/// Dotted name, verb, path template. `{}` is a required selector, `{?}` an optional one.
const ROUTES: &[(&str, Verb, &str)] = &[
    ("http.gw.channels.get", Verb::Get, "gw/channels/{}"),
    ("http.gw.channels.post", Verb::Post, "gw/channels"),
    ("http.gw.channels.put", Verb::Put, "gw/channels/{}"),
    ("http.gw.channels.delete", Verb::Delete, "gw/channels/{}"),
    ("http.gw.channels.messages.get", Verb::Get, "gw/channels/{}/messages"),
    ("http.gw.channels.logs.get", Verb::Get, "gw/channels/{}/logs"),
    ("http.gw.devices.get", Verb::Get, "gw/devices/{}"),
    ("http.gw.devices.post", Verb::Post, "gw/devices"),
    ("http.gw.devices.put", Verb::Put, "gw/devices/{}"),
    ("http.gw.devices.delete", Verb::Delete, "gw/devices/{}"),
    ("http.gw.devices.messages.get", Verb::Get, "gw/devices/{}/messages"),
    ("http.gw.devices.logs.get", Verb::Get, "gw/devices/{}/logs"),
    ("http.gw.devices.telemetry.get", Verb::Get, "gw/devices/{}/telemetry/{?}"),
    ("http.gw.devices.telemetry.delete", Verb::Delete, "gw/devices/{}/telemetry/{?}"),
    ("http.gw.devices.settings.get", Verb::Get, "gw/devices/{}/settings/{?}"),
    ("http.gw.devices.settings.put", Verb::Put, "gw/devices/{}/settings/{?}"),
    ("http.gw.devices.settings.post", Verb::Post, "gw/devices/{}/settings/{?}"),
    ("http.gw.devices.settings.delete", Verb::Delete, "gw/devices/{}/settings/{?}"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(&'static str),
    Selector,
    OptionalSelector,
}

fn parse_template(template: &'static str) -> Vec<Segment> {
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s {
            "{}" => Segment::Selector,
            "{?}" => Segment::OptionalSelector,
            lit => Segment::Literal(lit),
        })
        .collect()
}

fn is_selector(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Array(_))
}

fn selector_string(value: &Value) -> std::result::Result<String, UpstreamError> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(UpstreamError::InvalidArguments(format!(
                    "selector list items must be strings or numbers, got {}",
                    other
                ))),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(|parts| parts.join(",")),
        other => Err(UpstreamError::InvalidArguments(format!(
            "invalid selector {}",
            other
        ))),
    }
}

/// Query parameters from an optional JSON object
fn query_pairs(value: Option<Value>) -> std::result::Result<Vec<(String, String)>, UpstreamError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect()),
        Some(other) => Err(UpstreamError::InvalidArguments(format!(
            "query parameters must be an object, got {}",
            other
        ))),
    }
}

/// Joined `errors[].reason` from a flespi error body
fn error_reasons(body: &Value) -> Option<String> {
    let reasons: Vec<&str> = body
        .get("errors")?
        .as_array()?
        .iter()
        .filter_map(|e| e.get("reason").and_then(Value::as_str))
        .collect();
    if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("; "))
    }
}

struct Inner {
    http: reqwest::Client,
    base: Url,
    probe: Vec<String>,
    lifecycle: Lifecycle,
}

impl Inner {
    fn url_for(&self, segments: &[String]) -> std::result::Result<Url, UpstreamError> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                let detail = format!("endpoint {} cannot carry a path", self.base);
                UpstreamError::InvalidArguments(detail)
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        segments: &[String],
        body: Option<Value>,
        query: Vec<(String, String)>,
    ) -> std::result::Result<ResponseEnvelope, UpstreamError> {
        let url = self.url_for(segments)?;
        if self.lifecycle.state() == ConnectionState::Offline {
            self.lifecycle.emit(LifecycleEvent::Reconnecting);
        }

        log::debug!("upstream {} {}", method, url);
        let mut request = self.http.request(method, url);
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| self.transport_failure(e))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.transport_failure(e))?;
        // A rejected call (bad token, unknown id) does not prove the connection usable
        if status.is_success() && self.lifecycle.state() != ConnectionState::Connected {
            self.lifecycle.emit(LifecycleEvent::Connected);
        }

        let decoded = if bytes.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_slice::<Value>(&bytes)
        };

        if !status.is_success() {
            let reason = decoded
                .ok()
                .as_ref()
                .and_then(error_reasons)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(UpstreamError::Provider {
                status: status.as_u16(),
                reason,
            });
        }

        let data = decoded.map_err(|e| UpstreamError::Decode(e.to_string()))?;
        Ok(ResponseEnvelope {
            status: status.as_u16(),
            data,
        })
    }

    fn transport_failure(&self, err: reqwest::Error) -> UpstreamError {
        let message = err.to_string();
        self.lifecycle.emit(LifecycleEvent::Errored(message.clone()));
        if err.is_connect() {
            self.lifecycle.emit(LifecycleEvent::Offline);
        }
        UpstreamError::Transport(message)
    }
}

/// One REST route bound to the shared client
struct RestCall {
    inner: Arc<Inner>,
    verb: Verb,
    route: Vec<Segment>,
}

impl RestCall {
    fn render(
        &self,
        args: Vec<Value>,
    ) -> std::result::Result<(Vec<String>, Option<Value>, Vec<(String, String)>), UpstreamError>
    {
        let mut args = args.into_iter().peekable();
        let mut segments = Vec::with_capacity(self.route.len());
        let mut position = 0;

        for segment in &self.route {
            match segment {
                Segment::Literal(lit) => segments.push(lit.to_string()),
                Segment::Selector => {
                    position += 1;
                    let arg = args.next().ok_or_else(|| {
                        UpstreamError::InvalidArguments(format!(
                            "missing selector argument #{}",
                            position
                        ))
                    })?;
                    segments.push(selector_string(&arg)?);
                }
                Segment::OptionalSelector => {
                    // For post/put a lone trailing array is the body, not a selector
                    let body_only = self.verb.has_body() && args.len() < 2;
                    match args.next_if(|arg| is_selector(arg) && !(body_only && arg.is_array())) {
                        Some(arg) => {
                            position += 1;
                            segments.push(selector_string(&arg)?);
                        }
                        None => segments.push(SELECT_ALL.to_string()),
                    }
                }
            }
        }

        let body = if self.verb.has_body() {
            Some(args.next().ok_or_else(|| {
                UpstreamError::InvalidArguments("missing request body argument".to_string())
            })?)
        } else {
            None
        };
        let query = query_pairs(args.next())?;
        Ok((segments, body, query))
    }
}

#[async_trait]
impl Capability for RestCall {
    async fn call(&self, args: Vec<Value>) -> std::result::Result<ResponseEnvelope, UpstreamError> {
        let (segments, body, query) = self.render(args)?;
        self.inner.send(self.verb.method(), &segments, body, query).await
    }
}

/// flespi gateway client
pub struct FlespiClient {
    inner: Arc<Inner>,
    root: CapabilityNode,
}

impl FlespiClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let base = Url::parse(&config.endpoint).map_err(|e| {
            GatewayError::InvalidInput(format!("invalid endpoint {}: {}", config.endpoint, e))
        })?;

        let mut auth = HeaderValue::from_str(&config.authorization())
            .map_err(|e| GatewayError::InvalidInput(format!("invalid token: {}", e)))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("flespi-rpc-gateway/", env!("CARGO_PKG_VERSION")));
        // A local gateway is never reached through the system proxy
        if matches!(base.host_str(), Some("localhost" | "127.0.0.1" | "[::1]")) {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|e| GatewayError::Network(format!("cannot build HTTP client: {}", e)))?;

        let inner = Arc::new(Inner {
            http,
            base,
            probe: config
                .probe_path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            lifecycle: Lifecycle::new(),
        });

        let mut root = CapabilityNode::namespace();
        for (name, verb, template) in ROUTES {
            root.insert(
                name,
                CapabilityNode::function(RestCall {
                    inner: inner.clone(),
                    verb: *verb,
                    route: parse_template(template),
                }),
            );
        }

        Ok(Self { inner, root })
    }

    /// Probe the gateway once, emitting lifecycle signals along the way
    pub async fn connect(&self) -> std::result::Result<(), UpstreamError> {
        self.inner.lifecycle.emit(LifecycleEvent::Connecting);
        let result = self
            .inner
            .send(Method::GET, &self.inner.probe, None, Vec::new())
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err @ UpstreamError::Provider { .. }) => {
                self.inner
                    .lifecycle
                    .emit(LifecycleEvent::Errored(err.to_string()));
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Mark the connection closed. In-flight calls are not cancelled.
    pub fn close(&self) {
        self.inner.lifecycle.emit(LifecycleEvent::Closed);
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.base
    }
}

impl UpstreamClient for FlespiClient {
    fn capabilities(&self) -> &CapabilityNode {
        &self.root
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }
}
