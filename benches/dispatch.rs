// SPDX-License-Identifier: AGPL-3.0-or-later
//! Benchmark for method dispatch.
//!
//! Measures gateway overhead per call against the in-memory stub client:
//! dispatcher lookup alone, and the full JSON-RPC parse/dispatch/serialize path.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use fgwlib::upstream::stub::{StubCapability, StubClient};
use fgwlib::{CapabilityRegistry, Dispatcher, RpcServer, FLESPI_METHODS};
use serde_json::json;

fn dispatcher() -> Arc<Dispatcher> {
    let mut client = StubClient::new();
    for method in FLESPI_METHODS {
        client = client.with_capability(method, &StubCapability::replying(json!([{"id": 1}])));
    }
    Arc::new(Dispatcher::new(Arc::new(client), CapabilityRegistry::flespi()))
}

fn bench_invoke(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let dispatcher = dispatcher();

    c.bench_function("dispatcher_invoke", |b| {
        b.to_async(&runtime).iter(|| {
            let dispatcher = dispatcher.clone();
            async move {
                let _ = dispatcher
                    .invoke("http.gw.devices.telemetry.get", vec![json!(1)])
                    .await;
            }
        });
    });
}

fn bench_rpc_roundtrip(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let rpc = Arc::new(RpcServer::new(dispatcher()));
    let body = r#"{"jsonrpc":"2.0","method":"http.gw.devices.get","params":[{}],"id":1}"#;

    c.bench_function("rpc_receive_str", |b| {
        b.to_async(&runtime).iter(|| {
            let rpc = rpc.clone();
            async move {
                let _ = rpc.receive_str(body).await;
            }
        });
    });
}

criterion_group!(benches, bench_invoke, bench_rpc_roundtrip);
criterion_main!(benches);
