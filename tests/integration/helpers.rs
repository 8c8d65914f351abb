//! Helper functions for integration tests

use std::time::Duration;

use chainwatch::{
    actors::{messages::CycleReport, poller::PollerHandle},
    config::Config,
};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method},
};

/// A network provider answering `getChainState` over JSON-RPC
pub fn network_provider(id: &str, target: &str, url: &str, priority: u32) -> Value {
    json!({
        "id": id,
        "kind": "network",
        "target": target,
        "url": url,
        "priority": priority,
        "request": { "style": "json_rpc", "method": "getChainState" }
    })
}

/// A protocol status endpoint reporting `/status`
pub fn protocol_provider(id: &str, target: &str, url: &str) -> Value {
    json!({
        "id": id,
        "kind": "protocol",
        "target": target,
        "url": url,
        "fields": { "status": "/status" }
    })
}

/// Config with fast timeouts and long intervals, so only explicit cycles run
/// after the initial one
pub fn test_config(providers: Vec<Value>) -> Config {
    test_config_with(providers, json!({}))
}

/// Like [`test_config`], with extra top-level sections merged in
pub fn test_config_with(providers: Vec<Value>, extra: Value) -> Config {
    let mut value = json!({
        "polling": {
            "network_interval_secs": 3600,
            "protocol_interval_secs": 3600,
            "network_timeout_ms": 300,
            "protocol_timeout_ms": 300,
            "failure_threshold": 3
        },
        "providers": providers,
        "api": { "bind_addr": "127.0.0.1:0" }
    });

    if let (Some(base), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
        for (key, section) in extra {
            base.insert(key.clone(), section.clone());
        }
    }

    serde_json::from_value(value).unwrap()
}

pub fn chain_state(slot: u64, transaction_count: u64, block_time: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "slot": slot,
            "blockHeight": slot - 100,
            "transactionCount": transaction_count,
            "blockTime": block_time
        }
    })
}

/// Answer every `getChainState` call with the given chain state
pub async fn mount_chain_state(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getChainState" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Answer every request only after `delay`
pub async fn mount_slow(server: &MockServer, delay: Duration) {
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chain_state(1_000, 10_000, 1_700_000_000))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Run one explicit cycle, waiting out any cycle the ticker started
pub async fn poll_cycle(poller: &PollerHandle) -> CycleReport {
    for _ in 0..100 {
        match poller.poll_now().await {
            Ok(report) => return report,
            Err(e) if e.to_string().contains("still in flight") => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("poll cycle failed: {e:#}"),
        }
    }
    panic!("poller for {} never became idle", poller.target);
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
