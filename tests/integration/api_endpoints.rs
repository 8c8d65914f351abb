//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - All REST endpoints return correct responses
//! - Unknown ids and bad ranges map to 404 / 400
//! - Alerts can be acknowledged and resolved over HTTP
//! - WebSocket streaming works and is rate limited per address

use std::net::SocketAddr;

use chainwatch::{
    Monitor, Sample,
    actors::{PipelineActor, PollEvent},
    api::{ApiConfig, ApiState, spawn_api_server},
    config::Config,
    error::MonitorError,
    monitors::HealthClassifier,
    sample::{NetworkReading, ProtocolReading, Reading},
};
use chrono::Utc;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};

fn config(connections_per_minute: u32) -> Config {
    serde_json::from_value(json!({
        "providers": [
            { "id": "rpc", "kind": "network", "target": "mainnet", "url": "http://rpc.invalid" },
            { "id": "dex-api", "kind": "protocol", "target": "dex", "url": "http://dex.invalid" }
        ],
        "api": { "connections_per_minute": connections_per_minute }
    }))
    .unwrap()
}

struct TestApi {
    addr: SocketAddr,
    monitor: Monitor,
    pipeline: PipelineActor,
    client: reqwest::Client,
}

impl TestApi {
    async fn spawn(connections_per_minute: u32) -> Self {
        let monitor = Monitor::new(config(connections_per_minute)).await.unwrap();

        // Driven by hand instead of through pollers
        let (_tx, rx) = mpsc::channel(1);
        let classifier = HealthClassifier::from_providers(
            monitor.config.polling.clone(),
            &monitor.config.providers,
        );
        let pipeline = PipelineActor::new(monitor.clone(), classifier, rx);

        let api_config = ApiConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            enable_cors: true,
        };
        let addr = spawn_api_server(api_config, ApiState::new(monitor.clone()))
            .await
            .unwrap();

        Self {
            addr,
            monitor,
            pipeline,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn ws_url(&self, query: &str) -> String {
        format!("ws://{}/api/stream{query}", self.addr)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn post(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.post(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn network_sample(&mut self, transaction_count: u64, block_time: i64) {
        let sample = Sample {
            provider_id: "rpc".into(),
            target: "mainnet".into(),
            timestamp: Utc::now(),
            latency_ms: 40.0,
            reading: Reading::Network(NetworkReading {
                slot: block_time as u64,
                block_height: block_time as u64,
                transaction_count,
                block_time,
                supply: None,
            }),
        };
        self.monitor
            .registry
            .mark_result("rpc", true, 40.0)
            .await
            .unwrap();
        self.pipeline.handle(PollEvent::Sample(sample)).await;
    }

    async fn protocol_sample(&mut self) {
        let sample = Sample {
            provider_id: "dex-api".into(),
            target: "dex".into(),
            timestamp: Utc::now(),
            latency_ms: 80.0,
            reading: Reading::Protocol(ProtocolReading {
                reported_status: Some("ok".into()),
                account_count: Some(12),
            }),
        };
        self.pipeline.handle(PollEvent::Sample(sample)).await;
    }

    /// Fail `rpc` until it is down, raising the provider-down alert
    async fn take_rpc_down(&mut self) {
        for _ in 0..3 {
            self.monitor
                .registry
                .mark_result("rpc", false, 10_000.0)
                .await
                .unwrap();
            let provider = self.monitor.registry.get("rpc").await.unwrap();
            self.pipeline
                .handle(PollEvent::Failed {
                    provider,
                    error: MonitorError::Timeout {
                        provider: "rpc".into(),
                        after_ms: 10_000,
                    },
                    at: Utc::now(),
                })
                .await;
        }
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let api = TestApi::spawn(30).await;

    let (status, body) = api.get("/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["providers"], 2);
    assert_eq!(body["providers_down"], 0);
    assert_eq!(body["open_alerts"], 0);
}

#[tokio::test]
async fn test_providers_endpoint() {
    let mut api = TestApi::spawn(30).await;
    api.take_rpc_down().await;

    let (status, body) = api.get("/api/providers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let providers = body["providers"].as_array().unwrap();
    let rpc = providers.iter().find(|p| p["id"] == "rpc").unwrap();
    assert_eq!(rpc["status"], "down");
    assert_eq!(rpc["consecutive_failures"], 3);
}

#[tokio::test]
async fn test_network_metrics_endpoint() {
    let mut api = TestApi::spawn(30).await;
    api.network_sample(100_000, 1_700_000_000).await;
    api.network_sample(105_000, 1_700_000_002).await;

    let (status, body) = api.get("/api/metrics/network").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["samples"][1]["metrics"]["tps"], 2500.0);
    assert_eq!(body["providers"].as_array().unwrap().len(), 1);

    let (status, body) = api.get("/api/metrics/network?provider=rpc&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, body) = api.get("/api/metrics/network?provider=nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));

    let (status, _) = api
        .get("/api/metrics/network?since=2024-01-02T00:00:00Z&until=2024-01-01T00:00:00Z")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A range in the past matches nothing
    let (status, body) = api
        .get("/api/metrics/network?since=2020-01-01T00:00:00Z&until=2020-01-02T00:00:00Z")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_protocol_metrics_endpoint() {
    let mut api = TestApi::spawn(30).await;
    api.protocol_sample().await;

    let (status, body) = api.get("/api/metrics/protocols?protocol=dex").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["samples"][0]["metrics"]["availability"], 100.0);
    assert_eq!(body["samples"][0]["metrics"]["account_count"], 12.0);

    let (status, _) = api.get("/api/metrics/protocols?protocol=lending").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_series_endpoint() {
    let mut api = TestApi::spawn(30).await;
    api.network_sample(100_000, 1_700_000_000).await;
    api.network_sample(105_000, 1_700_000_002).await;

    let (status, body) = api.get("/api/metrics/series?provider=rpc&metric=tps").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["points"][0]["value"], 2500.0);

    let (status, body) = api
        .get("/api/metrics/series?provider=rpc&metric=latency_ms")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, _) = api.get("/api/metrics/series?provider=nope&metric=tps").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = api
        .client
        .get(api.url("/api/metrics/series?provider=rpc&metric=bogus"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_alert_lifecycle_endpoints() {
    let mut api = TestApi::spawn(30).await;
    api.take_rpc_down().await;

    let (status, body) = api.get("/api/alerts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    let alert = &body["alerts"][0];
    assert_eq!(alert["rule_id"], "provider-down");
    assert_eq!(alert["target_id"], "rpc");
    assert_eq!(alert["severity"], "critical");
    let id = alert["id"].as_u64().unwrap();

    let (_, body) = api.get("/api/alerts?severity=warning").await;
    assert_eq!(body["count"], 0);

    let (status, body) = api.post(&format!("/api/alerts/{id}/acknowledge")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acknowledged"], true);
    assert!(body["resolved_at"].is_null());

    let (status, body) = api.post(&format!("/api/alerts/{id}/resolve")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["resolved_at"].is_null());

    // Resolving twice is a no-op
    let (status, again) = api.post(&format!("/api/alerts/{id}/resolve")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["resolved_at"], body["resolved_at"]);

    // Still listed as recently resolved
    let (_, body) = api.get("/api/alerts").await;
    assert_eq!(body["count"], 1);

    let (status, body) = api.post("/api/alerts/999/resolve").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = api.post("/api/alerts/999/acknowledge").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_websocket_stream() {
    let mut api = TestApi::spawn(30).await;
    api.network_sample(100_000, 1_700_000_000).await;

    let (mut ws, _) = connect_async(api.ws_url("?channels=alerts")).await.unwrap();

    let initial: Value =
        serde_json::from_str(&ws.next().await.unwrap().unwrap().into_text().unwrap()).unwrap();
    assert_eq!(initial["type"], "initial_data");
    assert_eq!(initial["network"].as_array().unwrap().len(), 1);
    assert_eq!(initial["providers"].as_array().unwrap().len(), 2);

    // Not subscribed to network: the next frame is the alert
    api.network_sample(105_000, 1_700_000_002).await;
    api.take_rpc_down().await;

    let event: Value =
        serde_json::from_str(&ws.next().await.unwrap().unwrap().into_text().unwrap()).unwrap();
    assert_eq!(event["type"], "alert_raised");
    assert_eq!(event["rule_id"], "provider-down");
    assert_eq!(event["severity"], "critical");

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn test_websocket_rejects_unknown_channel() {
    let api = TestApi::spawn(30).await;

    match connect_async(api.ws_url("?channels=network,mempool")).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::BAD_REQUEST.as_u16());
        }
        Err(e) => panic!("expected HTTP 400, got {e}"),
        Ok(_) => panic!("connection with an unknown channel was accepted"),
    }
}

#[tokio::test]
async fn test_websocket_connections_rate_limited() {
    let api = TestApi::spawn(2).await;

    let (_first, _) = connect_async(api.ws_url("")).await.unwrap();
    let (_second, _) = connect_async(api.ws_url("")).await.unwrap();

    match connect_async(api.ws_url("")).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS.as_u16());
        }
        Err(e) => panic!("expected HTTP 429, got {e}"),
        Ok(_) => panic!("third connection within the window was accepted"),
    }

    // REST endpoints are not limited
    let (status, _) = api.get("/api/health").await;
    assert_eq!(status, StatusCode::OK);
}
