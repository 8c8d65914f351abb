//! Integration tests for the poll → classify → store → broadcast pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chainwatch::{
    HealthStatus, MetricKey, Monitor,
    hub::{Channel, HubEvent},
    monitor::SampleQuery,
    sample::ProviderKind,
};
use serde_json::json;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate, matchers::method};

use crate::helpers::*;

/// Chain advancing 10 slots, 5000 transactions and 2 seconds per request
struct AdvancingChain {
    calls: AtomicU64,
}

impl Respond for AdvancingChain {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_json(chain_state(
            1_000 + n * 10,
            100_000 + n * 5_000,
            1_700_000_000 + n as i64 * 2,
        ))
    }
}

async fn advancing_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(AdvancingChain {
            calls: AtomicU64::new(0),
        })
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_network_samples_reach_store_and_subscribers() {
    let server = advancing_server().await;
    let config = test_config(vec![network_provider("rpc", "mainnet", &server.uri(), 0)]);
    let monitor = Monitor::new(config).await.unwrap();

    let mut network = monitor.connect([Channel::Network]).await;
    let mut alerts_only = monitor.connect([Channel::Alerts]).await;

    let first = network.recv().await.unwrap();
    assert_eq!(first.name(), "initial_data");
    assert_eq!(alerts_only.recv().await.unwrap().name(), "initial_data");

    let handles = monitor.start().unwrap();
    let poller = handles.poller("mainnet").unwrap();
    for _ in 0..3 {
        poll_cycle(poller).await;
    }

    let stored = wait_for(|| {
        let monitor = monitor.clone();
        async move { monitor.series("rpc", MetricKey::Tps, None, None).len() >= 3 }
    })
    .await;
    assert!(stored, "tps points were not stored");

    // Every TPS derived from consecutive readings is exact
    let tps = monitor.series("rpc", MetricKey::Tps, None, None);
    assert!(tps.iter().all(|p| p.value == 2_500.0));
    assert!(tps.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let samples = monitor
        .samples(&SampleQuery {
            provider: Some("rpc".into()),
            ..SampleQuery::default()
        })
        .await;
    assert!(samples.len() >= 4);
    assert!(samples.iter().all(|s| s.status == HealthStatus::Healthy));
    assert_eq!(samples[0].metric(MetricKey::Tps), None);

    let event = tokio::time::timeout(Duration::from_secs(1), network.recv())
        .await
        .unwrap()
        .unwrap();
    match &*event {
        HubEvent::NetworkMetrics(sample) => assert_eq!(sample.provider_id, "rpc"),
        other => panic!("expected network metrics, got {}", other.name()),
    }

    // Nothing on the alerts channel: no rule was crossed
    assert!(alerts_only.try_recv().is_none());

    handles.shutdown().await;
    assert!(network.recv().await.is_none());
}

#[tokio::test]
async fn test_protocol_checks_track_availability() {
    let healthy = MockServer::start().await;
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(&healthy)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "maintenance" })))
        .mount(&broken)
        .await;

    let config = test_config(vec![
        protocol_provider("dex-api", "dex", &healthy.uri()),
        protocol_provider("lending-api", "lending", &broken.uri()),
    ]);
    let monitor = Monitor::new(config).await.unwrap();
    let mut protocols = monitor.connect([Channel::Protocols]).await;
    protocols.recv().await.unwrap();

    let handles = monitor.start().unwrap();
    for target in ["dex", "lending"] {
        poll_cycle(handles.poller(target).unwrap()).await;
    }

    let recorded = wait_for(|| {
        let monitor = monitor.clone();
        async move { monitor.latest(Some(ProviderKind::Protocol)).await.len() == 2 }
    })
    .await;
    assert!(recorded);

    let latest = monitor.latest(Some(ProviderKind::Protocol)).await;
    let dex = latest.iter().find(|s| s.provider_id == "dex-api").unwrap();
    assert_eq!(dex.metric(MetricKey::Availability), Some(100.0));
    assert_eq!(dex.metric(MetricKey::ErrorRate), Some(0.0));

    let lending = latest
        .iter()
        .find(|s| s.provider_id == "lending-api")
        .unwrap();
    assert!(lending.error.is_some());
    assert!(lending.metric(MetricKey::Availability).unwrap() < 100.0);
    assert_ne!(lending.status, HealthStatus::Healthy);

    // Availability below 98% raises the default low-availability alert
    let raised = wait_for(|| {
        let monitor = monitor.clone();
        async move {
            monitor
                .recent_alerts(None)
                .await
                .iter()
                .any(|a| a.rule_id == "low-availability" && a.target_id == "lending-api")
        }
    })
    .await;
    assert!(raised);

    let event = protocols.recv().await.unwrap();
    assert_eq!(event.name(), "protocol_metrics");

    handles.shutdown().await;
}

#[tokio::test]
async fn test_initial_data_carries_current_state() {
    let server = advancing_server().await;
    let config = test_config(vec![network_provider("rpc", "mainnet", &server.uri(), 0)]);
    let monitor = Monitor::new(config).await.unwrap();
    let handles = monitor.start().unwrap();
    poll_cycle(handles.poller("mainnet").unwrap()).await;

    assert!(
        wait_for(|| {
            let monitor = monitor.clone();
            async move { !monitor.latest(None).await.is_empty() }
        })
        .await
    );

    let mut late = monitor.connect(Channel::ALL).await;
    match &*late.recv().await.unwrap() {
        HubEvent::InitialData(snapshot) => {
            assert_eq!(snapshot.network.len(), 1);
            assert!(snapshot.protocols.is_empty());
            assert_eq!(snapshot.providers.len(), 1);
            assert_eq!(snapshot.providers[0].id, "rpc");
        }
        other => panic!("expected initial data, got {}", other.name()),
    }

    handles.shutdown().await;
}
