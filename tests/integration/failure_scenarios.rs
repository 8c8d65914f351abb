//! Integration tests for failure handling
//!
//! Providers are real HTTP servers (wiremock) polled through the full
//! poller → pipeline → alert engine path.

use std::collections::BTreeMap;
use std::time::Duration;

use assert_matches::assert_matches;
use chainwatch::{
    HealthStatus, MetricKey, Monitor,
    alerts::{AlertEngine, AlertEvent, AlertRule, Comparator, Severity, SeverityBands},
};
use chrono::Utc;
use serde_json::json;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

use crate::helpers::*;

async fn open_down_alerts(monitor: &Monitor, provider: &str) -> usize {
    monitor
        .alerts
        .read()
        .await
        .open_alerts()
        .iter()
        .filter(|a| a.rule_id == "provider-down" && a.target_id == provider)
        .count()
}

#[tokio::test]
async fn test_timeouts_fail_over_and_raise_critical_alert() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;
    mount_slow(&primary, Duration::from_secs(2)).await;
    mount_chain_state(&backup, chain_state(5_000, 100_000, 1_700_000_000)).await;

    let config = test_config(vec![
        network_provider("primary", "mainnet", &primary.uri(), 0),
        network_provider("backup", "mainnet", &backup.uri(), 1),
    ]);
    let monitor = Monitor::new(config).await.unwrap();
    let handles = monitor.start().unwrap();
    let poller = handles.poller("mainnet").unwrap();

    // Every cycle is served by the backup until the primary is down
    for _ in 0..4 {
        let report = poll_cycle(poller).await;
        assert_eq!(report.served_by.as_deref(), Some("backup"));

        let status = monitor.registry.get("primary").await.unwrap().status;
        if status == HealthStatus::Down {
            break;
        }
        assert_eq!(status, HealthStatus::Degraded);
    }

    let primary_state = monitor.registry.get("primary").await.unwrap();
    assert_eq!(primary_state.status, HealthStatus::Down);
    assert!(primary_state.consecutive_failures >= 3);
    assert_eq!(
        monitor.registry.get("backup").await.unwrap().status,
        HealthStatus::Healthy
    );

    let raised = wait_for(|| {
        let monitor = monitor.clone();
        async move { open_down_alerts(&monitor, "primary").await == 1 }
    })
    .await;
    assert!(raised, "provider-down alert was not raised");

    let alerts = monitor.alerts.read().await.open_alerts();
    let alert = alerts.iter().find(|a| a.target_id == "primary").unwrap();
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.metric, MetricKey::ConsecutiveFailures);

    // Down providers are skipped for serving and only probed
    let report = poll_cycle(poller).await;
    assert_eq!(report.served_by.as_deref(), Some("backup"));
    assert!(report.failed.is_empty());
    assert_eq!(report.probed, vec!["primary".to_string()]);

    // Still exactly one open alert for the provider
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(open_down_alerts(&monitor, "primary").await, 1);

    handles.shutdown().await;
}

#[tokio::test]
async fn test_recovery_probe_resolves_down_alert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = test_config(vec![network_provider("solo", "devnet", &server.uri(), 0)]);
    let monitor = Monitor::new(config).await.unwrap();
    let handles = monitor.start().unwrap();
    let poller = handles.poller("devnet").unwrap();

    for _ in 0..4 {
        poll_cycle(poller).await;
        if monitor.registry.get("solo").await.unwrap().status == HealthStatus::Down {
            break;
        }
    }
    assert_eq!(
        monitor.registry.get("solo").await.unwrap().status,
        HealthStatus::Down
    );

    // No candidate left: the cycle has no server and only probes
    let report = poll_cycle(poller).await;
    assert_eq!(report.served_by, None);
    assert_eq!(report.probed, vec!["solo".to_string()]);

    assert!(
        wait_for(|| {
            let monitor = monitor.clone();
            async move { open_down_alerts(&monitor, "solo").await == 1 }
        })
        .await
    );

    server.reset().await;
    mount_chain_state(&server, chain_state(9_000, 50_000, 1_700_000_100)).await;

    let report = poll_cycle(poller).await;
    assert_eq!(report.probed, vec!["solo".to_string()]);
    assert_eq!(
        monitor.registry.get("solo").await.unwrap().status,
        HealthStatus::Healthy
    );

    let resolved = wait_for(|| {
        let monitor = monitor.clone();
        async move { open_down_alerts(&monitor, "solo").await == 0 }
    })
    .await;
    assert!(resolved, "provider-down alert was not resolved");

    let history = monitor.recent_alerts(None).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].resolved_at.is_some());

    handles.shutdown().await;
}

#[tokio::test]
async fn test_rpc_error_body_counts_as_failure() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32005, "message": "node is behind" }
        })))
        .mount(&primary)
        .await;
    mount_chain_state(&backup, chain_state(5_000, 100_000, 1_700_000_000)).await;

    let config = test_config(vec![
        network_provider("primary", "mainnet", &primary.uri(), 0),
        network_provider("backup", "mainnet", &backup.uri(), 1),
    ]);
    let monitor = Monitor::new(config).await.unwrap();
    let handles = monitor.start().unwrap();

    let report = poll_cycle(handles.poller("mainnet").unwrap()).await;
    assert_eq!(report.failed, vec!["primary".to_string()]);
    assert_eq!(report.served_by.as_deref(), Some("backup"));

    let primary_state = monitor.registry.get("primary").await.unwrap();
    assert!(primary_state.consecutive_failures >= 1);
    assert!(primary_state.last_failure.is_some());

    handles.shutdown().await;
}

#[tokio::test]
async fn test_stalled_slot_degrades_provider() {
    let server = MockServer::start().await;
    mount_chain_state(&server, chain_state(7_000, 70_000, 1_700_000_000)).await;

    let config = test_config(vec![network_provider("stuck", "mainnet", &server.uri(), 0)]);
    let monitor = Monitor::new(config).await.unwrap();
    let handles = monitor.start().unwrap();
    let poller = handles.poller("mainnet").unwrap();

    // Initial reading plus three that do not advance the slot
    for _ in 0..4 {
        poll_cycle(poller).await;
    }

    let degraded = wait_for(|| {
        let monitor = monitor.clone();
        async move {
            monitor.registry.get("stuck").await.unwrap().status == HealthStatus::Degraded
        }
    })
    .await;
    assert!(degraded, "stalled provider was not degraded");

    handles.shutdown().await;
}

#[test]
fn test_latency_deviation_bands() {
    let rule = AlertRule {
        id: "high-latency".into(),
        metric: MetricKey::LatencyMs,
        comparator: Comparator::Gt,
        threshold: 200.0,
        severity: SeverityBands::default(),
    };
    let latency = |ms: f64| BTreeMap::from([(MetricKey::LatencyMs, ms)]);

    let mut engine = AlertEngine::new(vec![rule.clone()]);

    // 500ms against 200ms: ratio 1.5
    let events = engine.evaluate("helius", &latency(500.0), Utc::now());
    assert_eq!(events.len(), 1);
    assert_matches!(&events[0], AlertEvent::Raised(a) if a.severity == Severity::Critical);

    let events = engine.evaluate("helius", &latency(120.0), Utc::now());
    assert_matches!(&events[0], AlertEvent::Resolved(_));

    // 230ms: ratio 0.15 is info, which is only logged by default
    assert!(engine.evaluate("helius", &latency(230.0), Utc::now()).is_empty());
    assert!(engine.open_alerts().is_empty());

    // 260ms: ratio 0.3 is a warning
    engine.evaluate("helius", &latency(100.0), Utc::now());
    let events = engine.evaluate("helius", &latency(260.0), Utc::now());
    assert_matches!(&events[0], AlertEvent::Raised(a) if a.severity == Severity::Warning);

    let mut surfacing = AlertEngine::new(vec![rule]).with_info_surfaced(true);
    let events = surfacing.evaluate("helius", &latency(230.0), Utc::now());
    assert_matches!(&events[0], AlertEvent::Raised(a) if a.severity == Severity::Info);
}
