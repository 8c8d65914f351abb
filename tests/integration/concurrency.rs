//! Integration tests for concurrent producers and consumers
//!
//! These tests verify that:
//! - A stalled subscriber never blocks delivery to others
//! - Overflowing subscribers get a `queue_overflow` marker and keep the newest events
//! - Concurrent registry updates for different providers don't interfere

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chainwatch::{
    HealthStatus, MetricKey, ProviderKind,
    hub::{BroadcastHub, Channel, HubEvent},
    registry::{Provider, ProviderRegistry},
    sample::ClassifiedSample,
};
use chrono::Utc;

fn metrics_event(provider_id: &str, slot: f64) -> HubEvent {
    HubEvent::NetworkMetrics(ClassifiedSample {
        provider_id: provider_id.to_string(),
        target: "mainnet".into(),
        kind: ProviderKind::Network,
        timestamp: Utc::now(),
        status: HealthStatus::Healthy,
        metrics: BTreeMap::from([(MetricKey::Slot, slot)]),
        reading: None,
        error: None,
    })
}

fn slot_of(event: &HubEvent) -> Option<f64> {
    match event {
        HubEvent::NetworkMetrics(sample) => sample.metric(MetricKey::Slot),
        _ => None,
    }
}

#[tokio::test]
async fn test_stalled_subscriber_does_not_block_others() {
    let hub = Arc::new(BroadcastHub::new(100, 3));

    // Never read from
    let stalled = hub.subscribe(hub.next_connection_id(), [Channel::Network]);
    let mut active = hub.subscribe(hub.next_connection_id(), [Channel::Network]);

    let producer = {
        let hub = hub.clone();
        tokio::spawn(async move {
            for slot in 0..500 {
                hub.publish(Channel::Network, metrics_event("rpc", slot as f64));
                if slot % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let mut last_slot = -1.0;
    let consumer = async {
        while last_slot < 499.0 {
            let event = active.recv().await.unwrap();
            // overflow markers carry no slot
            if let Some(slot) = slot_of(&event) {
                assert!(slot > last_slot, "events arrived out of order");
                last_slot = slot;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), consumer)
        .await
        .expect("active subscriber stopped receiving");
    producer.await.unwrap();

    assert_eq!(last_slot, 499.0);
    assert_eq!(stalled.pending(), 100);
    assert!(hub.is_subscribed(stalled.connection_id()));
}

#[tokio::test]
async fn test_overflow_marker_precedes_newest_events() {
    let hub = BroadcastHub::new(100, 3);
    let mut slow = hub.subscribe(hub.next_connection_id(), [Channel::Network]);

    for slot in 0..150 {
        hub.publish(Channel::Network, metrics_event("rpc", slot as f64));
    }

    let first = slow.recv().await.unwrap();
    assert_eq!(*first, HubEvent::QueueOverflow { dropped: 50 });

    let mut slots = vec![];
    while let Some(event) = slow.try_recv() {
        slots.push(slot_of(&event).unwrap());
    }
    let expected: Vec<f64> = (50..150).map(|s| s as f64).collect();
    assert_eq!(slots, expected);
}

#[tokio::test]
async fn test_send_failures_disconnect_subscriber() {
    let hub = BroadcastHub::new(100, 3);
    let id = hub.next_connection_id();
    let mut receiver = hub.subscribe(id, [Channel::Alerts]);

    assert!(!hub.record_send_failure(id));
    hub.record_send_success(id);
    assert!(!hub.record_send_failure(id));
    assert!(!hub.record_send_failure(id));
    assert!(hub.record_send_failure(id));

    assert!(!hub.is_subscribed(id));
    assert!(receiver.recv().await.is_none());
    assert_eq!(hub.publish(Channel::Alerts, metrics_event("rpc", 1.0)), 0);
}

#[tokio::test]
async fn test_concurrent_registry_updates() {
    let registry = Arc::new(ProviderRegistry::new(3, 0.5));
    for i in 0..8 {
        let config = serde_json::from_value(serde_json::json!({
            "id": format!("rpc-{i}"),
            "kind": "network",
            "target": format!("net-{}", i % 2),
            "url": "http://127.0.0.1:8899"
        }))
        .unwrap();
        registry
            .register(Provider::from_config(&config))
            .await
            .unwrap();
    }

    // Even providers fail, odd providers succeed, all at the same time
    let tasks: Vec<_> = (0..8)
        .flat_map(|i| {
            let registry = registry.clone();
            (0..10).map(move |_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .mark_result(&format!("rpc-{i}"), i % 2 == 1, 100.0)
                        .await
                        .unwrap();
                })
            })
        })
        .collect();
    futures::future::join_all(tasks).await;

    for i in 0..8 {
        let provider = registry.get(&format!("rpc-{i}")).await.unwrap();
        if i % 2 == 0 {
            assert_eq!(provider.status, HealthStatus::Down);
            assert_eq!(provider.consecutive_failures, 10);
        } else {
            assert_eq!(provider.status, HealthStatus::Healthy);
            assert_eq!(provider.latency_ema_ms, Some(100.0));
        }
    }

    // Targets whose providers are all down have no failover candidates
    assert!(registry.failover_candidates("net-0").await.is_empty());
    assert_eq!(registry.failover_candidates("net-1").await.len(), 4);
}
