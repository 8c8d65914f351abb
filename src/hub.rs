//! Subscriber registry and event fan-out
//!
//! Each [`Channel`] is a `tokio::sync::broadcast` channel sized to the
//! subscriber queue depth. Publishing never waits on a subscriber: a
//! subscriber that falls behind loses its oldest events and its next
//! receive yields a [`HubEvent::QueueOverflow`] marker carrying the number
//! of events it missed. The hub itself only keeps the subscriber registry
//! and the send failure accounting.
//!
//! ```text
//!   pipeline ──publish(channel, event)──> broadcast::Sender(channel)
//!                                          ├─> Receiver(conn 1) ──> SubscriberReceiver
//!                                          ├─> Receiver(conn 2) ──> SubscriberReceiver
//!                                          └─> ...
//! ```

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures::future::select_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{
    broadcast::{
        self,
        error::{RecvError, TryRecvError},
    },
    watch,
};
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertEvent};
use crate::error::{MonitorError, MonitorResult};
use crate::registry::Provider;
use crate::sample::{ClassifiedSample, ProviderKind};

/// Topic a subscriber opts into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Network,
    Protocols,
    Alerts,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Network, Channel::Protocols, Channel::Alerts];

    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Network => Channel::Network,
            ProviderKind::Protocol => Channel::Protocols,
        }
    }

    /// Parse a comma separated channel list, e.g. `network,alerts`
    pub fn parse_list(list: &str) -> MonitorResult<HashSet<Channel>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Channel::from_str)
            .collect()
    }
}

impl FromStr for Channel {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(Channel::Network),
            "protocols" | "protocol" => Ok(Channel::Protocols),
            "alerts" => Ok(Channel::Alerts),
            other => Err(MonitorError::Config(format!("unknown channel: {other}"))),
        }
    }
}

/// Full state sent to a subscriber right after it connects
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub network: Vec<ClassifiedSample>,
    pub protocols: Vec<ClassifiedSample>,
    pub providers: Vec<Provider>,
    pub alerts: Vec<Alert>,
    pub timestamp: DateTime<Utc>,
}

/// Events delivered over the push channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    InitialData(Snapshot),
    NetworkMetrics(ClassifiedSample),
    ProtocolMetrics(ClassifiedSample),
    AlertRaised(Alert),
    AlertResolved(Alert),
    QueueOverflow { dropped: u64 },
}

impl HubEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::InitialData(_) => "initial_data",
            HubEvent::NetworkMetrics(_) => "network_metrics",
            HubEvent::ProtocolMetrics(_) => "protocol_metrics",
            HubEvent::AlertRaised(_) => "alert_raised",
            HubEvent::AlertResolved(_) => "alert_resolved",
            HubEvent::QueueOverflow { .. } => "queue_overflow",
        }
    }

    /// Metric event for a classified sample, on its provider kind's channel
    pub fn metrics(sample: ClassifiedSample) -> (Channel, HubEvent) {
        match sample.kind {
            ProviderKind::Network => (Channel::Network, HubEvent::NetworkMetrics(sample)),
            ProviderKind::Protocol => (Channel::Protocols, HubEvent::ProtocolMetrics(sample)),
        }
    }
}

impl From<AlertEvent> for HubEvent {
    fn from(event: AlertEvent) -> Self {
        match event {
            AlertEvent::Raised(alert) => HubEvent::AlertRaised(alert),
            AlertEvent::Resolved(alert) => HubEvent::AlertResolved(alert),
        }
    }
}

/// Receiving end of a subscription
///
/// Every subscribed channel is read through its own broadcast receiver. A
/// receiver never holds more than `depth` undelivered events per channel:
/// anything older is skipped and reported through a single
/// [`HubEvent::QueueOverflow`] before the next regular event.
///
/// Dropping the receiver does not unsubscribe; the connection handler calls
/// [`BroadcastHub::unsubscribe`] when it goes away.
#[derive(Debug)]
pub struct SubscriberReceiver {
    connection_id: u64,
    depth: usize,
    initial: Option<Arc<HubEvent>>,
    receivers: Vec<broadcast::Receiver<Arc<HubEvent>>>,
    closed: watch::Receiver<bool>,
    /// Events skipped since the subscriber last received
    dropped: u64,
}

impl SubscriberReceiver {
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Wait for the next event, `None` once the subscriber was disconnected
    pub async fn recv(&mut self) -> Option<Arc<HubEvent>> {
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(event) = self.try_recv() {
                return Some(event);
            }

            let Self {
                receivers, closed, ..
            } = &mut *self;
            if receivers.is_empty() {
                let _ = closed.changed().await;
                return None;
            }

            let ready = select_all(receivers.iter_mut().map(|rx| Box::pin(rx.recv())));
            let (result, index) = tokio::select! {
                biased;
                _ = closed.changed() => return None,
                (result, index, _) = ready => (result, index),
            };

            match result {
                // Skip it when the backlog behind it already fills the queue
                Ok(_) if self.receivers[index].len() >= self.depth => self.dropped += 1,
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.dropped += skipped,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event without waiting
    pub fn try_recv(&mut self) -> Option<Arc<HubEvent>> {
        if self.is_closed() {
            return None;
        }
        if let Some(event) = self.initial.take() {
            return Some(event);
        }

        self.skip_backlog();
        if let Some(marker) = self.take_overflow() {
            return Some(marker);
        }

        for rx in &mut self.receivers {
            match rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.dropped += skipped,
                Err(TryRecvError::Empty | TryRecvError::Closed) => {}
            }
        }
        self.take_overflow()
    }

    fn take_overflow(&mut self) -> Option<Arc<HubEvent>> {
        if self.dropped == 0 {
            return None;
        }
        let dropped = std::mem::take(&mut self.dropped);
        debug!(
            "{}",
            MonitorError::Overflow {
                connection: self.connection_id,
                dropped,
            }
        );
        Some(Arc::new(HubEvent::QueueOverflow { dropped }))
    }

    /// Drop everything older than the newest `depth` events of each channel
    fn skip_backlog(&mut self) {
        for rx in &mut self.receivers {
            while rx.len() > self.depth {
                match rx.try_recv() {
                    Ok(_) => self.dropped += 1,
                    Err(TryRecvError::Lagged(skipped)) => self.dropped += skipped,
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.closed.has_changed().is_err()
    }

    /// Events currently waiting to be received
    pub fn pending(&self) -> usize {
        let queued: usize = self
            .receivers
            .iter()
            .map(|rx| rx.len().min(self.depth))
            .sum();
        queued + usize::from(self.initial.is_some())
    }
}

struct Subscriber {
    channels: HashSet<Channel>,
    closed: watch::Sender<bool>,
    send_failures: AtomicU32,
}

impl Subscriber {
    fn close(&self) {
        self.closed.send_replace(true);
    }
}

pub struct BroadcastHub {
    senders: HashMap<Channel, broadcast::Sender<Arc<HubEvent>>>,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    queue_depth: usize,
    max_send_failures: u32,
    next_connection_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new(queue_depth: usize, max_send_failures: u32) -> Self {
        let queue_depth = queue_depth.max(1);
        let senders = Channel::ALL
            .into_iter()
            .map(|channel| (channel, broadcast::channel(queue_depth).0))
            .collect();

        Self {
            senders,
            subscribers: RwLock::new(HashMap::new()),
            queue_depth,
            max_send_failures: max_send_failures.max(1),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a new connection
    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a subscriber; re-subscribing an id closes its old receiver
    pub fn subscribe(
        &self,
        connection_id: u64,
        channels: impl IntoIterator<Item = Channel>,
    ) -> SubscriberReceiver {
        self.subscribe_with(connection_id, channels, None)
    }

    /// Register a subscriber that receives `initial` before anything published
    pub fn subscribe_with(
        &self,
        connection_id: u64,
        channels: impl IntoIterator<Item = Channel>,
        initial: Option<HubEvent>,
    ) -> SubscriberReceiver {
        let channels: HashSet<Channel> = channels.into_iter().collect();
        let receivers = channels
            .iter()
            .filter_map(|channel| self.senders.get(channel))
            .map(broadcast::Sender::subscribe)
            .collect();
        let (closed_tx, closed_rx) = watch::channel(false);

        debug!("subscriber {connection_id} joined channels {channels:?}");

        let previous = self
            .subscribers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                connection_id,
                Subscriber {
                    channels,
                    closed: closed_tx,
                    send_failures: AtomicU32::new(0),
                },
            );
        if let Some(previous) = previous {
            previous.close();
        }

        SubscriberReceiver {
            connection_id,
            depth: self.queue_depth,
            initial: initial.map(Arc::new),
            receivers,
            closed: closed_rx,
            dropped: 0,
        }
    }

    /// Remove a subscriber, returns whether it was registered
    pub fn unsubscribe(&self, connection_id: u64) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&connection_id);

        match removed {
            Some(subscriber) => {
                subscriber.close();
                debug!("subscriber {connection_id} left");
                true
            }
            None => false,
        }
    }

    /// Send `event` to every subscriber of `channel`
    ///
    /// Returns the number of registered subscribers of the channel.
    pub fn publish(&self, channel: Channel, event: HubEvent) -> usize {
        let subscribers = self.subscribers.read().unwrap_or_else(|p| p.into_inner());
        let delivered = subscribers
            .values()
            .filter(|s| s.channels.contains(&channel))
            .count();
        if delivered == 0 {
            return 0;
        }

        if let Some(sender) = self.senders.get(&channel)
            && sender.send(Arc::new(event)).is_err()
        {
            debug!("no open receivers on {channel:?}");
        }
        delivered
    }

    /// Record a failed send to the subscriber's connection
    ///
    /// After `max_send_failures` consecutive failures the subscriber is
    /// disconnected; returns `true` in that case.
    pub fn record_send_failure(&self, connection_id: u64) -> bool {
        let failures = {
            let subscribers = self.subscribers.read().unwrap_or_else(|p| p.into_inner());
            match subscribers.get(&connection_id) {
                Some(subscriber) => subscriber.send_failures.fetch_add(1, Ordering::SeqCst) + 1,
                None => return false,
            }
        };

        if failures >= self.max_send_failures {
            warn!(
                "disconnecting subscriber {connection_id} after {failures} consecutive send failures"
            );
            self.unsubscribe(connection_id)
        } else {
            false
        }
    }

    pub fn record_send_success(&self, connection_id: u64) {
        let subscribers = self.subscribers.read().unwrap_or_else(|p| p.into_inner());
        if let Some(subscriber) = subscribers.get(&connection_id) {
            subscriber.send_failures.store(0, Ordering::SeqCst);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_subscribed(&self, connection_id: u64) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&connection_id)
    }

    /// Disconnect everybody
    pub fn close_all(&self) {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|p| p.into_inner());
        let count = subscribers.len();
        for (_, subscriber) in subscribers.drain() {
            subscriber.close();
        }
        if count > 0 {
            info!("closed {count} subscribers");
        }
    }
}
