use reqwest::Client;
use serde_json::json;
use tracing::{error, info, instrument};

use crate::alerts::AlertEvent;
use crate::config::Webhook;

/// Posts alert transitions to an outgoing webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook: Webhook,
}

impl WebhookNotifier {
    pub fn new(webhook: Webhook) -> Self {
        Self {
            client: Client::new(),
            webhook,
        }
    }

    pub fn url(&self) -> &str {
        &self.webhook.url
    }

    fn format_message(event: &AlertEvent) -> String {
        let alert = event.alert();
        match event {
            AlertEvent::Raised(_) => format!(
                "[{}] {} on `{}`: {} = {:.2} (threshold {:.2})",
                alert.severity.as_str().to_uppercase(),
                alert.rule_id,
                alert.target_id,
                alert.metric,
                alert.observed_value,
                alert.threshold
            ),
            AlertEvent::Resolved(_) => format!(
                "[RESOLVED] {} on `{}`: {} = {:.2}",
                alert.rule_id, alert.target_id, alert.metric, alert.observed_value
            ),
        }
    }

    #[instrument(skip(self, event), fields(alert = event.alert().id))]
    pub async fn send(&self, event: &AlertEvent) {
        let payload = json!({
            "event": event.name(),
            "message": Self::format_message(event),
            "alert": event.alert(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        match self.client.post(&self.webhook.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent webhook alert");
                } else {
                    error!("Webhook alert failed with status: {}", response.status());
                }
            }
            Err(e) => {
                error!("Failed to send webhook alert: {}", e);
            }
        }
    }

    /// Send without waiting for the webhook to answer
    pub fn dispatch(&self, event: AlertEvent) {
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.send(&event).await;
        });
    }
}
