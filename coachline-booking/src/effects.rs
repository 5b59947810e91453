use coachline_core::ports::{EventPort, Notification, NotificationPort, ObjectStoragePort};
use coachline_shared::models::events::BookingEvent;
use std::sync::Arc;
use tracing::{error, info};

use crate::metrics::BookingMetrics;

/// Outbound side effects that run after a state change has committed.
/// Failures are logged and counted, never returned to the caller.
#[derive(Clone)]
pub struct Effects {
    notifier: Arc<dyn NotificationPort>,
    events: Arc<dyn EventPort>,
    storage: Arc<dyn ObjectStoragePort>,
    metrics: Arc<BookingMetrics>,
    topic: String,
}

impl Effects {
    pub fn new(
        notifier: Arc<dyn NotificationPort>,
        events: Arc<dyn EventPort>,
        storage: Arc<dyn ObjectStoragePort>,
        metrics: Arc<BookingMetrics>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            notifier,
            events,
            storage,
            metrics,
            topic: topic.into(),
        }
    }

    pub fn metrics(&self) -> &BookingMetrics {
        &self.metrics
    }

    pub async fn notify(&self, notification: Notification) {
        match self.notifier.send(&notification).await {
            Ok(()) => info!("Sent {:?} notification", notification.template),
            Err(e) => {
                error!(effect = "notification", template = ?notification.template, "Failed to send notification: {}", e);
                self.metrics.side_effect_failed("notification");
            }
        }
    }

    pub async fn publish(&self, event: &BookingEvent) {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(effect = "event", booking_id = event.booking_id(), "Failed to encode event: {}", e);
                self.metrics.side_effect_failed("event");
                return;
            }
        };

        if let Err(e) = self.events.publish(&self.topic, event.event_type(), &payload).await {
            error!(
                effect = "event",
                booking_id = event.booking_id(),
                event_type = event.event_type(),
                "Failed to publish event: {}",
                e
            );
            self.metrics.side_effect_failed("event");
        }
    }

    /// Upload and return the public URL, or `None` when storage is unavailable.
    pub async fn store_object(&self, bytes: Vec<u8>, content_type: &str) -> Option<String> {
        match self.storage.put(bytes, content_type).await {
            Ok(url) => Some(url),
            Err(e) => {
                error!(effect = "object_storage", "Failed to upload object: {}", e);
                self.metrics.side_effect_failed("object_storage");
                None
            }
        }
    }
}
