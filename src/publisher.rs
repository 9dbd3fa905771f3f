//! Domain event publishing over NATS.

use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;

pub const SUBJECT_PREFIX: &str = "commerce";

/// Publishes domain events as JSON to `commerce.<event>`.
/// Without a NATS connection events are only logged.
#[derive(Clone, Default)]
pub struct EventPublisher {
    client: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(client: Option<async_nats::Client>) -> Self {
        Self { client }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Connects when `url` is set; a failed connection disables publishing.
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else {
            info!("NATS_URL not set, domain events will only be logged");
            return Self::disabled();
        };
        match async_nats::connect(url).await {
            Ok(client) => {
                info!(%url, "connected to NATS");
                Self::new(Some(client))
            }
            Err(e) => {
                warn!(%url, error = %e, "NATS connection failed, domain events will only be logged");
                Self::disabled()
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn subject(event: &DomainEvent) -> String {
        format!("{SUBJECT_PREFIX}.{}", event.name())
    }

    /// Best effort; failures are logged and never reach the caller.
    pub async fn publish(&self, event: &DomainEvent) {
        let subject = Self::subject(event);
        let Some(client) = &self.client else {
            debug!(%subject, ?event, "domain event");
            return;
        };
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%subject, error = %e, "failed to encode domain event");
                return;
            }
        };
        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            warn!(%subject, error = %e, "failed to publish domain event");
        }
    }

    pub async fn publish_all(&self, events: impl IntoIterator<Item = DomainEvent>) {
        for event in events {
            self.publish(&event).await;
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::ProductEvent;
    use uuid::Uuid;

    #[test]
    fn subjects_are_prefixed() {
        let event = DomainEvent::from(ProductEvent::Deleted { product_id: Uuid::now_v7() });
        assert_eq!(EventPublisher::subject(&event), "commerce.product.deleted");
    }

    #[tokio::test]
    async fn disabled_publisher_swallows_events() {
        let publisher = EventPublisher::disabled();
        assert!(!publisher.is_connected());
        publisher
            .publish_all(vec![ProductEvent::Updated { product_id: Uuid::now_v7() }.into()])
            .await;
    }
}
