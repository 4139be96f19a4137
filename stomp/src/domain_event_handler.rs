use crate::error::Result;
use crate::topic::Topic;
use crate::Manager;
use async_trait::async_trait;
use events::{DomainEvent, EventHandler};
use log::*;
use std::sync::Arc;

/// Handles domain events by publishing their payload on the matching topic.
///
/// `ProductUpdated` goes to `/topic/product/{id}` and `CategoryUpdated` to
/// `/topic/category/{id}`. Only connections subscribed at this moment receive
/// the message; nothing is retained for later subscribers.
pub struct StompDomainEventHandler {
    stomp_manager: Arc<Manager>,
}

impl StompDomainEventHandler {
    pub fn new(stomp_manager: Arc<Manager>) -> Self {
        Self { stomp_manager }
    }

    /// The topic a domain event is delivered on.
    pub fn topic_for(event: &DomainEvent) -> Result<Topic> {
        match event {
            DomainEvent::ProductUpdated { product_id, .. } => Topic::product(product_id),
            DomainEvent::CategoryUpdated { category_id, .. } => Topic::category(category_id),
        }
    }
}

#[async_trait]
impl EventHandler for StompDomainEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        let topic = match Self::topic_for(event) {
            Ok(topic) => topic,
            Err(e) => {
                warn!("Dropping {} event: {}", event.name(), e);
                return;
            }
        };

        let message = match event {
            DomainEvent::ProductUpdated { message, .. }
            | DomainEvent::CategoryUpdated { message, .. } => message,
        };

        let delivered = self.stomp_manager.publish(&topic, message);
        debug!(
            "Handled {} event on {} ({} subscriber(s))",
            event.name(),
            topic,
            delivered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::headers;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn product_update_reaches_product_topic_subscribers() {
        let manager = Arc::new(Manager::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = manager.register_connection(tx);
        manager
            .subscribe(&connection_id, "sub-0".to_string(), Topic::product("42").unwrap())
            .unwrap();
        let handler = StompDomainEventHandler::new(manager.clone());

        handler
            .handle(&DomainEvent::product_updated("42", "restock"))
            .await;

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.header(headers::DESTINATION), Some("/topic/product/42"));
        assert_eq!(frame.body, "restock");
    }

    #[tokio::test]
    async fn category_update_does_not_leak_to_product_topic() {
        let manager = Arc::new(Manager::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = manager.register_connection(tx);
        manager
            .subscribe(&connection_id, "sub-0".to_string(), Topic::product("7").unwrap())
            .unwrap();
        let handler = StompDomainEventHandler::new(manager);

        handler
            .handle(&DomainEvent::category_updated("7", "renamed"))
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_identifier_is_dropped() {
        let handler = StompDomainEventHandler::new(Arc::new(Manager::new()));

        assert!(StompDomainEventHandler::topic_for(&DomainEvent::product_updated("a/b", "x")).is_err());
        // Must not panic.
        handler
            .handle(&DomainEvent::product_updated("a/b", "x"))
            .await;
    }
}
