use crate::connection::{ConnectionId, ConnectionRegistry, FrameSender, SubscriptionId};
use crate::error::Result;
use crate::topic::Topic;
use log::*;
use std::sync::Arc;

/// Broker facade shared by every websocket connection and publisher.
pub struct Manager {
    registry: Arc<ConnectionRegistry>,
}

impl Manager {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Register a new connection and return its unique ID
    pub fn register_connection(&self, sender: FrameSender) -> ConnectionId {
        let connection_id = self.registry.register(sender);
        info!("Registered new STOMP connection {}", connection_id);
        connection_id
    }

    /// Unregister a connection by ID, dropping its subscriptions
    pub fn unregister_connection(&self, connection_id: &ConnectionId) {
        let dropped = self.registry.unregister(connection_id);
        info!(
            "Unregistered STOMP connection {} ({} subscription(s) dropped)",
            connection_id, dropped
        );
    }

    pub fn subscribe(
        &self,
        connection_id: &ConnectionId,
        subscription_id: SubscriptionId,
        topic: Topic,
    ) -> Result<()> {
        debug!(
            "Connection {} subscribing to {} as {}",
            connection_id, topic, subscription_id
        );
        self.registry.subscribe(connection_id, subscription_id, topic)
    }

    pub fn unsubscribe(&self, connection_id: &ConnectionId, subscription_id: &str) -> Result<Topic> {
        let topic = self.registry.unsubscribe(connection_id, subscription_id)?;
        debug!(
            "Connection {} unsubscribed {} from {}",
            connection_id, subscription_id, topic
        );
        Ok(topic)
    }

    /// Fan a payload out to the current subscribers of `topic`.
    /// Delivery is best effort; the return value is informational only.
    pub fn publish(&self, topic: &Topic, payload: &str) -> usize {
        let delivered = self.registry.publish(topic, payload);
        debug!("Published to {} ({} subscriber(s))", topic, delivered);
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry.subscriber_count(topic)
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}
