use dashmap::DashMap;
use log::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{Error, Result};
use crate::frame::{headers, Command, Frame, TEXT_PLAIN_UTF8};
use crate::topic::Topic;

/// Client-chosen subscription id, unique per connection.
pub type SubscriptionId = String;

/// Outbound half of a connection: frames pushed here are written to the socket
/// by the connection's writer task.
pub type FrameSender = UnboundedSender<Frame>;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One (connection, subscription) pair registered against a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Subscriber {
    connection_id: ConnectionId,
    subscription_id: SubscriptionId,
}

#[derive(Debug)]
struct ConnectionInfo {
    sender: FrameSender,
    subscriptions: HashMap<SubscriptionId, Topic>,
}

/// Connection registry with a topic index for O(1) subscriber lookup.
///
/// Lock order: a `connections` guard is always released before `topic_index`
/// is touched, and vice versa, so the two maps never wait on each other.
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup
    connections: DashMap<ConnectionId, ConnectionInfo>,

    /// Secondary index: topic -> active subscriptions, used for fan-out
    topic_index: DashMap<Topic, HashSet<Subscriber>>,

    next_message_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            topic_index: DashMap::new(),
            next_message_id: AtomicU64::new(0),
        }
    }

    /// Register a new connection with no subscriptions.
    pub fn register(&self, sender: FrameSender) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.connections.insert(
            connection_id.clone(),
            ConnectionInfo {
                sender,
                subscriptions: HashMap::new(),
            },
        );
        connection_id
    }

    /// Remove a connection and every subscription it owned.
    /// Returns the number of subscriptions dropped.
    pub fn unregister(&self, connection_id: &ConnectionId) -> usize {
        let Some((_, info)) = self.connections.remove(connection_id) else {
            return 0;
        };

        let dropped = info.subscriptions.len();
        for (subscription_id, topic) in info.subscriptions {
            self.remove_from_index(
                &topic,
                &Subscriber {
                    connection_id: connection_id.clone(),
                    subscription_id,
                },
            );
        }
        dropped
    }

    pub fn subscribe(
        &self,
        connection_id: &ConnectionId,
        subscription_id: SubscriptionId,
        topic: Topic,
    ) -> Result<()> {
        {
            let mut info = self
                .connections
                .get_mut(connection_id)
                .ok_or_else(|| Error::UnknownConnection(connection_id.to_string()))?;
            if info.subscriptions.contains_key(&subscription_id) {
                return Err(Error::DuplicateSubscription(subscription_id));
            }
            info.subscriptions
                .insert(subscription_id.clone(), topic.clone());
        }

        self.topic_index.entry(topic).or_default().insert(Subscriber {
            connection_id: connection_id.clone(),
            subscription_id,
        });
        Ok(())
    }

    /// Remove one subscription, returning the topic it was bound to.
    pub fn unsubscribe(
        &self,
        connection_id: &ConnectionId,
        subscription_id: &str,
    ) -> Result<Topic> {
        let topic = {
            let mut info = self
                .connections
                .get_mut(connection_id)
                .ok_or_else(|| Error::UnknownConnection(connection_id.to_string()))?;
            info.subscriptions
                .remove(subscription_id)
                .ok_or_else(|| Error::UnknownSubscription(subscription_id.to_string()))?
        };

        self.remove_from_index(
            &topic,
            &Subscriber {
                connection_id: connection_id.clone(),
                subscription_id: subscription_id.to_string(),
            },
        );
        Ok(topic)
    }

    /// Deliver `body` to every subscription bound to `topic` at this moment.
    /// Returns the number of subscriptions the message was handed to.
    pub fn publish(&self, topic: &Topic, body: &str) -> usize {
        // Snapshot so no index guard is held while sending.
        let subscribers: Vec<Subscriber> = match self.topic_index.get(topic) {
            Some(entry) => entry.iter().cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for subscriber in subscribers {
            let Some(sender) = self
                .connections
                .get(&subscriber.connection_id)
                .map(|info| info.sender.clone())
            else {
                continue;
            };

            let frame = self.message_frame(topic, &subscriber.subscription_id, body);
            match sender.send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Failed to send message to connection {}: {}. Connection will be cleaned up.",
                    subscriber.connection_id, e
                ),
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topic_index
            .get(topic)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    pub fn subscription_count(&self, connection_id: &ConnectionId) -> usize {
        self.connections
            .get(connection_id)
            .map(|info| info.subscriptions.len())
            .unwrap_or(0)
    }

    fn message_frame(&self, topic: &Topic, subscription_id: &str, body: &str) -> Frame {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        Frame::new(Command::Message)
            .with_header(headers::DESTINATION, topic.as_str())
            .with_header(headers::SUBSCRIPTION, subscription_id)
            .with_header(headers::MESSAGE_ID, format!("message-{}", message_id))
            .with_header(headers::CONTENT_TYPE, TEXT_PLAIN_UTF8)
            .with_body(body)
    }

    fn remove_from_index(&self, topic: &Topic, subscriber: &Subscriber) {
        if let Some(mut entry) = self.topic_index.get_mut(topic) {
            entry.remove(subscriber);

            // Clean up empty topic entries
            if entry.is_empty() {
                drop(entry); // Release lock before removal
                self.topic_index.remove_if(topic, |_, set| set.is_empty());
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
