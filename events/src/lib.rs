//! Event system infrastructure for the product notifier.
//!
//! This crate decouples the code that learns about a product or category change
//! (REST publishers, application destinations on the websocket) from the code
//! that delivers notifications (the STOMP broker).
//!
//! # Architecture
//!
//! - **DomainEvent**: Enum representing all notification-worthy changes
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates, so both the broker and the
//! web layer can depend on it without cycles.

use async_trait::async_trait;
use log::*;
use std::sync::Arc;

/// Identifier of a product or category as it appears in a destination path.
pub type EntityId = String;

/// Changes that subscribers may want to hear about.
///
/// Payloads are opaque text; the broker relays them verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// A product changed. Delivered to subscribers of `/topic/product/{product_id}`.
    ProductUpdated {
        product_id: EntityId,
        message: String,
    },
    /// A category changed. Delivered to subscribers of `/topic/category/{category_id}`.
    CategoryUpdated {
        category_id: EntityId,
        message: String,
    },
}

impl DomainEvent {
    pub fn product_updated(product_id: impl Into<EntityId>, message: impl Into<String>) -> Self {
        DomainEvent::ProductUpdated {
            product_id: product_id.into(),
            message: message.into(),
        }
    }

    pub fn category_updated(category_id: impl Into<EntityId>, message: impl Into<String>) -> Self {
        DomainEvent::CategoryUpdated {
            category_id: category_id.into(),
            message: message.into(),
        }
    }

    /// Short name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::ProductUpdated { .. } => "product_updated",
            DomainEvent::CategoryUpdated { .. } => "category_updated",
        }
    }
}

/// Trait for handling domain events.
/// Implementations perform side effects like fanning out notifications.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Publish an event to all registered handlers.
    pub async fn publish(&self, event: DomainEvent) {
        trace!(
            "Publishing {} to {} handler(s)",
            event.name(),
            self.handlers.len()
        );
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
