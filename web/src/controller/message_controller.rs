//! Handlers for `SEND` frames addressed to application destinations.
//!
//! `route` is the destination with the application prefix removed, so
//! `/app/product/42` arrives here as `product/42`.

use events::DomainEvent;
use log::*;
use stomp::error::{Error, Result};
use stomp::topic::validate_entity_id;

use crate::AppState;

/// Relays `product/{id}` and `category/{id}` to the matching topic.
pub async fn dispatch(app_state: &AppState, destination: &str, route: &str, body: String) -> Result<()> {
    let event = match route.split_once('/') {
        Some(("product", product_id)) => {
            validate_entity_id(product_id)?;
            DomainEvent::product_updated(product_id, body)
        }
        Some(("category", category_id)) => {
            validate_entity_id(category_id)?;
            DomainEvent::category_updated(category_id, body)
        }
        _ => return Err(Error::UnknownDestination(destination.to_string())),
    };

    debug!("Relaying SEND {} as {}", destination, event.name());
    app_state.event_publisher.publish(event).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_app_state;
    use stomp::frame::headers;
    use stomp::Topic;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn product_route_relays_to_product_topic() {
        let app_state = test_app_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = app_state.stomp_manager.register_connection(tx);
        app_state
            .stomp_manager
            .subscribe(&connection_id, "sub-0".to_string(), Topic::product("42").unwrap())
            .unwrap();

        dispatch(&app_state, "/app/product/42", "product/42", "restock".to_string())
            .await
            .unwrap();

        let message = rx.try_recv().unwrap();
        assert_eq!(message.header(headers::DESTINATION), Some("/topic/product/42"));
        assert_eq!(message.body, "restock");
    }

    #[tokio::test]
    async fn category_route_relays_to_category_topic() {
        let app_state = test_app_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = app_state.stomp_manager.register_connection(tx);
        app_state
            .stomp_manager
            .subscribe(&connection_id, "sub-0".to_string(), Topic::category("7").unwrap())
            .unwrap();

        dispatch(&app_state, "/app/category/7", "category/7", "renamed".to_string())
            .await
            .unwrap();

        assert_eq!(rx.try_recv().unwrap().body, "renamed");
    }

    #[tokio::test]
    async fn unknown_route_is_refused() {
        let app_state = test_app_state();

        let err = dispatch(&app_state, "/app/order/1", "order/1", String::new())
            .await
            .unwrap_err();

        assert_eq!(err, Error::UnknownDestination("/app/order/1".to_string()));
    }

    #[tokio::test]
    async fn nested_identifier_is_refused() {
        let app_state = test_app_state();

        let err = dispatch(&app_state, "/app/product/4/2", "product/4/2", String::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidDestination(_)));
    }
}
