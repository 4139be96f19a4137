use crate::controller::{health_check_controller, notification_controller};
use crate::ws::handler::ws_handler;
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::path::Path;
use tower_http::services::ServeDir;

use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

// This is the global definition of our OpenAPI spec. To be a part
// of the rendered spec, a path and schema must be listed here.
#[derive(OpenApi)]
#[openapi(
        info(
            title = "Product Notifier API",
            description = "Publishes product and category updates to STOMP subscribers connected at /ws"
        ),
        paths(
            health_check_controller::health_check,
            notification_controller::publish_product_update,
            notification_controller::publish_category_update,
        ),
        components(
            schemas(
                health_check_controller::HealthStatus,
                notification_controller::PublishedTopic,
                crate::error::ErrorDetails,
            )
        ),
        tags(
            (name = "product_notifier", description = "Real-time product and category notifications")
        )
    )]
struct ApiDoc;

pub fn define_routes(app_state: AppState) -> Router {
    let static_dir = app_state.config.static_dir().cloned();

    let router = Router::new()
        .merge(health_routes(app_state.clone()))
        .merge(notification_routes(app_state.clone()))
        .merge(websocket_routes(app_state))
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/rapidoc"));

    match static_dir {
        Some(dir) => router.fallback_service(static_routes(&dir)),
        None => router,
    }
}

fn health_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check_controller::health_check))
        .with_state(app_state)
}

fn notification_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/notifications/products/{id}",
            post(notification_controller::publish_product_update),
        )
        .route(
            "/notifications/categories/{id}",
            post(notification_controller::publish_category_update),
        )
        .with_state(app_state)
}

fn websocket_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}

pub fn static_routes(dir: &Path) -> Router {
    Router::new().fallback_service(ServeDir::new(dir))
}
