use axum::http::{header, HeaderValue, Method};
use log::*;
use service::config::Config;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub(crate) use service::AppState;

pub use self::error::{Error, Result};

mod controller;
mod error;
pub mod router;
mod ws;

pub use ws::handler::STOMP_SUBPROTOCOLS;

/// Binds the configured interface and port, then serves until the process exits.
pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let server_address = app_state.config.server_address();
    let listener = TcpListener::bind(&server_address).await?;
    serve(listener, app_state).await
}

/// Serves the notification routes on an already bound listener.
pub async fn serve(listener: TcpListener, app_state: AppState) -> std::io::Result<()> {
    info!(
        "Server starting... listening for connections on http://{}",
        listener.local_addr()?
    );
    info!(
        "STOMP endpoint at /ws, application prefix {}, broker prefix {}",
        app_state.session_config.app_destination_prefix,
        app_state.session_config.broker_destination_prefix
    );

    let cors_layer = cors_layer(&app_state.config);
    let app = router::define_routes(app_state).layer(cors_layer);

    axum::serve(listener, app).await
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::AppState;
    use events::EventPublisher;
    use service::config::Config;
    use std::sync::Arc;
    use stomp::domain_event_handler::StompDomainEventHandler;
    use stomp::Manager;

    /// App state wired the same way the server binary wires it.
    pub(crate) fn test_app_state() -> AppState {
        let stomp_manager = Arc::new(Manager::new());
        let event_publisher = EventPublisher::new().with_handler(Arc::new(
            StompDomainEventHandler::new(stomp_manager.clone()),
        ));
        AppState::new(Config::default(), &stomp_manager, event_publisher)
    }
}
