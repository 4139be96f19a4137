use events::EventPublisher;
use log::{error, info};
use service::{config::Config, logging::Logger, AppState};
use std::sync::Arc;
use stomp::domain_event_handler::StompDomainEventHandler;
use stomp::Manager;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config as &Config) {
        eprintln!("Failed to initialize logger: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting up product notifier [{}] in {} mode...",
        env!("CARGO_PKG_VERSION"),
        config.runtime_env()
    );

    let stomp_manager = Arc::new(Manager::new());
    let event_publisher = EventPublisher::new().with_handler(Arc::new(
        StompDomainEventHandler::new(Arc::clone(&stomp_manager)),
    ));
    info!(
        "Event publisher ready with {} handler(s)",
        event_publisher.handler_count()
    );

    let app_state = AppState::new(config, &stomp_manager, event_publisher);

    if let Err(e) = web::init_server(app_state).await {
        error!("Server stopped: {e}");
        std::process::exit(1);
    }
}
