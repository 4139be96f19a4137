use config::Config;
use events::EventPublisher;
use std::sync::Arc;
use stomp::session::SessionConfig;
use stomp::Manager;

pub mod config;
pub mod logging;

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub stomp_manager: Arc<Manager>,
    pub event_publisher: EventPublisher,
    pub session_config: Arc<SessionConfig>,
}

impl AppState {
    pub fn new(app_config: Config, stomp_manager: &Arc<Manager>, event_publisher: EventPublisher) -> Self {
        let session_config = Arc::new(app_config.session_config());
        Self {
            config: app_config,
            stomp_manager: Arc::clone(stomp_manager),
            event_publisher,
            session_config,
        }
    }

    pub fn stomp_manager_ref(&self) -> &Manager {
        self.stomp_manager.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_follows_app_config() {
        let mut config = Config::default();
        config.app_destination_prefix = "/application".to_string();
        config.heartbeat_send_ms = 0;
        let manager = Arc::new(Manager::new());

        let app_state = AppState::new(config, &manager, EventPublisher::new());

        assert_eq!(app_state.session_config.app_destination_prefix, "/application");
        assert_eq!(app_state.session_config.heartbeat.send_ms, 0);
        assert_eq!(app_state.stomp_manager_ref().connection_count(), 0);
    }
}
