use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use stomp::session::{HeartBeat, SessionConfig};

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

/// Destination prefixes must be absolute paths without a trailing slash.
fn parse_destination_prefix(value: &str) -> Result<String, String> {
    let trimmed = value.trim_end_matches('/');
    if !trimmed.starts_with('/') || trimmed.len() < 2 {
        return Err(format!(
            "destination prefix must look like '/name', got '{}'",
            value
        ));
    }
    Ok(trimmed.to_string())
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,

    /// Prefix of SEND destinations handled by the application (e.g. /app/product/{id}).
    #[arg(long, env, default_value = "/app", value_parser = parse_destination_prefix)]
    pub app_destination_prefix: String,

    /// Smallest interval in milliseconds at which the server sends STOMP heart-beats (0 disables).
    #[arg(long, env, default_value_t = 10_000)]
    pub heartbeat_send_ms: u64,

    /// Interval in milliseconds at which the server wants to hear from clients (0 disables).
    #[arg(long, env, default_value_t = 10_000)]
    pub heartbeat_receive_ms: u64,

    /// Milliseconds a new websocket may stay silent before sending CONNECT (0 disables).
    #[arg(long, env, default_value_t = 10_000)]
    pub connect_timeout_ms: u64,

    /// Directory of static files (e.g. the browser client page) served as a fallback route.
    #[arg(long, env)]
    static_dir: Option<PathBuf>,
}

impl Default for Config {
    /// Built-in defaults plus environment variables, ignoring the process arguments.
    fn default() -> Self {
        Config::parse_from([env!("CARGO_PKG_NAME")])
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("127.0.0.1")
    }

    /// `interface:port` for binding the listener.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.interface(), self.port)
    }

    pub fn set_static_dir(mut self, static_dir: PathBuf) -> Self {
        self.static_dir = Some(static_dir);
        self
    }

    pub fn static_dir(&self) -> Option<&PathBuf> {
        self.static_dir.as_ref()
    }

    /// Broker settings handed to every websocket session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            app_destination_prefix: self.app_destination_prefix.clone(),
            heartbeat: HeartBeat::new(self.heartbeat_send_ms, self.heartbeat_receive_ms),
            connect_timeout: (self.connect_timeout_ms > 0)
                .then(|| Duration::from_millis(self.connect_timeout_ms)),
            ..SessionConfig::default()
        }
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_prefix_is_normalized() {
        assert_eq!(parse_destination_prefix("/app/"), Ok("/app".to_string()));
        assert_eq!(parse_destination_prefix("/topic"), Ok("/topic".to_string()));
        assert!(parse_destination_prefix("app").is_err());
        assert!(parse_destination_prefix("/").is_err());
    }

    #[test]
    fn command_line_flags_override_defaults() {
        let config = Config::parse_from([
            "product_notifier",
            "--port",
            "8080",
            "--interface",
            "0.0.0.0",
            "--app-destination-prefix",
            "/application",
            "--heartbeat-send-ms",
            "0",
            "--connect-timeout-ms",
            "0",
            "--runtime-env",
            "PRODUCTION",
        ]);

        assert_eq!(config.server_address(), "0.0.0.0:8080");
        assert!(config.is_production());

        let session = config.session_config();
        assert_eq!(session.app_destination_prefix, "/application");
        assert_eq!(session.heartbeat.send_ms, 0);
        assert_eq!(session.connect_timeout, None);
    }

    #[test]
    fn runtime_env_parses_case_insensitively() {
        assert_eq!("Staging".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!("nope".parse::<RustEnv>(), Err(RustEnvParseError));
        assert_eq!(RustEnv::Development.to_string(), "development");
    }

    #[test]
    fn connect_timeout_defaults_to_ten_seconds() {
        let session = Config::parse_from(["product_notifier"]).session_config();

        assert_eq!(session.connect_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn static_dir_can_be_set_programmatically() {
        let config = Config::parse_from(["product_notifier"]).set_static_dir(PathBuf::from("static"));

        assert_eq!(config.static_dir(), Some(&PathBuf::from("static")));
    }
}
