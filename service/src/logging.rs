use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{self, ConfigBuilder};

/// Modules to filter out from logging when not in Trace mode.
/// These are typically verbose dependencies that clutter normal log output.
const FILTERED_MODULES: &[&str] = &[
    "tokio_tungstenite",
    "tungstenite",
    "tower_http",
    "tower",
    "hyper",
    "axum",
];

pub struct Logger {}

impl Logger {
    /// Initializes the global logger with configuration based on the provided Config.
    ///
    /// When the log level is set to Trace, all logs including dependency logs are shown.
    /// For all other log levels, verbose dependency logs are filtered out. Production
    /// output is written without ANSI colors so it stays readable in log collectors.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        let log_config = Self::build_log_config(Self::ignored_modules(config.log_level_filter));

        // simplelog re-exports log's LevelFilter, so the configured level is used as is.
        simplelog::TermLogger::init(
            config.log_level_filter,
            log_config,
            simplelog::TerminalMode::Mixed,
            Self::color_choice(config.is_production()),
        )
    }

    fn color_choice(is_production: bool) -> simplelog::ColorChoice {
        if is_production {
            simplelog::ColorChoice::Never
        } else {
            simplelog::ColorChoice::Auto
        }
    }

    /// Determines whether dependency logging should be filtered.
    ///
    /// Returns `false` for Trace level (show all logs), `true` for all other levels.
    fn should_filter_dependencies(level: LevelFilter) -> bool {
        level != LevelFilter::Trace
    }

    /// Modules whose records are dropped at `level`.
    fn ignored_modules(level: LevelFilter) -> &'static [&'static str] {
        if Self::should_filter_dependencies(level) {
            FILTERED_MODULES
        } else {
            &[]
        }
    }

    fn build_log_config(ignored_modules: &[&'static str]) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        for module in ignored_modules {
            builder.add_filter_ignore_str(*module);
        }

        builder.build()
    }
}
