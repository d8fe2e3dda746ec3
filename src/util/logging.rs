//! Structured logging setup
//!
//! Logs always go to stderr so that `--format json` output on stdout stays
//! machine readable. Filtering honors `RUST_LOG`; otherwise boxwright logs at
//! the configured level and the Docker client stack is kept at `warn`.
//!
//! ```no_run
//! use boxwright::util::{init_logging, LoggingConfig};
//! use tracing::Level;
//!
//! init_logging(LoggingConfig::with_level(Level::DEBUG));
//! tracing::info!(stage = "base", "Resolving base image");
//! ```

use crate::config::BuilderConfig;
use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Crates whose chatter is capped at `warn` unless `RUST_LOG` says otherwise
const QUIET_TARGETS: &[&str] = &["bollard", "hyper", "hyper_util", "h2"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,

    /// JSON lines instead of human-readable output
    pub use_json: bool,

    pub include_target: bool,

    /// File and line number of each event
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Machine-consumable logs for CI runs
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
        }
    }

    /// Maps `-v`/`-q` counts onto a level, starting from `base`
    pub fn from_verbosity(base: Level, verbose: u8, quiet: bool) -> Self {
        let level = if quiet {
            Level::ERROR
        } else if verbose == 0 {
            base
        } else if verbose >= 2 || base >= Level::DEBUG {
            Level::TRACE
        } else {
            Level::DEBUG
        };
        Self::with_level(level)
    }

    fn filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::from_default_env();
        let mut directives = vec![format!("boxwright={}", self.level)];
        if env::var("RUST_LOG").is_err() {
            directives.extend(QUIET_TARGETS.iter().map(|t| format!("{}=warn", t)));
        }
        for directive in directives {
            match directive.parse::<Directive>() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("Ignoring log directive '{}': {}", directive, e),
            }
        }
        filter
    }
}

/// Case-insensitive; anything unrecognized falls back to INFO
pub fn parse_level(level_str: &str) -> Level {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Installs the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(config.filter());
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location);

        let result = if config.use_json {
            registry.with(layer.json()).try_init()
        } else {
            registry.with(layer).try_init()
        };
        if let Err(e) = result {
            eprintln!("Logging already initialized: {}", e);
        }
    });
}

/// Level and format from BOXWRIGHT_LOG_LEVEL and BOXWRIGHT_LOG_JSON
pub fn init_from_config(config: &BuilderConfig) {
    init_logging(LoggingConfig {
        level: parse_level(&config.log_level),
        use_json: config.log_json,
        ..Default::default()
    });
}
