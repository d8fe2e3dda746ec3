//! Process-wide helpers shared by the CLI and the library

pub mod logging;

pub use logging::{init_from_config, init_logging, LoggingConfig};
