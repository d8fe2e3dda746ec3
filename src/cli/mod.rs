pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{BuildArgs, CliArgs, Commands, PlanArgs, VerifyArgs};
pub use output::{OutputFormat, OutputFormatter};
