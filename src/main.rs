use boxwright::cli::commands::{CliArgs, Commands};
use boxwright::cli::handlers::{
    handle_build, handle_cache, handle_config, handle_plan, handle_render, handle_verify,
};
use boxwright::config::BuilderConfig;
use boxwright::util::logging::{init_logging, parse_level, LoggingConfig};
use boxwright::{NAME, VERSION};

use clap::Parser;
use std::process;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Build(build_args) => handle_build(build_args, args.quiet).await,
        Commands::Plan(plan_args) => handle_plan(plan_args),
        Commands::Render(render_args) => handle_render(render_args),
        Commands::Verify(verify_args) => handle_verify(verify_args).await,
        Commands::Config(config_args) => handle_config(config_args),
        Commands::Cache(cache_args) => handle_cache(cache_args),
    };

    process::exit(exit_code);
}

/// `--log-level` wins over `BOXWRIGHT_LOG_LEVEL`; `-v`/`-q` adjust either
fn init_logging_from_args(args: &CliArgs) {
    let env = BuilderConfig::default();
    let base = parse_level(args.log_level.as_deref().unwrap_or(&env.log_level));
    let config = LoggingConfig {
        use_json: env.log_json,
        ..LoggingConfig::from_verbosity(base, args.verbose, args.quiet)
    };
    init_logging(config);
}
