use crate::backend::PullPolicy;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Layered container image builder for minimal, non-root application images
#[derive(Parser, Debug)]
#[command(
    name = "boxwright",
    about = "Layered container image builder for minimal, non-root application images",
    version,
    long_about = "boxwright builds an application image from a recipe in four ordered steps: \
                  base selection, dependency installation, application placement and \
                  privilege de-escalation. Each step is its own cached layer, so changing \
                  only the application source never re-installs dependencies."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(
        short = 'v',
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (can be used multiple times)"
    )]
    pub verbose: u8,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Build and tag an image from a recipe",
        long_about = "Runs every build step against the local Docker engine, verifies the \
                      result and tags it. Nothing is tagged if any step fails.\n\n\
                      Examples:\n  \
                      boxwright build\n  \
                      boxwright build ./service --tag service:1.4.0\n  \
                      boxwright build boxwright.yaml --format json --output report.json"
    )]
    Build(BuildArgs),

    #[command(
        about = "Show the build steps and cache keys without building",
        long_about = "Computes the plan locally. The base image is not resolved, so the \
                      base reference stands in for its id.\n\n\
                      Examples:\n  \
                      boxwright plan\n  \
                      boxwright plan --format yaml"
    )]
    Plan(PlanArgs),

    #[command(about = "Print a single Dockerfile equivalent to the build steps")]
    Render(RenderArgs),

    #[command(
        about = "Check an existing image for the runtime invariants",
        long_about = "Checks that an image runs as the given non-root account, uses the \
                      application directory as its working directory and carries the \
                      expected environment.\n\n\
                      Examples:\n  \
                      boxwright verify service:1.4.0 --user app --app-dir /app\n  \
                      boxwright verify service:1.4.0 --user app --app-dir /app --env PYTHONUNBUFFERED=1"
    )]
    Verify(VerifyArgs),

    #[command(about = "Show the effective configuration")]
    Config(ConfigArgs),

    #[command(about = "List or clear the layer cache index")]
    Cache(CacheArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(
        value_name = "RECIPE",
        help = "Recipe file or directory containing one (defaults to current directory)"
    )]
    pub recipe: Option<PathBuf>,

    #[arg(short = 't', long, value_name = "TAG", help = "Tag for the finished image")]
    pub tag: Option<String>,

    #[arg(long, help = "Rebuild every step, ignoring cached layers")]
    pub no_cache: bool,

    #[arg(long, help = "Skip verifying the image before tagging")]
    pub no_verify: bool,

    #[arg(long, value_enum, value_name = "POLICY", help = "When to pull the base image")]
    pub pull: Option<PullPolicyArg>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Abort a step that runs longer than this (0 for no limit)"
    )]
    pub step_timeout: Option<u64>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write the build report to file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(value_name = "RECIPE")]
    pub recipe: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct RenderArgs {
    #[arg(value_name = "RECIPE")]
    pub recipe: Option<PathBuf>,

    #[arg(short = 'o', long, value_name = "FILE", help = "Write the Dockerfile to file")]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    #[arg(value_name = "IMAGE", help = "Image id or tag")]
    pub image: String,

    #[arg(short = 'u', long, value_name = "USER", help = "Expected runtime account")]
    pub user: String,

    #[arg(long, value_name = "DIR", default_value = "/app", help = "Expected working directory")]
    pub app_dir: String,

    #[arg(
        short = 'e',
        long = "env",
        value_name = "KEY=VALUE",
        value_parser = parse_env_pair,
        help = "Expected environment variable (repeatable)"
    )]
    pub env: Vec<(String, String)>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct CacheArgs {
    #[arg(long, help = "Remove every entry from the index")]
    pub clear: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullPolicyArg {
    Missing,
    Always,
    Never,
}

impl From<PullPolicyArg> for PullPolicy {
    fn from(arg: PullPolicyArg) -> Self {
        match arg {
            PullPolicyArg::Missing => PullPolicy::Missing,
            PullPolicyArg::Always => PullPolicy::Always,
            PullPolicyArg::Never => PullPolicy::Never,
        }
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Expected KEY=VALUE, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_default_build_args() {
        let args = CliArgs::parse_from(["boxwright", "build"]);
        match args.command {
            Commands::Build(build_args) => {
                assert!(build_args.recipe.is_none());
                assert!(build_args.tag.is_none());
                assert!(!build_args.no_cache);
                assert!(!build_args.no_verify);
                assert!(build_args.pull.is_none());
                assert_eq!(build_args.format, OutputFormatArg::Human);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_build_with_options() {
        let args = CliArgs::parse_from([
            "boxwright",
            "build",
            "./service",
            "--tag",
            "service:1.0",
            "--no-cache",
            "--no-verify",
            "--pull",
            "never",
            "--step-timeout",
            "300",
            "--format",
            "json",
            "--output",
            "report.json",
        ]);

        match args.command {
            Commands::Build(build_args) => {
                assert_eq!(build_args.recipe, Some(PathBuf::from("./service")));
                assert_eq!(build_args.tag.as_deref(), Some("service:1.0"));
                assert!(build_args.no_cache);
                assert!(build_args.no_verify);
                assert_eq!(build_args.pull, Some(PullPolicyArg::Never));
                assert_eq!(build_args.step_timeout, Some(300));
                assert_eq!(build_args.format, OutputFormatArg::Json);
                assert_eq!(build_args.output, Some(PathBuf::from("report.json")));
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_verify_env_pairs() {
        let args = CliArgs::parse_from([
            "boxwright",
            "verify",
            "demo:1",
            "--user",
            "app",
            "--env",
            "PYTHONUNBUFFERED=1",
            "-e",
            "EMPTY=",
        ]);
        match args.command {
            Commands::Verify(verify_args) => {
                assert_eq!(verify_args.image, "demo:1");
                assert_eq!(verify_args.app_dir, "/app");
                assert_eq!(
                    verify_args.env,
                    vec![
                        ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
                        ("EMPTY".to_string(), String::new()),
                    ]
                );
            }
            _ => panic!("Expected Verify command"),
        }
    }

    #[test]
    fn test_verify_rejects_bad_env() {
        let result = CliArgs::try_parse_from([
            "boxwright", "verify", "demo:1", "--user", "app", "--env", "NOVALUE",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["boxwright", "-vv", "plan"]);
        assert_eq!(args.verbose, 2);
        assert!(!args.quiet);

        let args = CliArgs::parse_from(["boxwright", "plan", "-q", "--log-level", "debug"]);
        assert!(args.quiet);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(CliArgs::try_parse_from(["boxwright", "-q", "-v", "plan"]).is_err());
    }

    #[test]
    fn test_pull_policy_conversion() {
        assert_eq!(PullPolicy::from(PullPolicyArg::Always), PullPolicy::Always);
        assert_eq!(PullPolicy::from(PullPolicyArg::Missing), PullPolicy::Missing);
    }
}
