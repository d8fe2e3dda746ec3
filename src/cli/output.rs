//! Output formatting for multiple formats
//!
//! JSON and YAML serialize the underlying types directly; the human format is
//! a compact text rendering meant for terminals.
//!
//! # Example
//!
//! ```ignore
//! use boxwright::cli::output::{OutputFormat, OutputFormatter};
//!
//! let formatter = OutputFormatter::new(OutputFormat::Json);
//! let output = formatter.format_report(&report)?;
//! println!("{}", output);
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::cache::CacheRecord;
use crate::config::BuilderConfig;
use crate::plan::{BuildPlan, StepContext};
use crate::report::BuildReport;
use crate::verify::VerificationReport;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (human-friendly, version-control friendly)
    Yaml,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn serialize<T: Serialize>(&self, value: &T, what: &str) -> Result<String> {
        match self.format {
            OutputFormat::Yaml => serde_yaml::to_string(value)
                .with_context(|| format!("Failed to serialize {} to YAML", what)),
            OutputFormat::Json | OutputFormat::Human => serde_json::to_string_pretty(value)
                .with_context(|| format!("Failed to serialize {} to JSON", what)),
        }
    }

    pub fn format_report(&self, report: &BuildReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => report.to_json(),
            OutputFormat::Yaml => report.to_yaml(),
            OutputFormat::Human => {
                let header = if report.succeeded() {
                    "\u{2713} Build Complete"
                } else {
                    "\u{2717} Build Failed"
                };
                let mut output = format!("{}\n{}\n\n{}", header, RULE, report);
                output.push_str(&format!(
                    "\n{} of {} steps cached, finished in {}ms\n",
                    report.cached_steps(),
                    report.steps.len(),
                    report.duration_ms
                ));
                Ok(output)
            }
        }
    }

    pub fn format_plan(&self, plan: &BuildPlan) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.serialize(plan, "build plan");
        }

        let mut output = format!("Build Plan\n{}\n\nBase: {}\n\n", RULE, plan.base);
        for step in &plan.steps {
            output.push_str(&format!("{}. {}\n", step.stage.number(), step.stage));
            output.push_str(&format!("\u{251C}\u{2500} Cache key: {}\n", step.cache_key));
            match &step.context {
                StepContext::Empty => {}
                StepContext::Manifest { path } => {
                    output.push_str(&format!("\u{251C}\u{2500} Context:   manifest {}\n", path))
                }
                StepContext::Tree { path } => {
                    output.push_str(&format!("\u{251C}\u{2500} Context:   tree {}/\n", path))
                }
            }
            for input in &step.inputs {
                output.push_str(&format!(
                    "\u{251C}\u{2500} Input:     {} {}\n",
                    input.name,
                    input.digest.short()
                ));
            }
            if step.instructions.is_empty() {
                output.push_str("\u{2514}\u{2500} (no instructions)\n\n");
            } else {
                for (i, instruction) in step.instructions.iter().enumerate() {
                    let connector = if i == step.instructions.len() - 1 {
                        "\u{2514}"
                    } else {
                        "\u{251C}"
                    };
                    output.push_str(&format!("{}\u{2500} {}\n", connector, instruction));
                }
                output.push('\n');
            }
        }
        Ok(output)
    }

    pub fn format_verification(&self, report: &VerificationReport) -> Result<String> {
        match self.format {
            OutputFormat::Human => {
                let verdict = if report.passed() {
                    format!("\u{2713} {} checks passed", report.passed_count())
                } else {
                    format!(
                        "\u{2717} {} of {} checks failed",
                        report.failures().len(),
                        report.checks.len()
                    )
                };
                Ok(format!("{}\n{}\n", report, verdict))
            }
            _ => self.serialize(report, "verification report"),
        }
    }

    pub fn format_config(&self, config: &BuilderConfig) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(config.to_string()),
            _ => {
                let sorted: BTreeMap<_, _> = config.to_display_map().into_iter().collect();
                self.serialize(&sorted, "config")
            }
        }
    }

    pub fn format_cache(&self, records: &[CacheRecord]) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.serialize(&records, "cache entries");
        }
        if records.is_empty() {
            return Ok("Layer cache is empty\n".to_string());
        }

        let mut output = format!("Layer Cache ({} entries)\n{}\n", records.len(), RULE);
        for record in records {
            output.push_str(&format!(
                "{}  {:<26} {}  last used {}\n",
                record.key.short(),
                record.stage.to_string(),
                record.image_id,
                record.last_used.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use crate::error::BuildError;
    use crate::identity::AccountTool;
    use crate::pipeline::BuildState;
    use crate::recipe::{BuildRecipe, RecipeFormat};
    use crate::report::FailureReport;
    use crate::verify::CheckResult;

    fn plan() -> BuildPlan {
        let recipe = BuildRecipe::parse(
            "base: python:3.9-alpine\nmanifest: requirements.txt\nsource: app\nuser: user\n",
            RecipeFormat::Yaml,
        )
        .unwrap();
        BuildPlan::new(
            &recipe,
            "python:3.9-alpine",
            &Digest::of_bytes(b""),
            &Digest::of_bytes(b"tree"),
            AccountTool::Busybox,
        )
    }

    fn report() -> BuildReport {
        let mut report = BuildReport::new("boxwright.yaml", "python:3.9-alpine");
        report.state = BuildState::BaseSelected;
        report.failure = Some(FailureReport::from(&BuildError::Installation(
            "no matching distribution for nosuchpkg".to_string(),
        )));
        report
    }

    #[test]
    fn test_plan_human() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_plan(&plan())
            .unwrap();
        assert!(output.contains("Base: python:3.9-alpine"));
        assert!(output.contains("2. dependency installation"));
        assert!(output.contains("USER user"));
    }

    #[test]
    fn test_plan_json_round_trips() {
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_plan(&plan())
            .unwrap();
        let parsed: BuildPlan = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed, plan());
    }

    #[test]
    fn test_failed_report_human() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_report(&report())
            .unwrap();
        assert!(output.starts_with("\u{2717} Build Failed"));
        assert!(output.contains("Build failed at dependency installation"));
    }

    #[test]
    fn test_report_yaml() {
        let output = OutputFormatter::new(OutputFormat::Yaml)
            .format_report(&report())
            .unwrap();
        assert!(output.contains("kind: installation"));
    }

    #[test]
    fn test_verification_human() {
        let report = VerificationReport {
            image_id: "sha256:abc".to_string(),
            checks: vec![
                CheckResult {
                    name: "user".to_string(),
                    passed: true,
                    detail: "user".to_string(),
                },
                CheckResult {
                    name: "working_dir".to_string(),
                    passed: false,
                    detail: "not set".to_string(),
                },
            ],
        };
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_verification(&report)
            .unwrap();
        assert!(output.contains("1 of 2 checks failed"));
    }

    #[test]
    fn test_empty_cache_human() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_cache(&[])
            .unwrap();
        assert_eq!(output, "Layer cache is empty\n");
    }
}
