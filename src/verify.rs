//! Post-build verification
//!
//! Inspects a produced image and checks what must hold when it runs: a
//! non-privileged active user that exists in the image, the application
//! directory as working directory, the fixed runtime environment, and an
//! application directory whose contents equal the source tree.

use crate::backend::{BackendError, ImageBackend};
use crate::context::TreeSnapshot;
use crate::identity::{PasswdDb, PASSWD_PATH};
use crate::recipe::{is_privileged_user, BuildRecipe};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

const MAX_LISTED_DIFFERENCES: usize = 10;

/// What a finished image is expected to look like
#[derive(Debug, Clone)]
pub struct Expectations {
    pub user: String,
    pub app_dir: String,
    pub env: BTreeMap<String, String>,
    /// Source tree the application directory must match, when known
    pub source: Option<TreeSnapshot>,
}

impl Expectations {
    pub fn from_recipe(recipe: &BuildRecipe, source: Option<TreeSnapshot>) -> Self {
        Self {
            user: recipe.user.name.clone(),
            app_dir: recipe.app_dir.clone(),
            env: recipe.runtime_env(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn new(name: impl Into<String>, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub image_id: String,
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    /// One line per failed check
    pub fn failure_summary(&self) -> String {
        self.failures()
            .iter()
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Verification of {}", self.image_id)?;
        for check in &self.checks {
            let mark = if check.passed { "ok" } else { "FAILED" };
            writeln!(f, "  [{}] {}: {}", mark, check.name, check.detail)?;
        }
        Ok(())
    }
}

fn dir_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

pub async fn verify_image(
    backend: &dyn ImageBackend,
    image: &str,
    expected: &Expectations,
) -> Result<VerificationReport, BackendError> {
    let details = backend.inspect(image).await?;
    let mut checks = Vec::new();

    let user = details.user.clone().unwrap_or_default();
    checks.push(if is_privileged_user(&user) {
        CheckResult::new(
            "user",
            false,
            format!("image runs as privileged user '{}'", if user.is_empty() { "root" } else { user.as_str() }),
        )
    } else if user.split(':').next() != Some(expected.user.as_str()) {
        CheckResult::new(
            "user",
            false,
            format!("expected '{}', found '{}'", expected.user, user),
        )
    } else {
        CheckResult::new("user", true, user.clone())
    });

    let passwd = backend.read_file(image, PASSWD_PATH).await?;
    let db = PasswdDb::parse(&String::from_utf8_lossy(&passwd.unwrap_or_default()));
    checks.push(match db.find(&expected.user) {
        Some(entry) if entry.uid == 0 => {
            CheckResult::new("account", false, format!("'{}' has uid 0", entry.name))
        }
        Some(entry) => CheckResult::new("account", true, format!("uid {}", entry.uid)),
        None => CheckResult::new(
            "account",
            false,
            format!("'{}' is not in {}", expected.user, PASSWD_PATH),
        ),
    });

    let workdir = details.working_dir.clone().unwrap_or_default();
    checks.push(CheckResult::new(
        "working_dir",
        workdir.trim_end_matches('/') == expected.app_dir.trim_end_matches('/'),
        if workdir.is_empty() {
            "not set".to_string()
        } else {
            workdir
        },
    ));

    for (key, value) in &expected.env {
        let check = match details.env_value(key) {
            Some(actual) if actual == value => CheckResult::new(format!("env {}", key), true, actual),
            Some(actual) => CheckResult::new(
                format!("env {}", key),
                false,
                format!("expected '{}', found '{}'", value, actual),
            ),
            None => CheckResult::new(format!("env {}", key), false, "not set"),
        };
        checks.push(check);
    }

    if let Some(source) = &expected.source {
        let archive = backend.export_dir(image, &expected.app_dir).await?;
        let exported = TreeSnapshot::from_archive(archive.as_slice(), dir_name(&expected.app_dir))
            .map_err(|e| BackendError::Engine(e.to_string()))?;

        let differences = source.differences(&exported);
        debug!(
            "Application directory has {} entries, {} differences",
            exported.len(),
            differences.len()
        );
        checks.push(if differences.is_empty() {
            CheckResult::new(
                "app_contents",
                true,
                format!("{} files, {}", source.files().count(), source.content_digest().short()),
            )
        } else {
            let mut listed: Vec<String> = differences
                .iter()
                .take(MAX_LISTED_DIFFERENCES)
                .cloned()
                .collect();
            if differences.len() > MAX_LISTED_DIFFERENCES {
                listed.push(format!("... {} more", differences.len() - MAX_LISTED_DIFFERENCES));
            }
            CheckResult::new("app_contents", false, listed.join(", "))
        });
    }

    Ok(VerificationReport {
        image_id: details.id,
        checks,
    })
}
