//! Build recipe schema
//!
//! A recipe is the declarative input of a build: which base runtime to start
//! from, which dependency manifest to install, which source tree to place in
//! the application directory, and which account the image runs as. Recipes
//! are read from YAML, JSON or TOML; relative paths resolve against the
//! directory holding the recipe file.

pub mod identity;
pub mod image_ref;
pub mod manifest;

pub use identity::{is_privileged_user, ExecutionIdentity};
pub use image_ref::{ImageRef, ImageRefError};
pub use manifest::{DependencyManifest, ManifestError, OpaqueRequirement, PackageSpec};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Recipe file names looked up when only a directory is given
pub const DEFAULT_RECIPE_FILES: &[&str] = &["boxwright.yaml", "boxwright.yml", "boxwright.toml", "boxwright.json"];

/// Environment variable that makes the Python runtime write output unbuffered
pub const UNBUFFERED_ENV: (&str, &str) = ("PYTHONUNBUFFERED", "1");

fn default_app_dir() -> String {
    "/app".to_string()
}

fn default_manifest_dest() -> String {
    "/requirements.txt".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeFormat {
    Yaml,
    Json,
    Toml,
}

impl RecipeFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => RecipeFormat::Json,
            Some("toml") => RecipeFormat::Toml,
            _ => RecipeFormat::Yaml,
        }
    }
}

/// Declarative description of one image build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildRecipe {
    /// Base runtime reference, pinned (e.g. "python:3.9-alpine")
    pub base: String,
    /// Dependency manifest file
    pub manifest: PathBuf,
    /// Application source tree
    pub source: PathBuf,
    /// Account the image runs as
    pub user: ExecutionIdentity,
    /// Absolute application directory inside the image
    #[serde(default = "default_app_dir")]
    pub app_dir: String,
    /// Where the manifest is copied inside the image
    #[serde(default = "default_manifest_dest")]
    pub manifest_dest: String,
    /// Overrides the dependency install command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
    /// Sets `PYTHONUNBUFFERED=1` for every process in the image
    #[serde(default = "default_true")]
    pub unbuffered_output: bool,
    /// Extra runtime environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Tag applied to the finished image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl BuildRecipe {
    pub fn parse(content: &str, format: RecipeFormat) -> Result<Self> {
        match format {
            RecipeFormat::Yaml => {
                serde_yaml::from_str(content).context("Failed to parse recipe as YAML")
            }
            RecipeFormat::Json => {
                serde_json::from_str(content).context("Failed to parse recipe as JSON")
            }
            RecipeFormat::Toml => toml::from_str(content).context("Failed to parse recipe as TOML"),
        }
    }

    /// Loads a recipe file, or the first default recipe file inside a directory
    pub fn load(path: &Path) -> Result<LoadedRecipe> {
        let file = if path.is_dir() {
            DEFAULT_RECIPE_FILES
                .iter()
                .map(|name| path.join(name))
                .find(|candidate| candidate.is_file())
                .with_context(|| {
                    format!(
                        "No recipe found in {} (looked for {})",
                        path.display(),
                        DEFAULT_RECIPE_FILES.join(", ")
                    )
                })?
        } else {
            path.to_path_buf()
        };

        let content = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read recipe {}", file.display()))?;
        let recipe = Self::parse(&content, RecipeFormat::from_path(&file))
            .with_context(|| format!("Invalid recipe {}", file.display()))?;

        let root = file
            .parent()
            .map(Path::to_path_buf)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(LoadedRecipe { recipe, root, file })
    }

    pub fn base_ref(&self) -> Result<ImageRef, ImageRefError> {
        ImageRef::parse(&self.base)
    }

    /// Environment fixed into the image at build time
    pub fn runtime_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if self.unbuffered_output {
            env.insert(UNBUFFERED_ENV.0.to_string(), UNBUFFERED_ENV.1.to_string());
        }
        env
    }

    pub fn install_command(&self) -> String {
        self.install_command
            .clone()
            .unwrap_or_else(|| format!("pip install --no-cache-dir -r {}", self.manifest_dest))
    }
}

/// A recipe together with where it was loaded from
#[derive(Debug, Clone)]
pub struct LoadedRecipe {
    pub recipe: BuildRecipe,
    /// Directory relative paths resolve against
    pub root: PathBuf,
    pub file: PathBuf,
}

impl LoadedRecipe {
    /// Wraps an in-memory recipe whose paths resolve against `root`
    pub fn from_parts(recipe: BuildRecipe, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            file: root.join(DEFAULT_RECIPE_FILES[0]),
            recipe,
            root,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.recipe.manifest)
    }

    pub fn source_path(&self) -> PathBuf {
        self.root.join(&self.recipe.source)
    }

    /// Tag for the finished image: the override, the recipe's own tag, or
    /// `<recipe directory>:latest`
    pub fn image_tag(&self, tag_override: Option<&str>) -> String {
        if let Some(tag) = tag_override.or(self.recipe.tag.as_deref()) {
            return tag.to_string();
        }
        let dir_name = self
            .root
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        let repository: String = dir_name
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
                _ => '-',
            })
            .collect::<String>()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_string();
        if repository.is_empty() {
            "boxwright-app:latest".to_string()
        } else {
            format!("{}:latest", repository)
        }
    }
}
