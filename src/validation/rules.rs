use crate::context::DOCKERFILE_NAME;
use crate::plan::context_path;
use crate::recipe::{BuildRecipe, ImageRef, UNBUFFERED_ENV};
use anyhow::Result;
use regex::Regex;
use std::path::{Component, Path};
use std::sync::OnceLock;

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, recipe: &BuildRecipe) -> Result<()>;
}

fn env_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

fn image_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/[A-Za-z0-9._@+/-]*$").unwrap())
}

pub struct RequiredFieldsRule;

impl ValidationRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "RequiredFields"
    }

    fn validate(&self, recipe: &BuildRecipe) -> Result<()> {
        if recipe.base.trim().is_empty() {
            anyhow::bail!("Base image cannot be empty");
        }
        if recipe.manifest.as_os_str().is_empty() {
            anyhow::bail!("Dependency manifest path cannot be empty");
        }
        if recipe.source.as_os_str().is_empty() {
            anyhow::bail!("Application source path cannot be empty");
        }
        if recipe.user.name.is_empty() {
            anyhow::bail!("User cannot be empty");
        }
        Ok(())
    }
}

pub struct PinnedBaseRule;

impl ValidationRule for PinnedBaseRule {
    fn name(&self) -> &'static str {
        "PinnedBase"
    }

    fn validate(&self, recipe: &BuildRecipe) -> Result<()> {
        let reference = ImageRef::parse(&recipe.base)?;
        if !reference.is_pinned() {
            anyhow::bail!(
                "Base image '{}' must be pinned to a version tag or digest",
                recipe.base
            );
        }
        Ok(())
    }
}

pub struct ExecutionIdentityRule;

impl ValidationRule for ExecutionIdentityRule {
    fn name(&self) -> &'static str {
        "ExecutionIdentity"
    }

    fn validate(&self, recipe: &BuildRecipe) -> Result<()> {
        let user = &recipe.user;
        if !user.has_valid_name() {
            anyhow::bail!(
                "'{}' is not a valid account name (lowercase letters, digits, '_' and '-', at most 32 characters)",
                user.name
            );
        }
        if user.is_privileged() {
            anyhow::bail!("The image must not run as a privileged identity ('{}')", user);
        }
        Ok(())
    }
}

pub struct ContextPathsRule;

impl ContextPathsRule {
    fn check(field: &str, path: &Path) -> Result<()> {
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    anyhow::bail!("{} '{}' must not leave the recipe directory", field, path.display())
                }
                Component::RootDir | Component::Prefix(_) => {
                    anyhow::bail!(
                        "{} '{}' must be relative to the recipe directory",
                        field,
                        path.display()
                    )
                }
            }
        }
        let name = context_path(path);
        if name.is_empty() {
            anyhow::bail!("{} '{}' must name an entry inside the recipe directory", field, path.display());
        }
        // The step Dockerfile lives at the top of every build context
        if name.split('/').next() == Some(DOCKERFILE_NAME) {
            anyhow::bail!(
                "{} '{}' collides with the reserved build context entry '{}'",
                field,
                path.display(),
                DOCKERFILE_NAME
            );
        }
        Ok(())
    }
}

impl ValidationRule for ContextPathsRule {
    fn name(&self) -> &'static str {
        "ContextPaths"
    }

    fn validate(&self, recipe: &BuildRecipe) -> Result<()> {
        Self::check("Manifest", &recipe.manifest)?;
        Self::check("Source", &recipe.source)?;
        Ok(())
    }
}

pub struct ImagePathsRule;

impl ImagePathsRule {
    fn normalized(path: &str) -> String {
        format!("/{}", path.split('/').filter(|p| !p.is_empty()).collect::<Vec<_>>().join("/"))
    }
}

impl ValidationRule for ImagePathsRule {
    fn name(&self) -> &'static str {
        "ImagePaths"
    }

    fn validate(&self, recipe: &BuildRecipe) -> Result<()> {
        for (field, path) in [("app_dir", &recipe.app_dir), ("manifest_dest", &recipe.manifest_dest)] {
            if !path.starts_with('/') {
                anyhow::bail!("{} '{}' must be an absolute path", field, path);
            }
            if path.split('/').any(|p| p == "..") {
                anyhow::bail!("{} '{}' must not contain '..'", field, path);
            }
            if !image_path_regex().is_match(path) {
                anyhow::bail!(
                    "{} '{}' may only contain letters, digits and '.', '_', '-', '+', '@', '/'",
                    field,
                    path
                );
            }
        }

        let app_dir = Self::normalized(&recipe.app_dir);
        if app_dir == "/" {
            anyhow::bail!("app_dir cannot be the filesystem root");
        }
        let manifest_dest = Self::normalized(&recipe.manifest_dest);
        if manifest_dest == app_dir || manifest_dest.starts_with(&format!("{}/", app_dir)) {
            anyhow::bail!(
                "manifest_dest '{}' must lie outside app_dir '{}'",
                recipe.manifest_dest,
                recipe.app_dir
            );
        }
        Ok(())
    }
}

pub struct RuntimeEnvRule;

impl ValidationRule for RuntimeEnvRule {
    fn name(&self) -> &'static str {
        "RuntimeEnv"
    }

    fn validate(&self, recipe: &BuildRecipe) -> Result<()> {
        for (key, value) in &recipe.env {
            if !env_key_regex().is_match(key) {
                anyhow::bail!("'{}' is not a valid environment variable name", key);
            }
            if value.contains('\n') {
                anyhow::bail!("Environment variable {} must be a single line", key);
            }
        }
        let (unbuffered_key, unbuffered_value) = UNBUFFERED_ENV;
        if recipe.unbuffered_output {
            if let Some(value) = recipe.env.get(unbuffered_key) {
                if value != unbuffered_value {
                    anyhow::bail!(
                        "env sets {}={} but unbuffered_output requires {}={}",
                        unbuffered_key,
                        value,
                        unbuffered_key,
                        unbuffered_value
                    );
                }
            }
        }
        Ok(())
    }
}

pub struct ValidTagRule;

impl ValidationRule for ValidTagRule {
    fn name(&self) -> &'static str {
        "ValidTag"
    }

    fn validate(&self, recipe: &BuildRecipe) -> Result<()> {
        if let Some(tag) = &recipe.tag {
            let reference = ImageRef::parse(tag)?;
            if reference.digest().is_some() {
                anyhow::bail!("Tag '{}' cannot carry a digest", tag);
            }
        }
        Ok(())
    }
}
