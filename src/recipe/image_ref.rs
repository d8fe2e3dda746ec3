//! Container image references
//!
//! Parses `[registry/]repository[:tag][@digest]` the way the Docker CLI does:
//! the first path component is a registry only when it looks like a host
//! (contains `.` or `:`, or is `localhost`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageRefError {
    #[error("Image reference cannot be empty")]
    Empty,

    #[error("Invalid repository name '{0}'")]
    InvalidRepository(String),

    #[error("Invalid tag '{0}'")]
    InvalidTag(String),

    #[error("Invalid digest '{0}' (expected sha256:<64 hex chars>)")]
    InvalidDigest(String),
}

fn component_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").unwrap())
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap())
}

fn digest_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sha256:[a-f0-9]{64}$").unwrap())
}

/// A parsed image reference such as `python:3.9-alpine`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, ImageRefError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ImageRefError::Empty);
        }

        let (remainder, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !digest_regex().is_match(digest) {
                    return Err(ImageRefError::InvalidDigest(digest.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a registry port
        let last_slash = remainder.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match remainder[last_slash..].rfind(':') {
            Some(pos) => {
                let split = last_slash + pos;
                let tag = &remainder[split + 1..];
                if !tag_regex().is_match(tag) {
                    return Err(ImageRefError::InvalidTag(tag.to_string()));
                }
                (&remainder[..split], Some(tag.to_string()))
            }
            None => (remainder, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest)
            }
            _ => (None, name),
        };

        if repository.is_empty()
            || !repository
                .split('/')
                .all(|component| component_regex().is_match(component))
        {
            return Err(ImageRefError::InvalidRepository(name.to_string()));
        }

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Repository including the registry host, without tag or digest
    pub fn name(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    /// Tag to use for pulls and tagging; `latest` when none was given
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// A reference is pinned when it names a digest or an explicit non-`latest` tag.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some() || matches!(self.tag.as_deref(), Some(tag) if tag != DEFAULT_TAG)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageRef {
    type Err = ImageRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ImageRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(reference: ImageRef) -> Self {
        reference.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        official = { "python:3.9-alpine", None, "python", Some("3.9-alpine") },
        untagged = { "alpine", None, "alpine", None },
        namespaced = { "library/python:3.11", None, "library/python", Some("3.11") },
        registry_port = { "localhost:5000/app:1.0", Some("localhost:5000"), "app", Some("1.0") },
        registry_host = { "cgr.dev/chainguard/wolfi-base:latest", Some("cgr.dev"), "chainguard/wolfi-base", Some("latest") },
    )]
    fn test_parse_components(
        input: &str,
        registry: Option<&str>,
        repository: &str,
        tag: Option<&str>,
    ) {
        let parsed = ImageRef::parse(input).unwrap();
        assert_eq!(parsed.registry(), registry);
        assert_eq!(parsed.repository(), repository);
        assert_eq!(parsed.tag(), tag);
        assert_eq!(parsed.to_string(), input);
    }

    #[test]
    fn test_parse_digest() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let parsed = ImageRef::parse(&format!("python@{}", digest)).unwrap();
        assert_eq!(parsed.digest(), Some(digest.as_str()));
        assert!(parsed.is_pinned());
    }

    #[test]
    fn test_pinning() {
        assert!(ImageRef::parse("python:3.9-alpine").unwrap().is_pinned());
        assert!(!ImageRef::parse("python").unwrap().is_pinned());
        assert!(!ImageRef::parse("python:latest").unwrap().is_pinned());
    }

    #[test]
    fn test_invalid_references() {
        assert_eq!(ImageRef::parse(""), Err(ImageRefError::Empty));
        assert!(matches!(
            ImageRef::parse("Python:3.9"),
            Err(ImageRefError::InvalidRepository(_))
        ));
        assert!(matches!(
            ImageRef::parse("python:3.9 alpine"),
            Err(ImageRefError::InvalidTag(_))
        ));
        assert!(matches!(
            ImageRef::parse("python@sha256:xyz"),
            Err(ImageRefError::InvalidDigest(_))
        ));
    }

    #[test]
    fn test_tag_or_default() {
        assert_eq!(ImageRef::parse("myapp").unwrap().tag_or_default(), "latest");
        assert_eq!(ImageRef::parse("myapp:v2").unwrap().tag_or_default(), "v2");
    }
}
