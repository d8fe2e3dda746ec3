//! Dependency manifest parsing
//!
//! A manifest is a line-delimited list of requirements in the pip format.
//! Lines that read as `name[extras] <version clauses>` are broken down into
//! [`PackageSpec`]s; anything else (VCS links, archive URLs, local wheels)
//! is kept verbatim as an [`OpaqueRequirement`]. Whether a requirement can
//! actually be installed is for the installer to decide inside the image.

use crate::digest::Digest;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Manifest is not valid UTF-8")]
    NotUtf8,
}

/// One package requirement, e.g. `Django>=2.1.3,<2.2.0`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    /// Version clauses or a direct `@ url` reference; `None` means unconstrained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    /// 1-based line in the manifest file where the requirement starts
    pub line: usize,
}

impl PackageSpec {
    /// Name normalized per PEP 503 (lowercase, runs of `-_.` collapsed to `-`)
    pub fn normalized_name(&self) -> String {
        let mut normalized = String::with_capacity(self.name.len());
        let mut last_was_separator = false;
        for c in self.name.chars() {
            if matches!(c, '-' | '_' | '.') {
                if !last_was_separator {
                    normalized.push('-');
                }
                last_was_separator = true;
            } else {
                normalized.push(c.to_ascii_lowercase());
                last_was_separator = false;
            }
        }
        normalized
    }

    pub fn is_unconstrained(&self) -> bool {
        self.constraint.is_none()
    }
}

/// A requirement line handed to the installer as written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueRequirement {
    pub content: String,
    pub line: usize,
}

impl OpaqueRequirement {
    /// Whether the line points at an archive, a checkout or a local path
    /// rather than naming a package
    pub fn is_location(&self) -> bool {
        self.content.contains("://")
            || self.content.starts_with('.')
            || self.content.starts_with('/')
            || self.content.starts_with('~')
            || self.content.ends_with(".whl")
            || self.content.ends_with(".tar.gz")
            || self.content.ends_with(".zip")
    }
}

/// Parsed manifest; the digest covers the exact bytes it was read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyManifest {
    pub packages: Vec<PackageSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opaque: Vec<OpaqueRequirement>,
    /// Installer options such as `--index-url ...`, kept verbatim
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub digest: Digest,
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<rest>.*)$",
        )
        .unwrap()
    })
}

fn clause_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(===|==|~=|!=|<=|>=|<|>)\s*[A-Za-z0-9.*+!_-]+$").unwrap())
}

impl DependencyManifest {
    pub fn parse(raw: &[u8]) -> Result<Self, ManifestError> {
        let content = std::str::from_utf8(raw).map_err(|_| ManifestError::NotUtf8)?;

        let mut packages = Vec::new();
        let mut opaque = Vec::new();
        let mut options = Vec::new();

        for (line_no, logical) in logical_lines(content) {
            let line = strip_comment(&logical);
            if line.is_empty() {
                continue;
            }
            if line.starts_with('-') {
                options.push(line.to_string());
                continue;
            }
            match parse_requirement(line, line_no) {
                Some(package) => packages.push(package),
                None => {
                    trace!(line = line_no, "Keeping requirement verbatim: {}", line);
                    opaque.push(OpaqueRequirement {
                        content: line.to_string(),
                        line: line_no,
                    });
                }
            }
        }

        Ok(Self {
            packages,
            opaque,
            options,
            digest: Digest::of_bytes(raw),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.opaque.is_empty()
    }

    /// Number of requirements, named or not
    pub fn len(&self) -> usize {
        self.packages.len() + self.opaque.len()
    }

    /// Normalized package names, sorted; equal sets mean equal installs
    pub fn package_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.packages.iter().map(|p| p.normalized_name()).collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Joins backslash continuations; yields the 1-based number of the first physical line
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, physical) in content.lines().enumerate() {
        let (start, mut buffer) = pending.take().unwrap_or((idx + 1, String::new()));
        if let Some(stripped) = physical.strip_suffix('\\') {
            buffer.push_str(stripped);
            pending = Some((start, buffer));
        } else {
            buffer.push_str(physical);
            lines.push((start, buffer));
        }
    }
    if let Some(last) = pending {
        lines.push(last);
    }
    lines
}

/// A `#` starts a comment at line start or after whitespace; `pkg#egg` stays intact
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return line[..i].trim();
        }
    }
    line.trim()
}

/// `None` when the line is not a plain `name[extras] <clauses> ; marker`
fn parse_requirement(line: &str, line_no: usize) -> Option<PackageSpec> {
    let captures = name_regex().captures(line)?;

    let name = captures["name"].to_string();
    let extras = captures
        .name("extras")
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let rest = captures.name("rest").map(|m| m.as_str().trim()).unwrap_or("");

    let (spec, marker) = match rest.split_once(';') {
        Some((spec, marker)) => {
            let marker = marker.trim();
            if marker.is_empty() {
                return None;
            }
            (spec.trim(), Some(marker.to_string()))
        }
        None => (rest, None),
    };

    // `requests (>=2.0)` is the older spelling of `requests>=2.0`
    let spec = match spec.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => inner.trim(),
        None => spec,
    };

    let constraint = if spec.is_empty() {
        None
    } else if let Some(url) = spec.strip_prefix('@') {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        Some(format!("@ {}", url))
    } else {
        if !spec.split(',').all(|clause| clause_regex().is_match(clause.trim())) {
            return None;
        }
        Some(spec.to_string())
    };

    Some(PackageSpec {
        name,
        extras,
        constraint,
        marker,
        line: line_no,
    })
}
