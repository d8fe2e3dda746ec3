//! Application tree snapshots
//!
//! A snapshot records every directory, file and symlink under a root, keyed
//! by its `/`-separated relative path. The content digest covers paths, entry
//! kinds, the executable bit and file contents, but not timestamps or owners,
//! so a tree exported back out of an image compares equal to its source.

use crate::digest::Digest;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Source tree not found: {0}")]
    NotFound(PathBuf),

    #[error("Source tree is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },

    #[error("{path} changed while the build was running")]
    Changed { path: PathBuf },

    #[error("Invalid tree archive: {0}")]
    Archive(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub executable: bool,
    /// Contents for files, link target for symlinks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl TreeEntry {
    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Dir,
            size: 0,
            executable: false,
            digest: None,
            link_target: None,
        }
    }

    pub fn file(path: impl Into<String>, contents: &[u8], executable: bool) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            size: contents.len() as u64,
            executable,
            digest: Some(Digest::of_bytes(contents)),
            link_target: None,
        }
    }

    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            path: path.into(),
            kind: EntryKind::Symlink,
            size: 0,
            executable: false,
            digest: Some(Digest::of_bytes(target.as_bytes())),
            link_target: Some(target),
        }
    }
}

/// Sorted listing of an application tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    #[serde(skip)]
    root: Option<PathBuf>,
    entries: Vec<TreeEntry>,
}

impl TreeSnapshot {
    /// Walks `root` without applying any ignore files; the copy is verbatim
    pub fn capture(root: &Path) -> Result<Self, SnapshotError> {
        let metadata = fs::metadata(root).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SnapshotError::NotFound(root.to_path_buf()),
            _ => SnapshotError::Unreadable {
                path: root.to_path_buf(),
                source: e,
            },
        })?;
        if !metadata.is_dir() {
            return Err(SnapshotError::NotADirectory(root.to_path_buf()));
        }

        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut entries = Vec::new();
        for result in walker {
            let entry = result.map_err(|e| SnapshotError::Walk {
                path: root.to_path_buf(),
                message: e.to_string(),
            })?;
            if entry.depth() == 0 {
                continue;
            }

            let path = entry.path();
            let relative = relative_path(root, path);
            let file_type = match entry.file_type() {
                Some(ft) => ft,
                None => continue,
            };

            if file_type.is_dir() {
                entries.push(TreeEntry::dir(relative));
            } else if file_type.is_symlink() {
                let target = fs::read_link(path).map_err(|source| SnapshotError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })?;
                entries.push(TreeEntry::symlink(
                    relative,
                    target.to_string_lossy().into_owned(),
                ));
            } else if file_type.is_file() {
                let contents = fs::read(path).map_err(|source| SnapshotError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })?;
                entries.push(TreeEntry::file(relative, &contents, is_executable(path)));
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Captured {} entries under {}", entries.len(), root.display());

        Ok(Self {
            root: Some(root.to_path_buf()),
            entries,
        })
    }

    pub fn from_entries(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries.dedup_by(|a, b| a.path == b.path);
        Self {
            root: None,
            entries,
        }
    }

    /// Reads a tar stream whose entries live under the directory `root_name`,
    /// as produced by exporting a directory out of a container.
    pub fn from_archive<R: Read>(reader: R, root_name: &str) -> Result<Self, SnapshotError> {
        let mut archive = tar::Archive::new(reader);
        let mut entries = Vec::new();

        for entry in archive.entries().map_err(SnapshotError::Archive)? {
            let mut entry = entry.map_err(SnapshotError::Archive)?;
            let raw_path = entry.path().map_err(SnapshotError::Archive)?.into_owned();

            let mut components = raw_path.components().filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            });
            match components.next() {
                Some(first) if first == root_name => {}
                _ => continue,
            }
            let relative: Vec<String> = components.collect();
            if relative.is_empty() {
                continue;
            }
            let relative = relative.join("/");

            let header = entry.header();
            let entry_type = header.entry_type();
            let executable = header.mode().map(|m| m & 0o111 != 0).unwrap_or(false);

            if entry_type.is_dir() {
                entries.push(TreeEntry::dir(relative));
            } else if entry_type.is_symlink() {
                let target = entry
                    .link_name()
                    .map_err(SnapshotError::Archive)?
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                entries.push(TreeEntry::symlink(relative, target));
            } else if entry_type.is_file() {
                let mut contents = Vec::new();
                entry
                    .read_to_end(&mut contents)
                    .map_err(SnapshotError::Archive)?;
                entries.push(TreeEntry::file(relative, &contents, executable));
            }
        }

        Ok(Self::from_entries(entries))
    }

    /// Directory the snapshot was captured from, if it came from disk
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn files(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::File)
    }

    pub fn file_paths(&self) -> Vec<&str> {
        self.files().map(|e| e.path.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.files().map(|e| e.size).sum()
    }

    pub fn content_digest(&self) -> Digest {
        Digest::chain(self.entries.iter().map(|e| {
            let kind = match e.kind {
                EntryKind::Dir => "d",
                EntryKind::File => "f",
                EntryKind::Symlink => "l",
            };
            let digest = e.digest.as_ref().map(|d| d.to_string()).unwrap_or_default();
            format!("{}\0{}\0{}\0{}", e.path, kind, e.executable as u8, digest)
        }))
    }

    /// Paths present in exactly one of the two snapshots, or with different contents
    pub fn differences(&self, other: &TreeSnapshot) -> Vec<String> {
        let mut diffs = Vec::new();
        let (mut left, mut right) = (self.entries.iter().peekable(), other.entries.iter().peekable());
        loop {
            match (left.peek(), right.peek()) {
                (Some(a), Some(b)) if a.path == b.path => {
                    if a != b {
                        diffs.push(format!("~ {}", a.path));
                    }
                    left.next();
                    right.next();
                }
                (Some(a), Some(b)) if a.path < b.path => {
                    diffs.push(format!("- {}", a.path));
                    left.next();
                }
                (Some(_), Some(b)) => {
                    diffs.push(format!("+ {}", b.path));
                    right.next();
                }
                (Some(a), None) => {
                    diffs.push(format!("- {}", a.path));
                    left.next();
                }
                (None, Some(b)) => {
                    diffs.push(format!("+ {}", b.path));
                    right.next();
                }
                (None, None) => break,
            }
        }
        diffs
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}
