//! Deterministic build-context archives
//!
//! Each build step ships its Dockerfile and inputs to the engine as a tar
//! stream. Entries are sorted and carry zeroed timestamps and owners so the
//! same inputs always produce the same bytes.

use super::snapshot::{EntryKind, SnapshotError, TreeSnapshot};
use crate::digest::Digest;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};

/// Context entry holding the step Dockerfile. Recipe paths may not use it.
pub const DOCKERFILE_NAME: &str = ".boxwright.Dockerfile";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEntry {
    Dir,
    File { data: Vec<u8>, mode: u32 },
    Symlink(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildContext {
    entries: BTreeMap<String, ContextEntry>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dockerfile(&mut self, dockerfile: &str) {
        self.add_file(DOCKERFILE_NAME, dockerfile.as_bytes().to_vec(), 0o644);
    }

    pub fn add_file(&mut self, path: &str, data: Vec<u8>, mode: u32) {
        self.add_parents(path);
        self.entries
            .insert(path.to_string(), ContextEntry::File { data, mode });
    }

    /// Adds every entry of a snapshot under `prefix`, re-reading file
    /// contents from disk and checking them against the snapshot digests.
    pub fn add_tree(&mut self, prefix: &str, snapshot: &TreeSnapshot) -> Result<(), SnapshotError> {
        let prefix = prefix.trim_end_matches('/');
        self.add_parents(&format!("{}/", prefix));
        self.entries.insert(prefix.to_string(), ContextEntry::Dir);

        for entry in snapshot.entries() {
            let path = format!("{}/{}", prefix, entry.path);
            match entry.kind {
                EntryKind::Dir => {
                    self.entries.insert(path, ContextEntry::Dir);
                }
                EntryKind::Symlink => {
                    let target = entry.link_target.clone().unwrap_or_default();
                    self.entries.insert(path, ContextEntry::Symlink(target));
                }
                EntryKind::File => {
                    let root = snapshot.root().ok_or_else(|| SnapshotError::Walk {
                        path: prefix.into(),
                        message: "snapshot has no source directory".to_string(),
                    })?;
                    let source = root.join(&entry.path);
                    let data = fs::read(&source).map_err(|e| SnapshotError::Unreadable {
                        path: source.clone(),
                        source: e,
                    })?;
                    if entry.digest.as_ref() != Some(&Digest::of_bytes(&data)) {
                        return Err(SnapshotError::Changed { path: source });
                    }
                    let mode = if entry.executable { 0o755 } else { 0o644 };
                    self.entries.insert(path, ContextEntry::File { data, mode });
                }
            }
        }
        Ok(())
    }

    fn add_parents(&mut self, path: &str) {
        let mut parent = String::new();
        let parts: Vec<&str> = path.split('/').collect();
        for part in &parts[..parts.len().saturating_sub(1)] {
            if part.is_empty() {
                continue;
            }
            if !parent.is_empty() {
                parent.push('/');
            }
            parent.push_str(part);
            self.entries
                .entry(parent.clone())
                .or_insert(ContextEntry::Dir);
        }
    }

    pub fn get(&self, path: &str) -> Option<&ContextEntry> {
        self.entries.get(path.trim_end_matches('/'))
    }

    pub fn dockerfile(&self) -> Option<&str> {
        match self.entries.get(DOCKERFILE_NAME) {
            Some(ContextEntry::File { data, .. }) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    /// Entries strictly below `prefix`, with paths relative to it
    pub fn entries_under<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a ContextEntry)> + 'a {
        let prefix = prefix.trim_end_matches('/');
        self.entries.iter().filter_map(move |(path, entry)| {
            path.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('/'))
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest, entry))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_tar(&self) -> io::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.mode(tar::HeaderMode::Deterministic);

        for (path, entry) in &self.entries {
            let mut header = tar::Header::new_gnu();
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            match entry {
                ContextEntry::Dir => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                    builder.append_data(&mut header, format!("{}/", path), io::empty())?;
                }
                ContextEntry::File { data, mode } => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_mode(*mode);
                    header.set_size(data.len() as u64);
                    builder.append_data(&mut header, path, data.as_slice())?;
                }
                ContextEntry::Symlink(target) => {
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_mode(0o777);
                    header.set_size(0);
                    builder.append_link(&mut header, path, target)?;
                }
            }
        }

        builder.into_inner()
    }

    pub fn to_tar_gz(&self) -> io::Result<Vec<u8>> {
        let tar = self.to_tar()?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar)?;
        encoder.finish()
    }

    /// Reads a plain or gzip-compressed context archive
    pub fn from_archive(bytes: &[u8]) -> io::Result<Self> {
        let mut tar_bytes = Vec::new();
        if bytes.starts_with(&GZIP_MAGIC) {
            GzDecoder::new(bytes).read_to_end(&mut tar_bytes)?;
        } else {
            tar_bytes.extend_from_slice(bytes);
        }

        let mut archive = tar::Archive::new(tar_bytes.as_slice());
        let mut entries = BTreeMap::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry
                .path()?
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string();
            let entry_type = entry.header().entry_type();
            let mode = entry.header().mode().unwrap_or(0o644);

            let parsed = if entry_type.is_dir() {
                ContextEntry::Dir
            } else if entry_type.is_symlink() {
                let target = entry
                    .link_name()?
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                ContextEntry::Symlink(target)
            } else {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                ContextEntry::File { data, mode }
            };
            entries.insert(path, parsed);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_archive_is_deterministic() {
        let mut a = BuildContext::new();
        a.add_dockerfile("FROM scratch\n");
        a.add_file("requirements.txt", b"flake8\n".to_vec(), 0o644);

        let mut b = BuildContext::new();
        b.add_file("requirements.txt", b"flake8\n".to_vec(), 0o644);
        b.add_dockerfile("FROM scratch\n");

        assert_eq!(a.to_tar().unwrap(), b.to_tar().unwrap());
        assert_eq!(a.to_tar_gz().unwrap(), b.to_tar_gz().unwrap());
    }

    #[test]
    fn test_nested_file_adds_parents() {
        let mut context = BuildContext::new();
        context.add_file("deps/requirements.txt", Vec::new(), 0o644);
        assert_eq!(context.get("deps"), Some(&ContextEntry::Dir));
        assert_eq!(context.len(), 2);
    }

    #[test]
    fn test_tree_round_trips_through_gzip() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("main.py"), "import lib\n").unwrap();
        fs::write(dir.path().join("lib/util.py"), "X = 1\n").unwrap();
        let snapshot = TreeSnapshot::capture(dir.path()).unwrap();

        let mut context = BuildContext::new();
        context.add_dockerfile("FROM base\nCOPY app/ /app/\n");
        context.add_tree("app", &snapshot).unwrap();

        let restored = BuildContext::from_archive(&context.to_tar_gz().unwrap()).unwrap();
        assert_eq!(restored, context);
        assert_eq!(restored.dockerfile(), Some("FROM base\nCOPY app/ /app/\n"));

        let under: Vec<&str> = restored.entries_under("app/").map(|(p, _)| p).collect();
        assert_eq!(under, vec!["lib", "lib/util.py", "main.py"]);
    }

    #[test]
    fn test_tree_changed_after_snapshot() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.py"), "v1").unwrap();
        let snapshot = TreeSnapshot::capture(dir.path()).unwrap();
        fs::write(dir.path().join("main.py"), "v2").unwrap();

        let mut context = BuildContext::new();
        assert!(matches!(
            context.add_tree("app", &snapshot),
            Err(SnapshotError::Changed { .. })
        ));
    }
}
