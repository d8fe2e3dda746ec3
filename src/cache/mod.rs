//! Layer cache index
//!
//! Maps step cache keys to the image ids built for them. The index is a JSON
//! file guarded by `fs2` advisory locks: shared for reads, exclusive for
//! read-modify-write updates, so concurrent builds can share one cache
//! directory. A hit is only a hint; the pipeline still checks that the
//! image exists in the engine before reusing it.

use crate::digest::Digest;
use crate::pipeline::BuildStage;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const INDEX_FILE: &str = "index.json";
const INDEX_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: Digest,
    pub stage: BuildStage,
    pub image_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheIndex {
    schema_version: u32,
    entries: BTreeMap<String, CacheRecord>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

fn parse_index(content: &str, path: &Path) -> Result<CacheIndex> {
    if content.trim().is_empty() {
        return Ok(CacheIndex::default());
    }
    let index: CacheIndex = serde_json::from_str(content)
        .with_context(|| format!("Failed to parse cache index {}", path.display()))?;
    if index.schema_version != INDEX_SCHEMA_VERSION {
        debug!(
            "Ignoring cache index {} with schema version {}",
            path.display(),
            index.schema_version
        );
        return Ok(CacheIndex::default());
    }
    Ok(index)
}

#[derive(Debug, Clone)]
pub struct LayerCache {
    dir: PathBuf,
}

impl LayerCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn read_index(&self) -> Result<CacheIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(CacheIndex::default());
        }

        let mut file = fs::File::open(&path)
            .with_context(|| format!("Failed to open cache index {}", path.display()))?;
        file.lock_shared()
            .with_context(|| format!("Failed to share-lock {}", path.display()))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .with_context(|| format!("Failed to read cache index {}", path.display()))?;
        parse_index(&content, &path)
    }

    fn update_index<F, T>(&self, update: F) -> Result<T>
    where
        F: FnOnce(&mut CacheIndex) -> T,
    {
        let path = self.index_path();
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open cache index {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .with_context(|| format!("Failed to read cache index {}", path.display()))?;
        let mut index = parse_index(&content, &path)?;

        let result = update(&mut index);

        let serialized =
            serde_json::to_string_pretty(&index).context("Failed to serialize cache index")?;
        file.set_len(0).context("Failed to truncate cache index")?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())
            .with_context(|| format!("Failed to write cache index {}", path.display()))?;

        Ok(result)
    }

    pub fn lookup(&self, key: &Digest) -> Result<Option<CacheRecord>> {
        Ok(self.read_index()?.entries.get(&key.to_string()).cloned())
    }

    pub fn record(&self, key: &Digest, stage: BuildStage, image_id: &str) -> Result<()> {
        let now = Utc::now();
        self.update_index(|index| {
            index
                .entries
                .entry(key.to_string())
                .and_modify(|record| {
                    record.image_id = image_id.to_string();
                    record.last_used = now;
                })
                .or_insert_with(|| CacheRecord {
                    key: key.clone(),
                    stage,
                    image_id: image_id.to_string(),
                    created_at: now,
                    last_used: now,
                });
        })?;
        debug!("Recorded {} -> {} ({})", key.short(), image_id, stage);
        Ok(())
    }

    pub fn touch(&self, key: &Digest) -> Result<()> {
        let now = Utc::now();
        self.update_index(|index| {
            if let Some(record) = index.entries.get_mut(&key.to_string()) {
                record.last_used = now;
            }
        })
    }

    /// Drops a stale entry whose image no longer exists
    pub fn forget(&self, key: &Digest) -> Result<bool> {
        self.update_index(|index| index.entries.remove(&key.to_string()).is_some())
    }

    pub fn entries(&self) -> Result<Vec<CacheRecord>> {
        let mut entries: Vec<CacheRecord> = self.read_index()?.entries.into_values().collect();
        entries.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        Ok(entries)
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.update_index(|index| {
            let count = index.entries.len();
            index.entries.clear();
            count
        })?;
        info!("Cleared {} entries from {}", removed, self.dir.display());
        Ok(removed)
    }
}
