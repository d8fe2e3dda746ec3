//! Content-addressable digests
//!
//! Every layer, manifest and application tree is identified by a sha256
//! digest in the `algorithm:hash` form used by OCI registries.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

const SHA256: &str = "sha256";

/// Represents a content-addressable digest (e.g., "sha256:abc123...")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    hash: String,
}

impl Digest {
    /// Parse a digest string in format "algorithm:hash"
    pub fn parse(digest: &str) -> Result<Self> {
        let (algorithm, hash) = digest.split_once(':').with_context(|| {
            format!(
                "Invalid digest format (expected 'algorithm:hash'): {}",
                digest
            )
        })?;

        if algorithm.is_empty() || hash.is_empty() {
            anyhow::bail!("Invalid digest format (empty component): {}", digest);
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hash: hash.to_string(),
        })
    }

    /// sha256 of a single byte slice
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(bytes))
    }

    /// sha256 over length-prefixed parts, so that `["ab", "c"]` and
    /// `["a", "bc"]` never collide.
    pub fn chain<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut hasher = Sha256::new();
        for part in parts {
            let part = part.as_ref();
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        Self::from_hasher(hasher)
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Self {
            algorithm: SHA256.to_string(),
            hash: hex::encode(hasher.finalize()),
        }
    }

    /// Get the algorithm part (e.g., "sha256")
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Get the hash part
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// First 12 hex characters, as `docker images` shows them
    pub fn short(&self) -> &str {
        &self.hash[..self.hash.len().min(12)]
    }

    /// Convert digest to blob storage path within a cache directory
    pub fn to_blob_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir
            .join("blobs")
            .join(&self.algorithm)
            .join(&self.hash)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

impl TryFrom<String> for Digest {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}
