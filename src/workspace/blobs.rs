//! Content blob storage: one JSON file per artifact id.
//!
//! Blobs are written before their metadata row, so a crash can leave a blob
//! without metadata. Such orphans are found by [`BlobStore::ids`] and removed
//! by the repository's reclaim sweep once they are older than its grace
//! period, which keeps the sweep clear of a store still committing its row.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::models::ArtifactContent;
use crate::errors::StorageError;

/// On-disk content encoding. Tagged so a structured JSON string does not
/// come back as text.
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
enum StoredContent {
    Text(String),
    Structured(serde_json::Value),
}

impl From<&ArtifactContent> for StoredContent {
    fn from(content: &ArtifactContent) -> Self {
        match content {
            ArtifactContent::Text(text) => Self::Text(text.clone()),
            ArtifactContent::Structured(value) => Self::Structured(value.clone()),
        }
    }
}

impl From<StoredContent> for ArtifactContent {
    fn from(stored: StoredContent) -> Self {
        match stored {
            StoredContent::Text(text) => Self::Text(text),
            StoredContent::Structured(value) => Self::Structured(value),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct BlobFile {
    artifact_id: String,
    content: StoredContent,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Open the blob directory, creating it if needed.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir).map_err(|source| StorageError::Blob {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Write (or overwrite) the blob for `id`. The file is replaced atomically.
    pub fn write(&self, id: &str, content: &ArtifactContent) -> Result<PathBuf, StorageError> {
        let path = self.path_for(id);
        let tmp = self.dir.join(format!(".{}.json.tmp", id));
        let body = serde_json::to_vec_pretty(&BlobFile {
            artifact_id: id.to_string(),
            content: content.into(),
        })?;
        std::fs::write(&tmp, body).map_err(|source| StorageError::Blob {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StorageError::Blob {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn read(&self, id: &str) -> Result<ArtifactContent, StorageError> {
        let path = self.path_for(id);
        let raw = std::fs::read(&path).map_err(|source| StorageError::Blob {
            path: path.clone(),
            source,
        })?;
        let blob: BlobFile = serde_json::from_slice(&raw)?;
        Ok(blob.content.into())
    }

    /// Time since the blob was last written. `None` if it is gone.
    pub fn age(&self, id: &str) -> Result<Option<Duration>, StorageError> {
        let path = self.path_for(id);
        let modified = match std::fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Blob { path, source }),
        };
        // An mtime in the future counts as brand new.
        Ok(Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        ))
    }

    /// Remove the blob. Returns false if it was already gone.
    pub fn remove(&self, id: &str) -> Result<bool, StorageError> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::Blob { path, source }),
        }
    }

    /// Ids of every blob on disk.
    pub fn ids(&self) -> Result<Vec<String>, StorageError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| StorageError::Blob {
            path: self.dir.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && !stem.starts_with('.')
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Total bytes used by blob files.
    pub fn total_size(&self) -> Result<u64, StorageError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| StorageError::Blob {
            path: self.dir.clone(),
            source,
        })?;
        Ok(entries
            .flatten()
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum())
    }
}
