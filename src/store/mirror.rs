//! Durable mirror of the content-fingerprint set.
//!
//! The persisted form is a JSON array of digest strings, oldest first.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::StoreError;
use crate::pipeline::Fingerprint;

/// Storage backend for the fingerprint list.
#[async_trait]
pub trait FingerprintMirror: Send + Sync {
    /// Load the persisted list, oldest first. A missing store is empty.
    async fn load(&self) -> Result<Vec<Fingerprint>, StoreError>;

    /// Replace the persisted list.
    async fn save(&self, fingerprints: &[Fingerprint]) -> Result<(), StoreError>;
}

/// JSON file on local disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileMirror {
    path: PathBuf,
}

impl JsonFileMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "fingerprints.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl FingerprintMirror for JsonFileMirror {
    async fn load(&self) -> Result<Vec<Fingerprint>, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })
    }

    async fn save(&self, fingerprints: &[Fingerprint]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let json = serde_json::to_vec_pretty(fingerprints)?;
        let tmp = self.temp_path();
        fs::write(&tmp, json).await.map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }
}
