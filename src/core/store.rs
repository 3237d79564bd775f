//! Flat, file-based artifact store.
//!
//! Layout: `root/<kind_dir>/<lineage_key>.<ext>`. No index, no locking;
//! the same `(kind, key)` written twice keeps the last write.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tokio::fs;

use crate::domain::{digest, Artifact, ArtifactKind, Payload};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML at {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == ErrorKind::NotFound {
            Self::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Artifact storage rooted at one directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, kind: ArtifactKind, lineage_key: &str) -> PathBuf {
        self.root
            .join(kind.dir())
            .join(format!("{}.{}", lineage_key, kind.extension()))
    }

    /// Write an artifact, creating its directory if needed
    pub async fn save(
        &self,
        kind: ArtifactKind,
        lineage_key: &str,
        payload: Payload,
    ) -> Result<Artifact, StoreError> {
        let path = self.path_for(kind, lineage_key);
        let content = payload.render().map_err(|source| StoreError::Yaml {
            path: path.clone(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        fs::write(&path, &content)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        tracing::debug!(kind = %kind, lineage_key, path = %path.display(), "Artifact written");

        Ok(Artifact {
            kind,
            lineage_key: lineage_key.to_string(),
            digest: digest(&content),
            payload,
            location: path,
            created_at: Utc::now(),
        })
    }

    pub async fn load(&self, kind: ArtifactKind, lineage_key: &str) -> Result<Payload, StoreError> {
        let path = self.path_for(kind, lineage_key);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        if kind.is_document() {
            parse_document(&path, &content).map(Payload::Document)
        } else {
            Ok(Payload::Text(content))
        }
    }

    pub async fn exists(&self, kind: ArtifactKind, lineage_key: &str) -> bool {
        fs::try_exists(self.path_for(kind, lineage_key))
            .await
            .unwrap_or(false)
    }

    /// Whether any artifact of any kind uses this key
    pub async fn lineage_exists(&self, lineage_key: &str) -> bool {
        for kind in ArtifactKind::ALL {
            if self.exists(kind, lineage_key).await {
                return true;
            }
        }
        false
    }

    /// Lineage keys with an artifact of this kind, sorted
    pub async fn list(&self, kind: ArtifactKind) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join(kind.dir());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let suffix = format!(".{}", kind.extension());
        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(key) = name.strip_suffix(&suffix) {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Read a standalone YAML document (e.g. a seed input)
pub async fn load_document(path: &Path) -> Result<serde_yaml::Value, StoreError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    parse_document(path, &content)
}

fn parse_document(path: &Path, content: &str) -> Result<serde_yaml::Value, StoreError> {
    serde_yaml::from_str(content).map_err(|source| StoreError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}
