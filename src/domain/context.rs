//! Shared, append-only state threaded through a pipeline run.
//!
//! The runner owns the context. Stages read from it and hand back a
//! [`ContextUpdate`]; merging an update that would overwrite an existing key
//! fails, so a stage can never clobber what an earlier stage produced.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::artifact::{Artifact, ArtifactRecord, Payload};

pub const LINEAGE_KEY: &str = "lineage_key";
pub const FOCUS: &str = "focus";
pub const SEED_DOCUMENTS: &str = "seed_documents";

/// A single context entry
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Text(String),
    Path(PathBuf),
    Document(serde_yaml::Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("context key already set: {key}")]
pub struct ContextConflict {
    pub key: String,
}

/// Entries a stage wants added to the context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextUpdate {
    entries: Vec<(String, ContextValue)>,
    /// Journal record of the artifact behind these entries
    record: Option<ArtifactRecord>,
}

impl ContextUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: ContextValue) -> Self {
        self.entries.push((key.into(), value));
        self
    }

    pub fn lineage_key(self, key: &str) -> Self {
        self.set(LINEAGE_KEY, ContextValue::Text(key.to_string()))
    }

    /// `<kind>` and `<kind>_path` entries for a persisted artifact
    pub fn artifact(self, artifact: &Artifact) -> Self {
        let value = match &artifact.payload {
            Payload::Document(doc) => ContextValue::Document(doc.clone()),
            Payload::Text(text) => ContextValue::Text(text.clone()),
        };
        let mut update = self
            .set(artifact.kind.context_key(), value)
            .set(artifact.kind.path_key(), ContextValue::Path(artifact.location.clone()));
        update.record = Some(artifact.record());
        update
    }

    /// Detach the artifact record, leaving only the entries to merge
    pub fn take_record(&mut self) -> Option<ArtifactRecord> {
        self.record.take()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Append-only map of symbolic names to values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineContext {
    entries: BTreeMap<String, ContextValue>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entry; existing keys are never replaced
    pub fn insert(&mut self, key: impl Into<String>, value: ContextValue) -> Result<(), ContextConflict> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(ContextConflict { key });
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Merge all entries of an update, or none of them
    pub fn merge(&mut self, update: ContextUpdate) -> Result<(), ContextConflict> {
        let mut seen = BTreeSet::new();
        for key in update.keys() {
            if self.entries.contains_key(key) || !seen.insert(key) {
                return Err(ContextConflict { key: key.to_string() });
            }
        }
        self.entries.extend(update.entries);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            ContextValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn path(&self, key: &str) -> Option<&Path> {
        match self.entries.get(key)? {
            ContextValue::Path(path) => Some(path),
            _ => None,
        }
    }

    pub fn document(&self, key: &str) -> Option<&serde_yaml::Value> {
        match self.entries.get(key)? {
            ContextValue::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn lineage_key(&self) -> Option<&str> {
        self.text(LINEAGE_KEY)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
