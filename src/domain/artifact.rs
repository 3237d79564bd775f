//! Artifacts produced by pipeline stages.
//!
//! Every artifact belongs to exactly one kind and one lineage key. The pair
//! determines where it lives on disk; artifacts are written once per run and
//! never edited afterwards.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Kinds of artifacts a pipeline can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Feature idea (YAML)
    Idea,

    /// Alpha concept (YAML)
    Concept,

    /// Alpha formula (YAML)
    Formula,

    /// Concept and formula combined, built without generation (YAML)
    Bundle,

    /// Raw generated code
    Code,

    /// Code after the hygiene pass
    CodeRefined,

    /// Markdown explanation of a feature
    Explanation,

    /// Markdown report
    Report,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 8] = [
        ArtifactKind::Idea,
        ArtifactKind::Concept,
        ArtifactKind::Formula,
        ArtifactKind::Bundle,
        ArtifactKind::Code,
        ArtifactKind::CodeRefined,
        ArtifactKind::Explanation,
        ArtifactKind::Report,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Idea => "idea",
            ArtifactKind::Concept => "concept",
            ArtifactKind::Formula => "formula",
            ArtifactKind::Bundle => "bundle",
            ArtifactKind::Code => "code",
            ArtifactKind::CodeRefined => "code_refined",
            ArtifactKind::Explanation => "explanation",
            ArtifactKind::Report => "report",
        }
    }

    /// Directory under the store root
    pub fn dir(self) -> &'static str {
        match self {
            ArtifactKind::Idea => "ideas",
            ArtifactKind::Concept => "concepts",
            ArtifactKind::Formula => "formulas",
            ArtifactKind::Bundle => "bundles",
            ArtifactKind::Code => "code",
            ArtifactKind::CodeRefined => "code_refined",
            ArtifactKind::Explanation => "explanations",
            ArtifactKind::Report => "reports",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Idea | ArtifactKind::Concept | ArtifactKind::Formula | ArtifactKind::Bundle => "yaml",
            ArtifactKind::Code | ArtifactKind::CodeRefined => "py",
            ArtifactKind::Explanation | ArtifactKind::Report => "md",
        }
    }

    /// Whether payloads of this kind are structured documents
    pub fn is_document(self) -> bool {
        self.extension() == "yaml"
    }

    /// Context key holding the payload
    pub fn context_key(self) -> &'static str {
        self.as_str()
    }

    /// Context key holding the on-disk location
    pub fn path_key(self) -> String {
        format!("{}_path", self.as_str())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown artifact kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for ArtifactKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtifactKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Artifact content
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured document; mapping order is preserved on write
    Document(serde_yaml::Value),

    /// Code or Markdown
    Text(String),
}

impl Payload {
    /// Bytes as written to disk
    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        match self {
            Payload::Document(value) => serde_yaml::to_string(value),
            Payload::Text(text) => Ok(text.clone()),
        }
    }

    pub fn as_document(&self) -> Option<&serde_yaml::Value> {
        match self {
            Payload::Document(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Document(_) => None,
        }
    }
}

/// A persisted stage output
#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub lineage_key: String,
    pub payload: Payload,

    /// Where the store wrote it
    pub location: PathBuf,

    pub created_at: DateTime<Utc>,

    /// Short content digest of the written bytes
    pub digest: String,
}

impl Artifact {
    /// Summary suitable for the run journal
    pub fn record(&self) -> ArtifactRecord {
        ArtifactRecord {
            kind: self.kind,
            lineage_key: self.lineage_key.clone(),
            path: self.location.clone(),
            digest: self.digest.clone(),
        }
    }
}

/// Journal-friendly reference to an artifact (no content)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub kind: ArtifactKind,
    pub lineage_key: String,
    pub path: PathBuf,
    pub digest: String,
}

/// First 16 hex chars of the SHA-256 of the content
pub fn digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
