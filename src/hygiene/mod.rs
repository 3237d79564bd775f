//! Deterministic code hygiene for generated snippets.
//!
//! The engine is a pure function over strings. It scrubs banned tokens,
//! extracts a fenced block, checks that a function and the primary input
//! type are present, normalizes imports, removes helpers nothing calls and
//! collapses blank lines. Running it on its own output is a no-op.
//!
//! Structure comes from a small tokenizer ([`lexer`]) and block parser
//! ([`snippet`]) rather than text patterns, so nested blocks, multi-line
//! signatures, strings and comments are handled consistently.

pub mod engine;
pub mod lexer;
pub mod snippet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::{collapse_blank_lines, extract_fence, Cleaned, Findings, HygieneEngine};

/// The only error the hygiene pass raises. Always recoverable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HygieneError {
    #[error("invalid output: {reason}")]
    InvalidOutput { reason: String },
}

impl HygieneError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOutput {
            reason: reason.into(),
        }
    }
}

/// When an import rule adds or removes its statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPolicy {
    /// Added when the bound name is used and not imported
    Mandatory,
    /// Removed when the bound name is not used
    Optional,
    /// Added when used, removed when unused, decided together
    Symmetric,
}

/// Syntactic form that counts as a use of an imported name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    /// `np.sqrt`
    Attribute,
    /// `Tuple[...]`
    Subscript,
    /// Any free reference
    Name,
}

impl Default for Usage {
    fn default() -> Self {
        Self::Attribute
    }
}

impl Usage {
    pub fn follower(self) -> Option<char> {
        match self {
            Usage::Attribute => Some('.'),
            Usage::Subscript => Some('['),
            Usage::Name => None,
        }
    }
}

/// One row of the import table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRule {
    /// Statement inserted when the import is missing
    pub statement: String,

    /// Name the statement binds
    pub binds: String,

    pub policy: ImportPolicy,

    #[serde(default)]
    pub usage: Usage,
}

impl ImportRule {
    pub fn new(statement: &str, binds: &str, policy: ImportPolicy, usage: Usage) -> Self {
        Self {
            statement: statement.to_string(),
            binds: binds.to_string(),
            policy,
            usage,
        }
    }
}

/// Hygiene settings (part of the `hygiene:` config section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HygieneConfig {
    /// Substrings removed from requests and responses
    #[serde(default = "default_banned_tokens")]
    pub banned_tokens: Vec<String>,

    /// Dotted type every snippet must reference
    #[serde(default = "default_primary_type")]
    pub primary_type: String,

    /// Mandatory / optional / symmetric import table, applied in order
    #[serde(default = "default_imports")]
    pub imports: Vec<ImportRule>,

    /// Top-level helper names eligible for dead-helper elimination
    #[serde(default = "default_helpers")]
    pub helpers: Vec<String>,
}

fn default_banned_tokens() -> Vec<String> {
    vec!["future_".to_string()]
}

fn default_primary_type() -> String {
    "pd.DataFrame".to_string()
}

fn default_imports() -> Vec<ImportRule> {
    vec![
        ImportRule::new("import pandas as pd", "pd", ImportPolicy::Mandatory, Usage::Attribute),
        ImportRule::new("import numpy as np", "np", ImportPolicy::Optional, Usage::Attribute),
        ImportRule::new("from typing import Tuple", "Tuple", ImportPolicy::Symmetric, Usage::Subscript),
    ]
}

fn default_helpers() -> Vec<String> {
    ["std", "rank", "zscore", "sma", "ema", "lag", "clip", "abs"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for HygieneConfig {
    fn default() -> Self {
        Self {
            banned_tokens: default_banned_tokens(),
            primary_type: default_primary_type(),
            imports: default_imports(),
            helpers: default_helpers(),
        }
    }
}
