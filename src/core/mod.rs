//! Core orchestration logic.
//!
//! This module contains:
//! - ArtifactStore: lineage-keyed artifact persistence
//! - Journal: append-only run events
//! - Pipeline: pipeline definitions, loading and validation
//! - Stages: the stage functions and their shared environment
//! - Runner: sequential execution engine

pub mod journal;
pub mod pipeline;
pub mod prompts;
pub mod runner;
pub mod stages;
pub mod store;

// Re-export commonly used types
pub use journal::Journal;
pub use pipeline::{Action, Pipeline, StageSpec, PIPELINE_INPUTS};
pub use runner::{Outcome, Runner};
pub use stages::{sample_documents, Stage, StageEnv, StageError};
pub use store::{load_document, ArtifactStore, StoreError};
