//! alphaforge - lineage-tracked generation of trading alpha and feature snippets
//!
//! A chain of stages turns an idea (or a seeded set of research documents)
//! into Python code: ideation, formulation, code generation, refinement and
//! explanation. Every artifact of one run shares a lineage key, so the chain
//! can be read back from disk stage by stage.
//!
//! # Architecture
//!
//! - Stages are functions over an append-only context; the runner executes
//!   them strictly in order and stops at the first failure
//! - Generated code passes through a deterministic, idempotent hygiene
//!   engine before it is kept
//! - Every run is journaled as events; run status is derived by replay
//!
//! # Modules
//!
//! - `adapters`: Generator backends (subprocess, chat completions)
//! - `core`: Store, journal, pipelines, stages and runner
//! - `domain`: Data structures (Artifact, Context, Event, Run, lineage keys)
//! - `hygiene`: Snippet tokenizer, block parser and cleaning engine
//! - `config`: Configuration discovery and resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Feature chain: idea -> code -> refined code -> explanation
//! alphaforge run feature --focus "volume imbalance"
//!
//! # Alpha chain from a directory of research documents
//! alphaforge run alpha --input-dir data/relationships --subset 8 --seed 42
//!
//! # Clean a snippet by hand
//! alphaforge clean snippet.py
//!
//! # Check what a run produced
//! alphaforge status <lineage-key>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod hygiene;

// Re-export main types at crate root for convenience
pub use adapters::{GenerationRequest, Generator, TransportError};
pub use config::ResolvedConfig;
pub use core::{Pipeline, Runner, StageEnv};
pub use domain::{ArtifactKind, Event, EventType, PipelineContext, Run, RunState};
pub use hygiene::{HygieneConfig, HygieneEngine, HygieneError};
