//! Domain types for alphaforge.
//!
//! - Artifact: stage outputs and where they live
//! - Lineage: keys shared by every artifact of one run
//! - Context: append-only state threaded through a run
//! - Events / Run: the run journal and state rebuilt from it

pub mod artifact;
pub mod context;
pub mod events;
pub mod lineage;
pub mod run;

pub use artifact::{digest, Artifact, ArtifactKind, ArtifactRecord, Payload, UnknownKind};
pub use context::{ContextConflict, ContextUpdate, ContextValue, PipelineContext};
pub use events::{Event, EventType, StageStatus};
pub use lineage::{slug, Clock, ClockSource, CollisionPolicy, FixedClock, LineageKeyGenerator, SystemClock, UtcClock};
pub use run::{Run, RunState};
