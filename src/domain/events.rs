//! Journal events for pipeline runs.
//!
//! Every run appends its events to a per-lineage JSONL journal. Run status
//! is never stored directly; it is rebuilt by replaying these events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::ArtifactRecord;

/// A single entry in a run journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Lineage key, once the first stage has assigned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage_key: Option<String>,

    /// Stage name (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary (NO secrets)
    pub summary: String,

    /// Status of the stage/run after this event
    pub status: StageStatus,

    /// Time taken in milliseconds (for finished stages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Artifact written by the stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRecord>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        stage: Option<String>,
        event_type: EventType,
        summary: impl Into<String>,
        status: StageStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            lineage_key: None,
            stage,
            event_type,
            summary: summary.into(),
            status,
            duration_ms: None,
            error: None,
            artifact: None,
        }
    }

    pub fn with_lineage(mut self, lineage_key: Option<&str>) -> Self {
        self.lineage_key = lineage_key.map(str::to_string);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactRecord) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new run has started; the summary holds the pipeline name
    RunStarted,

    /// Every stage completed
    RunCompleted,

    /// A stage failed and the run stopped
    RunFailed,

    StageStarted,

    StageCompleted,

    StageFailed,

    /// A stage persisted an artifact
    ArtifactWritten,
}

/// Status of a stage or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet started
    #[default]
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,
}
