//! Run state and reconstruction from journal events.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::{ArtifactKind, ArtifactRecord};
use super::events::{Event, EventType, StageStatus};

/// A single pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,

    /// Name of the pipeline being executed
    pub pipeline_name: String,

    /// Shared key of every artifact this run wrote
    pub lineage_key: Option<String>,

    pub state: RunState,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Number of stages that completed
    pub stages_completed: usize,

    /// Artifacts written so far, by kind
    pub artifacts: BTreeMap<ArtifactKind, ArtifactRecord>,

    /// Status of each stage (stage name -> status)
    pub stage_statuses: HashMap<String, StageStatus>,
}

impl Run {
    pub fn new(id: Uuid, pipeline_name: String) -> Self {
        Self {
            id,
            pipeline_name,
            lineage_key: None,
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            stages_completed: 0,
            artifacts: BTreeMap::new(),
            stage_statuses: HashMap::new(),
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self::new(first_event.run_id, String::new());
        run.started_at = first_event.timestamp;

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        if let Some(key) = &event.lineage_key {
            self.lineage_key = Some(key.clone());
        }

        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
                self.pipeline_name = event.summary.clone();
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    stage: event.stage.clone().unwrap_or_default(),
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StageStarted => {
                if let Some(ref stage) = event.stage {
                    self.stage_statuses.insert(stage.clone(), StageStatus::Running);
                }
            }
            EventType::StageCompleted => {
                if let Some(ref stage) = event.stage {
                    self.stage_statuses.insert(stage.clone(), StageStatus::Completed);
                    self.stages_completed += 1;
                }
            }
            EventType::StageFailed => {
                if let Some(ref stage) = event.stage {
                    self.stage_statuses.insert(stage.clone(), StageStatus::Failed);
                }
            }
            EventType::ArtifactWritten => {
                if let Some(ref record) = event.artifact {
                    self.artifacts.insert(record.kind, record.clone());
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    pub fn is_stage_completed(&self, stage: &str) -> bool {
        self.stage_statuses
            .get(stage)
            .map(|s| *s == StageStatus::Completed)
            .unwrap_or(false)
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    #[default]
    Running,

    Completed,

    /// Stopped at the named stage
    Failed { stage: String, error: String },
}
