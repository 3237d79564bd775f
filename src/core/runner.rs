//! Pipeline runner.
//!
//! Executes stages strictly in order, merging each stage's update into the
//! context. The first stage error ends the run: it is logged, journaled and
//! reported as `RunState::Failed`. Artifacts already written stay on disk.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::domain::{Event, EventType, PipelineContext, Run, RunState, StageStatus};

use super::journal::Journal;
use super::pipeline::Pipeline;
use super::stages::{StageEnv, StageError};

/// Final state of a run plus the context it built
#[derive(Debug)]
pub struct Outcome {
    pub run: Run,
    pub context: PipelineContext,
}

impl Outcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.run.state, RunState::Completed)
    }
}

/// Sequential pipeline executor
pub struct Runner {
    env: StageEnv,
    journal: Journal,
}

impl Runner {
    pub fn new(env: StageEnv, journal: Journal) -> Self {
        Self { env, journal }
    }

    pub fn env(&self) -> &StageEnv {
        &self.env
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Execute a pipeline against the given inputs.
    ///
    /// Returns `Err` only for invalid pipelines or journal I/O failures; a
    /// failing stage yields `Ok` with the run in `Failed` state.
    #[instrument(skip(self, pipeline, inputs), fields(pipeline = %pipeline.name))]
    pub async fn run(&self, pipeline: &Pipeline, inputs: PipelineContext) -> Result<Outcome> {
        let input_keys: Vec<&str> = inputs.keys().collect();
        pipeline
            .validate(&input_keys)
            .with_context(|| format!("Invalid pipeline '{}'", pipeline.name))?;

        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting pipeline execution");

        let mut log = RunLog::new(&self.journal, Run::new(run_id, pipeline.name.clone()));
        let mut ctx = inputs;

        log.record(Event::new(
            run_id,
            None,
            EventType::RunStarted,
            pipeline.name.clone(),
            StageStatus::Running,
        ))
        .await?;

        for spec in &pipeline.stages {
            let name = spec.name().to_string();
            let stage = spec.build();

            log.record(Event::new(
                run_id,
                Some(name.clone()),
                EventType::StageStarted,
                format!("Stage '{}' started", name),
                StageStatus::Running,
            ))
            .await?;

            let started = Instant::now();
            let result = match stage.run(&self.env, &ctx).await {
                Ok(mut update) => {
                    let record = update.take_record();
                    ctx.merge(update).map(|()| record).map_err(StageError::from)
                }
                Err(e) => Err(e),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let record = match result {
                Ok(record) => record,
                Err(e) => return self.fail(log, ctx, &name, duration_ms, e).await,
            };

            if let Some(key) = ctx.lineage_key() {
                log.assign_key(key).await?;
            }

            if let Some(record) = record {
                debug!(stage = %name, path = %record.path.display(), "Artifact written");
                log.record(
                    Event::new(
                        run_id,
                        Some(name.clone()),
                        EventType::ArtifactWritten,
                        format!("{} written", record.kind),
                        StageStatus::Completed,
                    )
                    .with_artifact(record),
                )
                .await?;
            }

            log.record(
                Event::new(
                    run_id,
                    Some(name.clone()),
                    EventType::StageCompleted,
                    format!("Stage '{}' completed in {}ms", name, duration_ms),
                    StageStatus::Completed,
                )
                .with_duration(duration_ms),
            )
            .await?;

            info!(stage = %name, lineage_key = ctx.lineage_key().unwrap_or(""), duration_ms, "Stage completed");
        }

        log.record(Event::new(
            run_id,
            None,
            EventType::RunCompleted,
            format!("Pipeline '{}' completed", pipeline.name),
            StageStatus::Completed,
        ))
        .await?;

        info!(%run_id, lineage_key = ctx.lineage_key().unwrap_or(""), "Run completed successfully");

        Ok(Outcome {
            run: log.finish(),
            context: ctx,
        })
    }

    async fn fail(
        &self,
        mut log: RunLog<'_>,
        ctx: PipelineContext,
        stage: &str,
        duration_ms: u64,
        err: StageError,
    ) -> Result<Outcome> {
        let error_msg = err.to_string();
        error!(stage, lineage_key = ctx.lineage_key().unwrap_or(""), error = %error_msg, "Stage failed");

        let run_id = log.run.id;
        log.record(
            Event::new(
                run_id,
                Some(stage.to_string()),
                EventType::StageFailed,
                format!("Stage '{}' failed: {}", stage, error_msg),
                StageStatus::Failed,
            )
            .with_duration(duration_ms)
            .with_error(error_msg.clone()),
        )
        .await?;

        log.record(
            Event::new(
                run_id,
                Some(stage.to_string()),
                EventType::RunFailed,
                format!("Run failed at '{}'", stage),
                StageStatus::Failed,
            )
            .with_error(error_msg),
        )
        .await?;

        log.flush_unkeyed().await?;

        Ok(Outcome {
            run: log.finish(),
            context: ctx,
        })
    }
}

/// Journal writer for one run.
///
/// Events are buffered until the lineage key is known, then flushed to that
/// key's journal. A run that fails before any key exists is journaled under
/// its run id.
struct RunLog<'a> {
    journal: &'a Journal,
    run: Run,
    key: Option<String>,
    pending: Vec<Event>,
}

impl<'a> RunLog<'a> {
    fn new(journal: &'a Journal, run: Run) -> Self {
        Self {
            journal,
            run,
            key: None,
            pending: Vec::new(),
        }
    }

    async fn record(&mut self, event: Event) -> Result<()> {
        let event = event.with_lineage(self.key.as_deref());
        self.run.apply_event(&event);

        match &self.key {
            Some(key) => self.journal.append(key, &event).await,
            None => {
                self.pending.push(event);
                Ok(())
            }
        }
    }

    async fn assign_key(&mut self, key: &str) -> Result<()> {
        if self.key.is_some() {
            return Ok(());
        }

        for event in &mut self.pending {
            event.lineage_key = Some(key.to_string());
        }
        self.run.lineage_key = Some(key.to_string());
        self.journal.append_all(key, &self.pending).await?;
        self.pending.clear();
        self.key = Some(key.to_string());
        Ok(())
    }

    async fn flush_unkeyed(&mut self) -> Result<()> {
        if self.key.is_none() {
            let fallback = self.run.id.to_string();
            self.journal.append_all(&fallback, &self.pending).await?;
            self.pending.clear();
        }
        Ok(())
    }

    fn finish(self) -> Run {
        self.run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_log_buffers_until_key() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path());
        let run_id = Uuid::new_v4();
        let mut log = RunLog::new(&journal, Run::new(run_id, "feature".into()));

        log.record(Event::new(run_id, None, EventType::RunStarted, "feature", StageStatus::Running))
            .await
            .unwrap();
        assert!(journal.list().await.unwrap().is_empty());

        log.assign_key("rsi_gap_20240101_000000").await.unwrap();
        log.record(Event::new(run_id, None, EventType::RunCompleted, "", StageStatus::Completed))
            .await
            .unwrap();

        let events = journal.replay("rsi_gap_20240101_000000").await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.lineage_key.as_deref() == Some("rsi_gap_20240101_000000")));

        let run = log.finish();
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.pipeline_name, "feature");
    }

    #[tokio::test]
    async fn test_run_log_falls_back_to_run_id() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path());
        let run_id = Uuid::new_v4();
        let mut log = RunLog::new(&journal, Run::new(run_id, "alpha".into()));

        log.record(Event::new(run_id, None, EventType::RunStarted, "alpha", StageStatus::Running))
            .await
            .unwrap();
        log.flush_unkeyed().await.unwrap();

        assert_eq!(journal.list().await.unwrap(), vec![run_id.to_string()]);
    }
}
