//! Append-only run journal with file-based persistence.
//!
//! One JSONL file per lineage key under `root/runs/`. Events are never
//! rewritten; run status is whatever replaying the file yields.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::{Event, Run};

/// File-based run journal using JSONL format
#[derive(Debug, Clone)]
pub struct Journal {
    runs_dir: PathBuf,
}

impl Journal {
    /// Journal rooted at `root/runs`
    pub fn new(root: &Path) -> Self {
        Self {
            runs_dir: root.join("runs"),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn path_for(&self, journal_key: &str) -> PathBuf {
        self.runs_dir.join(format!("{}.jsonl", journal_key))
    }

    /// Append an event to the journal for `journal_key`
    pub async fn append(&self, journal_key: &str, event: &Event) -> Result<()> {
        self.append_all(journal_key, std::slice::from_ref(event)).await
    }

    /// Append several events in order with a single open
    pub async fn append_all(&self, journal_key: &str, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.runs_dir)
            .await
            .with_context(|| format!("Failed to create runs directory: {}", self.runs_dir.display()))?;

        let path = self.path_for(journal_key);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;

        let mut buf = String::new();
        for event in events {
            let json = serde_json::to_string(event).context("Failed to serialize event")?;
            buf.push_str(&json);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush journal")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self, journal_key: &str) -> Result<Vec<Event>> {
        let path = self.path_for(journal_key);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rebuild the most recent run recorded under `journal_key`
    pub async fn load_run(&self, journal_key: &str) -> Result<Option<Run>> {
        let events = self.replay(journal_key).await?;
        let Some(last) = events.last() else {
            return Ok(None);
        };
        let run_id = last.run_id;
        let latest: Vec<Event> = events.into_iter().filter(|e| e.run_id == run_id).collect();
        Ok(Run::from_events(&latest))
    }

    /// Latest run for every journal key, most recent first
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        for key in self.list().await? {
            if let Some(run) = self.load_run(&key).await? {
                runs.push(run);
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    /// All journal keys, sorted
    pub async fn list(&self) -> Result<Vec<String>> {
        if !fs::try_exists(&self.runs_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.runs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(key) = name.strip_suffix(".jsonl") {
                    keys.push(key.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
