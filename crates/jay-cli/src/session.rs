//! Transcript persistence
//!
//! Each session writes two files named after its start time:
//! `prompt_<unix_ts>.txt` holds the full rendered transcript and is
//! rewritten after every turn; `prompt_<unix_ts>.jsonl` is an append-only
//! log with one entry per turn.

use jay_agent::{TranscriptSink, Turn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Session entry types for JSONL format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEntry {
    /// Session metadata
    Metadata {
        created_at: i64,
        model: String,
        working_dir: String,
    },
    /// A turn appended to the conversation
    Turn { turn: Turn },
}

/// Writes the transcript snapshot and the turn log
pub struct TranscriptWriter {
    snapshot_path: PathBuf,
    log_path: PathBuf,
    log: Mutex<BufWriter<File>>,
}

impl TranscriptWriter {
    /// Start a session in `dir`
    pub fn create(dir: &Path, model: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let now = chrono::Utc::now();
        let stem = format!("prompt_{}", now.timestamp());

        let snapshot_path = dir.join(format!("{}.txt", stem));
        let log_path = dir.join(format!("{}.jsonl", stem));
        let file = File::options().create(true).append(true).open(&log_path)?;
        let mut writer = BufWriter::new(file);

        let metadata = SessionEntry::Metadata {
            created_at: now.timestamp_millis(),
            model: model.to_string(),
            working_dir: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| ".".to_string()),
        };
        writeln!(writer, "{}", serde_json::to_string(&metadata)?)?;
        writer.flush()?;

        Ok(Self {
            snapshot_path,
            log_path,
            log: Mutex::new(writer),
        })
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

impl TranscriptSink for TranscriptWriter {
    fn record(&self, turn: &Turn, transcript: &str) -> std::io::Result<()> {
        {
            let mut log = self.log.lock();
            let entry = SessionEntry::Turn { turn: turn.clone() };
            writeln!(log, "{}", serde_json::to_string(&entry)?)?;
            log.flush()?;
        }

        // the snapshot is replaced, never partially overwritten
        let tmp = self.snapshot_path.with_extension("txt.tmp");
        fs::write(&tmp, transcript)?;
        fs::rename(&tmp, &self.snapshot_path)
    }
}
