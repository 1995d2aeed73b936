//! Scout storage: the evaluation log and signal exports
//!
//! ```text
//!   Pipeline ──Evaluation──► EvaluationLog ──► evaluations.jsonl
//!                                                   │
//!                                  export::run ◄────┘
//!                                       │
//!                          ┌────────────┴────────────┐
//!                          ▼                         ▼
//!                    signals.json             top_signals.md
//! ```
//!
//! The log is append-only JSON lines. Each record is written and flushed on
//! its own, so a run that stops halfway leaves a valid file that the next run
//! resumes from.

pub mod export;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scout_evaluator::router::State;
use scout_evaluator::{
    ClassificationResult, DropReason, Evaluation, EvidenceCheck, Outcome, ScoreResult,
    SignalRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ============================================================================
// Records
// ============================================================================

/// One line of `evaluations.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub chunk_id: String,
    #[serde(default)]
    pub artifact_id: String,
    #[serde(default)]
    pub district: String,
    pub keep: bool,
    /// `signal`, `dropped` or `errored`.
    #[serde(default)]
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_reason: Option<DropReason>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub classification: Option<ClassificationResult>,
    #[serde(default)]
    pub evidence: Option<EvidenceCheck>,
    #[serde(default)]
    pub scoring: Option<ScoreResult>,
    #[serde(default)]
    pub signal_record: Option<SignalRecord>,
    #[serde(default)]
    pub trace: Vec<State>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationRecord {
    pub fn from_evaluation(evaluation: &Evaluation, evaluated_at: DateTime<Utc>) -> Self {
        let (drop_reason, errors, signal_record) = match &evaluation.outcome {
            Outcome::Signal(record) => (None, Vec::new(), Some(record.clone())),
            Outcome::Dropped(event) => (Some(event.reason), Vec::new(), None),
            Outcome::Errored(err) => (None, vec![format!("{}: {}", err.stage, err.detail)], None),
        };

        Self {
            chunk_id: evaluation.chunk_id.clone(),
            artifact_id: evaluation.artifact_id.clone(),
            district: evaluation.district.clone(),
            keep: evaluation.keep(),
            outcome: evaluation.outcome.kind().to_string(),
            drop_reason,
            errors,
            classification: evaluation.classification.clone(),
            evidence: evaluation.evidence.clone(),
            scoring: evaluation.score.clone(),
            signal_record,
            trace: evaluation.trace.clone(),
            evaluated_at,
        }
    }
}

// ============================================================================
// Evaluation log
// ============================================================================

/// Append-only JSON lines log of evaluations.
pub struct EvaluationLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl EvaluationLog {
    /// Open for append. With `truncate`, previous contents are discarded.
    pub fn open(path: &Path, truncate: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options
            .open(path)
            .with_context(|| format!("opening evaluation log {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one record and flush it.
    pub fn append(&self, record: &EvaluationRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        debug!(chunk_id = %record.chunk_id, outcome = %record.outcome, "logged evaluation");
        Ok(())
    }

    pub fn append_evaluation(&self, evaluation: &Evaluation) -> Result<()> {
        self.append(&EvaluationRecord::from_evaluation(evaluation, Utc::now()))
    }
}

/// Read every well-formed record. A missing file reads as empty; malformed
/// lines (for example one cut short by a crash) are logged and skipped.
pub fn read_records(path: &Path) -> Result<Vec<EvaluationRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EvaluationRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(
                path = %path.display(),
                line = idx + 1,
                error = %err,
                "skipping malformed evaluation record"
            ),
        }
    }
    Ok(records)
}

/// Chunk ids that reached a signal or drop in a previous run. Errored
/// chunks are left out so a resumed run retries them.
pub fn load_evaluated_ids(path: &Path) -> Result<HashSet<String>> {
    Ok(read_records(path)?
        .into_iter()
        .filter(|r| r.outcome != "errored")
        .map(|r| r.chunk_id)
        .collect())
}
