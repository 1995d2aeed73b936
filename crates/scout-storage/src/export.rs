//! Signal export: `signals.json` and `top_signals.md`.
//!
//! Kept signals are pulled from the evaluation log, de-duplicated (the same
//! quote from the same document only counts once, at its best score) and
//! ordered by score, highest first.

use crate::{read_records, EvaluationRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use scout_evaluator::{NextStep, SignalRecord};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_TOP: usize = 20;
pub const SIGNALS_JSON: &str = "signals.json";
pub const TOP_SIGNALS_MD: &str = "top_signals.md";

const DEDUP_EVIDENCE_CHARS: usize = 100;
const EVIDENCE_DISPLAY_CHARS: usize = 500;
const SOURCE_DISPLAY_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub records: usize,
    pub kept: usize,
    pub unique: usize,
    pub json_path: PathBuf,
    pub markdown_path: PathBuf,
}

/// Signal records of every kept evaluation.
pub fn extract_signals(records: &[EvaluationRecord]) -> Vec<SignalRecord> {
    records
        .iter()
        .filter(|r| r.keep)
        .filter_map(|r| r.signal_record.clone())
        .collect()
}

/// Collapse signals sharing (artifact, category, first 100 evidence chars),
/// keeping the highest score. Ties keep the earliest.
pub fn dedupe_signals(signals: Vec<SignalRecord>) -> Vec<SignalRecord> {
    let mut order: Vec<(String, String, String)> = Vec::new();
    let mut best: HashMap<(String, String, String), SignalRecord> = HashMap::new();

    for signal in signals {
        let key = (
            signal.artifact_id.clone(),
            signal.category.as_str().to_string(),
            signal.evidence_snippet.chars().take(DEDUP_EVIDENCE_CHARS).collect::<String>(),
        );
        match best.get(&key) {
            Some(existing) if existing.opportunity_score >= signal.opportunity_score => {}
            Some(_) => {
                best.insert(key, signal);
            }
            None => {
                order.push(key.clone());
                best.insert(key, signal);
            }
        }
    }

    order.into_iter().filter_map(|key| best.remove(&key)).collect()
}

/// Highest score first; stable for equal scores.
pub fn sort_signals(signals: &mut [SignalRecord]) {
    signals.sort_by(|a, b| b.opportunity_score.cmp(&a.opportunity_score));
}

pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn next_step_badge(step: NextStep) -> &'static str {
    match step {
        NextStep::ReachOutNow => "🔥",
        NextStep::ResearchMore => "🔍",
        NextStep::Monitor => "👀",
    }
}

/// Markdown report of the top `top` signals. `signals` must already be
/// sorted.
pub fn render_markdown(
    signals: &[SignalRecord],
    top: usize,
    generated_at: DateTime<Utc>,
) -> Result<String, std::fmt::Error> {
    if signals.is_empty() {
        return Ok("# No Signals Found\n\nNo buying signals were detected.\n".to_string());
    }

    let mut out = String::new();
    writeln!(out, "# Top Buying Signals - Utah School Board Meetings\n")?;
    writeln!(out, "**Generated:** {}\n", generated_at.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(out, "**Total Signals Found:** {}\n", signals.len())?;
    writeln!(out, "---\n")?;

    for (i, signal) in signals.iter().take(top).enumerate() {
        let step = signal.recommended_next_step;
        writeln!(out, "## {}. {}\n", i + 1, signal.district)?;
        writeln!(
            out,
            "**Score:** {}/100 | **Category:** {} | **Confidence:** {:.0}%\n",
            signal.opportunity_score,
            signal.category.title(),
            signal.confidence * 100.0
        )?;
        writeln!(
            out,
            "**Meeting Date:** {}\n",
            signal.meeting_date.as_deref().unwrap_or("Unknown")
        )?;
        writeln!(out, "**Next Step:** {} {}\n", next_step_badge(step), step.title())?;
        writeln!(out, "### Summary\n{}\n", signal.summary)?;
        writeln!(
            out,
            "### Evidence\n> {}\n",
            truncate_text(&signal.evidence_snippet, EVIDENCE_DISPLAY_CHARS)
        )?;
        if !signal.source_url.is_empty() {
            writeln!(
                out,
                "**Source:** [{}]({})\n",
                truncate_text(&signal.source_url, SOURCE_DISPLAY_CHARS),
                signal.source_url
            )?;
        }
        writeln!(out, "---\n")?;
    }

    out.push_str("\n## About This Report\n\n");
    out.push_str(
        "This report was generated by **Utah Board Signal Scout**, an automated system that \
         scans public school board meeting documents to identify early-stage buying signals \
         for educational technology.\n\n",
    );
    out.push_str("**Scoring Criteria:**\n");
    out.push_str("- Intent Strength (0-25): Explicit RFP, evaluation, or discussion\n");
    out.push_str("- Time Window (0-25): Expected decision timeline\n");
    out.push_str("- Product Fit (0-25): Alignment with personalized learning\n");
    out.push_str("- Evidence Quality (0-25): Clarity of documentation\n");
    Ok(out)
}

/// Read `evaluations`, write both exports into `out_dir`.
pub fn run(evaluations: &Path, out_dir: &Path, top: usize) -> Result<ExportSummary> {
    if !evaluations.exists() {
        anyhow::bail!("evaluations file not found: {}", evaluations.display());
    }
    let records = read_records(evaluations)?;
    info!(records = records.len(), "loaded evaluation records");

    let kept = extract_signals(&records);
    let kept_count = kept.len();
    let mut signals = dedupe_signals(kept);
    sort_signals(&mut signals);
    if signals.is_empty() {
        warn!("no signals to export");
    } else {
        info!(kept = kept_count, unique = signals.len(), "deduplicated signals");
    }

    std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let json_path = out_dir.join(SIGNALS_JSON);
    let markdown_path = out_dir.join(TOP_SIGNALS_MD);

    let json = serde_json::to_string_pretty(&signals)?;
    std::fs::write(&json_path, json).with_context(|| format!("writing {}", json_path.display()))?;
    std::fs::write(&markdown_path, render_markdown(&signals, top, Utc::now())?)
        .with_context(|| format!("writing {}", markdown_path.display()))?;

    info!(
        json = %json_path.display(),
        markdown = %markdown_path.display(),
        "export complete"
    );

    Ok(ExportSummary {
        records: records.len(),
        kept: kept_count,
        unique: signals.len(),
        json_path,
        markdown_path,
    })
}
