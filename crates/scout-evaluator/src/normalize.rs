//! Shape an accepted evaluation into a [`SignalRecord`].

use crate::{Chunk, ClassificationResult, EvidenceCheck, NextStep, ScoreResult, SignalRecord};
use chrono::{DateTime, Utc};

pub const REACH_OUT_NOW_MIN: u8 = 75;
pub const RESEARCH_MORE_MIN: u8 = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("evidence for chunk {0} was not verified")]
    EvidenceNotVerified(String),
    #[error("chunk {0} is classified as none")]
    NoIntent(String),
}

pub fn next_step_for_score(score: u8) -> NextStep {
    if score >= REACH_OUT_NOW_MIN {
        NextStep::ReachOutNow
    } else if score >= RESEARCH_MORE_MIN {
        NextStep::ResearchMore
    } else {
        NextStep::Monitor
    }
}

/// Build the export record. Pure; the caller supplies the timestamp.
pub fn normalize(
    chunk: &Chunk,
    classification: &ClassificationResult,
    evidence: &EvidenceCheck,
    score: &ScoreResult,
    generated_at: DateTime<Utc>,
) -> Result<SignalRecord, NormalizeError> {
    if !evidence.pass {
        return Err(NormalizeError::EvidenceNotVerified(chunk.chunk_id.clone()));
    }
    if classification.category.is_none() {
        return Err(NormalizeError::NoIntent(chunk.chunk_id.clone()));
    }

    let summary = score
        .summary
        .clone()
        .unwrap_or_else(|| classification.rationale.clone());

    Ok(SignalRecord {
        chunk_id: chunk.chunk_id.clone(),
        artifact_id: chunk.artifact_id.clone(),
        district: chunk.district.clone(),
        meeting_date: chunk.meeting_date.clone(),
        source_url: chunk.source_url.clone(),
        board_page_url: chunk.board_page_url.clone(),
        category: classification.category,
        confidence: classification.confidence,
        opportunity_score: score.opportunity_score(),
        evidence_snippet: evidence.snippet.clone(),
        summary,
        recommended_next_step: next_step_for_score(score.opportunity_score()),
        rationale: classification.rationale.clone(),
        generated_at,
    })
}
