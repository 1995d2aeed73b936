//! Scout Evaluator: buying-intent evaluation for board meeting text
//!
//! Every chunk of extracted meeting text runs through a small, explicit state
//! machine:
//!
//! ```text
//! ┌───────┐   ┌──────────┐   ┌───────────────────┐   ┌────────────────┐
//! │ START │──►│ CLASSIFY │──►│ VALIDATE_EVIDENCE │──►│ DECISION_ROUTE │
//! └───────┘   └────┬─────┘   └───────────────────┘   └───┬────────┬───┘
//!                  │ ClassificationError                 │        │
//!                  ▼                                     ▼        ▼
//!              ┌───────┐                            ┌──────┐  ┌───────┐
//!              │ ERROR │◄───────── ScoreError ──────│ SCORE│  │ DROP  │
//!              └───┬───┘                            └──┬───┘  └───┬───┘
//!                  │                                   ▼          │
//!                  │                            ┌─────────────┐   │
//!                  │                            │ FINAL_ROUTE │───┤
//!                  │                            └──────┬──────┘   │
//!                  │                                   ▼          │
//!                  │                            ┌───────────┐     │
//!                  │                            │ NORMALIZE │     │
//!                  │                            └─────┬─────┘     │
//!                  │                                  ▼           │
//!                  └─────────────────────────────►┌───────┐◄──────┘
//!                                                 │  END  │
//!                                                 └───────┘
//! ```
//!
//! The two slow steps (classification and scoring) sit behind the
//! [`IntentClassifier`] and [`OpportunityScorer`] capabilities, so the router
//! is pure logic and tests can swap in deterministic stubs.
//!
//! ## Guarantees
//! - A [`SignalRecord`] never exists without a passing [`EvidenceCheck`].
//! - A [`ScoreResult`] never exists for a chunk classified as `none`.
//! - A failing collaborator produces an [`ErrorRecord`], never a panic or an
//!   aborted run.

pub mod classifier;
pub mod config;
pub mod evidence;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod router;
pub mod scorer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Core Types
// ============================================================================

/// A bounded unit of extracted meeting text attributed to one district and
/// one source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub artifact_id: String,
    pub district: String,
    pub source_url: String,
    #[serde(default)]
    pub board_page_url: String,
    /// Meeting date as found in the source; may be missing or unparseable.
    #[serde(default)]
    pub meeting_date: Option<String>,
    pub text: String,
    /// Word offset of this chunk within its document.
    #[serde(default)]
    pub offset: usize,
}

/// Buying-intent categories a chunk can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    CurriculumAdoption,
    InstructionalMaterials,
    PilotEvaluation,
    BudgetAllocation,
    VendorDissatisfaction,
    LearningGaps,
    PersonalizationPbl,
    StrategicPlan,
    TeacherWorkload,
    None,
}

/// How directly a category points at a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentTier {
    High,
    Medium,
}

impl IntentCategory {
    pub const ALL: [IntentCategory; 10] = [
        IntentCategory::CurriculumAdoption,
        IntentCategory::InstructionalMaterials,
        IntentCategory::PilotEvaluation,
        IntentCategory::BudgetAllocation,
        IntentCategory::VendorDissatisfaction,
        IntentCategory::LearningGaps,
        IntentCategory::PersonalizationPbl,
        IntentCategory::StrategicPlan,
        IntentCategory::TeacherWorkload,
        IntentCategory::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::CurriculumAdoption => "curriculum_adoption",
            IntentCategory::InstructionalMaterials => "instructional_materials",
            IntentCategory::PilotEvaluation => "pilot_evaluation",
            IntentCategory::BudgetAllocation => "budget_allocation",
            IntentCategory::VendorDissatisfaction => "vendor_dissatisfaction",
            IntentCategory::LearningGaps => "learning_gaps",
            IntentCategory::PersonalizationPbl => "personalization_pbl",
            IntentCategory::StrategicPlan => "strategic_plan",
            IntentCategory::TeacherWorkload => "teacher_workload",
            IntentCategory::None => "none",
        }
    }

    /// `None` for the `none` category.
    pub fn tier(&self) -> Option<IntentTier> {
        match self {
            IntentCategory::CurriculumAdoption
            | IntentCategory::InstructionalMaterials
            | IntentCategory::PilotEvaluation
            | IntentCategory::BudgetAllocation
            | IntentCategory::VendorDissatisfaction => Some(IntentTier::High),
            IntentCategory::LearningGaps
            | IntentCategory::PersonalizationPbl
            | IntentCategory::StrategicPlan
            | IntentCategory::TeacherWorkload => Some(IntentTier::Medium),
            IntentCategory::None => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, IntentCategory::None)
    }

    /// Human-friendly label, e.g. "Curriculum Adoption".
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown intent category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for IntentCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        IntentCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Output of the intent classifier for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: IntentCategory,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// Verbatim quote the classifier claims supports the category.
    pub evidence_snippet: String,
    pub rationale: String,
}

/// Result of checking a claimed quote against its chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceCheck {
    pub pass: bool,
    /// The quote after whitespace normalization.
    pub snippet: String,
}

/// Contributions to an opportunity score. Each factor is reported on its own
/// scale; only the total is clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreFactors {
    pub intent_strength: i64,
    pub time_window: i64,
    pub evidence_quality: i64,
    #[serde(alias = "eduquest_fit")]
    pub product_fit: i64,
}

impl ScoreFactors {
    pub fn total(&self) -> i64 {
        self.intent_strength
            .saturating_add(self.time_window)
            .saturating_add(self.evidence_quality)
            .saturating_add(self.product_fit)
    }
}

/// Opportunity score for a classified chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    #[serde(deserialize_with = "deserialize_clamped_score")]
    opportunity_score: u8,
    pub factors: ScoreFactors,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ScoreResult {
    pub const MAX: u8 = 100;

    /// Build a score, saturating `raw` into `0..=100`.
    pub fn new(raw: i64, factors: ScoreFactors, summary: Option<String>) -> Self {
        Self {
            opportunity_score: raw.clamp(0, Self::MAX as i64) as u8,
            factors,
            summary,
        }
    }

    /// Build a score from the factor total.
    pub fn from_factors(factors: ScoreFactors, summary: Option<String>) -> Self {
        Self::new(factors.total(), factors, summary)
    }

    pub fn opportunity_score(&self) -> u8 {
        self.opportunity_score
    }
}

fn deserialize_clamped_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(0, ScoreResult::MAX as i64) as u8)
}

/// Action tier derived from the opportunity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    ReachOutNow,
    ResearchMore,
    Monitor,
}

impl NextStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextStep::ReachOutNow => "reach_out_now",
            NextStep::ResearchMore => "research_more",
            NextStep::Monitor => "monitor",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            NextStep::ReachOutNow => "Reach Out Now",
            NextStep::ResearchMore => "Research More",
            NextStep::Monitor => "Monitor",
        }
    }
}

impl fmt::Display for NextStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized, export-ready unit of output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub chunk_id: String,
    pub artifact_id: String,
    pub district: String,
    pub meeting_date: Option<String>,
    pub source_url: String,
    #[serde(default)]
    pub board_page_url: String,
    pub category: IntentCategory,
    pub confidence: f64,
    pub opportunity_score: u8,
    pub evidence_snippet: String,
    pub summary: String,
    pub recommended_next_step: NextStep,
    #[serde(default)]
    pub rationale: String,
    pub generated_at: DateTime<Utc>,
}

/// Why a chunk was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    LowConfidence,
    WrongCategory,
    EvidenceFailed,
    LowScore,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::LowConfidence => "low_confidence",
            DropReason::WrongCategory => "wrong_category",
            DropReason::EvidenceFailed => "evidence_failed",
            DropReason::LowScore => "low_score",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropEvent {
    pub chunk_id: String,
    pub reason: DropReason,
}

/// Pipeline stage an error record is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    Score,
    Normalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Score => "score",
            Stage::Normalize => "normalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub chunk_id: String,
    pub stage: Stage,
    pub detail: String,
}

/// Terminal outcome of one chunk evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Signal(SignalRecord),
    Dropped(DropEvent),
    Errored(ErrorRecord),
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Signal(_) => "signal",
            Outcome::Dropped(_) => "dropped",
            Outcome::Errored(_) => "errored",
        }
    }

    pub fn signal(&self) -> Option<&SignalRecord> {
        match self {
            Outcome::Signal(record) => Some(record),
            _ => None,
        }
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            Outcome::Dropped(event) => Some(event.reason),
            _ => None,
        }
    }
}

// ============================================================================
// Re-exports
// ============================================================================

pub use classifier::{ClassificationError, IntentClassifier, LlmClassifier};
pub use config::{ConfigError, EvaluatorConfig};
pub use evidence::{normalize_whitespace, validate_evidence};
pub use normalize::{next_step_for_score, normalize, NormalizeError};
pub use pipeline::{Pipeline, RunSummary};
pub use router::{Evaluation, Router, State};
pub use scorer::{HeuristicScorer, LlmScorer, OpportunityScorer, ScoreError, ScoringInput};
