//! Opportunity scoring.
//!
//! Two scorers sit behind [`OpportunityScorer`]:
//!
//! - [`HeuristicScorer`]: a deterministic weighted sum of four factors, each
//!   on a 0..=25 scale (intent strength, time window, evidence quality,
//!   product fit). Works offline and is what tests lean on.
//! - [`LlmScorer`]: asks a language model for the same four factors plus a
//!   short summary, then clamps whatever comes back.

use crate::llm::{parse_llm_json_object, CompletionRequest, LLMError, LLMProvider};
use crate::{Chunk, ClassificationResult, IntentTier, ScoreFactors, ScoreResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("scorer unavailable: {0}")]
    Unavailable(String),
    #[error("scorer timed out after {0:?}")]
    Timeout(Duration),
    #[error("unparseable score: {0}")]
    Unparseable(String),
    #[error("chunk {0} has no buying intent to score")]
    NoIntent(String),
}

impl From<LLMError> for ScoreError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::ParseError(msg) | LLMError::InvalidResponse(msg) => ScoreError::Unparseable(msg),
            other => ScoreError::Unavailable(other.to_string()),
        }
    }
}

/// Everything a scorer gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub chunk: &'a Chunk,
    pub classification: &'a ClassificationResult,
}

impl ScoringInput<'_> {
    fn ensure_intent(&self) -> Result<IntentTier, ScoreError> {
        self.classification
            .category
            .tier()
            .ok_or_else(|| ScoreError::NoIntent(self.chunk.chunk_id.clone()))
    }
}

/// Turns a classified chunk into a 0-100 opportunity score.
#[async_trait]
pub trait OpportunityScorer: Send + Sync {
    async fn score(&self, input: ScoringInput<'_>) -> Result<ScoreResult, ScoreError>;
}

// ============================================================================
// Heuristic scorer
// ============================================================================

pub const FACTOR_MAX: i64 = 25;

const HIGH_INTENT_BASE: f64 = 25.0;
const MEDIUM_INTENT_BASE: f64 = 17.0;

const TIMING_PHRASES: &[&str] = &[
    "next school year",
    "next year",
    "this spring",
    "this fall",
    "this summer",
    "upcoming",
    "deadline",
    "by the end of",
    "request for proposal",
    "rfp",
    "timeline",
    "recommend approval",
    "action item",
    "will vote",
    "adoption cycle",
    "2025-26",
    "2026-27",
];

const FIT_KEYWORDS: &[&str] = &[
    "math",
    "mathematics",
    "reading",
    "literacy",
    "science",
    "curriculum",
    "instructional",
    "intervention",
    "personalized",
    "project-based",
    "digital",
    "adaptive",
    "assessment",
    "professional development",
];

/// Deterministic weighted-sum scorer.
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score from already-extracted features.
    ///
    /// Non-decreasing in `confidence` and in `specificity` with the other
    /// arguments held fixed.
    pub fn score_features(
        tier: IntentTier,
        confidence: f64,
        specificity: f64,
        timing_hits: usize,
        fit_hits: usize,
    ) -> ScoreResult {
        let base = match tier {
            IntentTier::High => HIGH_INTENT_BASE,
            IntentTier::Medium => MEDIUM_INTENT_BASE,
        };
        let factors = ScoreFactors {
            intent_strength: (base * unit(confidence)).round() as i64,
            time_window: match timing_hits {
                0 => 0,
                1 => 10,
                2 => 18,
                _ => FACTOR_MAX,
            },
            evidence_quality: (FACTOR_MAX as f64 * unit(specificity)).round() as i64,
            product_fit: (fit_hits.min(5) as i64) * 5,
        };
        ScoreResult::from_factors(factors, None)
    }
}

#[async_trait]
impl OpportunityScorer for HeuristicScorer {
    async fn score(&self, input: ScoringInput<'_>) -> Result<ScoreResult, ScoreError> {
        let tier = input.ensure_intent()?;
        let text = input.chunk.text.to_lowercase();
        Ok(Self::score_features(
            tier,
            input.classification.confidence,
            evidence_specificity(&input.classification.evidence_snippet),
            count_matches(&text, TIMING_PHRASES),
            count_matches(&text, FIT_KEYWORDS),
        ))
    }
}

fn unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

fn count_matches(lowercase_text: &str, needles: &[&str]) -> usize {
    needles.iter().filter(|n| lowercase_text.contains(*n)).count()
}

/// How concrete a quote is, in `[0, 1]`.
///
/// Quarter credit each for: a number, a dollar amount, a named entity (a
/// capitalized word that does not open a sentence), and length (scaled up to
/// 120 characters).
pub fn evidence_specificity(snippet: &str) -> f64 {
    let snippet = snippet.trim();
    if snippet.is_empty() {
        return 0.0;
    }

    let mut score = 0.0;
    if snippet.chars().any(|c| c.is_ascii_digit()) {
        score += 0.25;
    }
    if snippet.contains('$') {
        score += 0.25;
    }
    if has_named_entity(snippet) {
        score += 0.25;
    }
    score += 0.25 * (snippet.chars().count().min(120) as f64 / 120.0);
    score
}

fn has_named_entity(snippet: &str) -> bool {
    let mut sentence_start = true;
    for word in snippet.split_whitespace() {
        let starts_upper = word.chars().next().is_some_and(|c| c.is_uppercase());
        if starts_upper && !sentence_start {
            return true;
        }
        sentence_start = word.ends_with(['.', '?', '!', ':']);
    }
    false
}

// ============================================================================
// LLM scorer
// ============================================================================

pub const SCORE_SYSTEM_PROMPT: &str = r#"You score buying signals found in school board meeting documents for a K-12 instructional products company.

Score four factors, each from 0 to 25:
- intent_strength: how directly the text points at acquiring or replacing an instructional product
- time_window: how soon a decision is likely (explicit dates, votes, adoption cycles score higher)
- evidence_quality: how specific the quoted evidence is (named programs, amounts, dates)
- product_fit: how well the need matches curriculum, intervention or personalized learning products

opportunity_score is the sum of the four factors (0-100).

Reply with a single JSON object and nothing else:
{"opportunity_score": <0-100>, "score_breakdown": {"intent_strength": <0-25>, "time_window": <0-25>, "evidence_quality": <0-25>, "product_fit": <0-25>}, "summary": "<one or two sentences>"}"#;

#[derive(Debug, Deserialize)]
struct ScoreReply {
    opportunity_score: serde_json::Value,
    #[serde(default)]
    score_breakdown: Option<BreakdownReply>,
    #[serde(default)]
    summary: Option<String>,
}

/// Factors as the model reports them. Missing or non-numeric factors count as 0.
#[derive(Debug, Default, Deserialize)]
struct BreakdownReply {
    #[serde(default)]
    intent_strength: serde_json::Value,
    #[serde(default)]
    time_window: serde_json::Value,
    #[serde(default)]
    evidence_quality: serde_json::Value,
    #[serde(default, alias = "eduquest_fit")]
    product_fit: serde_json::Value,
}

impl BreakdownReply {
    fn factors(&self) -> ScoreFactors {
        let factor = |v: &serde_json::Value| lenient_number(v).map_or(0, |n| n.round() as i64);
        ScoreFactors {
            intent_strength: factor(&self.intent_strength),
            time_window: factor(&self.time_window),
            evidence_quality: factor(&self.evidence_quality),
            product_fit: factor(&self.product_fit),
        }
    }
}

/// A finite number, or a string holding one.
fn lenient_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Scorer backed by a language model.
pub struct LlmScorer {
    provider: Arc<dyn LLMProvider>,
}

impl LlmScorer {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    fn render_user_prompt(input: &ScoringInput<'_>) -> String {
        let cls = input.classification;
        format!(
            "District: {}\nMeeting date: {}\nCategory: {}\nConfidence: {:.2}\nEvidence: \"{}\"\nRationale: {}\n\nFull text:\n\"\"\"\n{}\n\"\"\"",
            input.chunk.district,
            input.chunk.meeting_date.as_deref().unwrap_or("Unknown"),
            cls.category,
            cls.confidence,
            cls.evidence_snippet,
            cls.rationale,
            input.chunk.text
        )
    }
}

#[async_trait]
impl OpportunityScorer for LlmScorer {
    async fn score(&self, input: ScoringInput<'_>) -> Result<ScoreResult, ScoreError> {
        input.ensure_intent()?;
        let request = CompletionRequest::json(SCORE_SYSTEM_PROMPT, Self::render_user_prompt(&input));
        let response = self.provider.complete(request).await?;
        parse_score(&response.content)
    }
}

/// Turn a raw model reply into a clamped [`ScoreResult`].
pub fn parse_score(content: &str) -> Result<ScoreResult, ScoreError> {
    let reply: ScoreReply = parse_llm_json_object(content)?;

    let raw = lenient_number(&reply.opportunity_score).ok_or_else(|| {
        ScoreError::Unparseable(format!(
            "opportunity_score is not a number: {}",
            reply.opportunity_score
        ))
    })?;

    let summary = reply.summary.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    Ok(ScoreResult::new(
        raw.round() as i64,
        reply.score_breakdown.map(|b| b.factors()).unwrap_or_default(),
        summary,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IntentCategory;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            chunk_id: "doc_chunk_001".to_string(),
            artifact_id: "doc".to_string(),
            district: "Alpine".to_string(),
            source_url: "https://example.org/a.pdf".to_string(),
            board_page_url: String::new(),
            meeting_date: Some("2025-03-11".to_string()),
            text: text.to_string(),
            offset: 0,
        }
    }

    fn classification(category: IntentCategory, confidence: f64, quote: &str) -> ClassificationResult {
        ClassificationResult {
            category,
            confidence,
            evidence_snippet: quote.to_string(),
            rationale: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn heuristic_scores_a_strong_signal_highly() {
        let text = "The board will vote next school year on a new K-5 math curriculum. \
                    The committee budgeted $250,000 for Eureka Math materials and intervention.";
        let chunk = chunk(text);
        let cls = classification(
            IntentCategory::CurriculumAdoption,
            0.95,
            "The committee budgeted $250,000 for Eureka Math materials and intervention.",
        );
        let result = HeuristicScorer::new()
            .score(ScoringInput { chunk: &chunk, classification: &cls })
            .await
            .unwrap();
        assert!(result.opportunity_score() >= 75, "got {}", result.opportunity_score());
        assert_eq!(result.factors.intent_strength, 24);
    }

    #[tokio::test]
    async fn heuristic_refuses_none() {
        let chunk = chunk("Meeting called to order.");
        let cls = classification(IntentCategory::None, 0.99, "");
        let err = HeuristicScorer::new()
            .score(ScoringInput { chunk: &chunk, classification: &cls })
            .await
            .unwrap_err();
        assert!(matches!(err, ScoreError::NoIntent(_)));
    }

    #[test]
    fn high_tier_outscores_medium() {
        let high = HeuristicScorer::score_features(IntentTier::High, 0.8, 0.5, 1, 1);
        let medium = HeuristicScorer::score_features(IntentTier::Medium, 0.8, 0.5, 1, 1);
        assert!(high.opportunity_score() > medium.opportunity_score());
    }

    #[test]
    fn specificity_rewards_concrete_quotes() {
        let generic = evidence_specificity("we should look at options");
        let specific = evidence_specificity("approved $40,000 for the Amplify Science pilot in 2025");
        assert!(specific > generic);
        assert_eq!(evidence_specificity("   "), 0.0);
        assert!(evidence_specificity(&"Spend $5 at Acme ".repeat(20)) <= 1.0);
    }

    #[test]
    fn sentence_openers_are_not_named_entities() {
        assert!(!has_named_entity("The board met. Members discussed reading."));
        assert!(has_named_entity("The board met with Granite staff."));
    }

    #[test]
    fn parses_and_clamps_llm_reply() {
        let result = parse_score(
            r#"{"opportunity_score": 140, "score_breakdown": {"intent_strength": 25, "time_window": 25,
               "evidence_quality": 25, "eduquest_fit": 25}, "summary": "  Strong.  "}"#,
        )
        .unwrap();
        assert_eq!(result.opportunity_score(), 100);
        assert_eq!(result.factors.product_fit, 25);
        assert_eq!(result.summary.as_deref(), Some("Strong."));

        let result = parse_score(r#"{"opportunity_score": "-3"}"#).unwrap();
        assert_eq!(result.opportunity_score(), 0);
        assert_eq!(result.factors, ScoreFactors::default());
    }

    #[test]
    fn fractional_and_partial_breakdowns_are_accepted() {
        let result = parse_score(
            r#"{"opportunity_score": 82, "score_breakdown": {"intent_strength": 22.5, "time_window": "18",
               "evidence_quality": 20, "product_fit": 21.4}}"#,
        )
        .unwrap();
        assert_eq!(result.opportunity_score(), 82);
        assert_eq!(result.factors.intent_strength, 23);
        assert_eq!(result.factors.time_window, 18);
        assert_eq!(result.factors.product_fit, 21);

        let result = parse_score(
            r#"{"opportunity_score": 60, "score_breakdown": {"intent_strength": 25, "time_window": 10}}"#,
        )
        .unwrap();
        assert_eq!(result.opportunity_score(), 60);
        assert_eq!(result.factors.evidence_quality, 0);
        assert_eq!(result.factors.product_fit, 0);
        assert_eq!(result.factors.intent_strength, 25);

        let result = parse_score(
            r#"{"opportunity_score": 40, "score_breakdown": {"intent_strength": "strong", "time_window": null}}"#,
        )
        .unwrap();
        assert_eq!(result.factors, ScoreFactors::default());
    }

    #[test]
    fn non_numeric_score_is_unparseable() {
        let err = parse_score(r#"{"opportunity_score": "high"}"#).unwrap_err();
        assert!(matches!(err, ScoreError::Unparseable(_)));
        let err = parse_score("I cannot score this.").unwrap_err();
        assert!(matches!(err, ScoreError::Unparseable(_)));
    }
}
