//! The decision router: one chunk in, one [`Outcome`] out.
//!
//! The router is a transition loop over `Step`, a private state value that
//! carries whatever the next transition needs. Each visited state is recorded
//! as a plain [`State`] tag in the evaluation trace. The only awaits are the
//! classifier and scorer calls, each bounded by the configured timeout.

use crate::classifier::{ClassificationError, IntentClassifier};
use crate::config::EvaluatorConfig;
use crate::evidence::validate_evidence;
use crate::normalize::normalize;
use crate::scorer::{OpportunityScorer, ScoreError, ScoringInput};
use crate::{
    Chunk, ClassificationResult, DropEvent, DropReason, ErrorRecord, EvidenceCheck, Outcome,
    ScoreResult, Stage,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Router states, as recorded in an evaluation trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Start,
    Classify,
    ValidateEvidence,
    DecisionRoute,
    Score,
    FinalRoute,
    Normalize,
    Drop,
    Error,
    End,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Start => "START",
            State::Classify => "CLASSIFY",
            State::ValidateEvidence => "VALIDATE_EVIDENCE",
            State::DecisionRoute => "DECISION_ROUTE",
            State::Score => "SCORE",
            State::FinalRoute => "FINAL_ROUTE",
            State::Normalize => "NORMALIZE",
            State::Drop => "DROP",
            State::Error => "ERROR",
            State::End => "END",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the router learned about one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub chunk_id: String,
    pub artifact_id: String,
    pub district: String,
    pub outcome: Outcome,
    pub classification: Option<ClassificationResult>,
    pub evidence: Option<EvidenceCheck>,
    pub score: Option<ScoreResult>,
    pub trace: Vec<State>,
}

impl Evaluation {
    /// True when the chunk produced a signal record.
    pub fn keep(&self) -> bool {
        matches!(self.outcome, Outcome::Signal(_))
    }
}

enum Step {
    Start,
    Classify,
    ValidateEvidence(ClassificationResult),
    DecisionRoute(ClassificationResult, EvidenceCheck),
    Score(ClassificationResult, EvidenceCheck),
    FinalRoute(ClassificationResult, EvidenceCheck, ScoreResult),
    Normalize(ClassificationResult, EvidenceCheck, ScoreResult),
    Drop(DropReason),
    Error(Stage, String),
    End(Outcome),
}

impl Step {
    fn state(&self) -> State {
        match self {
            Step::Start => State::Start,
            Step::Classify => State::Classify,
            Step::ValidateEvidence(..) => State::ValidateEvidence,
            Step::DecisionRoute(..) => State::DecisionRoute,
            Step::Score(..) => State::Score,
            Step::FinalRoute(..) => State::FinalRoute,
            Step::Normalize(..) => State::Normalize,
            Step::Drop(_) => State::Drop,
            Step::Error(..) => State::Error,
            Step::End(_) => State::End,
        }
    }
}

/// Sequences classification, evidence validation, scoring and normalization
/// for a single chunk.
pub struct Router {
    classifier: Arc<dyn IntentClassifier>,
    scorer: Arc<dyn OpportunityScorer>,
    config: EvaluatorConfig,
}

impl Router {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        scorer: Arc<dyn OpportunityScorer>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            classifier,
            scorer,
            config,
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Run one chunk to a terminal outcome. Never fails: collaborator errors
    /// become [`Outcome::Errored`].
    pub async fn evaluate(&self, chunk: &Chunk) -> Evaluation {
        let mut classification = None;
        let mut evidence = None;
        let mut score = None;
        let mut trace = Vec::with_capacity(8);

        let mut step = Step::Start;
        let outcome = loop {
            trace.push(step.state());
            step = match step {
                Step::Start => Step::Classify,

                Step::Classify => match self.classify(chunk).await {
                    Ok(result) => {
                        debug!(
                            chunk_id = %chunk.chunk_id,
                            category = %result.category,
                            confidence = result.confidence,
                            "classified"
                        );
                        classification = Some(result.clone());
                        Step::ValidateEvidence(result)
                    }
                    Err(err) => Step::Error(Stage::Classify, err.to_string()),
                },

                Step::ValidateEvidence(cls) => {
                    let check = validate_evidence(&cls.evidence_snippet, &chunk.text);
                    evidence = Some(check.clone());
                    Step::DecisionRoute(cls, check)
                }

                Step::DecisionRoute(cls, check) => match self.decide(&cls, &check) {
                    Some(reason) => Step::Drop(reason),
                    None => Step::Score(cls, check),
                },

                Step::Score(cls, check) => match self.score(chunk, &cls).await {
                    Ok(result) => {
                        score = Some(result.clone());
                        Step::FinalRoute(cls, check, result)
                    }
                    Err(err) => Step::Error(Stage::Score, err.to_string()),
                },

                Step::FinalRoute(cls, check, result) => {
                    if result.opportunity_score() < self.config.score_threshold {
                        Step::Drop(DropReason::LowScore)
                    } else {
                        Step::Normalize(cls, check, result)
                    }
                }

                Step::Normalize(cls, check, result) => {
                    match normalize(chunk, &cls, &check, &result, Utc::now()) {
                        Ok(record) => Step::End(Outcome::Signal(record)),
                        Err(err) => Step::Error(Stage::Normalize, err.to_string()),
                    }
                }

                Step::Drop(reason) => {
                    debug!(chunk_id = %chunk.chunk_id, reason = %reason, "dropped");
                    Step::End(Outcome::Dropped(DropEvent {
                        chunk_id: chunk.chunk_id.clone(),
                        reason,
                    }))
                }

                Step::Error(stage, detail) => {
                    warn!(chunk_id = %chunk.chunk_id, stage = %stage, error = %detail, "evaluation failed");
                    Step::End(Outcome::Errored(ErrorRecord {
                        chunk_id: chunk.chunk_id.clone(),
                        stage,
                        detail,
                    }))
                }

                Step::End(outcome) => break outcome,
            };
        };

        Evaluation {
            chunk_id: chunk.chunk_id.clone(),
            artifact_id: chunk.artifact_id.clone(),
            district: chunk.district.clone(),
            outcome,
            classification,
            evidence,
            score,
            trace,
        }
    }

    /// `wrong_category` wins over `evidence_failed`, which wins over
    /// `low_confidence`.
    fn decide(&self, cls: &ClassificationResult, check: &EvidenceCheck) -> Option<DropReason> {
        if cls.category.is_none() {
            Some(DropReason::WrongCategory)
        } else if !check.pass {
            Some(DropReason::EvidenceFailed)
        } else if cls.confidence < self.config.confidence_threshold {
            Some(DropReason::LowConfidence)
        } else {
            None
        }
    }

    async fn classify(&self, chunk: &Chunk) -> Result<ClassificationResult, ClassificationError> {
        let limit = self.config.call_timeout;
        tokio::time::timeout(limit, self.classifier.classify(chunk))
            .await
            .map_err(|_| ClassificationError::Timeout(limit))?
    }

    async fn score(&self, chunk: &Chunk, cls: &ClassificationResult) -> Result<ScoreResult, ScoreError> {
        let limit = self.config.call_timeout;
        let input = ScoringInput {
            chunk,
            classification: cls,
        };
        tokio::time::timeout(limit, self.scorer.score(input))
            .await
            .map_err(|_| ScoreError::Timeout(limit))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IntentCategory, ScoreFactors};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(Result<ClassificationResult, ClassificationError>);

    #[async_trait]
    impl IntentClassifier for Fixed {
        async fn classify(&self, _chunk: &Chunk) -> Result<ClassificationResult, ClassificationError> {
            self.0.clone()
        }
    }

    struct Counting {
        score: i64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OpportunityScorer for Counting {
        async fn score(&self, _input: ScoringInput<'_>) -> Result<ScoreResult, ScoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ScoreResult::new(self.score, ScoreFactors::default(), None))
        }
    }

    const TEXT: &str = "Staff recommend adopting Bridges in Mathematics for grades K-5.";

    fn chunk() -> Chunk {
        Chunk {
            chunk_id: "r_chunk_000".to_string(),
            artifact_id: "r".to_string(),
            district: "Jordan".to_string(),
            source_url: "https://example.org/r.pdf".to_string(),
            board_page_url: String::new(),
            meeting_date: None,
            text: TEXT.to_string(),
            offset: 0,
        }
    }

    fn cls(category: IntentCategory, confidence: f64, quote: &str) -> ClassificationResult {
        ClassificationResult {
            category,
            confidence,
            evidence_snippet: quote.to_string(),
            rationale: "because".to_string(),
        }
    }

    fn make_router(classification: ClassificationResult, score: i64) -> (Router, Arc<Counting>) {
        let scorer = Arc::new(Counting {
            score,
            calls: AtomicUsize::new(0),
        });
        let router = Router::new(
            Arc::new(Fixed(Ok(classification))),
            scorer.clone(),
            EvaluatorConfig::default(),
        );
        (router, scorer)
    }

    #[tokio::test]
    async fn accepted_chunk_visits_every_happy_state() {
        let (router, _) = make_router(cls(IntentCategory::CurriculumAdoption, 0.9, "adopting Bridges in Mathematics"), 70);
        let eval = router.evaluate(&chunk()).await;
        assert!(eval.keep());
        assert_eq!(
            eval.trace,
            vec![
                State::Start,
                State::Classify,
                State::ValidateEvidence,
                State::DecisionRoute,
                State::Score,
                State::FinalRoute,
                State::Normalize,
                State::End
            ]
        );
    }

    #[tokio::test]
    async fn none_is_never_scored() {
        let (router, scorer) = make_router(cls(IntentCategory::None, 0.99, "adopting"), 99);
        let eval = router.evaluate(&chunk()).await;
        assert_eq!(eval.outcome.drop_reason(), Some(DropReason::WrongCategory));
        assert!(eval.score.is_none());
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn drop_reason_precedence() {
        let (router, _) = make_router(cls(IntentCategory::StrategicPlan, 0.2, "not in the text"), 99);
        let eval = router.evaluate(&chunk()).await;
        assert_eq!(eval.outcome.drop_reason(), Some(DropReason::EvidenceFailed));

        let (router, _) = make_router(cls(IntentCategory::StrategicPlan, 0.2, "adopting"), 99);
        let eval = router.evaluate(&chunk()).await;
        assert_eq!(eval.outcome.drop_reason(), Some(DropReason::LowConfidence));
    }

    #[tokio::test]
    async fn score_below_threshold_is_dropped() {
        let (router, _) = make_router(cls(IntentCategory::PilotEvaluation, 0.9, "adopting"), 49);
        let eval = router.evaluate(&chunk()).await;
        assert_eq!(eval.outcome.drop_reason(), Some(DropReason::LowScore));
        assert!(eval.trace.contains(&State::FinalRoute));
    }

    #[tokio::test]
    async fn classifier_failure_becomes_error_record() {
        let router = Router::new(
            Arc::new(Fixed(Err(ClassificationError::Unavailable("down".into())))),
            Arc::new(Counting {
                score: 90,
                calls: AtomicUsize::new(0),
            }),
            EvaluatorConfig::default(),
        );
        let eval = router.evaluate(&chunk()).await;
        match eval.outcome {
            Outcome::Errored(record) => {
                assert_eq!(record.stage, Stage::Classify);
                assert!(record.detail.contains("down"));
            }
            other => panic!("expected error outcome, got {other:?}"),
        }
        assert_eq!(eval.trace, vec![State::Start, State::Classify, State::Error, State::End]);
    }
}
