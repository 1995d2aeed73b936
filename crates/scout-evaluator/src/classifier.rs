//! Intent classification.
//!
//! [`IntentClassifier`] is the seam the router talks to. [`LlmClassifier`]
//! is the production implementation: it asks a language model to pick one
//! category from the fixed taxonomy and to quote the sentence that justifies
//! it.

use crate::llm::{parse_llm_json_object, CompletionRequest, LLMError, LLMProvider};
use crate::{Chunk, ClassificationResult, IntentCategory};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassificationError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("unparseable classification: {0}")]
    Unparseable(String),
}

impl From<LLMError> for ClassificationError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::ParseError(msg) | LLMError::InvalidResponse(msg) => {
                ClassificationError::Unparseable(msg)
            }
            other => ClassificationError::Unavailable(other.to_string()),
        }
    }
}

/// Assigns a chunk to an intent category.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, chunk: &Chunk) -> Result<ClassificationResult, ClassificationError>;
}

pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"You review public school board meeting documents for early signals that a district may buy new instructional products.

Classify the text into exactly ONE category.

High-intent categories:
- curriculum_adoption: formal review, selection or adoption of curriculum
- instructional_materials: purchasing or replacing textbooks, digital materials, licenses
- pilot_evaluation: piloting or formally evaluating a program or vendor
- budget_allocation: money set aside for instructional programs, grants, ESSER or similar funds
- vendor_dissatisfaction: complaints about, or plans to replace, a current vendor or program

Medium-intent categories:
- learning_gaps: discussion of achievement gaps, test results, intervention needs
- personalization_pbl: personalized learning, project-based learning, competency-based approaches
- strategic_plan: strategic plan goals touching instruction or technology
- teacher_workload: teacher burnout, planning time, staffing pressure tied to instruction

Use "none" when the text is procedural or unrelated to instruction.

Reply with a single JSON object and nothing else:
{"category": "<category>", "confidence": <0.0-1.0>, "evidence_snippet": "<exact quote>", "rationale": "<one sentence>"}

The evidence_snippet MUST be copied character for character from the text (one or two sentences). Never paraphrase. Be conservative with confidence."#;

#[derive(Debug, Deserialize)]
struct ClassificationReply {
    category: String,
    confidence: serde_json::Value,
    #[serde(default)]
    evidence_snippet: Option<String>,
    rationale: String,
}

/// Classifier backed by a language model.
pub struct LlmClassifier {
    provider: Arc<dyn LLMProvider>,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    fn render_user_prompt(chunk: &Chunk) -> String {
        format!(
            "District: {}\nMeeting date: {}\n\nText:\n\"\"\"\n{}\n\"\"\"",
            chunk.district,
            chunk.meeting_date.as_deref().unwrap_or("Unknown"),
            chunk.text
        )
    }
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, chunk: &Chunk) -> Result<ClassificationResult, ClassificationError> {
        let request = CompletionRequest::json(CLASSIFY_SYSTEM_PROMPT, Self::render_user_prompt(chunk));
        let response = self.provider.complete(request).await?;
        parse_classification(&response.content)
    }
}

/// Turn a raw model reply into a [`ClassificationResult`].
pub fn parse_classification(content: &str) -> Result<ClassificationResult, ClassificationError> {
    let reply: ClassificationReply = parse_llm_json_object(content)?;

    let category: IntentCategory = reply
        .category
        .parse()
        .map_err(|e: crate::UnknownCategory| ClassificationError::Unparseable(e.to_string()))?;

    let confidence = match &reply.confidence {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|c| c.is_finite())
    .ok_or_else(|| {
        ClassificationError::Unparseable(format!("confidence is not a number: {}", reply.confidence))
    })?;

    Ok(ClassificationResult {
        category,
        confidence: confidence.clamp(0.0, 1.0),
        evidence_snippet: reply.evidence_snippet.unwrap_or_default(),
        rationale: reply.rationale,
    })
}
