//! Answer synthesis from retrieved evidence.
//!
//! The model response is validated before use: confidence is clamped to
//! [0, 1] and a missing clause defaults to the best-ranked chunk. When no
//! language model is available or the call fails, a deterministic extractive
//! answer is produced from the evidence instead.

use crate::llm::{LlmClient, extract_json_object};
use crate::models::{AnswerResult, ParsedQuery, RetrievedEvidence};
use crate::prompts::{ClauseContext, PromptEngine};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

/// Pages listed in `page_references` come from this many top hits.
const PAGE_REFERENCE_HITS: usize = 3;

/// Shape the model is asked to produce.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
struct AnswerPayload {
    /// Complete answer to the question, quoting exact figures.
    answer: String,
    /// Every applicable condition, with exact details.
    conditions: Vec<String>,
    /// Verbatim text of the single most relevant clause.
    clause: String,
    /// Confidence between 0 and 1.
    confidence: f32,
    /// Reasoning, citing specific clause text.
    rationale: String,
}

pub struct Synthesizer {
    llm: Option<Arc<dyn LlmClient>>,
    prompts: Arc<PromptEngine>,
}

impl Synthesizer {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, prompts: Arc<PromptEngine>) -> Self {
        Self { llm, prompts }
    }

    /// Synthesize an answer from retrieved evidence. Never fails: any primary
    /// path problem produces the extractive fallback answer.
    pub async fn synthesize(
        &self,
        parsed: &ParsedQuery,
        evidence: &RetrievedEvidence,
    ) -> AnswerResult {
        if let Some(llm) = &self.llm {
            match self.synthesize_with_llm(llm.as_ref(), parsed, evidence).await {
                Ok(answer) => return answer,
                Err(reason) => {
                    tracing::warn!(%reason, "synthesis fell back to extractive answer");
                }
            }
        }
        fallback_answer(evidence)
    }

    async fn synthesize_with_llm(
        &self,
        llm: &dyn LlmClient,
        parsed: &ParsedQuery,
        evidence: &RetrievedEvidence,
    ) -> Result<AnswerResult, String> {
        let schema = serde_json::to_string(&schemars::schema_for!(AnswerPayload))
            .map_err(|e| e.to_string())?;
        let clauses: Vec<ClauseContext> = evidence
            .hits
            .iter()
            .map(|hit| ClauseContext {
                text: hit.chunk.text.clone(),
                pages: hit
                    .chunk
                    .pages
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect();

        let system = self.prompts.synthesizer_system(&schema);
        let user = self.prompts.synthesizer_user(
            &parsed.original_query,
            Some(parsed.intent.as_str()),
            &clauses,
        );

        let response = llm.complete(&system, &user).await.map_err(|e| e.to_string())?;
        let json = extract_json_object(&response)
            .ok_or_else(|| "response contained no JSON object".to_string())?;
        let payload: AnswerPayload = serde_json::from_str(&json).map_err(|e| e.to_string())?;

        if payload.answer.trim().is_empty() {
            return Err("response had an empty answer".to_string());
        }

        let clause = if payload.clause.trim().is_empty() {
            evidence
                .best()
                .map(|hit| truncate_clause(&hit.chunk.text))
                .unwrap_or_default()
        } else {
            payload.clause
        };

        Ok(AnswerResult {
            answer: payload.answer,
            conditions: payload.conditions,
            clause,
            confidence: payload.confidence.clamp(0.0, 1.0),
            rationale: payload.rationale,
            page_references: evidence.page_references(PAGE_REFERENCE_HITS),
            additional_info: None,
        })
    }
}

/// Extractive answer used when no model answer is available. Confidence is
/// fixed low so callers can tell it apart from a reasoned verdict.
pub fn fallback_answer(evidence: &RetrievedEvidence) -> AnswerResult {
    let clause = evidence
        .best()
        .map(|hit| truncate_clause(&hit.chunk.text))
        .unwrap_or_default();

    AnswerResult {
        answer: "Unable to determine a definitive answer from the available information."
            .to_string(),
        conditions: Vec::new(),
        clause,
        confidence: 0.3,
        rationale: "No reasoning model was available; the most relevant clause found in the \
                    document is quoted for manual review."
            .to_string(),
        page_references: evidence.page_references(PAGE_REFERENCE_HITS),
        additional_info: None,
    }
}

/// Cap clause excerpts at roughly 500 characters, cutting on a char boundary.
fn truncate_clause(text: &str) -> String {
    if text.chars().count() <= 500 {
        return text.to_string();
    }
    let cut: String = text.chars().take(500).collect();
    format!("{}...", cut.trim_end())
}
