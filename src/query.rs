//! Query parsing: structured completion with a deterministic fallback.
//!
//! The language-model response is untrusted: it is validated field by field
//! against the closed intent set, and any failure (transport, malformed JSON,
//! out-of-set values) drops to the heuristic parser, which never fails.

use crate::llm::{LlmClient, extract_json_object};
use crate::models::{ParsedQuery, QueryIntent};
use crate::prompts::PromptEngine;
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shape the model is asked to produce. Every field is defaulted so a
/// partially filled response still validates.
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
struct ParsedQueryPayload {
    /// One of: coverage, eligibility, compliance, definition, procedure, general.
    intent: String,
    /// Main subject of the question.
    target_subject: String,
    /// Terms most useful for semantic search.
    keywords: Vec<String>,
    /// Attribute to expected-value filters; empty when none apply.
    filter_conditions: BTreeMap<String, String>,
}

pub struct QueryParser {
    llm: Option<Arc<dyn LlmClient>>,
    prompts: Arc<PromptEngine>,
}

impl QueryParser {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, prompts: Arc<PromptEngine>) -> Self {
        Self { llm, prompts }
    }

    /// Parse a question into a structured query. Never fails: any primary
    /// path problem falls back to heuristic parsing.
    pub async fn parse(&self, query: &str) -> ParsedQuery {
        if let Some(llm) = &self.llm {
            match self.parse_with_llm(llm.as_ref(), query).await {
                Ok(parsed) => return parsed,
                Err(reason) => {
                    tracing::warn!(%reason, "query parsing fell back to heuristics");
                }
            }
        }
        fallback_parse(query)
    }

    async fn parse_with_llm(
        &self,
        llm: &dyn LlmClient,
        query: &str,
    ) -> Result<ParsedQuery, String> {
        let schema = serde_json::to_string(&schemars::schema_for!(ParsedQueryPayload))
            .map_err(|e| e.to_string())?;
        let system = self.prompts.query_parser_system(&schema);
        let user = self.prompts.query_parser_user(query);

        let response = llm.complete(&system, &user).await.map_err(|e| e.to_string())?;
        let json = extract_json_object(&response)
            .ok_or_else(|| "response contained no JSON object".to_string())?;
        let payload: ParsedQueryPayload =
            serde_json::from_str(&json).map_err(|e| e.to_string())?;

        let subject = if payload.target_subject.trim().is_empty() {
            truncate_chars(query, 100)
        } else {
            payload.target_subject.trim().to_string()
        };
        let keywords = if payload.keywords.is_empty() {
            extract_keywords(query)
        } else {
            payload.keywords
        };

        Ok(ParsedQuery {
            intent: QueryIntent::from_label(&payload.intent),
            subject,
            keywords,
            filters: payload.filter_conditions,
            original_query: query.to_string(),
        })
    }
}

/// Heuristic parser: trigger-word intent inference plus stop-word keyword
/// extraction. Total — produces a valid ParsedQuery for any input.
pub fn fallback_parse(query: &str) -> ParsedQuery {
    let lowered = query.to_lowercase();

    let intent = if contains_any(&lowered, &["cover", "coverage", "covers", "include"]) {
        QueryIntent::Coverage
    } else if contains_any(&lowered, &["eligible", "eligibility", "qualify"]) {
        QueryIntent::Eligibility
    } else if contains_any(&lowered, &["comply", "compliance", "regulation"]) {
        QueryIntent::Compliance
    } else if contains_any(&lowered, &["define", "definition", "what is", "meaning"]) {
        QueryIntent::Definition
    } else if contains_any(&lowered, &["procedure", "process", "how to", "steps"]) {
        QueryIntent::Procedure
    } else {
        QueryIntent::General
    };

    ParsedQuery {
        intent,
        subject: truncate_chars(query, 100),
        keywords: extract_keywords(query),
        filters: BTreeMap::new(),
        original_query: query.to_string(),
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "are", "was", "were", "been", "have", "has", "had",
    "does", "did", "will", "would", "could", "should", "this", "that", "these", "those",
    "you", "your", "his", "her", "its", "they", "them", "their",
];

/// Extract search keywords: alphabetic words of three or more characters,
/// lowercased, stop-words removed, order-preserving dedup, capped at 20.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut keywords = Vec::new();

    for token in text.split(|c: char| !c.is_alphabetic()) {
        if token.chars().count() < 3 {
            continue;
        }
        let word = token.to_lowercase();
        if STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            keywords.push(word);
        }
        if keywords.len() == 20 {
            break;
        }
    }

    keywords
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect::<String>().trim().to_string()
}
