//! Prompt templates for structured completions.

use minijinja::{Environment, context};

const QUERY_PARSER_SYSTEM: &str = r#"You are an expert query parser for document analysis systems.
Analyze the user's question about a policy, legal, HR, or compliance document
and return a single JSON object conforming to this schema:

{{ schema }}

Rules:
- "intent" must be exactly one of: coverage, eligibility, compliance, definition, procedure, general.
- "target_subject" is the main subject of the question.
- "keywords" are the terms most useful for semantic search.
- "filter_conditions" maps attributes to expected values (for example {"age": "over 50"}); use {} when none apply.

Example:
Question: "Does this policy cover knee surgery?"
Response: {"intent": "coverage", "target_subject": "knee surgery", "keywords": ["policy", "cover", "knee surgery"], "filter_conditions": {}}

Return only valid JSON, no additional text."#;

const QUERY_PARSER_USER: &str = "Question: {{ query }}";

const SYNTHESIZER_SYSTEM: &str = r#"You are an expert document analyst specializing in policy and legal interpretation.
Evaluate whether the provided clauses answer the user's question and return a
single JSON object conforming to this schema:

{{ schema }}

Rules:
- "answer" is a single string containing the complete answer. Quote exact
  numbers, time periods, percentages, and amounts from the clauses; never
  summarize them away.
- "conditions" lists every applicable condition, with exact details.
- "clause" is the verbatim text of the single most relevant clause.
- "confidence" is a number between 0 and 1.
- "rationale" explains the reasoning, citing specific clause text.

Return only valid JSON, no additional text."#;

const SYNTHESIZER_USER: &str = r#"Question: {{ question }}
{% if intent %}Detected intent: {{ intent }}{% endif %}

Relevant clauses:
{% for clause in clauses %}Clause {{ loop.index }} (pages {{ clause.pages }}): {{ clause.text }}

{% endfor %}Analyze the question against these clauses and respond with JSON only."#;

/// Rendered prompt templates, built once at startup.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("query_parser_system", QUERY_PARSER_SYSTEM)
            .expect("query parser system template is valid");
        env.add_template("query_parser_user", QUERY_PARSER_USER)
            .expect("query parser user template is valid");
        env.add_template("synthesizer_system", SYNTHESIZER_SYSTEM)
            .expect("synthesizer system template is valid");
        env.add_template("synthesizer_user", SYNTHESIZER_USER)
            .expect("synthesizer user template is valid");
        Self { env }
    }

    pub fn query_parser_system(&self, schema: &str) -> String {
        self.env
            .get_template("query_parser_system")
            .expect("template registered")
            .render(context! { schema })
            .expect("failed to render query parser system prompt")
    }

    pub fn query_parser_user(&self, query: &str) -> String {
        self.env
            .get_template("query_parser_user")
            .expect("template registered")
            .render(context! { query })
            .expect("failed to render query parser user prompt")
    }

    pub fn synthesizer_system(&self, schema: &str) -> String {
        self.env
            .get_template("synthesizer_system")
            .expect("template registered")
            .render(context! { schema })
            .expect("failed to render synthesizer system prompt")
    }

    pub fn synthesizer_user(&self, question: &str, intent: Option<&str>, clauses: &[ClauseContext]) -> String {
        self.env
            .get_template("synthesizer_user")
            .expect("template registered")
            .render(context! { question, intent, clauses })
            .expect("failed to render synthesizer user prompt")
    }
}

/// One clause presented to the synthesizer, with its page provenance.
#[derive(Debug, serde::Serialize)]
pub struct ClauseContext {
    pub text: String,
    pub pages: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_render_with_context() {
        let engine = PromptEngine::new();

        let system = engine.query_parser_system("{\"type\": \"object\"}");
        assert!(system.contains("{\"type\": \"object\"}"));
        assert!(system.contains("coverage, eligibility"));

        let user = engine.query_parser_user("Does this cover knee surgery?");
        assert_eq!(user, "Question: Does this cover knee surgery?");
    }

    #[test]
    fn synthesizer_user_lists_clauses_with_pages() {
        let engine = PromptEngine::new();
        let clauses = vec![
            ClauseContext { text: "Knee surgery is covered.".to_string(), pages: "2".to_string() },
            ClauseContext { text: "A rider is required.".to_string(), pages: "3, 4".to_string() },
        ];
        let user = engine.synthesizer_user("Is knee surgery covered?", Some("coverage"), &clauses);
        assert!(user.contains("Clause 1 (pages 2): Knee surgery is covered."));
        assert!(user.contains("Clause 2 (pages 3, 4): A rider is required."));
        assert!(user.contains("Detected intent: coverage"));
    }
}
