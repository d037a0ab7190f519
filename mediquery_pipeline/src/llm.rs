//! OpenAI-compatible backing for the judgment and generation traits.
//!
//! One [`OpenAiServices`] instance implements both [`JudgmentService`] and
//! [`AnswerGenerator`] against a chat-completions endpoint. Judgments ask
//! for a single JSON object and are parsed tolerantly: models wrap JSON in
//! prose or code fences often enough that [`extract_json_object`] scans for
//! the first balanced object instead of trusting the raw body.

use async_trait::async_trait;
use mediquery_config::LlmConfig;
use mediquery_core::{
    AnswerGenerator, CitationStrictness, ClarificationJudgment, CollectionId, Document,
    GeneratedAnswer, GroundingJudgment, JudgmentService, PromptProfile, RelevanceJudgment,
    RewriteStrategy, Role, ServiceError,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageContent {
    content: Option<String>,
}

/// Chat-completions client implementing the judgment and generation traits.
pub struct OpenAiServices {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
    rewrite_temperature: f32,
    max_tokens: u32,
}

impl OpenAiServices {
    /// Build from `[llm]` config. The API key is read from the environment
    /// variable named by `api_key_env`, never from the config file itself.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("environment variable {} is not set", config.api_key_env)
        })?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            rewrite_temperature: config.rewrite_temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn chat(
        &self,
        system: String,
        user: String,
        temperature: f32,
    ) -> Result<String, ServiceError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout
                } else {
                    ServiceError::Unavailable(format!("completion request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Unavailable(format!(
                "completion API error ({status}): {body}"
            )));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            ServiceError::MalformedSchema(format!("failed to parse completion response: {e}"))
        })?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::MalformedSchema("no completion choices returned".into()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ServiceError::Refused(
                "completion stopped by content filter".into(),
            ));
        }

        choice
            .message
            .content
            .ok_or_else(|| ServiceError::MalformedSchema("completion had no content".into()))
    }

    async fn judge<T: serde::de::DeserializeOwned>(
        &self,
        system: String,
        user: String,
    ) -> Result<T, ServiceError> {
        let content = self.chat(system, user, self.temperature).await?;
        let json = extract_json_object(&content).ok_or_else(|| {
            ServiceError::MalformedSchema(format!(
                "no JSON object in judgment reply: {}",
                content.chars().take(200).collect::<String>()
            ))
        })?;
        serde_json::from_str(json)
            .map_err(|e| ServiceError::MalformedSchema(format!("judgment JSON invalid: {e}")))
    }
}

/// Find the first balanced `{ ... }` object in `text`, tolerating prose
/// and markdown fences around it. String escapes are honored so a brace
/// inside a quoted value cannot unbalance the scan.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Format documents as the numbered context block the generation prompt
/// cites into.
fn context_block(documents: &[Document]) -> String {
    let mut block = String::new();
    for (i, doc) in documents.iter().enumerate() {
        block.push_str(&format!(
            "[Ref {}] (source: {}, collection: {})\n{}\n\n",
            i + 1,
            doc.source_label,
            doc.collection,
            doc.text
        ));
    }
    block
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Admin => "hospital administrator",
        Role::Doctor => "licensed physician",
        Role::Nurse => "nurse",
        Role::Technician => "lab/radiology technician",
        Role::Researcher => "clinical researcher",
        Role::Viewer => "general staff member",
    }
}

#[async_trait]
impl JudgmentService for OpenAiServices {
    async fn assess_ambiguity(
        &self,
        question: &str,
        profile: PromptProfile,
        collections: &[CollectionId],
    ) -> Result<ClarificationJudgment, ServiceError> {
        let available = collections
            .iter()
            .map(CollectionId::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let system = format!(
            "You are a query analyst for a hospital document search system. \
             Decide whether the user's question is specific enough to search \
             the available document collections ({available}). A question is \
             ambiguous when it could refer to several distinct topics, omits \
             the entity it asks about, or uses an abbreviation with multiple \
             clinical readings. Reply with a single JSON object: \
             {{\"ambiguous\": bool, \"options\": [2-4 specific follow-up \
             questions, empty when not ambiguous], \"reasoning\": \"one \
             sentence\"}}. {}",
            profile.audience_instruction()
        );
        debug!(question, "assessing ambiguity");
        self.judge(system, question.to_string()).await
    }

    async fn grade_relevance(
        &self,
        query: &str,
        role: Role,
        document: &Document,
    ) -> Result<RelevanceJudgment, ServiceError> {
        let system = format!(
            "You are a relevance grader for a hospital document search system. \
             Judge whether the document excerpt contains information useful \
             for answering the query, asked by a {}. Matching clinical \
             terminology, ICD/CPT-style codes, or drug names count toward \
             relevance even when the wording overlaps little. Reply with a \
             single JSON object: {{\"relevant\": bool, \"reason\": \"one \
             sentence\"}}.",
            role_label(role)
        );
        let user = format!(
            "Query: {query}\n\nDocument (from {}):\n{}",
            document.source_label, document.text
        );
        self.judge(system, user).await
    }

    async fn check_grounding(
        &self,
        answer: &str,
        documents: &[Document],
    ) -> Result<GroundingJudgment, ServiceError> {
        let system = "You are a grounding auditor for a hospital document \
             search system. For each factual claim in the answer, check \
             whether it is directly supported by the provided source \
             excerpts. Reply with a single JSON object: {\"grounded\": bool \
             (true only if every claim is supported), \"unsupported_claims\": \
             [each unsupported claim, verbatim]}."
            .to_string();
        let user = format!(
            "Sources:\n{}\nAnswer to audit:\n{answer}",
            context_block(documents)
        );
        self.judge(system, user).await
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiServices {
    async fn generate(
        &self,
        profile: PromptProfile,
        query: &str,
        documents: &[Document],
        tighten: bool,
    ) -> Result<GeneratedAnswer, ServiceError> {
        let mut system = format!(
            "You are a hospital documentation assistant. Answer the question \
             using ONLY the numbered source excerpts provided. Cite every \
             factual statement with its marker, e.g. [Ref 2]. Do not give \
             prescriptive medical advice; describe what the documents say. \
             If the sources do not contain the answer, say so. {}",
            profile.audience_instruction()
        );
        if profile.deidentify {
            system.push_str(
                " De-identify the answer: replace patient names, record \
                 numbers, and other protected identifiers with generic \
                 placeholders.",
            );
        }
        if profile.citation_strictness == CitationStrictness::Strict {
            system.push_str(" Every sentence must carry at least one citation.");
        }
        if tighten {
            system.push_str(
                " A previous draft contained claims the sources did not \
                 support. Remove any statement you cannot tie directly to an \
                 excerpt, even if the answer becomes shorter.",
            );
        }
        let user = format!("Sources:\n{}\nQuestion: {query}", context_block(documents));
        let text = self.chat(system, user, self.temperature).await?;

        // The pipeline re-derives the citation map from the markers in the
        // text, so only the text matters here.
        let cited = parse_cited_refs(&text, documents.len());
        if cited.is_empty() {
            warn!("generated answer text contains no [Ref N] markers");
        }
        Ok(GeneratedAnswer { text, cited })
    }

    async fn rewrite_query(
        &self,
        query: &str,
        strategy: RewriteStrategy,
    ) -> Result<String, ServiceError> {
        let instruction = match strategy {
            RewriteStrategy::Broaden => {
                "The search returned nothing at all. Broaden the query: expand \
                 abbreviations, add common clinical synonyms, and drop overly \
                 narrow qualifiers."
            }
            RewriteStrategy::Refocus => {
                "The search returned documents, but none were relevant. Keep \
                 the clinical intent and sharpen the terminology toward the \
                 actual subject of the question."
            }
        };
        let system = format!(
            "You rewrite queries for a hospital document search system. \
             {instruction} Never change what the question is asking. Reply \
             with the rewritten query only, no explanation."
        );
        let rewritten = self
            .chat(system, query.to_string(), self.rewrite_temperature)
            .await?;
        Ok(rewritten.trim().trim_matches('"').to_string())
    }
}

/// Collect the distinct in-range `[Ref N]` markers of `text` in first-use
/// order.
fn parse_cited_refs(text: &str, document_count: usize) -> Vec<usize> {
    let mut cited = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("[Ref ") {
        let tail = &rest[start + 5..];
        let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
        let after = &tail[digits.len()..];
        if !digits.is_empty() && after.starts_with(']') {
            if let Ok(n) = digits.parse::<usize>() {
                if n >= 1 && n <= document_count && !cited.contains(&n) {
                    cited.push(n);
                }
            }
            rest = &after[1..];
        } else {
            rest = tail;
        }
    }
    cited
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediquery_core::CollectionId;
    use std::collections::HashMap;

    #[test]
    fn test_extract_json_object_plain() {
        let text = r#"{"relevant": true, "reason": "matches"}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn test_extract_json_object_in_code_fence() {
        let text = "Here is my judgment:\n```json\n{\"ambiguous\": false, \"options\": []}\n```";
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"ambiguous": false, "options": []}"#)
        );
    }

    #[test]
    fn test_extract_json_object_nested_and_braces_in_strings() {
        let text = r#"note {"grounded": false, "unsupported_claims": ["dose is {high}"]} end"#;
        let json = extract_json_object(text).unwrap();
        let parsed: GroundingJudgment = serde_json::from_str(json).unwrap();
        assert!(!parsed.grounded);
        assert_eq!(parsed.unsupported_claims, vec!["dose is {high}"]);
    }

    #[test]
    fn test_extract_json_object_unbalanced_is_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object(r#"{"open": true"#), None);
    }

    #[test]
    fn test_parse_cited_refs_first_use_order() {
        let cited = parse_cited_refs("claim [Ref 3], more [Ref 1], again [Ref 3]", 5);
        assert_eq!(cited, vec![3, 1]);
    }

    #[test]
    fn test_parse_cited_refs_ignores_out_of_range() {
        let cited = parse_cited_refs("good [Ref 1], bad [Ref 7]", 2);
        assert_eq!(cited, vec![1]);
    }

    #[test]
    fn test_context_block_numbers_from_one() {
        let docs = vec![Document {
            id: "a".into(),
            collection: CollectionId::from("pharmacy"),
            text: "store below 25C".into(),
            source_label: "storage.pdf p.2".into(),
            relevance_score: 0.7,
            metadata: HashMap::new(),
        }];
        let block = context_block(&docs);
        assert!(block.starts_with("[Ref 1] (source: storage.pdf p.2, collection: pharmacy)"));
        assert!(block.contains("store below 25C"));
    }
}
