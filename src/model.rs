//! Generative model abstraction and the Gemini implementation.
//!
//! Defines the [`ModelClient`] trait consumed by the agent loop, the
//! store façade (embeddings), and the `summarizeDocument` tool:
//!
//! - `chat` — plain text in, text out.
//! - `chat_with_tools` — a conversation plus tool declarations in, either
//!   tool calls or final text out. Tool use is **forced** or **optional**
//!   per call via [`ToolChoice`].
//! - `embed` — text in, embedding vector out.
//!
//! The production implementation is [`GeminiClient`], a thin REST client
//! for the Generative Language API (`generateContent` / `embedContent`).
//!
//! # Retry Strategy
//!
//! Transient errors use exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ModelConfig;

/// A tool invocation request emitted by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub parameters: serde_json::Value,
}

/// A tool exposed to the model: name, description, and a JSON-schema
/// parameters object.
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Whether the model must call a tool in its next response.
///
/// `Required` is used on the first agent iteration so the model grounds
/// its answer in tool output before composing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Required,
    Auto,
}

/// One turn of an agent conversation.
///
/// The orchestrator owns an ordered sequence of these per request; they
/// are created on task entry and discarded on return. Tool failures are
/// ordinary [`Turn::ToolReply`] turns carrying an `error` payload, not
/// exceptional control flow.
#[derive(Debug, Clone)]
pub enum Turn {
    /// Fixed policy instruction, first in every conversation.
    System(String),
    /// User-authored task text.
    User(String),
    /// Final or interim text produced by the model.
    ModelText(String),
    /// Tool calls produced by the model, in emission order.
    ModelCalls(Vec<ToolCall>),
    /// Serialized result of one tool invocation.
    ToolReply {
        name: String,
        payload: serde_json::Value,
    },
}

/// A model response: either at least one tool call, or final text.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// The generative model capability.
///
/// Production deployments use [`GeminiClient`]; tests use scripted
/// in-memory fakes that record calls and replay canned replies.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Plain chat: one prompt in, text out. Used for summarization.
    async fn chat(&self, prompt: &str) -> Result<String>;

    /// Tool-augmented chat over a full conversation.
    async fn chat_with_tools(
        &self,
        turns: &[Turn],
        tools: &[ToolDeclaration],
        choice: ToolChoice,
    ) -> Result<ModelReply>;

    /// Embed a text into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ============ Gemini client ============

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// REST client for the Gemini API.
///
/// Requires the `GEMINI_API_KEY` environment variable. Chat and embedding
/// models are configured separately (`[model]` in the config file).
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    chat_model: String,
    embedding_model: String,
    max_retries: u32,
}

impl GeminiClient {
    /// Create a client from config, reading the API key from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `GEMINI_API_KEY` is not set or the HTTP client
    /// cannot be constructed.
    pub fn from_env(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Override the API base URL (used against local emulators).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base = url.into();
        self
    }

    /// POST a JSON body with retry/backoff, returning the parsed response.
    ///
    /// Retries 429 and 5xx with exponential backoff; other client errors
    /// fail immediately with the response body in the message.
    async fn post_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Gemini API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Gemini API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Gemini request failed after retries")))
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.chat_model, self.api_key
        )
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn chat(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let json = self.post_with_retry(&self.generate_url(), &body).await?;
        let reply = parse_generate_response(&json)?;

        reply
            .text
            .ok_or_else(|| anyhow::anyhow!("Gemini returned no text for a plain chat request"))
    }

    async fn chat_with_tools(
        &self,
        turns: &[Turn],
        tools: &[ToolDeclaration],
        choice: ToolChoice,
    ) -> Result<ModelReply> {
        let (system_instruction, contents) = convert_turns(turns);

        let declarations: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();

        let mode = match choice {
            ToolChoice::Required => "ANY",
            ToolChoice::Auto => "AUTO",
        };

        let mut body = serde_json::json!({
            "contents": contents,
            "tools": [{ "functionDeclarations": declarations }],
            "toolConfig": { "functionCallingConfig": { "mode": mode } },
        });
        if let Some(system) = system_instruction {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
        }

        let json = self.post_with_retry(&self.generate_url(), &body).await?;
        parse_generate_response(&json)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.api_base, self.embedding_model, self.api_key
        );
        let body = serde_json::json!({
            "content": { "parts": [{ "text": text }] },
        });

        let json = self.post_with_retry(&url, &body).await?;

        let values = json
            .pointer("/embedding/values")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedContent response: missing values"))?;

        Ok(values
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect())
    }
}

// ============ Wire conversion ============

/// Convert the conversation into Gemini `contents`, splitting off the
/// system instruction (Gemini carries it out-of-band).
fn convert_turns(turns: &[Turn]) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system = None;
    let mut contents = Vec::new();

    for turn in turns {
        match turn {
            Turn::System(text) => {
                system = Some(text.clone());
            }
            Turn::User(text) => contents.push(serde_json::json!({
                "role": "user",
                "parts": [{ "text": text }],
            })),
            Turn::ModelText(text) => contents.push(serde_json::json!({
                "role": "model",
                "parts": [{ "text": text }],
            })),
            Turn::ModelCalls(calls) => {
                let parts: Vec<serde_json::Value> = calls
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "functionCall": { "name": c.name, "args": c.parameters }
                        })
                    })
                    .collect();
                contents.push(serde_json::json!({ "role": "model", "parts": parts }));
            }
            Turn::ToolReply { name, payload } => contents.push(serde_json::json!({
                "role": "user",
                "parts": [{
                    "functionResponse": { "name": name, "response": payload }
                }],
            })),
        }
    }

    (system, contents)
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<serde_json::Value>,
}

/// Parse a `generateContent` response into text and/or tool calls.
fn parse_generate_response(json: &serde_json::Value) -> Result<ModelReply> {
    let response: GenerateResponse = serde_json::from_value(json.clone())
        .map_err(|e| anyhow::anyhow!("Invalid generateContent response: {}", e))?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Gemini response contained no candidates"))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in candidate.content.parts {
        if let Some(t) = part.get("text").and_then(|v| v.as_str()) {
            text.push_str(t);
        } else if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let parameters = call
                .get("args")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            tool_calls.push(ToolCall { name, parameters });
        }
    }

    Ok(ModelReply {
        text: if text.is_empty() { None } else { Some(text) },
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_text_reply() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "hello" }] }
            }]
        });
        let reply = parse_generate_response(&json).unwrap();
        assert_eq!(reply.text.as_deref(), Some("hello"));
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn parse_function_call_reply() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{
                    "functionCall": { "name": "searchDocuments", "args": { "query": "q" } }
                }] }
            }]
        });
        let reply = parse_generate_response(&json).unwrap();
        assert!(reply.text.is_none());
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "searchDocuments");
        assert_eq!(reply.tool_calls[0].parameters["query"], "q");
    }

    #[test]
    fn parse_empty_candidates_is_error() {
        let json = serde_json::json!({ "candidates": [] });
        assert!(parse_generate_response(&json).is_err());
    }

    #[test]
    fn convert_splits_system_instruction() {
        let turns = vec![
            Turn::System("policy".to_string()),
            Turn::User("hi".to_string()),
            Turn::ToolReply {
                name: "getDocumentStats".to_string(),
                payload: serde_json::json!({ "count": 3 }),
            },
        ];
        let (system, contents) = convert_turns(&turns);
        assert_eq!(system.as_deref(), Some("policy"));
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert!(contents[1]["parts"][0]["functionResponse"].is_object());
    }
}
