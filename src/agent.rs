//! Agent orchestrator: the bounded tool-using conversation loop.
//!
//! One [`AgentOrchestrator::execute_task`] call drives the model through
//! up to `max_iterations` rounds of: model turn → sequential tool
//! execution → next model turn, until the model emits final text.
//!
//! # Loop Contract
//!
//! - Iteration 1 forces tool use ([`ToolChoice::Required`]); later
//!   iterations leave it optional. A text-only reply on iteration 1
//!   violates the contract and fails the request.
//! - Tool calls in one reply execute sequentially in emission order;
//!   calls from different iterations are strictly ordered by iteration.
//! - Unknown tool names are logged and skipped.
//! - A failed or timed-out tool becomes an `{error}` payload in the
//!   conversation, and the model decides how to recover. Only model
//!   failures, iteration exhaustion, and cancellation abort the request.
//! - Every tool reply carries a short follow-up instruction telling the
//!   model what to do next; without it models tend to repeat the same
//!   call instead of answering.
//!
//! # Answer Assembly
//!
//! The final answer combines the model's closing text with structured
//! blocks built from the recorded tool results: an enumerated list of
//! search hits, per-document summary blocks, or sent-email confirmations.
//! Side effects (a sent email) are never rolled back on late failure or
//! cancellation.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::model::{ModelClient, ModelReply, ToolChoice, Turn};
use crate::tools::{ToolContext, ToolRegistry};

/// Fixed policy instruction opening every conversation.
const SYSTEM_INSTRUCTION: &str = "You are a document assistant for a company drive. \
You have access to tools for searching documents, summarizing them, sending email, \
and reporting corpus statistics. Use the tools to ground every answer; never invent \
document contents. Always respond in the same language the user wrote in.";

/// Fatal task errors, distinguished by kind.
///
/// Recoverable conditions (a tool failing, a document not found) never
/// appear here; they flow back into the conversation as tool results.
#[derive(Debug)]
pub enum TaskError {
    /// Empty prompt or out-of-range iteration bound.
    BadRequest(String),
    /// The model errored or violated the tool-use contract.
    ModelFailure(String),
    /// The loop exhausted its iteration bound without final text.
    MaxIterations(usize),
    /// The caller's deadline expired mid-task.
    Cancelled,
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            TaskError::ModelFailure(msg) => write!(f, "model failure: {}", msg),
            TaskError::MaxIterations(max) => {
                write!(f, "task too complex: maximum tool usage reached ({})", max)
            }
            TaskError::Cancelled => write!(f, "task cancelled"),
        }
    }
}

impl std::error::Error for TaskError {}

impl TaskError {
    /// Machine-readable code for the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::BadRequest(_) => "bad_request",
            TaskError::ModelFailure(_) => "internal",
            TaskError::MaxIterations(_) => "max_iterations",
            TaskError::Cancelled => "cancelled",
        }
    }
}

/// One executed tool call with its serialized result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub parameters: Value,
    pub result: Value,
}

/// Result of a finished task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub success: bool,
    pub answer: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub iterations: usize,
}

/// The tool-using conversation driver.
pub struct AgentOrchestrator {
    model: Arc<dyn ModelClient>,
    registry: ToolRegistry,
    ctx: ToolContext,
    tool_timeout: Duration,
}

impl AgentOrchestrator {
    pub fn new(
        model: Arc<dyn ModelClient>,
        registry: ToolRegistry,
        ctx: ToolContext,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            model,
            registry,
            ctx,
            tool_timeout,
        }
    }

    /// Run one task to completion.
    ///
    /// `deadline`, when set, bounds the whole request: the in-flight model
    /// or tool call is abandoned when it passes and the task fails with
    /// [`TaskError::Cancelled`]. Already-performed side effects stand.
    pub async fn execute_task(
        &self,
        prompt: &str,
        max_iterations: usize,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<TaskOutcome, TaskError> {
        if prompt.trim().is_empty() {
            return Err(TaskError::BadRequest("prompt must not be empty".to_string()));
        }
        if max_iterations == 0 {
            return Err(TaskError::BadRequest(
                "maxIterations must be at least 1".to_string(),
            ));
        }

        let mut turns = vec![
            Turn::System(SYSTEM_INSTRUCTION.to_string()),
            Turn::User(prompt.to_string()),
        ];
        let declarations = self.registry.declarations();
        let mut records: Vec<ToolCallRecord> = Vec::new();

        for iteration in 1..=max_iterations {
            let choice = if iteration == 1 {
                ToolChoice::Required
            } else {
                ToolChoice::Auto
            };

            let reply = self
                .bounded(deadline, self.model.chat_with_tools(&turns, &declarations, choice))
                .await?
                .map_err(|e| TaskError::ModelFailure(e.to_string()))?;

            if !reply.tool_calls.is_empty() {
                self.run_tool_calls(reply, &mut turns, &mut records, deadline)
                    .await?;
                continue;
            }

            match reply.text {
                Some(text) if !text.trim().is_empty() => {
                    if iteration == 1 {
                        return Err(TaskError::ModelFailure(
                            "model returned text on the forced-tool-use iteration".to_string(),
                        ));
                    }
                    return Ok(TaskOutcome {
                        success: true,
                        answer: compose_answer(&text, &records),
                        tool_calls: records,
                        iterations: iteration,
                    });
                }
                _ => {
                    return Err(TaskError::ModelFailure(
                        "model returned neither text nor tool calls".to_string(),
                    ));
                }
            }
        }

        Err(TaskError::MaxIterations(max_iterations))
    }

    /// Execute one reply's tool calls sequentially, reflecting each result
    /// (with its follow-up directive) back into the conversation.
    async fn run_tool_calls(
        &self,
        reply: ModelReply,
        turns: &mut Vec<Turn>,
        records: &mut Vec<ToolCallRecord>,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<(), TaskError> {
        // Drop calls to tools we never declared before they enter the
        // conversation; a call without a matching reply is malformed.
        let calls: Vec<_> = reply
            .tool_calls
            .into_iter()
            .filter(|call| {
                let known = self.registry.find(&call.name).is_some();
                if !known {
                    eprintln!("Warning: model requested unknown tool '{}'", call.name);
                }
                known
            })
            .collect();
        if calls.is_empty() {
            return Ok(());
        }

        turns.push(Turn::ModelCalls(calls.clone()));

        for call in calls {
            let Some(tool) = self.registry.find(&call.name) else {
                continue;
            };

            let invocation = tokio::time::timeout(
                self.tool_timeout,
                tool.invoke(call.parameters.clone(), &self.ctx),
            );
            let result = match self.bounded(deadline, invocation).await? {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => json!({ "error": e.to_string() }),
                Err(_) => json!({
                    "error": format!("tool timed out after {}s", self.tool_timeout.as_secs())
                }),
            };

            records.push(ToolCallRecord {
                name: call.name.clone(),
                parameters: call.parameters,
                result: result.clone(),
            });

            let mut payload = result;
            let directive = directive_for(&call.name, &payload);
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("instruction".to_string(), json!(directive));
            }
            turns.push(Turn::ToolReply {
                name: call.name,
                payload,
            });
        }

        Ok(())
    }

    /// Race a future against the request deadline.
    async fn bounded<T>(
        &self,
        deadline: Option<tokio::time::Instant>,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T, TaskError> {
        match deadline {
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| TaskError::Cancelled),
            None => Ok(fut.await),
        }
    }
}

/// Pick the follow-up instruction accompanying a tool result.
///
/// These steer the model to answer instead of re-issuing the same call.
fn directive_for(tool: &str, payload: &Value) -> &'static str {
    let succeeded = payload.get("success").and_then(|v| v.as_bool()) == Some(true);

    match tool {
        "searchDocuments" => {
            let count = payload.get("count").and_then(|v| v.as_u64()).unwrap_or(0);
            if succeeded && count > 0 {
                "Documents found: present them to the user in their language; do not call tools again."
            } else {
                "No documents matched: tell the user in their language; do not call tools again."
            }
        }
        "summarizeDocument" => {
            if succeeded {
                "Summary ready: present it in the user's language; do not call tools again."
            } else {
                "Document not found: tell the user courteously in their language; do not call tools again."
            }
        }
        "sendEmail" => {
            if succeeded {
                "Email sent: confirm to the user in their language; do not call tools again."
            } else {
                "Email could not be sent: explain the problem to the user; do not call tools again."
            }
        }
        "getDocumentStats" => {
            "Statistics retrieved: report them in the user's language; do not call tools again."
        }
        _ => "Use this result to answer; do not repeat the same call.",
    }
}

/// Build the user-facing answer from the model's closing text and the
/// recorded tool results, in priority order: search hits, summaries,
/// sent emails, plain text.
fn compose_answer(text: &str, records: &[ToolCallRecord]) -> String {
    let search_rows: Vec<&Value> = records
        .iter()
        .filter(|r| r.name == "searchDocuments")
        .filter_map(|r| r.result.get("results").and_then(|v| v.as_array()))
        .flatten()
        .collect();

    if !search_rows.is_empty() {
        let mut answer = text.trim_end().to_string();
        answer.push('\n');
        for (i, row) in search_rows.iter().enumerate() {
            let folder = row
                .get("folderPath")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let file = row
                .get("fileName")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let link = row
                .get("googleLink")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if folder.is_empty() {
                answer.push_str(&format!("\n{}. {} ([Open]({}))", i + 1, file, link));
            } else {
                answer.push_str(&format!(
                    "\n{}. {} / {} ([Open]({}))",
                    i + 1,
                    folder,
                    file,
                    link
                ));
            }
        }
        return answer;
    }

    let summaries: Vec<&Value> = records
        .iter()
        .filter(|r| r.name == "summarizeDocument")
        .filter(|r| r.result.get("success").and_then(|v| v.as_bool()) == Some(true))
        .map(|r| &r.result)
        .collect();

    if !summaries.is_empty() {
        let mut answer = text.trim_end().to_string();
        for summary in summaries {
            let name = summary
                .get("documentName")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let ext = summary
                .get("extension")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let folder = summary
                .get("folderPath")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let link = summary
                .get("googleLink")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            answer.push_str(&format!("\n\n📄 {}{}", name, ext));
            if !folder.is_empty() {
                answer.push_str(&format!("\n📂 {}", folder));
            }
            if !link.is_empty() {
                answer.push_str(&format!("\n[Open]({})", link));
            }
        }
        return answer;
    }

    let emails: Vec<&Value> = records
        .iter()
        .filter(|r| r.name == "sendEmail")
        .filter(|r| r.result.get("success").and_then(|v| v.as_bool()) == Some(true))
        .filter_map(|r| r.result.get("sentEmail"))
        .collect();

    if !emails.is_empty() {
        let mut answer = text.trim_end().to_string();
        for email in emails {
            let to = email.get("to").and_then(|v| v.as_str()).unwrap_or_default();
            let subject = email
                .get("subject")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let body = email
                .get("body")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            answer.push_str(&format!("\n\n📧 {}\nSubject: {}\n{}", to, subject, body));
        }
        return answer;
    }

    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_codes() {
        assert_eq!(TaskError::BadRequest("x".into()).code(), "bad_request");
        assert_eq!(TaskError::MaxIterations(5).code(), "max_iterations");
        assert_eq!(TaskError::Cancelled.code(), "cancelled");
        assert_eq!(TaskError::ModelFailure("x".into()).code(), "internal");
    }

    #[test]
    fn directive_depends_on_result() {
        let found = json!({ "success": true, "count": 2 });
        assert!(directive_for("searchDocuments", &found).starts_with("Documents found"));

        let none = json!({ "success": true, "count": 0 });
        assert!(directive_for("searchDocuments", &none).starts_with("No documents"));

        let failed = json!({ "error": "boom" });
        assert!(directive_for("sendEmail", &failed).starts_with("Email could not"));
    }

    #[test]
    fn answer_enumerates_search_hits() {
        let records = vec![ToolCallRecord {
            name: "searchDocuments".to_string(),
            parameters: json!({}),
            result: json!({
                "success": true,
                "count": 1,
                "results": [{
                    "folderPath": "jelena subfolder",
                    "fileName": "Nested doc 2.docx",
                    "googleLink": "https://docs.google.com/document/d/x1",
                    "path": "Drive/jelena subfolder/Nested doc 2.docx",
                    "distance": "0.2000",
                }],
            }),
        }];
        let answer = compose_answer("Pronašla sam dokument.", &records);
        assert!(answer.starts_with("Pronašla sam dokument."));
        assert!(answer.contains("1. jelena subfolder / Nested doc 2.docx"));
        assert!(answer.contains("[Open](https://docs.google.com/document/d/x1)"));
    }

    #[test]
    fn answer_falls_back_to_text() {
        let records = vec![ToolCallRecord {
            name: "summarizeDocument".to_string(),
            parameters: json!({}),
            result: json!({ "success": false, "message": "not found" }),
        }];
        assert_eq!(compose_answer("Nije pronađen.", &records), "Nije pronađen.");
    }
}
