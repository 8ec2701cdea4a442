//! Integration tests for the agent orchestrator loop, driven end-to-end
//! with scripted fakes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{reply_with_call, reply_with_text, RecordingMailer, ScriptedModel};
use drive_agent::agent::{AgentOrchestrator, TaskError};
use drive_agent::drive::MIME_GOOGLE_DOC;
use drive_agent::email::EmailSender;
use drive_agent::model::{ModelReply, ToolCall, ToolChoice};
use drive_agent::models::{DocMetadata, DocumentInput};
use drive_agent::tools::{ToolContext, ToolRegistry};
use drive_agent::vector_store::{DocumentStore, MemoryBackend};
use serde_json::json;

fn store_with(model: Arc<ScriptedModel>) -> DocumentStore {
    DocumentStore::new(Arc::new(MemoryBackend::default()), model, "Drive")
}

fn orchestrator(
    model: Arc<ScriptedModel>,
    store: DocumentStore,
    email: Arc<dyn EmailSender>,
) -> AgentOrchestrator {
    let ctx = ToolContext {
        store,
        email,
        model: model.clone(),
        distance_cutoff: None,
    };
    AgentOrchestrator::new(
        model,
        ToolRegistry::with_builtins(),
        ctx,
        Duration::from_secs(30),
    )
}

async fn seed_doc(
    store: &DocumentStore,
    id: &str,
    name: &str,
    folder: &str,
    mime: &str,
    extension: &str,
    text: &str,
) {
    store
        .add_many(&[DocumentInput {
            id: id.to_string(),
            text: text.to_string(),
            metadata: DocMetadata {
                name: name.to_string(),
                mime_type: mime.to_string(),
                folder_path: folder.to_string(),
                modified_time: "2024-01-01T00:00:00Z".to_string(),
                extension: extension.to_string(),
                drive_link: String::new(),
            },
        }])
        .await
        .unwrap();
}

#[tokio::test]
async fn forced_tool_use_on_first_iteration_only() {
    let model = Arc::new(ScriptedModel::new(vec![
        reply_with_call("getDocumentStats", json!({})),
        reply_with_text("There are no documents yet."),
    ]));
    let store = store_with(model.clone());
    let agent = orchestrator(model.clone(), store, Arc::new(RecordingMailer::new()));

    let outcome = agent.execute_task("how many documents?", 5, None).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.iterations, 2);

    let calls = model.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].choice, ToolChoice::Required);
    assert_eq!(calls[1].choice, ToolChoice::Auto);
    // the second call sees the tool-call and tool-reply turns
    assert!(calls[1].turn_count > calls[0].turn_count);
}

#[tokio::test]
async fn search_hit_answer_enumerates_documents() {
    let model = Arc::new(ScriptedModel::new(vec![
        reply_with_call(
            "searchDocuments",
            json!({ "query": "Jelena", "keyword": "Jelena", "nResults": 10 }),
        ),
        reply_with_text("Jelena se spominje u jednom dokumentu."),
    ]));
    let store = store_with(model.clone());
    seed_doc(
        &store,
        "d1",
        "Nested doc 2",
        "jelena subfolder",
        MIME_GOOGLE_DOC,
        ".docx",
        "Contract with client Jelena dated 2024.",
    )
    .await;

    let agent = orchestrator(model, store, Arc::new(RecordingMailer::new()));
    let outcome = agent
        .execute_task("Gde se spominje Jelena?", 5, None)
        .await
        .unwrap();

    assert!(outcome.answer.starts_with("Jelena se spominje u jednom dokumentu."));
    assert!(outcome.answer.contains("jelena subfolder"));
    assert!(outcome.answer.contains("Nested doc 2.docx"));
    // drive_link was not stored, so it is derived from (id, mimeType)
    assert!(outcome
        .answer
        .contains("[Open](https://docs.google.com/document/d/d1)"));

    assert_eq!(outcome.tool_calls.len(), 1);
    assert_eq!(outcome.tool_calls[0].result["count"], 1);
}

#[tokio::test]
async fn summarize_document_uses_exact_name_match() {
    let model = Arc::new(
        ScriptedModel::new(vec![
            reply_with_call(
                "summarizeDocument",
                json!({ "documentName": "OPENAI VS CLAUDE", "query": "summary of OPENAI VS CLAUDE" }),
            ),
            reply_with_text("Evo sažetka."),
        ])
        .with_chat_reply("Comparison of two assistants."),
    );
    let store = store_with(model.clone());
    seed_doc(
        &store,
        "d2",
        "OPENAI VS CLAUDE",
        "research",
        "application/pdf",
        ".pdf",
        "A long comparison of assistant models across many benchmarks.",
    )
    .await;

    let agent = orchestrator(model.clone(), store, Arc::new(RecordingMailer::new()));
    let outcome = agent
        .execute_task("Napravi sažetak dokumenta OPENAI VS CLAUDE", 5, None)
        .await
        .unwrap();

    let result = &outcome.tool_calls[0].result;
    assert_eq!(result["success"], true);
    assert_eq!(result["documentName"], "OPENAI VS CLAUDE");
    assert_eq!(result["summary"], "Comparison of two assistants.");

    // the summary went through a separate plain chat call with the word bound
    let prompts = model.chat_prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("at most 200 words"));

    assert!(outcome.answer.contains("Evo sažetka."));
    assert!(outcome.answer.contains("📄 OPENAI VS CLAUDE.pdf"));
    assert!(outcome.answer.contains("research"));
}

#[tokio::test]
async fn send_email_confirms_with_sent_mail_block() {
    let model = Arc::new(ScriptedModel::new(vec![
        reply_with_call(
            "sendEmail",
            json!({ "to": "a@b.com", "subject": "Weekly summary", "message": "All good." }),
        ),
        reply_with_text("Email je poslat."),
    ]));
    let store = store_with(model.clone());
    let mailer = Arc::new(RecordingMailer::new());
    let agent = orchestrator(model, store, mailer.clone());

    let outcome = agent
        .execute_task("Email summary to a@b.com", 5, None)
        .await
        .unwrap();

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@b.com");

    assert!(outcome.answer.contains("Email je poslat."));
    assert!(outcome.answer.contains("📧 a@b.com"));
    assert!(outcome.answer.contains("Subject: Weekly summary"));
    assert!(outcome.answer.contains("All good."));
}

#[tokio::test]
async fn failed_email_becomes_recoverable_tool_result() {
    let model = Arc::new(ScriptedModel::new(vec![
        reply_with_call(
            "sendEmail",
            json!({ "to": "a@b.com", "subject": "s", "message": "m" }),
        ),
        reply_with_text("Slanje nije uspelo, pokušajte kasnije."),
    ]));
    let store = store_with(model.clone());
    let agent = orchestrator(model, store, Arc::new(RecordingMailer::failing()));

    let outcome = agent.execute_task("email this", 5, None).await.unwrap();

    // the failure is a tool result, not a fatal error
    assert!(outcome.tool_calls[0].result["error"]
        .as_str()
        .unwrap()
        .contains("smtp relay"));
    // no email block is appended to the answer
    assert_eq!(outcome.answer, "Slanje nije uspelo, pokušajte kasnije.");
}

#[tokio::test]
async fn missing_document_yields_not_found_result() {
    let model = Arc::new(ScriptedModel::new(vec![
        reply_with_call(
            "summarizeDocument",
            json!({ "documentName": "Ghost.pdf", "query": "summary" }),
        ),
        reply_with_text("Taj dokument ne postoji u bazi."),
    ]));
    let store = store_with(model.clone());
    let agent = orchestrator(model, store, Arc::new(RecordingMailer::new()));

    let outcome = agent.execute_task("summarize Ghost.pdf", 5, None).await.unwrap();

    let result = &outcome.tool_calls[0].result;
    assert_eq!(result["success"], false);
    assert!(result["message"].as_str().unwrap().contains("not found"));
    assert_eq!(outcome.answer, "Taj dokument ne postoji u bazi.");
}

#[tokio::test]
async fn unknown_tool_is_skipped_and_loop_continues() {
    let model = Arc::new(ScriptedModel::new(vec![
        ModelReply {
            text: None,
            tool_calls: vec![ToolCall {
                name: "deleteEverything".to_string(),
                parameters: json!({}),
            }],
        },
        reply_with_text("Ne mogu to da uradim."),
    ]));
    let store = store_with(model.clone());
    let agent = orchestrator(model, store, Arc::new(RecordingMailer::new()));

    let outcome = agent.execute_task("wipe the corpus", 5, None).await.unwrap();

    assert!(outcome.success);
    assert!(outcome.tool_calls.is_empty());
    assert_eq!(outcome.iterations, 2);
}

#[tokio::test]
async fn tool_calls_execute_in_emission_order() {
    let model = Arc::new(ScriptedModel::new(vec![
        ModelReply {
            text: None,
            tool_calls: vec![
                ToolCall {
                    name: "getDocumentStats".to_string(),
                    parameters: json!({}),
                },
                ToolCall {
                    name: "searchDocuments".to_string(),
                    parameters: json!({ "query": "anything" }),
                },
            ],
        },
        reply_with_text("done"),
    ]));
    let store = store_with(model.clone());
    let agent = orchestrator(model, store, Arc::new(RecordingMailer::new()));

    let outcome = agent.execute_task("stats then search", 5, None).await.unwrap();

    assert_eq!(outcome.tool_calls.len(), 2);
    assert_eq!(outcome.tool_calls[0].name, "getDocumentStats");
    assert_eq!(outcome.tool_calls[1].name, "searchDocuments");
}

#[tokio::test]
async fn max_iterations_one_with_tool_calls_fails() {
    let model = Arc::new(ScriptedModel::new(vec![reply_with_call(
        "getDocumentStats",
        json!({}),
    )]));
    let store = store_with(model.clone());
    let agent = orchestrator(model, store, Arc::new(RecordingMailer::new()));

    let err = agent.execute_task("stats", 1, None).await.unwrap_err();
    assert!(matches!(err, TaskError::MaxIterations(1)));
    assert_eq!(err.code(), "max_iterations");
}

#[tokio::test]
async fn empty_prompt_is_bad_request() {
    let model = Arc::new(ScriptedModel::new(vec![]));
    let store = store_with(model.clone());
    let agent = orchestrator(model.clone(), store, Arc::new(RecordingMailer::new()));

    let err = agent.execute_task("   ", 5, None).await.unwrap_err();
    assert!(matches!(err, TaskError::BadRequest(_)));
    // the model was never invoked
    assert!(model.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn text_on_forced_iteration_is_model_failure() {
    let model = Arc::new(ScriptedModel::new(vec![reply_with_text(
        "I refuse to use tools.",
    )]));
    let store = store_with(model.clone());
    let agent = orchestrator(model, store, Arc::new(RecordingMailer::new()));

    let err = agent.execute_task("search something", 5, None).await.unwrap_err();
    assert!(matches!(err, TaskError::ModelFailure(_)));
}

#[tokio::test]
async fn empty_reply_is_model_failure() {
    let model = Arc::new(ScriptedModel::new(vec![
        reply_with_call("getDocumentStats", json!({})),
        ModelReply::default(),
    ]));
    let store = store_with(model.clone());
    let agent = orchestrator(model, store, Arc::new(RecordingMailer::new()));

    let err = agent.execute_task("stats", 5, None).await.unwrap_err();
    assert!(matches!(err, TaskError::ModelFailure(_)));
}

#[tokio::test]
async fn deadline_cancels_the_task() {
    let model = Arc::new(ScriptedModel::new(vec![
        reply_with_call("getDocumentStats", json!({})),
        reply_with_text("done"),
    ]));
    let store = store_with(model.clone());
    let agent = orchestrator(model, store, Arc::new(RecordingMailer::new()));

    let deadline = tokio::time::Instant::now() - Duration::from_millis(1);
    let err = agent
        .execute_task("stats", 5, Some(deadline))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::Cancelled));
}
