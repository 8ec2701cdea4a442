//! In-memory fakes shared by the integration tests.
//!
//! Each fake records the calls it receives and replays scripted
//! responses, so tests can assert on both behavior and interaction order
//! without any network access.

// Each integration binary uses its own subset of these fakes.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use drive_agent::drive::DriveClient;
use drive_agent::email::EmailSender;
use drive_agent::model::{ModelClient, ModelReply, ToolCall, ToolChoice, ToolDeclaration, Turn};
use drive_agent::models::DriveFile;

// ============ Scripted model ============

/// What the orchestrator passed to one `chat_with_tools` call.
pub struct RecordedModelCall {
    pub choice: ToolChoice,
    pub turn_count: usize,
}

/// A model fake that replays canned replies in order and records every
/// call. Embeddings are deterministic: explicitly registered vectors win,
/// otherwise a stable hash-derived vector is produced.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    chat_replies: Mutex<VecDeque<String>>,
    embeddings: Mutex<HashMap<String, Vec<f32>>>,
    pub calls: Mutex<Vec<RecordedModelCall>>,
    pub chat_prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            chat_replies: Mutex::new(VecDeque::new()),
            embeddings: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            chat_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Register a fixed embedding for a text (queries or documents).
    pub fn with_embedding(self, text: &str, vector: Vec<f32>) -> Self {
        self.embeddings
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
        self
    }

    /// Queue a reply for plain `chat` calls (summaries).
    pub fn with_chat_reply(self, reply: &str) -> Self {
        self.chat_replies
            .lock()
            .unwrap()
            .push_back(reply.to_string());
        self
    }
}

/// Stable 8-dim embedding derived from the text bytes (FNV-1a).
fn default_embedding(text: &str) -> Vec<f32> {
    let mut hash: u32 = 2166136261;
    for byte in text.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    (0..8)
        .map(|i| (((hash >> (i * 4)) & 0xF) as f32 + 1.0) / 16.0)
        .collect()
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn chat(&self, prompt: &str) -> Result<String> {
        self.chat_prompts.lock().unwrap().push(prompt.to_string());
        Ok(self
            .chat_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "scripted summary".to_string()))
    }

    async fn chat_with_tools(
        &self,
        turns: &[Turn],
        _tools: &[ToolDeclaration],
        choice: ToolChoice,
    ) -> Result<ModelReply> {
        // Emulate the suspension point a real network call has, so
        // deadline handling is exercised the way it is in production.
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push(RecordedModelCall {
            choice,
            turn_count: turns.len(),
        });
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => Ok(reply),
            None => bail!("scripted model ran out of replies"),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.embeddings.lock().unwrap().get(text) {
            return Ok(vector.clone());
        }
        Ok(default_embedding(text))
    }
}

/// Reply carrying exactly one tool call.
pub fn reply_with_call(name: &str, parameters: serde_json::Value) -> ModelReply {
    ModelReply {
        text: None,
        tool_calls: vec![ToolCall {
            name: name.to_string(),
            parameters,
        }],
    }
}

/// Reply carrying final text.
pub fn reply_with_text(text: &str) -> ModelReply {
    ModelReply {
        text: Some(text.to_string()),
        tool_calls: Vec::new(),
    }
}

// ============ Fake drive ============

/// An in-memory drive: a flat listing plus per-id byte content and
/// scripted sheet reads.
#[derive(Default)]
pub struct FakeDrive {
    pub files: Mutex<Vec<DriveFile>>,
    pub contents: Mutex<HashMap<String, Vec<u8>>>,
    pub sheets: Mutex<HashMap<String, String>>,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_text_file(&self, id: &str, name: &str, folder: &str, modified: &str, body: &str) {
        self.files.lock().unwrap().push(DriveFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: "text/plain".to_string(),
            folder_path: folder.to_string(),
            modified_time: modified.to_string(),
        });
        self.contents
            .lock()
            .unwrap()
            .insert(id.to_string(), body.as_bytes().to_vec());
    }

    pub fn remove_file(&self, id: &str) {
        self.files.lock().unwrap().retain(|f| f.id != id);
        self.contents.lock().unwrap().remove(id);
    }

    pub fn touch_file(&self, id: &str, modified: &str, body: &str) {
        let mut files = self.files.lock().unwrap();
        if let Some(file) = files.iter_mut().find(|f| f.id == id) {
            file.modified_time = modified.to_string();
        }
        self.contents
            .lock()
            .unwrap()
            .insert(id.to_string(), body.as_bytes().to_vec());
    }
}

#[async_trait]
impl DriveClient for FakeDrive {
    async fn list_tree(&self, _root: &str, _max_folders: usize) -> Result<Vec<DriveFile>> {
        Ok(self.files.lock().unwrap().clone())
    }

    async fn download(&self, file_id: &str, _mime_type: &str, dest: &Path) -> Result<u64> {
        let contents = self.contents.lock().unwrap();
        let Some(bytes) = contents.get(file_id) else {
            bail!("no content scripted for {}", file_id);
        };
        std::fs::write(dest, bytes)?;
        Ok(bytes.len() as u64)
    }

    async fn read_sheet(&self, file_id: &str) -> Result<String> {
        match self.sheets.lock().unwrap().get(file_id) {
            Some(text) => Ok(text.clone()),
            None => bail!("no sheet scripted for {}", file_id),
        }
    }
}

// ============ Recording mailer ============

pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Email fake: records sends, optionally failing every one.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentMail>>,
    pub fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        if self.fail {
            bail!("smtp relay rejected the message");
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });
        Ok(())
    }
}
