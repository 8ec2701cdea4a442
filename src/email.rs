//! Email sending capability.
//!
//! The core consumes a single operation: `send(to, subject, html_body)`.
//! The production implementation posts a base64url-encoded RFC 822
//! message to the Gmail REST API with the same bearer token the drive
//! client uses. Deployments without email configured get
//! [`DisabledSender`], which turns every send into a tool-level error the
//! agent can explain to the user.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine as _;

const GMAIL_SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

/// One-operation email capability.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()>;
}

/// Gmail REST sender.
pub struct GmailSender {
    client: reqwest::Client,
    token: String,
}

impl GmailSender {
    /// Create a sender reading the bearer token from `GOOGLE_OAUTH_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("GOOGLE_OAUTH_TOKEN")
            .map_err(|_| anyhow::anyhow!("GOOGLE_OAUTH_TOKEN environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self { client, token })
    }
}

/// Build the base64url `raw` payload Gmail expects.
fn encode_raw_message(to: &str, subject: &str, html_body: &str) -> String {
    let raw = format!(
        "To: {}\r\nSubject: {}\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}\r\n",
        to, subject, html_body
    );
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

#[async_trait]
impl EmailSender for GmailSender {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        let body = serde_json::json!({ "raw": encode_raw_message(to, subject, html_body) });

        let resp = self
            .client
            .post(GMAIL_SEND_URL)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("gmail send error {}: {}", status, text);
        }
        Ok(())
    }
}

/// Sender used when email is not configured; every send fails with a
/// descriptive message that becomes a recoverable tool result.
pub struct DisabledSender;

#[async_trait]
impl EmailSender for DisabledSender {
    async fn send(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<()> {
        bail!("email sending is not configured for this deployment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_is_base64url() {
        let encoded = encode_raw_message("a@b.com", "Hi", "<p>x</p>");
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));

        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .unwrap();
        let text = String::from_utf8(decoded).unwrap();
        assert!(text.starts_with("To: a@b.com\r\nSubject: Hi\r\n"));
        assert!(text.contains("<p>x</p>"));
    }

    #[tokio::test]
    async fn disabled_sender_errors() {
        let err = DisabledSender
            .send("a@b.com", "s", "b")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
