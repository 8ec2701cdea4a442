//! Google Drive client.
//!
//! Lists folder trees, downloads file content, and reads native
//! spreadsheets through the Drive v3 and Sheets v4 REST APIs with bearer
//! token authentication (`GOOGLE_OAUTH_TOKEN`).
//!
//! # Traversal
//!
//! [`GoogleDriveClient::list_tree`] walks the folder tree iteratively:
//! a FIFO of `(folder_id, relative_path)` pairs plus a visited set, so
//! shortcut cycles cannot recurse, bounded by `max_folders` (on hit the
//! walk stops with a warning and partial results). Listing pages use the
//! `nextPageToken` continuation mechanism. A failure listing one folder
//! is logged and skipped; it never aborts the traversal.
//!
//! # Native Formats
//!
//! Files stored in Google's own formats cannot be downloaded as-is; they
//! are exported server-side to a portable MIME first:
//!
//! | Source MIME | Export MIME |
//! |-------------|-------------|
//! | native document | DOCX |
//! | native spreadsheet | XLSX |
//! | native presentation | PDF |
//!
//! # Link Derivation
//!
//! | MIME | URL template |
//! |------|--------------|
//! | native document | `https://docs.google.com/document/d/<id>` |
//! | native spreadsheet | `https://docs.google.com/spreadsheets/d/<id>` |
//! | native presentation | `https://docs.google.com/presentation/d/<id>` |
//! | anything else | `https://drive.google.com/file/d/<id>` |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::extract;
use crate::models::DriveFile;

pub const MIME_GOOGLE_DOC: &str = "application/vnd.google-apps.document";
pub const MIME_GOOGLE_SHEET: &str = "application/vnd.google-apps.spreadsheet";
pub const MIME_GOOGLE_SLIDES: &str = "application/vnd.google-apps.presentation";
pub const MIME_GOOGLE_FOLDER: &str = "application/vnd.google-apps.folder";

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";

/// Derive the browser link for a file from its id and MIME type.
pub fn drive_link(id: &str, mime_type: &str) -> String {
    match mime_type {
        MIME_GOOGLE_DOC => format!("https://docs.google.com/document/d/{}", id),
        MIME_GOOGLE_SHEET => format!("https://docs.google.com/spreadsheets/d/{}", id),
        MIME_GOOGLE_SLIDES => format!("https://docs.google.com/presentation/d/{}", id),
        _ => format!("https://drive.google.com/file/d/{}", id),
    }
}

/// Export target for native Google formats; `None` for direct downloads.
pub fn export_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        MIME_GOOGLE_DOC => Some(extract::MIME_DOCX),
        MIME_GOOGLE_SHEET => Some(extract::MIME_XLSX),
        MIME_GOOGLE_SLIDES => Some(extract::MIME_PDF),
        _ => None,
    }
}

/// The MIME type the downloaded bytes actually carry (the export target
/// for native formats, the drive MIME otherwise).
pub fn effective_mime(mime_type: &str) -> &str {
    export_mime(mime_type).unwrap_or(mime_type)
}

/// File extension recorded in document metadata, derived from the MIME.
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        extract::MIME_PDF | MIME_GOOGLE_SLIDES => ".pdf",
        extract::MIME_DOCX | MIME_GOOGLE_DOC | "application/msword" => ".docx",
        extract::MIME_XLSX | MIME_GOOGLE_SHEET => ".xlsx",
        "text/plain" => ".txt",
        "text/markdown" => ".md",
        "text/csv" => ".csv",
        _ => "",
    }
}

/// The remote drive capability consumed by the ingestion pipeline.
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Enumerate every file under `root_folder_id`, breadth-first,
    /// visiting at most `max_folders` folders.
    async fn list_tree(&self, root_folder_id: &str, max_folders: usize) -> Result<Vec<DriveFile>>;

    /// Download (exporting native formats first) into `dest`. Completion
    /// is signaled only after the final chunk is written. Returns the
    /// number of bytes written.
    async fn download(&self, file_id: &str, mime_type: &str, dest: &Path) -> Result<u64>;

    /// Read a native spreadsheet sheet-by-sheet through the structured
    /// API, skipping empty cells.
    async fn read_sheet(&self, file_id: &str) -> Result<String>;
}

/// Production Drive client over the Google REST APIs.
pub struct GoogleDriveClient {
    client: reqwest::Client,
    token: String,
}

impl GoogleDriveClient {
    /// Create a client reading the bearer token from `GOOGLE_OAUTH_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("GOOGLE_OAUTH_TOKEN")
            .map_err(|_| anyhow::anyhow!("GOOGLE_OAUTH_TOKEN environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self { client, token })
    }

    /// Fetch one listing page of a folder's children.
    async fn list_page(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<(Vec<serde_json::Value>, Option<String>)> {
        let mut url = format!(
            "{}/files?q='{}'+in+parents+and+trashed=false\
             &fields=nextPageToken,files(id,name,mimeType,modifiedTime)&pageSize=1000",
            DRIVE_API_BASE, folder_id
        );
        if let Some(token) = page_token {
            url.push_str("&pageToken=");
            url.push_str(token);
        }

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("drive listing request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("drive listing error {}: {}", status, body);
        }

        let json: serde_json::Value = resp.json().await?;
        let files = json
            .get("files")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let next = json
            .get("nextPageToken")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok((files, next))
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    async fn list_tree(&self, root_folder_id: &str, max_folders: usize) -> Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut queue: VecDeque<(String, String)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut folders_seen = 0usize;

        queue.push_back((root_folder_id.to_string(), String::new()));
        visited.insert(root_folder_id.to_string());

        while let Some((folder_id, relative_path)) = queue.pop_front() {
            if folders_seen >= max_folders {
                eprintln!(
                    "Warning: folder traversal bound reached ({}); returning partial listing",
                    max_folders
                );
                break;
            }
            folders_seen += 1;

            let mut page_token: Option<String> = None;
            loop {
                let (children, next) =
                    match self.list_page(&folder_id, page_token.as_deref()).await {
                        Ok(page) => page,
                        Err(e) => {
                            eprintln!("Warning: skipping folder {}: {}", folder_id, e);
                            break;
                        }
                    };

                for child in children {
                    let id = child.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                    let name = child
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let mime = child
                        .get("mimeType")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    if id.is_empty() {
                        continue;
                    }

                    if mime == MIME_GOOGLE_FOLDER {
                        if visited.insert(id.to_string()) {
                            let child_path = if relative_path.is_empty() {
                                name.to_string()
                            } else {
                                format!("{}/{}", relative_path, name)
                            };
                            queue.push_back((id.to_string(), child_path));
                        }
                    } else {
                        files.push(DriveFile {
                            id: id.to_string(),
                            name: name.to_string(),
                            mime_type: mime.to_string(),
                            folder_path: relative_path.clone(),
                            modified_time: child
                                .get("modifiedTime")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                        });
                    }
                }

                match next {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
        }

        Ok(files)
    }

    async fn download(&self, file_id: &str, mime_type: &str, dest: &Path) -> Result<u64> {
        let url = match export_mime(mime_type) {
            Some(target) => format!(
                "{}/files/{}/export?mimeType={}",
                DRIVE_API_BASE,
                file_id,
                urlencode(target)
            ),
            None => format!("{}/files/{}?alt=media", DRIVE_API_BASE, file_id),
        };

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("download request failed for {}", file_id))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("drive download error {} for {}: {}", status, file_id, body);
        }

        let mut resp = resp;
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("cannot create {}", dest.display()))?;
        let mut written = 0u64;

        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    async fn read_sheet(&self, file_id: &str) -> Result<String> {
        // Enumerate sheet tabs first
        let url = format!(
            "{}/spreadsheets/{}?fields=sheets.properties.title",
            SHEETS_API_BASE, file_id
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("sheets metadata request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("sheets metadata error {}: {}", status, body);
        }

        let json: serde_json::Value = resp.json().await?;
        let titles: Vec<String> = json
            .get("sheets")
            .and_then(|v| v.as_array())
            .map(|sheets| {
                sheets
                    .iter()
                    .filter_map(|s| s.pointer("/properties/title"))
                    .filter_map(|t| t.as_str())
                    .map(|t| t.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let mut out = String::new();
        for title in titles {
            let url = format!(
                "{}/spreadsheets/{}/values/{}",
                SHEETS_API_BASE,
                file_id,
                urlencode(&title)
            );
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await
                .context("sheets values request failed")?;

            if !resp.status().is_success() {
                eprintln!(
                    "Warning: skipping sheet '{}' of {}: HTTP {}",
                    title,
                    file_id,
                    resp.status()
                );
                continue;
            }

            let json: serde_json::Value = resp.json().await?;
            let rows = json
                .get("values")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[Sheet: {}]\n", title));
            for row in rows {
                let cells: Vec<String> = row
                    .as_array()
                    .map(|cells| {
                        cells
                            .iter()
                            .filter_map(|c| c.as_str())
                            .filter(|c| !c.trim().is_empty())
                            .map(|c| c.to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                if !cells.is_empty() {
                    out.push_str(&cells.join("\t"));
                    out.push('\n');
                }
            }
        }

        Ok(out)
    }
}

/// Minimal percent-encoding for query parameter values.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
