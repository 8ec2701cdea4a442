//! Core data models used throughout Drive Agent.
//!
//! These types represent the files, documents, and search results that flow
//! through the ingestion and retrieval pipeline. The data lifecycle is:
//!
//! ```text
//! DriveClient → DriveFile → download/extract → DocumentInput → embed()
//!                                                    ↓
//!                                            DocumentStore (upsert)
//!                                                    ↓
//!                                            search() → SearchHit
//! ```
//!
//! # Type Relationships
//!
//! - A **[`DriveFile`]** is produced by the drive listing before any
//!   download or storage. Folders are traversal nodes only and never
//!   appear as `DriveFile`s.
//! - A **[`DocumentInput`]** is a fully-extracted document ready for
//!   embedding and upsert.
//! - A **[`StoredDocument`]** is the stored representation read back from
//!   the vector backend; `(id, metadata.modified_time)` is the identity
//!   the sync pipeline uses to decide "unchanged".
//! - A **[`SearchHit`]** is returned by the store façade with a distance
//!   score and display fields.

use serde::{Deserialize, Serialize};

/// In-memory descriptor of a drive file observed during sync.
///
/// # Fields
///
/// | Field | Description |
/// |-------|-------------|
/// | `id` | Drive file identifier, stable across renames and moves |
/// | `name` | File name as shown in the drive UI |
/// | `mime_type` | Drive MIME type (native Google types included) |
/// | `folder_path` | Slash-joined folder chain below the configured root (empty at the root) |
/// | `modified_time` | Canonical modification timestamp (RFC 3339) from the drive |
#[derive(Debug, Clone, PartialEq)]
pub struct DriveFile {
    /// Drive file identifier (stable across renames/moves).
    pub id: String,
    /// File name.
    pub name: String,
    /// Drive MIME type.
    pub mime_type: String,
    /// Folder path below the sync root, `/`-joined; empty for root-level files.
    pub folder_path: String,
    /// RFC 3339 modification timestamp reported by the drive.
    pub modified_time: String,
}

/// Side metadata stored with every document in the vector store.
///
/// Immutable once written for a given `(id, modified_time)` pair. The
/// `drive_link` is stored so search results do not need to re-derive it;
/// [`crate::drive::drive_link`] re-derives it when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocMetadata {
    pub name: String,
    pub mime_type: String,
    pub folder_path: String,
    pub modified_time: String,
    pub extension: String,
    #[serde(default)]
    pub drive_link: String,
}

/// A document ready for embedding and upsert into the store.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub id: String,
    pub text: String,
    pub metadata: DocMetadata,
}

/// A document as read back from the vector backend.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: DocMetadata,
}

/// A search result returned from the store façade.
///
/// `distance` is the nearest-neighbor dissimilarity (lower is more
/// similar). `keyword_count` is 0 unless the search supplied a keyword,
/// in which case it is the number of case-insensitive matches in `text`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(skip_serializing)]
    pub text: String,
    pub metadata: DocMetadata,
    pub distance: f32,
    pub keyword_count: usize,
    /// Display path: `{root_name}/{folder_path}/{name}{extension}`.
    pub path: String,
    pub drive_link: String,
}

/// Persistent record of the last successful ingestion run.
///
/// Serialized as a JSON object at a configured path; an absent or
/// partially-written file is treated as "no prior sync".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCacheRecord {
    /// RFC 3339 timestamp taken at the start of the run.
    pub last_sync_time: String,
    /// Number of files seen in the drive listing.
    pub file_count: u64,
}

/// Collection statistics reported by the store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub count: u64,
    pub name: String,
}
