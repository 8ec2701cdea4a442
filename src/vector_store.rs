//! Vector store façade and backends.
//!
//! The [`VectorBackend`] trait defines the raw storage operations the core
//! depends on (upsert, nearest-neighbor query, scan, delete, count, reset),
//! enabling pluggable backends:
//!
//! - **[`MemoryBackend`]** — brute-force cosine distance over an in-process
//!   map; used by tests and single-binary local runs.
//! - **[`HttpBackend`]** — REST client for a Chroma-style vector database.
//!
//! [`DocumentStore`] is the façade the rest of the system talks to. It owns
//! embedding (via [`ModelClient`]), lexical keyword refinement, metadata
//! filtering, distance gating, and display formatting (paths and drive
//! links). Backends never see query text, only vectors.
//!
//! # Search Pipeline
//!
//! `search(query, n, opts)` applies, in order:
//!
//! 1. embed the query;
//! 2. fetch `3n` candidates when a keyword is set (to survive filtering),
//!    else `n`, ascending by distance;
//! 3. restrict candidates to the exact-match metadata filter, if set
//!    (pushed down to the backend, the way a `where` clause is);
//! 4. retain rows containing the keyword (case-insensitive), annotate each
//!    with its match count, and sort by (`-keyword_count`, `+distance`);
//! 5. drop rows beyond the distance gate, if set;
//! 6. truncate to `n`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::drive;
use crate::model::ModelClient;
use crate::models::{DocMetadata, DocumentInput, SearchHit, StoredDocument, StoreStats};

/// A raw record as the backend stores it.
#[derive(Debug, Clone)]
pub struct BackendRecord {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
}

/// A nearest-neighbor candidate returned by a backend query.
#[derive(Debug, Clone)]
pub struct BackendHit {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub distance: f32,
}

/// Exact-match metadata filter: every entry must equal the stored field.
pub type MetadataFilter = serde_json::Map<String, serde_json::Value>;

/// Raw vector storage operations.
///
/// Any backend error is a retryable "vector store unavailable" condition;
/// the caller decides whether to retry. The only idempotence guarantee is
/// that `upsert` on an existing id replaces its prior content.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Insert or replace records by id.
    async fn upsert(&self, records: &[BackendRecord]) -> Result<()>;

    /// Top-`n` records by ascending distance to `embedding`, restricted
    /// to records matching `filter` when one is given.
    async fn query(
        &self,
        embedding: &[f32],
        n: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<BackendHit>>;

    /// Every stored record (embeddings omitted). Intended for sync
    /// reconciliation, not user queries.
    async fn get_all(&self) -> Result<Vec<BackendRecord>>;

    /// Delete records by id; unknown ids are ignored.
    async fn delete_many(&self, ids: &[String]) -> Result<()>;

    /// Number of stored records.
    async fn count(&self) -> Result<u64>;

    /// Remove every record.
    async fn reset(&self) -> Result<()>;

    /// Collection name, for stats display.
    fn collection_name(&self) -> &str;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty or mismatched
/// lengths. Backends derive distance as `1.0 - similarity`, so identical
/// vectors are at distance 0 and orthogonal ones at distance 1.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

// ============ In-memory backend ============

/// Brute-force in-memory backend.
///
/// Uses a `HashMap` behind `std::sync::RwLock`; queries score every
/// stored vector by cosine distance. Fine for tests and small corpora.
pub struct MemoryBackend {
    records: RwLock<HashMap<String, BackendRecord>>,
    name: String,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            name: name.into(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new("documents")
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn upsert(&self, records: &[BackendRecord]) -> Result<()> {
        let mut stored = self.records.write().unwrap();
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<BackendHit>> {
        let stored = self.records.read().unwrap();
        let mut hits: Vec<BackendHit> = stored
            .values()
            .filter(|r| match filter {
                Some(f) => metadata_matches(&r.metadata, f),
                None => true,
            })
            .map(|r| BackendHit {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                distance: 1.0 - cosine_similarity(embedding, &r.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(n);
        Ok(hits)
    }

    async fn get_all(&self) -> Result<Vec<BackendRecord>> {
        let stored = self.records.read().unwrap();
        let mut all: Vec<BackendRecord> = stored
            .values()
            .map(|r| BackendRecord {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                embedding: Vec::new(),
            })
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn delete_many(&self, ids: &[String]) -> Result<()> {
        let mut stored = self.records.write().unwrap();
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().unwrap().len() as u64)
    }

    async fn reset(&self) -> Result<()> {
        self.records.write().unwrap().clear();
        Ok(())
    }

    fn collection_name(&self) -> &str {
        &self.name
    }
}

// ============ HTTP backend ============

/// REST client for a Chroma-style vector database.
///
/// Construction is an explicit [`HttpBackend::open`] that gets or creates
/// the collection and records its id; there is no lazy initialization.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    collection_id: String,
    name: String,
}

impl HttpBackend {
    /// Connect to the backend and get-or-create the named collection
    /// with the expected embedding dimensionality.
    ///
    /// # Errors
    ///
    /// Returns a "vector store unavailable" error when the endpoint is
    /// unreachable or rejects the collection request.
    pub async fn open(base_url: &str, collection: &str, dims: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let resp = client
            .post(format!("{}/api/v1/collections", base_url))
            .json(&serde_json::json!({
                "name": collection,
                "get_or_create": true,
                "metadata": { "dimension": dims, "hnsw:space": "cosine" },
            }))
            .send()
            .await
            .with_context(|| format!("vector store unavailable at {}", base_url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("vector store rejected collection request ({}): {}", status, body);
        }

        let json: serde_json::Value = resp.json().await?;
        let collection_id = json
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("vector store returned no collection id"))?
            .to_string();

        Ok(Self {
            client,
            base_url,
            collection_id,
            name: collection.to_string(),
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!(
            "{}/api/v1/collections/{}/{}",
            self.base_url, self.collection_id, suffix
        )
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("vector store unavailable")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("vector store error {}: {}", status, text);
        }
        Ok(resp.json().await.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl VectorBackend for HttpBackend {
    async fn upsert(&self, records: &[BackendRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({
            "ids": records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            "embeddings": records.iter().map(|r| r.embedding.clone()).collect::<Vec<_>>(),
            "documents": records.iter().map(|r| r.text.as_str()).collect::<Vec<_>>(),
            "metadatas": records.iter().map(|r| r.metadata.clone()).collect::<Vec<_>>(),
        });
        self.post_json(&self.collection_url("upsert"), &body).await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<BackendHit>> {
        let mut body = serde_json::json!({
            "query_embeddings": [embedding],
            "n_results": n,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(filter) = filter {
            body["where"] = serde_json::Value::Object(filter.clone());
        }
        let json = self.post_json(&self.collection_url("query"), &body).await?;

        let ids = json.pointer("/ids/0").and_then(|v| v.as_array());
        let docs = json.pointer("/documents/0").and_then(|v| v.as_array());
        let metas = json.pointer("/metadatas/0").and_then(|v| v.as_array());
        let dists = json.pointer("/distances/0").and_then(|v| v.as_array());

        let (ids, docs, metas, dists) = match (ids, docs, metas, dists) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return Ok(Vec::new()),
        };

        let mut hits = Vec::with_capacity(ids.len());
        for i in 0..ids.len() {
            hits.push(BackendHit {
                id: ids[i].as_str().unwrap_or_default().to_string(),
                text: docs
                    .get(i)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                metadata: metas.get(i).cloned().unwrap_or(serde_json::Value::Null),
                distance: dists.get(i).and_then(|v| v.as_f64()).unwrap_or(f64::MAX) as f32,
            });
        }
        Ok(hits)
    }

    async fn get_all(&self) -> Result<Vec<BackendRecord>> {
        let body = serde_json::json!({ "include": ["documents", "metadatas"] });
        let json = self.post_json(&self.collection_url("get"), &body).await?;

        let ids = json.get("ids").and_then(|v| v.as_array());
        let docs = json.get("documents").and_then(|v| v.as_array());
        let metas = json.get("metadatas").and_then(|v| v.as_array());

        let (ids, docs, metas) = match (ids, docs, metas) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => return Ok(Vec::new()),
        };

        let mut all = Vec::with_capacity(ids.len());
        for i in 0..ids.len() {
            all.push(BackendRecord {
                id: ids[i].as_str().unwrap_or_default().to_string(),
                text: docs
                    .get(i)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                metadata: metas.get(i).cloned().unwrap_or(serde_json::Value::Null),
                embedding: Vec::new(),
            });
        }
        Ok(all)
    }

    async fn delete_many(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({ "ids": ids });
        self.post_json(&self.collection_url("delete"), &body).await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let resp = self
            .client
            .get(self.collection_url("count"))
            .send()
            .await
            .context("vector store unavailable")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("vector store error {}", status);
        }
        let json: serde_json::Value = resp.json().await?;
        Ok(json.as_u64().unwrap_or(0))
    }

    async fn reset(&self) -> Result<()> {
        // Chroma has no truncate; delete every stored id.
        let all = self.get_all().await?;
        let ids: Vec<String> = all.into_iter().map(|r| r.id).collect();
        self.delete_many(&ids).await
    }

    fn collection_name(&self) -> &str {
        &self.name
    }
}

// ============ Store façade ============

/// Options for [`DocumentStore::search`].
#[derive(Debug, Default, Clone)]
pub struct SearchOptions {
    /// Lexical refinement: retain only rows containing this keyword
    /// (case-insensitive) and rank by match count before distance.
    pub keyword: Option<String>,
    /// Drop rows with `distance > max_distance`.
    pub max_distance: Option<f32>,
    /// Exact-match metadata filter; every entry must match.
    pub metadata_filter: Option<MetadataFilter>,
}

/// The document store façade.
///
/// Explicit handle constructed once at startup; owns embedding, search
/// refinement, and result formatting. Cloned cheaply via inner `Arc`s.
#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<dyn VectorBackend>,
    model: Arc<dyn ModelClient>,
    root_name: String,
}

impl DocumentStore {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        model: Arc<dyn ModelClient>,
        root_name: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            model,
            root_name: root_name.into(),
        }
    }

    /// Embed and upsert a batch of documents.
    ///
    /// On a mid-batch failure, the ids already upserted are logged so the
    /// operator can correlate; the error is surfaced and the sync re-drives
    /// the missing files on its next run (at-least-once semantics).
    pub async fn add_many(&self, inputs: &[DocumentInput]) -> Result<()> {
        let mut upserted: Vec<&str> = Vec::new();

        for input in inputs {
            let result = async {
                let embedding = self.model.embed(&input.text).await?;
                let record = BackendRecord {
                    id: input.id.clone(),
                    text: input.text.clone(),
                    metadata: serde_json::to_value(&input.metadata)?,
                    embedding,
                };
                self.backend.upsert(std::slice::from_ref(&record)).await
            }
            .await;

            if let Err(e) = result {
                if !upserted.is_empty() {
                    eprintln!(
                        "Warning: add_many failed at {} after upserting [{}]",
                        input.id,
                        upserted.join(", ")
                    );
                }
                return Err(e.context(format!("failed to add document {}", input.id)));
            }
            upserted.push(&input.id);
        }

        Ok(())
    }

    /// Nearest-neighbor search with optional lexical refinement.
    ///
    /// Never returns more than `n` rows; see the module docs for the
    /// full pipeline.
    pub async fn search(
        &self,
        query: &str,
        n: usize,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let embedding = self.model.embed(query).await?;

        let fetch = if opts.keyword.is_some() { n * 3 } else { n };
        let candidates = self
            .backend
            .query(&embedding, fetch, opts.metadata_filter.as_ref())
            .await?;

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|c| {
                let metadata: DocMetadata = serde_json::from_value(c.metadata).ok()?;
                Some(SearchHit {
                    path: display_path(&self.root_name, &metadata),
                    drive_link: resolve_link(&c.id, &metadata),
                    id: c.id,
                    text: c.text,
                    metadata,
                    distance: c.distance,
                    keyword_count: 0,
                })
            })
            .collect();

        if let Some(keyword) = opts.keyword.as_deref() {
            for hit in &mut hits {
                hit.keyword_count = count_matches(&hit.text, keyword);
            }
            hits.retain(|h| h.keyword_count > 0);
            hits.sort_by(|a, b| {
                b.keyword_count.cmp(&a.keyword_count).then_with(|| {
                    a.distance
                        .partial_cmp(&b.distance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
            });
        }

        if let Some(max) = opts.max_distance {
            hits.retain(|h| h.distance <= max);
        }

        hits.truncate(n);
        Ok(hits)
    }

    /// Every stored document, for sync reconciliation.
    pub async fn get_all(&self) -> Result<Vec<StoredDocument>> {
        let records = self.backend.get_all().await?;
        Ok(records
            .into_iter()
            .filter_map(|r| {
                let metadata: DocMetadata = serde_json::from_value(r.metadata).ok()?;
                Some(StoredDocument {
                    id: r.id,
                    text: r.text,
                    metadata,
                })
            })
            .collect())
    }

    pub async fn delete_many(&self, ids: &[String]) -> Result<()> {
        self.backend.delete_many(ids).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            count: self.backend.count().await?,
            name: self.backend.collection_name().to_string(),
        })
    }

    pub async fn reset(&self) -> Result<()> {
        self.backend.reset().await
    }
}

/// `{root}/{folder_path}/{name}{extension}`, skipping empty segments.
fn display_path(root_name: &str, metadata: &DocMetadata) -> String {
    let file = format!("{}{}", metadata.name, metadata.extension);
    if metadata.folder_path.is_empty() {
        format!("{}/{}", root_name, file)
    } else {
        format!("{}/{}/{}", root_name, metadata.folder_path, file)
    }
}

/// Stored link when present, otherwise derived from `(id, mime_type)`.
fn resolve_link(id: &str, metadata: &DocMetadata) -> String {
    if metadata.drive_link.is_empty() {
        drive::drive_link(id, &metadata.mime_type)
    } else {
        metadata.drive_link.clone()
    }
}

/// True when every filter entry equals the corresponding metadata field.
fn metadata_matches(
    metadata: &serde_json::Value,
    filter: &serde_json::Map<String, serde_json::Value>,
) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// Case-insensitive, possibly-overlapping occurrence count.
fn count_matches(text: &str, keyword: &str) -> usize {
    if keyword.is_empty() {
        return 0;
    }
    text.to_lowercase()
        .matches(&keyword.to_lowercase())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_matches_case_insensitive() {
        assert_eq!(count_matches("Jelena i jelena", "jelena"), 2);
        assert_eq!(count_matches("nothing here", "jelena"), 0);
        assert_eq!(count_matches("abc", ""), 0);
    }

    #[test]
    fn display_path_skips_empty_folder() {
        let meta = DocMetadata {
            name: "report".to_string(),
            mime_type: "application/pdf".to_string(),
            folder_path: String::new(),
            modified_time: "2024-01-01T00:00:00Z".to_string(),
            extension: ".pdf".to_string(),
            drive_link: String::new(),
        };
        assert_eq!(display_path("Drive", &meta), "Drive/report.pdf");
    }

    #[test]
    fn metadata_filter_exact_match() {
        let meta = serde_json::json!({ "name": "a", "folderPath": "x" });
        let mut filter = serde_json::Map::new();
        filter.insert("name".to_string(), serde_json::json!("a"));
        assert!(metadata_matches(&meta, &filter));

        filter.insert("folderPath".to_string(), serde_json::json!("y"));
        assert!(!metadata_matches(&meta, &filter));
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        let a = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }
}
