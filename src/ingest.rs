//! Ingestion pipeline orchestration.
//!
//! Brings the vector store's contents into agreement with the current
//! state of a drive folder tree. One run:
//!
//! 1. **Record start time** — becomes `lastSyncTime` in the cache.
//! 2. **Load the sync cache** — absence is tolerated (first run, or a
//!    lost record; reconciliation is against store contents, not the cache).
//! 3. **List the drive tree** — bounded BFS via the drive client.
//! 4. **Read the store** — every stored `(id, modifiedTime)` pair.
//! 5. **Diff** — three disjoint sets: files to add (unknown id), files to
//!    update (changed `modifiedTime`), stored ids to delete (gone from
//!    the drive).
//! 6. **Early exit** — nothing changed: refresh the cache and return.
//! 7. **Delete first** — stale versions and removed files are deleted
//!    (and awaited) before any add, so re-added documents are never
//!    shadowed within the run.
//! 8. **Process in batches** — download (or read via the Sheets API),
//!    extract, embed, upsert; per-file failures are counted and logged,
//!    never fatal; empty extractions are skipped, not failed. Aggregate
//!    progress is logged after each batch.
//! 9. **Write the cache** — even when some files failed; absent files are
//!    re-driven on the next run because they are not in the store.
//!
//! Running twice against an unchanged drive is a no-op beyond refreshing
//! `lastSyncTime`. At most one run per pipeline handle executes at a
//! time; the handle owns the per-root lock.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::drive::{self, DriveClient};
use crate::extract;
use crate::models::{DocMetadata, DocumentInput, DriveFile, SyncCacheRecord};
use crate::sync_cache::SyncCache;
use crate::vector_store::DocumentStore;

/// Settings for one pipeline instance (one drive root).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub root_folder_id: String,
    pub max_folders: usize,
    pub batch_size: usize,
}

/// Aggregate counters for one pipeline run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    /// Files seen in the drive listing.
    pub listed: usize,
    pub added: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped_empty: u64,
    pub failed: u64,
}

/// The drive → vector store synchronizer.
pub struct IngestionPipeline {
    drive: Arc<dyn DriveClient>,
    store: DocumentStore,
    cache: SyncCache,
    config: PipelineConfig,
    run_lock: tokio::sync::Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(
        drive: Arc<dyn DriveClient>,
        store: DocumentStore,
        cache: SyncCache,
        config: PipelineConfig,
    ) -> Self {
        Self {
            drive,
            store,
            cache,
            config,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one incremental sync. See the module docs for the full flow.
    ///
    /// # Errors
    ///
    /// Only catastrophic failures surface: an unreachable vector store,
    /// a failed tree listing, or an unwritable cache file. Per-file and
    /// per-folder failures are recovered and counted in the report.
    pub async fn run(&self) -> Result<SyncReport> {
        let _guard = self.run_lock.lock().await;

        let sync_start = Utc::now().to_rfc3339();
        if let Some(previous) = self.cache.load() {
            println!(
                "sync: last run {} ({} files)",
                previous.last_sync_time, previous.file_count
            );
        }

        let drive_files = self
            .drive
            .list_tree(&self.config.root_folder_id, self.config.max_folders)
            .await
            .context("drive listing failed")?;

        let stored = self.store.get_all().await.context("store scan failed")?;
        let stored_by_id: HashMap<&str, &str> = stored
            .iter()
            .map(|d| (d.id.as_str(), d.metadata.modified_time.as_str()))
            .collect();
        let drive_ids: HashSet<&str> = drive_files.iter().map(|f| f.id.as_str()).collect();

        // Three disjoint sets: (file, is_update) work items plus deletions.
        let mut work: Vec<(&DriveFile, bool)> = Vec::new();
        for file in &drive_files {
            match stored_by_id.get(file.id.as_str()) {
                None => work.push((file, false)),
                Some(modified) if *modified != file.modified_time => work.push((file, true)),
                Some(_) => {}
            }
        }
        let mut to_delete: Vec<String> = stored
            .iter()
            .filter(|d| !drive_ids.contains(d.id.as_str()))
            .map(|d| d.id.clone())
            .collect();

        let mut report = SyncReport {
            listed: drive_files.len(),
            deleted: to_delete.len() as u64,
            ..SyncReport::default()
        };

        if work.is_empty() && to_delete.is_empty() {
            self.write_cache(&sync_start, drive_files.len())?;
            println!("sync: up to date ({} files)", drive_files.len());
            return Ok(report);
        }

        // Stale versions go first so the subsequent adds are never shadowed.
        let mut stale: Vec<String> = work
            .iter()
            .filter(|(_, is_update)| *is_update)
            .map(|(f, _)| f.id.clone())
            .collect();
        to_delete.append(&mut stale);
        if !to_delete.is_empty() {
            self.store
                .delete_many(&to_delete)
                .await
                .context("store deletion failed")?;
        }

        let scratch = tempfile::TempDir::new().context("cannot create scratch directory")?;
        let total_batches = work.len().div_ceil(self.config.batch_size);

        for (batch_no, batch) in work.chunks(self.config.batch_size).enumerate() {
            for (file, is_update) in batch {
                match self.process_file(file, scratch.path()).await {
                    Ok(true) => {
                        if *is_update {
                            report.updated += 1;
                        } else {
                            report.added += 1;
                        }
                    }
                    Ok(false) => report.skipped_empty += 1,
                    Err(e) => {
                        report.failed += 1;
                        eprintln!("Warning: failed to sync {} ({}): {}", file.name, file.id, e);
                    }
                }
            }

            println!(
                "sync: batch {}/{} — {} added, {} updated, {} skipped, {} failed",
                batch_no + 1,
                total_batches,
                report.added,
                report.updated,
                report.skipped_empty,
                report.failed
            );
        }

        self.write_cache(&sync_start, drive_files.len())?;

        println!("sync");
        println!("  listed: {} files", report.listed);
        println!("  added: {}", report.added);
        println!("  updated: {}", report.updated);
        println!("  deleted: {}", report.deleted);
        println!("  skipped (no text): {}", report.skipped_empty);
        println!("  failed: {}", report.failed);
        println!("ok");

        Ok(report)
    }

    /// Download, extract, embed, and upsert one file.
    ///
    /// Returns `Ok(false)` when the file produced no extractable text
    /// (skipped, not failed). The temp file is removed on every path.
    async fn process_file(&self, file: &DriveFile, scratch: &Path) -> Result<bool> {
        let extension = drive::extension_for(&file.mime_type);
        let display = if file.folder_path.is_empty() {
            file.name.clone()
        } else {
            format!("{}/{}", file.folder_path, file.name)
        };

        let text = if file.mime_type == drive::MIME_GOOGLE_SHEET {
            match self.drive.read_sheet(&file.id).await {
                Ok(text) => text,
                Err(e) => {
                    eprintln!(
                        "Warning: sheet read failed for {}, falling back to export: {}",
                        display, e
                    );
                    self.download_and_extract(file, scratch, &display).await?
                }
            }
        } else {
            self.download_and_extract(file, scratch, &display).await?
        };

        if text.trim().is_empty() {
            return Ok(false);
        }

        let input = DocumentInput {
            id: file.id.clone(),
            text,
            metadata: DocMetadata {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
                folder_path: file.folder_path.clone(),
                modified_time: file.modified_time.clone(),
                extension: extension.to_string(),
                drive_link: drive::drive_link(&file.id, &file.mime_type),
            },
        };
        self.store.add_many(std::slice::from_ref(&input)).await?;
        Ok(true)
    }

    async fn download_and_extract(
        &self,
        file: &DriveFile,
        scratch: &Path,
        display: &str,
    ) -> Result<String> {
        let dest = scratch.join(format!(
            "{}{}",
            file.id,
            drive::extension_for(&file.mime_type)
        ));

        let result = async {
            self.drive
                .download(&file.id, &file.mime_type, &dest)
                .await?;
            let bytes = tokio::fs::read(&dest).await?;
            Ok::<_, anyhow::Error>(extract::extract_text(
                &bytes,
                drive::effective_mime(&file.mime_type),
                display,
            ))
        }
        .await;

        let _ = std::fs::remove_file(&dest);
        result
    }

    fn write_cache(&self, sync_start: &str, file_count: usize) -> Result<()> {
        self.cache
            .store(&SyncCacheRecord {
                last_sync_time: sync_start.to_string(),
                file_count: file_count as u64,
            })
            .context("cannot write sync cache")
    }
}
