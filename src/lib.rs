//! # Drive Agent
//!
//! **A retrieval-augmented AI agent runtime over a Google Drive corpus.**
//!
//! Drive Agent keeps a vector store synchronized with a drive folder tree
//! and answers natural-language tasks with a tool-using agent: the model
//! autonomously searches the corpus, summarizes documents, sends email,
//! and reports statistics, interleaving model calls and tool results
//! until it produces a final answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Drive    │──▶│  Ingestion   │──▶│ VectorStore │
//! │  (REST)   │   │  Pipeline    │   │  (backend)  │
//! └───────────┘   └──────────────┘   └──────┬──────┘
//!                                           │
//!                 ┌──────────────┐   ┌──────┴──────┐
//!   user task ──▶ │ Orchestrator │◀─▶│    Tools    │
//!                 │  (model loop)│   │ search/sum/ │
//!                 └──────────────┘   │ email/stats │
//!                                    └─────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **drive client** ([`drive`]) enumerates the folder tree
//!    breadth-first and downloads (or exports) file content.
//! 2. The **ingestion pipeline** ([`ingest`]) diffs the listing against
//!    the store, extracts text ([`extract`]), embeds whole documents via
//!    the model, and upserts them with drive metadata.
//! 3. The **store façade** ([`vector_store`]) answers nearest-neighbor
//!    queries with keyword refinement, metadata filtering, and distance
//!    gating.
//! 4. The **orchestrator** ([`agent`]) drives the model through a bounded
//!    tool loop ([`tools`]) and assembles the user-facing answer.
//! 5. Results are exposed via the **CLI** (`dra`) and the **HTTP server**
//!    ([`server`]).
//!
//! ## Quick Start
//!
//! ```bash
//! dra sync                          # mirror the drive folder into the store
//! dra task "Gde se spominje Jelena?"
//! dra search "contracts" --keyword client
//! dra serve --sync-interval 900     # HTTP API + periodic sync
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`models`] | Core data types: `DriveFile`, `DocMetadata`, `SearchHit` |
//! | [`model`] | `ModelClient` trait and the Gemini REST implementation |
//! | [`vector_store`] | Backend trait, in-memory and HTTP backends, store façade |
//! | [`drive`] | Drive client: BFS tree listing, export-aware downloads, Sheets reads |
//! | [`extract`] | MIME-dispatched text extraction (PDF, OOXML, text) |
//! | [`sync_cache`] | Durable `{lastSyncTime, fileCount}` record |
//! | [`ingest`] | Incremental drive → store synchronization |
//! | [`email`] | `EmailSender` trait and the Gmail REST implementation |
//! | [`tools`] | Tool declarations, invokers, and the registry |
//! | [`agent`] | Bounded tool-using conversation loop |
//! | [`server`] | HTTP API (Axum) with CORS and periodic sync |

pub mod agent;
pub mod config;
pub mod drive;
pub mod email;
pub mod extract;
pub mod ingest;
pub mod model;
pub mod models;
pub mod server;
pub mod sync_cache;
pub mod tools;
pub mod vector_store;
