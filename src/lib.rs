//! # edgequake-ledger
//!
//! Turn photographed or scanned ledger and register pages into database
//! rows using a Vision Language Model (VLM), and keep a spreadsheet copy of
//! the table in sync.
//!
//! ## Why this crate?
//!
//! Handwritten registers (shop ledgers, school weight/height sheets) defeat
//! classic OCR: mixed scripts, ruled columns and cramped digits come out as
//! noise. This crate sends every page of an upload to a VLM in one call,
//! asks for structured JSON, and fits the reply onto a fixed table schema
//! before storing it in PostgreSQL.
//!
//! ## Pipeline Overview
//!
//! ```text
//! multipart upload (photos, PDFs)
//!  │
//!  ├─ 1. Normalise  photos pass through, PDF pages rendered via pdfium
//!  ├─ 2. Encode     page bytes → base64 ImageData
//!  ├─ 3. Extract    one VLM call for the whole batch (gemini-2.0-flash default)
//!  ├─ 4. Decode     locate JSON in the reply (or split positional lines)
//!  ├─ 5. Map        coerce values onto the schema's columns
//!  ├─ 6. Persist    one transaction per row; failures collected, not fatal
//!  └─ 7. Mirror     append persisted rows to a Google Sheet
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ledger::{
//!     mirror::NullMirror, server, store::MemoryStore, IngestService, PipelineConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = PipelineConfig::default();
//!     let service = IngestService::from_config(
//!         config,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(NullMirror),
//!     )
//!     .await?;
//!     server::serve(Arc::new(service), "127.0.0.1:5000", server::DEFAULT_MAX_UPLOAD_BYTES).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ledger-server` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ingest;
pub mod mirror;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod schema;
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    DatabaseConfig, PipelineConfig, PipelineConfigBuilder, ResponseDecoder, SheetsConfig,
    SheetsCredentials,
};
pub use error::{ErrorKind, LedgerError, RowError};
pub use ingest::IngestService;
pub use output::{ExportOutput, IngestOutput, IngestStats, MirrorStatus, UpdateOutput};
pub use pipeline::normalize::{UploadBatch, UploadedFile};
pub use record::{ColumnValue, ExtractedRecord, MappedRecord, PersistedRow, ScalarValue};
pub use schema::{FieldKind, FieldSpec, Schema, SchemaVariant};
