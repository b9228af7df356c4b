//! Response types returned by [`crate::ingest::IngestService`].
//!
//! These serialise straight into the HTTP response bodies.

use crate::error::RowError;
use crate::pipeline::normalize::SkippedFile;
use serde::Serialize;
use serde_json::{Map, Value};

/// What happened to the spreadsheet mirror after the store commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MirrorStatus {
    /// Every persisted row reached the sheet.
    Synced { rows: usize },
    /// The store committed but the sheet write failed.
    Failed { error: String },
    /// No spreadsheet configured.
    Disabled,
}

impl MirrorStatus {
    pub fn is_synced(&self) -> bool {
        matches!(self, MirrorStatus::Synced { .. })
    }
}

/// Counters for one upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestStats {
    pub files_received: usize,
    pub files_skipped: usize,
    pub pages: usize,
    pub records_extracted: usize,
    pub rows_persisted: usize,
    pub rows_failed: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Failed inference attempts before the successful one.
    pub retries: u32,
    pub normalize_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of one upload.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutput {
    pub message: String,
    /// Persisted rows, identity first, keyed by column name.
    pub records: Vec<Map<String, Value>>,
    pub failed_rows: Vec<RowError>,
    pub skipped_files: Vec<SkippedFile>,
    pub sheet_url: Option<String>,
    pub mirror: MirrorStatus,
    pub stats: IngestStats,
}

/// Result of an edit batch.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutput {
    pub message: String,
    pub updated: usize,
    pub failed_rows: Vec<RowError>,
    pub mirror: MirrorStatus,
}

/// Result of exporting rows to a fresh spreadsheet.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutput {
    pub message: String,
    pub link: String,
}
