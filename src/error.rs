//! Error types for the edgequake-ledger library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`LedgerError`]: **Fatal**: the request cannot proceed at all (no
//!   usable upload, unparseable model reply, model or database unreachable).
//!   Returned as `Err(LedgerError)` from [`crate::ingest::IngestService`].
//!
//! * [`RowError`]: **Non-fatal**: a single row could not be inserted or
//!   updated, but every other row in the batch is fine. Stored in
//!   [`crate::pipeline::persist::BatchOutcome`] and reported back to the
//!   caller next to the rows that did make it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`LedgerError`].
///
/// The HTTP layer only needs to know which bucket an error falls into to
/// pick a status code; the message carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller sent nothing usable.
    Input,
    /// The model replied, but not in a structure we can decode.
    ExtractionFormat,
    /// The relational store could not be provisioned or read.
    Persistence,
    /// The inference or spreadsheet service failed or was unreachable.
    Upstream,
    /// Configuration or programming error.
    Internal,
}

/// All fatal errors returned by the edgequake-ledger library.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The multipart request had no `files` field at all.
    #[error("No files uploaded")]
    NoFilesUploaded,

    /// Every uploaded file had an empty filename.
    #[error("No valid files uploaded")]
    NoValidFiles,

    /// Normalisation dropped every file.
    #[error("No processable files: {skipped} file(s) had an unsupported or empty content type")]
    NoProcessableFiles { skipped: usize },

    /// A PDF was recognised but could not be rendered.
    #[error("Could not render '{filename}': {detail}")]
    RenderFailed { filename: String, detail: String },

    /// A request body could not be read or parsed.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The model reply did not contain the expected JSON structure.
    #[error("Model output is not in the expected format: {detail}")]
    ExtractionFormat { detail: String },

    // ── Upstream errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The inference call failed after all retries.
    #[error("Inference call failed after {retries} retries: {detail}")]
    InferenceFailed { retries: u32, detail: String },

    /// The spreadsheet service rejected a call or was unreachable.
    #[error("Spreadsheet service error: {0}")]
    SheetsFailed(String),

    // ── Persistence errors ────────────────────────────────────────────────
    /// The target table could not be created or read.
    #[error("Database error: {0}")]
    Persistence(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Bucket this error for status-code mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NoFilesUploaded
            | LedgerError::NoValidFiles
            | LedgerError::NoProcessableFiles { .. }
            | LedgerError::RenderFailed { .. }
            | LedgerError::InvalidBody(_) => ErrorKind::Input,
            LedgerError::ExtractionFormat { .. } => ErrorKind::ExtractionFormat,
            LedgerError::ProviderNotConfigured { .. }
            | LedgerError::InferenceFailed { .. }
            | LedgerError::SheetsFailed(_) => ErrorKind::Upstream,
            LedgerError::Persistence(_) => ErrorKind::Persistence,
            LedgerError::InvalidConfig(_)
            | LedgerError::PdfiumBindingFailed(_)
            | LedgerError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn format(detail: impl Into<String>) -> Self {
        LedgerError::ExtractionFormat {
            detail: detail.into(),
        }
    }
}

/// A non-fatal error for a single row.
///
/// `row` is the 0-based position of the row in the batch it came from.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowError {
    /// The insert was rejected and rolled back.
    #[error("Row {row}: insert failed: {detail}")]
    InsertFailed { row: usize, detail: String },

    /// The update was rejected and rolled back.
    #[error("Row {row}: update failed: {detail}")]
    UpdateFailed { row: usize, detail: String },

    /// An update object carried no usable identity value.
    #[error("Row {row}: missing or non-integer '{column}'")]
    MissingIdentity { row: usize, column: String },

    /// No stored row has this identity.
    #[error("Row {row}: no record with identity {id}")]
    UnknownIdentity { row: usize, id: i64 },
}
