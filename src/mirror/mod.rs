//! Spreadsheet mirror of the persisted table.
//!
//! The relational store is the source of truth; the mirror is a
//! human-facing copy. Sheet rows are laid out identity first, then every
//! schema column in order (see [`crate::record::PersistedRow::to_sheet_row`]).

pub mod sheets;

use crate::error::LedgerError;
use futures::future::{self, BoxFuture};
use serde_json::Value;

pub use sheets::SheetsMirror;

/// One sheet row: scalar cells in column order.
pub type SheetRow = Vec<Value>;

/// Destination for mirrored rows.
pub trait MirrorSink: Send + Sync {
    /// Append rows after the last filled row.
    fn append<'a>(&'a self, rows: Vec<SheetRow>) -> BoxFuture<'a, Result<(), LedgerError>>;

    /// Clear `span` (e.g. `A1:F`) and write `rows` starting at `A1`.
    fn replace_all<'a>(
        &'a self,
        span: &'a str,
        rows: Vec<SheetRow>,
    ) -> BoxFuture<'a, Result<(), LedgerError>>;

    /// Create a new spreadsheet titled `title`, write `rows` from `A1` and
    /// return its shareable link.
    fn export_new<'a>(
        &'a self,
        title: &'a str,
        rows: Vec<SheetRow>,
    ) -> BoxFuture<'a, Result<String, LedgerError>>;

    /// Preview URL of the mirrored spreadsheet.
    fn link(&self) -> Option<String>;

    /// `false` when mirroring is switched off.
    fn enabled(&self) -> bool {
        true
    }
}

/// Mirror used when no spreadsheet is configured: writes are dropped,
/// exports are refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMirror;

impl MirrorSink for NullMirror {
    fn append<'a>(&'a self, _rows: Vec<SheetRow>) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(future::ready(Ok(())))
    }

    fn replace_all<'a>(
        &'a self,
        _span: &'a str,
        _rows: Vec<SheetRow>,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(future::ready(Ok(())))
    }

    fn export_new<'a>(
        &'a self,
        _title: &'a str,
        _rows: Vec<SheetRow>,
    ) -> BoxFuture<'a, Result<String, LedgerError>> {
        Box::pin(future::ready(Err(LedgerError::SheetsFailed(
            "no spreadsheet service configured".into(),
        ))))
    }

    fn link(&self) -> Option<String> {
        None
    }

    fn enabled(&self) -> bool {
        false
    }
}
