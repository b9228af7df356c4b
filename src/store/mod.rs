//! Relational persistence behind the [`RecordStore`] trait.
//!
//! * [`postgres::PgStore`]: production store on an sqlx `PgPool`.
//! * [`memory::MemoryStore`]: in-process store with the same NOT NULL and
//!   length rules, for tests and dry runs.
//!
//! Every write is a single-row operation in its own transaction; nothing in
//! this layer spans a batch.

pub mod memory;
pub mod postgres;

use crate::error::LedgerError;
use crate::record::{MappedRecord, PersistedRow};
use crate::schema::Schema;
use futures::future::BoxFuture;
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store-level failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// A row violated a column constraint (NOT NULL, length, type).
    #[error("constraint violated on '{column}': {detail}")]
    Constraint { column: String, detail: String },

    /// The table has not been provisioned.
    #[error("table '{0}' does not exist")]
    MissingTable(String),

    #[error("{0}")]
    Database(String),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        LedgerError::Persistence(e.to_string())
    }
}

/// Table-level access for one schema at a time.
pub trait RecordStore: Send + Sync {
    /// Create the table if it does not exist. Idempotent.
    fn ensure_schema<'a>(&'a self, schema: &'a Schema) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Insert one row and return the identity the store assigned.
    fn insert<'a>(
        &'a self,
        schema: &'a Schema,
        record: &'a MappedRecord,
    ) -> BoxFuture<'a, Result<i64, StoreError>>;

    /// All rows, ordered by identity ascending.
    fn list<'a>(&'a self, schema: &'a Schema) -> BoxFuture<'a, Result<Vec<PersistedRow>, StoreError>>;

    /// Overwrite every column of the row with identity `id`.
    ///
    /// Returns `false` when no such row exists.
    fn update<'a>(
        &'a self,
        schema: &'a Schema,
        id: i64,
        record: &'a MappedRecord,
    ) -> BoxFuture<'a, Result<bool, StoreError>>;
}
