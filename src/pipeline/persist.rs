//! Persistence writer: one transaction per row, outcomes collected.
//!
//! A rejected row is logged, recorded as a [`RowError`] and skipped; the
//! rows around it are unaffected. Only failures that make every row
//! impossible (the table cannot be provisioned) abort the batch.

use crate::error::{LedgerError, RowError};
use crate::pipeline::mapper;
use crate::record::{MappedRecord, PersistedRow};
use crate::schema::Schema;
use crate::store::RecordStore;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Rows that made it and rows that did not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Committed rows in insertion order, with their identities.
    pub rows: Vec<PersistedRow>,
    pub failures: Vec<RowError>,
}

/// Insert every record in order.
pub async fn persist_batch(
    store: &dyn RecordStore,
    schema: &Schema,
    records: Vec<MappedRecord>,
) -> Result<BatchOutcome, LedgerError> {
    store.ensure_schema(schema).await?;

    let total = records.len();
    let mut outcome = BatchOutcome::default();
    for (row, record) in records.into_iter().enumerate() {
        match store.insert(schema, &record).await {
            Ok(id) => outcome.rows.push(PersistedRow::new(id, record)),
            Err(e) => {
                warn!("Row {} of {}: insert rolled back: {}", row + 1, total, e);
                outcome.failures.push(RowError::InsertFailed {
                    row,
                    detail: e.to_string(),
                });
            }
        }
    }

    info!(
        "Persisted {}/{} rows into {}",
        outcome.rows.len(),
        total,
        schema.table
    );
    Ok(outcome)
}

/// Per-row results of an edit batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub updated: usize,
    pub failures: Vec<RowError>,
}

/// Apply full-row edits by identity, one transaction each.
pub async fn update_rows(
    store: &dyn RecordStore,
    schema: &Schema,
    rows: &[Map<String, Value>],
) -> Result<UpdateOutcome, LedgerError> {
    store.ensure_schema(schema).await?;

    let mut outcome = UpdateOutcome::default();
    for (row, object) in rows.iter().enumerate() {
        let Some(id) = mapper::identity_of(schema, object) else {
            warn!("Row {}: no usable '{}' value, skipped", row + 1, schema.identity);
            outcome.failures.push(RowError::MissingIdentity {
                row,
                column: schema.identity.clone(),
            });
            continue;
        };

        let record = mapper::map_columns(schema, object);
        match store.update(schema, id, &record).await {
            Ok(true) => outcome.updated += 1,
            Ok(false) => {
                warn!("Row {}: no record with identity {}", row + 1, id);
                outcome.failures.push(RowError::UnknownIdentity { row, id });
            }
            Err(e) => {
                warn!("Row {}: update rolled back: {}", row + 1, e);
                outcome.failures.push(RowError::UpdateFailed {
                    row,
                    detail: e.to_string(),
                });
            }
        }
    }

    info!(
        "Updated {}/{} rows in {}",
        outcome.updated,
        rows.len(),
        schema.table
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ColumnValue;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn student(name: &str) -> MappedRecord {
        MappedRecord {
            values: vec![
                ColumnValue::Null,
                ColumnValue::Text(name.into()),
                ColumnValue::Null,
                ColumnValue::Null,
                ColumnValue::Null,
            ],
        }
    }

    #[tokio::test]
    async fn failing_row_does_not_stop_the_batch() {
        let store = MemoryStore::new();
        let schema = Schema::student();
        let records = vec![student("Asha"), student(&"x".repeat(300)), student("Ravi")];

        let outcome = persist_batch(&store, &schema, records).await.unwrap();

        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.rows[0].id, 1);
        assert_eq!(outcome.rows[1].values[1], ColumnValue::Text("Ravi".into()));
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(outcome.failures[0], RowError::InsertFailed { row: 1, .. }));
        assert_eq!(store.list(&schema).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_batch_still_provisions_table() {
        let store = MemoryStore::new();
        let schema = Schema::ledger();
        let outcome = persist_batch(&store, &schema, Vec::new()).await.unwrap();
        assert!(outcome.rows.is_empty());
        assert!(store.list(&schema).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_collects_per_row_outcomes() {
        let store = MemoryStore::new();
        let schema = Schema::student();
        persist_batch(&store, &schema, vec![student("Asha")]).await.unwrap();

        let edits = json!([
            {"अ.क्र.": 1, "बालकांचे नाव": "Asha Patil", "वजन (किलो)": "19"},
            {"बालकांचे नाव": "No id"},
            {"अ.क्र.": 42, "बालकांचे नाव": "Ghost"}
        ]);
        let rows: Vec<Map<String, Value>> = edits
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect();

        let outcome = update_rows(&store, &schema, &rows).await.unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(
            outcome.failures,
            vec![
                RowError::MissingIdentity { row: 1, column: "अ.क्र.".into() },
                RowError::UnknownIdentity { row: 2, id: 42 },
            ]
        );

        let stored = store.list(&schema).await.unwrap();
        assert_eq!(stored[0].values[1], ColumnValue::Text("Asha Patil".into()));
        assert_eq!(stored[0].values[2], ColumnValue::Float(19.0));
    }
}
