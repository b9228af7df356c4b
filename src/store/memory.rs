//! In-process [`RecordStore`].

use super::{RecordStore, StoreError};
use crate::record::{ColumnValue, MappedRecord, PersistedRow};
use crate::schema::Schema;
use futures::future::{self, BoxFuture};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Vec<ColumnValue>>,
}

/// Tables held in memory, keyed by name.
///
/// Enforces the constraints the PostgreSQL DDL would: NOT NULL, `VARCHAR(n)`
/// length in characters, and column kind. Identities start at 1.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Table>>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    fn ensure_sync(&self, schema: &Schema) -> Result<(), StoreError> {
        self.lock()?.entry(schema.table.clone()).or_insert_with(|| Table {
            next_id: 1,
            rows: BTreeMap::new(),
        });
        Ok(())
    }

    fn insert_sync(&self, schema: &Schema, record: &MappedRecord) -> Result<i64, StoreError> {
        check_record(schema, record)?;
        let mut tables = self.lock()?;
        let table = tables
            .get_mut(&schema.table)
            .ok_or_else(|| StoreError::MissingTable(schema.table.clone()))?;
        let id = table.next_id;
        table.next_id += 1;
        table.rows.insert(id, record.values.clone());
        Ok(id)
    }

    fn list_sync(&self, schema: &Schema) -> Result<Vec<PersistedRow>, StoreError> {
        let tables = self.lock()?;
        let table = tables
            .get(&schema.table)
            .ok_or_else(|| StoreError::MissingTable(schema.table.clone()))?;
        Ok(table
            .rows
            .iter()
            .map(|(id, values)| PersistedRow {
                id: *id,
                values: values.clone(),
            })
            .collect())
    }

    fn update_sync(&self, schema: &Schema, id: i64, record: &MappedRecord) -> Result<bool, StoreError> {
        check_record(schema, record)?;
        let mut tables = self.lock()?;
        let table = tables
            .get_mut(&schema.table)
            .ok_or_else(|| StoreError::MissingTable(schema.table.clone()))?;
        match table.rows.get_mut(&id) {
            Some(values) => {
                *values = record.values.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl RecordStore for MemoryStore {
    fn ensure_schema<'a>(&'a self, schema: &'a Schema) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(future::ready(self.ensure_sync(schema)))
    }

    fn insert<'a>(
        &'a self,
        schema: &'a Schema,
        record: &'a MappedRecord,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(future::ready(self.insert_sync(schema, record)))
    }

    fn list<'a>(&'a self, schema: &'a Schema) -> BoxFuture<'a, Result<Vec<PersistedRow>, StoreError>> {
        Box::pin(future::ready(self.list_sync(schema)))
    }

    fn update<'a>(
        &'a self,
        schema: &'a Schema,
        id: i64,
        record: &'a MappedRecord,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(future::ready(self.update_sync(schema, id, record)))
    }
}

/// Apply the column constraints the table DDL declares.
fn check_record(schema: &Schema, record: &MappedRecord) -> Result<(), StoreError> {
    if record.values.len() != schema.fields.len() {
        return Err(StoreError::Database(format!(
            "expected {} values, got {}",
            schema.fields.len(),
            record.values.len()
        )));
    }
    for (field, value) in schema.fields.iter().zip(&record.values) {
        let violation = |detail: String| StoreError::Constraint {
            column: field.column.clone(),
            detail,
        };
        if !value.matches(field.kind) {
            return Err(violation(format!("value {:?} does not fit a {:?} column", value, field.kind)));
        }
        if value.is_null() && !field.nullable {
            return Err(violation("null value violates not-null constraint".into()));
        }
        if let (Some(max), ColumnValue::Text(s)) = (field.max_len, value) {
            if s.chars().count() > max {
                return Err(violation(format!(
                    "value too long for type character varying({max})"
                )));
            }
        }
    }
    Ok(())
}
