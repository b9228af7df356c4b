//! PostgreSQL [`RecordStore`] on an sqlx connection pool.
//!
//! Column names are schema data (the student table uses Marathi headings
//! with dots and parentheses), so every statement is assembled with
//! [`QueryBuilder`] from quoted identifiers; values are always bound.

use super::{RecordStore, StoreError};
use crate::config::DatabaseConfig;
use crate::record::{ColumnValue, MappedRecord, PersistedRow};
use crate::schema::{quote_ident, FieldKind, Schema};
use chrono::NaiveDate;
use futures::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::debug;

/// Pool-backed store. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Build the pool without connecting; the first query opens a connection.
    pub fn connect_lazy(config: &DatabaseConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_lazy_with(options);
        Self { pool }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure(&self, schema: &Schema) -> Result<(), StoreError> {
        let ddl = schema.create_table_sql();
        debug!("{}", ddl);
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn insert_row(&self, schema: &Schema, record: &MappedRecord) -> Result<i64, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO ");
        qb.push(quote_ident(&schema.table)).push(" (");
        {
            let mut columns = qb.separated(", ");
            for field in &schema.fields {
                columns.push(quote_ident(&field.column));
            }
        }
        qb.push(") VALUES (");
        {
            let mut values = qb.separated(", ");
            for (field, value) in schema.fields.iter().zip(&record.values) {
                match field.kind {
                    FieldKind::Text => values.push_bind(value.as_text()),
                    FieldKind::Integer => values.push_bind(value.as_integer()),
                    FieldKind::Float => values.push_bind(value.as_float()),
                    FieldKind::Date => values.push_bind(value.as_date()),
                };
            }
        }
        qb.push(") RETURNING ")
            .push(read_expr(&schema.identity, FieldKind::Integer));

        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let inserted = qb
            .build_query_scalar::<i64>()
            .fetch_one(&mut *tx)
            .await;
        match inserted {
            Ok(id) => {
                tx.commit().await.map_err(store_error)?;
                Ok(id)
            }
            Err(e) => {
                // Rollback failure is secondary; the insert error is what matters.
                let _ = tx.rollback().await;
                Err(store_error(e))
            }
        }
    }

    async fn list_rows(&self, schema: &Schema) -> Result<Vec<PersistedRow>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        {
            let mut columns = qb.separated(", ");
            columns.push(read_expr(&schema.identity, FieldKind::Integer));
            for field in &schema.fields {
                columns.push(read_expr(&field.column, field.kind));
            }
        }
        qb.push(" FROM ")
            .push(quote_ident(&schema.table))
            .push(" ORDER BY ")
            .push(quote_ident(&schema.identity));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter().map(|row| read_row(schema, row)).collect()
    }

    async fn update_row(
        &self,
        schema: &Schema,
        id: i64,
        record: &MappedRecord,
    ) -> Result<bool, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE ");
        qb.push(quote_ident(&schema.table)).push(" SET ");
        {
            let mut assignments = qb.separated(", ");
            for (field, value) in schema.fields.iter().zip(&record.values) {
                assignments.push(format!("{} = ", quote_ident(&field.column)));
                match field.kind {
                    FieldKind::Text => assignments.push_bind_unseparated(value.as_text()),
                    FieldKind::Integer => assignments.push_bind_unseparated(value.as_integer()),
                    FieldKind::Float => assignments.push_bind_unseparated(value.as_float()),
                    FieldKind::Date => assignments.push_bind_unseparated(value.as_date()),
                };
            }
        }
        qb.push(" WHERE ")
            .push(quote_ident(&schema.identity))
            .push(" = ")
            .push_bind(id);

        let mut tx = self.pool.begin().await.map_err(store_error)?;
        match qb.build().execute(&mut *tx).await {
            Ok(done) => {
                tx.commit().await.map_err(store_error)?;
                Ok(done.rows_affected() > 0)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(store_error(e))
            }
        }
    }
}

impl RecordStore for PgStore {
    fn ensure_schema<'a>(&'a self, schema: &'a Schema) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.ensure(schema))
    }

    fn insert<'a>(
        &'a self,
        schema: &'a Schema,
        record: &'a MappedRecord,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(self.insert_row(schema, record))
    }

    fn list<'a>(&'a self, schema: &'a Schema) -> BoxFuture<'a, Result<Vec<PersistedRow>, StoreError>> {
        Box::pin(self.list_rows(schema))
    }

    fn update<'a>(
        &'a self,
        schema: &'a Schema,
        id: i64,
        record: &'a MappedRecord,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(self.update_row(schema, id, record))
    }
}

/// Select expression for `column`, cast to the width [`read_row`] decodes.
///
/// Tables created elsewhere may use `SERIAL`/`INTEGER` or `REAL`/`NUMERIC`
/// where this crate's DDL uses `BIGINT` and `DOUBLE PRECISION`.
fn read_expr(column: &str, kind: FieldKind) -> String {
    let quoted = quote_ident(column);
    match kind {
        FieldKind::Integer => format!("{quoted}::BIGINT"),
        FieldKind::Float => format!("{quoted}::DOUBLE PRECISION"),
        FieldKind::Text | FieldKind::Date => quoted,
    }
}

fn read_row(schema: &Schema, row: &PgRow) -> Result<PersistedRow, StoreError> {
    let id: i64 = row.try_get(0).map_err(store_error)?;
    let values = schema
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let idx = i + 1;
            let value = match field.kind {
                FieldKind::Text => row
                    .try_get::<Option<String>, _>(idx)
                    .map(|v| v.map_or(ColumnValue::Null, ColumnValue::Text)),
                FieldKind::Integer => row
                    .try_get::<Option<i64>, _>(idx)
                    .map(|v| v.map_or(ColumnValue::Null, ColumnValue::Integer)),
                FieldKind::Float => row
                    .try_get::<Option<f64>, _>(idx)
                    .map(|v| v.map_or(ColumnValue::Null, ColumnValue::Float)),
                FieldKind::Date => row
                    .try_get::<Option<NaiveDate>, _>(idx)
                    .map(|v| v.map_or(ColumnValue::Null, ColumnValue::Date)),
            };
            value.map_err(store_error)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PersistedRow { id, values })
}

/// Classify an sqlx error by SQLSTATE.
fn store_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
        // 23xxx integrity violations, 22001 string_data_right_truncation,
        // 22P02 invalid_text_representation.
        if code.starts_with("23") || code == "22001" || code == "22P02" {
            return StoreError::Constraint {
                column: db.constraint().unwrap_or_default().to_string(),
                detail: db.message().to_string(),
            };
        }
        if code == "42P01" {
            return StoreError::MissingTable(db.message().to_string());
        }
    }
    StoreError::Database(e.to_string())
}
