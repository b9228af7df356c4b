//! Target table schemas.
//!
//! A deployment persists exactly one record shape, chosen at start-up: the
//! financial ledger or the student measurement register. Everything that
//! differs between the two (table and column names, which keys the model
//! is asked for, numeric defaults, which decoders are allowed) is data in a
//! [`Schema`] rather than a separate copy of the pipeline.
//!
//! Column names may be non-ASCII (the student register uses Marathi
//! headings), so every identifier that reaches SQL goes through
//! [`quote_ident`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Date,
}

impl FieldKind {
    fn sql_type(self, max_len: Option<usize>) -> String {
        match (self, max_len) {
            (FieldKind::Text, Some(n)) => format!("VARCHAR({n})"),
            (FieldKind::Text, None) => "TEXT".to_string(),
            (FieldKind::Integer, _) => "BIGINT".to_string(),
            (FieldKind::Float, _) => "DOUBLE PRECISION".to_string(),
            (FieldKind::Date, _) => "DATE".to_string(),
        }
    }
}

/// What to store when a value is absent or cannot be coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Missing {
    #[default]
    Null,
    /// Quantity and amount columns default to zero.
    Zero,
}

/// One persisted column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Column name in the table and the spreadsheet header.
    pub column: String,
    /// Keys accepted from the model reply, matched case-insensitively.
    /// The column name itself is always accepted as well.
    pub source_keys: Vec<String>,
    pub kind: FieldKind,
    pub missing: Missing,
    /// Overwritten with the processing date on every extracted record.
    pub processing_date: bool,
    pub nullable: bool,
    /// Maximum length in characters (`VARCHAR(n)`), text columns only.
    pub max_len: Option<usize>,
    /// Takes part in positional (comma-split) decoding, in field order.
    pub positional: bool,
}

impl FieldSpec {
    pub fn new(column: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            column: column.into(),
            source_keys: Vec::new(),
            kind,
            missing: Missing::Null,
            processing_date: false,
            nullable: true,
            max_len: None,
            positional: false,
        }
    }

    pub fn keys(mut self, keys: &[&str]) -> Self {
        self.source_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn zero_default(mut self) -> Self {
        self.missing = Missing::Zero;
        self
    }

    pub fn max_len(mut self, n: usize) -> Self {
        self.max_len = Some(n);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn processing_date(mut self) -> Self {
        self.processing_date = true;
        self
    }

    pub fn positional(mut self) -> Self {
        self.positional = true;
        self
    }

    /// Does `key` (from a model reply) name this field?
    pub fn accepts(&self, key: &str) -> bool {
        let key = key.trim();
        key.eq_ignore_ascii_case(&self.column)
            || self
                .source_keys
                .iter()
                .any(|k| k.eq_ignore_ascii_case(key))
    }
}

/// Which built-in schema a deployment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
    Ledger,
    #[default]
    Student,
}

impl fmt::Display for SchemaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaVariant::Ledger => f.write_str("ledger"),
            SchemaVariant::Student => f.write_str("student"),
        }
    }
}

impl FromStr for SchemaVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ledger" => Ok(SchemaVariant::Ledger),
            "student" => Ok(SchemaVariant::Student),
            other => Err(format!("unknown schema '{other}' (expected ledger or student)")),
        }
    }
}

/// Table layout for one schema variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub variant: SchemaVariant,
    pub table: String,
    /// Store-assigned identity column, always the first sheet column.
    pub identity: String,
    pub fields: Vec<FieldSpec>,
    /// Whether the comma-split decoder may be selected for this schema.
    pub allows_positional: bool,
}

impl Schema {
    pub fn for_variant(variant: SchemaVariant) -> Self {
        match variant {
            SchemaVariant::Ledger => Self::ledger(),
            SchemaVariant::Student => Self::student(),
        }
    }

    /// Financial ledger page: one row per handwritten entry.
    pub fn ledger() -> Self {
        Self {
            variant: SchemaVariant::Ledger,
            table: "ledger_entries".to_string(),
            identity: "id".to_string(),
            fields: vec![
                FieldSpec::new("entry_date", FieldKind::Date)
                    .keys(&["date", "transaction_date"])
                    .processing_date(),
                FieldSpec::new("party_name", FieldKind::Text)
                    .keys(&["name", "party", "account", "account_name"])
                    .max_len(255),
                FieldSpec::new("particulars", FieldKind::Text)
                    .keys(&["description", "details", "item", "narration"]),
                FieldSpec::new("quantity", FieldKind::Integer)
                    .keys(&["qty", "count"])
                    .zero_default(),
                FieldSpec::new("rate", FieldKind::Float).keys(&["price", "unit_price"]),
                FieldSpec::new("amount", FieldKind::Float)
                    .keys(&["total", "value"])
                    .zero_default(),
                FieldSpec::new("remarks", FieldKind::Text).keys(&["remark", "note", "notes"]),
            ],
            allows_positional: false,
        }
    }

    /// Student measurement register (Marathi column headings).
    pub fn student() -> Self {
        Self {
            variant: SchemaVariant::Student,
            table: "student_data_from_image".to_string(),
            identity: "अ.क्र.".to_string(),
            fields: vec![
                FieldSpec::new("वर्ग क्र.", FieldKind::Text),
                FieldSpec::new("बालकांचे नाव", FieldKind::Text)
                    .keys(&["name", "student_name"])
                    .max_len(255)
                    .positional(),
                FieldSpec::new("वजन (किलो)", FieldKind::Float)
                    .keys(&["weight", "weight_kg"])
                    .positional(),
                FieldSpec::new("उंची (सेमी)", FieldKind::Float)
                    .keys(&["height", "height_cm"])
                    .positional(),
                FieldSpec::new("शेरा", FieldKind::Text)
                    .keys(&["remark", "remarks"])
                    .positional(),
            ],
            allows_positional: true,
        }
    }

    /// Fields that take part in positional decoding, in segment order.
    pub fn positional_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.positional)
    }

    /// Spreadsheet header row: identity then every column.
    pub fn header(&self) -> Vec<String> {
        std::iter::once(self.identity.clone())
            .chain(self.fields.iter().map(|f| f.column.clone()))
            .collect()
    }

    /// Idempotent DDL for this table.
    pub fn create_table_sql(&self) -> String {
        let mut columns = vec![format!(
            "{} BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
            quote_ident(&self.identity)
        )];
        for field in &self.fields {
            let mut col = format!(
                "{} {}",
                quote_ident(&field.column),
                field.kind.sql_type(field.max_len)
            );
            if !field.nullable {
                col.push_str(" NOT NULL");
            }
            columns.push(col);
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.table),
            columns.join(", ")
        )
    }

    /// Sheet range covering every mirrored column, e.g. `A1:F`.
    pub fn sheet_span(&self) -> String {
        format!("A1:{}", column_letter(self.fields.len()))
    }
}

/// Double-quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Spreadsheet column letter for a 0-based column index (0 → A, 26 → AA).
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}
