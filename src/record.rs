//! Record types flowing through the pipeline.
//!
//! ```text
//! model text ──decode──▶ ExtractedRecord ──map──▶ MappedRecord ──insert──▶ PersistedRow
//!                        (loose key/value)        (schema-aligned)        (+ identity)
//! ```

use crate::schema::{FieldKind, Schema};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::ops::Index;

/// A scalar as the model produced it, before any schema is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl ScalarValue {
    /// Convert a JSON value. `null` is absent; booleans and nested
    /// structures are kept as their JSON text.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(ScalarValue::Text(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ScalarValue::Integer(i)),
                None => n.as_f64().map(ScalarValue::Float),
            },
            Value::Bool(b) => Some(ScalarValue::Text(b.to_string())),
            other => Some(ScalarValue::Text(other.to_string())),
        }
    }
}

/// One record decoded from the model reply.
///
/// Keys are whatever the model used, in reply order; nothing is validated
/// yet. When several keys feed one column, the first in the reply wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedRecord {
    pub fields: Vec<(String, ScalarValue)>,
}

impl ExtractedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an earlier value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: ScalarValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ScalarValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Build from a JSON object, dropping `null` members. Member order is
    /// kept (`serde_json` is built with `preserve_order`).
    pub fn from_json_object(object: &Map<String, Value>) -> Self {
        let fields = object
            .iter()
            .filter_map(|(k, v)| ScalarValue::from_json(v).map(|s| (k.clone(), s)))
            .collect();
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Index<&str> for ExtractedRecord {
    type Output = ScalarValue;

    /// Panics if `key` is absent.
    fn index(&self, key: &str) -> &ScalarValue {
        match self.get(key) {
            Some(v) => v,
            None => panic!("no field {key:?} in extracted record"),
        }
    }
}

/// A stored column value, already coerced to its column's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            ColumnValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ColumnValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ColumnValue::Float(f) => Some(*f),
            ColumnValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            ColumnValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Does this value fit a column of `kind`? Null always does.
    pub fn matches(&self, kind: FieldKind) -> bool {
        matches!(
            (self, kind),
            (ColumnValue::Null, _)
                | (ColumnValue::Text(_), FieldKind::Text)
                | (ColumnValue::Integer(_), FieldKind::Integer)
                | (ColumnValue::Float(_), FieldKind::Float)
                | (ColumnValue::Date(_), FieldKind::Date)
        )
    }

    pub fn to_json(&self) -> Value {
        match self {
            ColumnValue::Null => Value::Null,
            ColumnValue::Text(s) => Value::String(s.clone()),
            ColumnValue::Integer(i) => Value::from(*i),
            ColumnValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ColumnValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        }
    }
}

/// Values aligned one-to-one with `Schema::fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    pub values: Vec<ColumnValue>,
}

/// A mapped record plus the identity the store assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRow {
    pub id: i64,
    pub values: Vec<ColumnValue>,
}

impl PersistedRow {
    pub fn new(id: i64, record: MappedRecord) -> Self {
        Self {
            id,
            values: record.values,
        }
    }

    /// JSON object keyed by column name, identity first.
    pub fn to_json(&self, schema: &Schema) -> Map<String, Value> {
        let mut map = Map::with_capacity(self.values.len() + 1);
        map.insert(schema.identity.clone(), Value::from(self.id));
        for (field, value) in schema.fields.iter().zip(&self.values) {
            map.insert(field.column.clone(), value.to_json());
        }
        map
    }

    /// Spreadsheet row, identity first, in header order.
    pub fn to_sheet_row(&self) -> Vec<Value> {
        std::iter::once(Value::from(self.id))
            .chain(self.values.iter().map(ColumnValue::to_json))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_members_are_absent() {
        let obj = json!({"name": "Asha", "weight": null, "height": 101.5, "age": 6});
        let rec = ExtractedRecord::from_json_object(obj.as_object().unwrap());
        assert_eq!(rec.len(), 3);
        assert!(!rec.contains_key("weight"));
        assert_eq!(rec["height"], ScalarValue::Float(101.5));
        assert_eq!(rec["age"], ScalarValue::Integer(6));
    }

    #[test]
    fn persisted_row_json_keeps_column_order() {
        let schema = Schema::student();
        let row = PersistedRow {
            id: 7,
            values: vec![
                ColumnValue::Null,
                ColumnValue::Text("Asha".into()),
                ColumnValue::Float(18.5),
                ColumnValue::Null,
                ColumnValue::Null,
            ],
        };
        let json = row.to_json(&schema);
        let keys: Vec<_> = json.keys().cloned().collect();
        assert_eq!(keys, schema.header());
        assert_eq!(json["अ.क्र."], json!(7));
        assert_eq!(row.to_sheet_row()[2], json!("Asha"));
    }

    #[test]
    fn date_serialises_as_iso() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(ColumnValue::Date(d).to_json(), json!("2024-03-09"));
    }
}
