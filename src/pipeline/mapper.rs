//! Record mapping: fit loosely-typed extracted values onto the schema.
//!
//! Coercion rules per column kind:
//!
//! | Kind | Accepts | Missing / unparseable |
//! |------|---------|-----------------------|
//! | Text | any scalar, trimmed; blank → null | null |
//! | Integer | integers, integral floats, numeric text | `0` if zero-default, else null |
//! | Float | integers, floats, numeric text | `0.0` if zero-default, else null |
//! | Date | `YYYY-MM-DD`, `DD-MM-YYYY`, `DD/MM/YYYY`, `DD.MM.YYYY` | null |
//!
//! Numeric text may contain digit-group commas and Devanagari digits.
//! Integers outside the `i64` range count as unparseable.
//! Keys that match no column are dropped.
//!
//! Ledger dates: a processing-date column is overwritten with the current
//! date on every extracted record, whatever the model read from the page.

use crate::record::{ColumnValue, ExtractedRecord, MappedRecord, ScalarValue};
use crate::schema::{FieldKind, FieldSpec, Missing, Schema};
use chrono::NaiveDate;
use serde_json::{Map, Value};

/// Map one extracted record. `today` stamps processing-date columns.
pub fn map_extracted(schema: &Schema, record: &ExtractedRecord, today: NaiveDate) -> MappedRecord {
    let values = schema
        .fields
        .iter()
        .map(|field| {
            if field.processing_date {
                return ColumnValue::Date(today);
            }
            let found = record
                .fields
                .iter()
                .find(|(key, _)| field.accepts(key))
                .map(|(_, v)| v);
            coerce(field, found)
        })
        .collect();
    MappedRecord { values }
}

/// Map a row object keyed by column name, as sent back by the editing UI.
///
/// No date stamping: a date in the row is the date the user saw and kept.
pub fn map_columns(schema: &Schema, row: &Map<String, Value>) -> MappedRecord {
    let values = schema
        .fields
        .iter()
        .map(|field| {
            let found = row.get(&field.column).and_then(ScalarValue::from_json);
            coerce(field, found.as_ref())
        })
        .collect();
    MappedRecord { values }
}

/// Identity value of a row object, if present and integral.
pub fn identity_of(schema: &Schema, row: &Map<String, Value>) -> Option<i64> {
    match row.get(&schema.identity)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce(field: &FieldSpec, value: Option<&ScalarValue>) -> ColumnValue {
    let coerced = match (field.kind, value) {
        (_, None) => None,
        (FieldKind::Text, Some(v)) => coerce_text(v),
        (FieldKind::Integer, Some(v)) => coerce_integer(v),
        (FieldKind::Float, Some(v)) => coerce_float(v),
        (FieldKind::Date, Some(ScalarValue::Text(s))) => parse_date(s).map(ColumnValue::Date),
        (FieldKind::Date, Some(_)) => None,
    };
    coerced.unwrap_or_else(|| missing_value(field))
}

fn missing_value(field: &FieldSpec) -> ColumnValue {
    match (field.missing, field.kind) {
        (Missing::Zero, FieldKind::Integer) => ColumnValue::Integer(0),
        (Missing::Zero, FieldKind::Float) => ColumnValue::Float(0.0),
        _ => ColumnValue::Null,
    }
}

fn coerce_text(v: &ScalarValue) -> Option<ColumnValue> {
    let text = match v {
        ScalarValue::Text(s) => s.trim().to_string(),
        ScalarValue::Integer(i) => i.to_string(),
        ScalarValue::Float(f) => f.to_string(),
    };
    (!text.is_empty()).then_some(ColumnValue::Text(text))
}

fn coerce_integer(v: &ScalarValue) -> Option<ColumnValue> {
    let n = match v {
        ScalarValue::Integer(i) => return Some(ColumnValue::Integer(*i)),
        ScalarValue::Float(f) => *f,
        ScalarValue::Text(s) => parse_number(s)?,
    };
    // `as` saturates; anything outside i64 is unparseable instead.
    let in_range = (-9.223_372_036_854_775_808e18..9.223_372_036_854_775_808e18).contains(&n);
    (in_range && n.fract() == 0.0).then_some(ColumnValue::Integer(n as i64))
}

fn coerce_float(v: &ScalarValue) -> Option<ColumnValue> {
    let n = match v {
        ScalarValue::Integer(i) => *i as f64,
        ScalarValue::Float(f) => *f,
        ScalarValue::Text(s) => parse_number(s)?,
    };
    n.is_finite().then_some(ColumnValue::Float(n))
}

/// Parse numeric text: whitespace and `_` removed, Devanagari digits mapped
/// to ASCII. Commas must be digit-group separators (`1,200`, `1,00,000`); a
/// decimal comma such as `12,5` is rejected.
fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|c| *c != '_' && !c.is_whitespace())
        .map(|c| match c {
            '०'..='९' => char::from(b'0' + (c as u32 - '०' as u32) as u8),
            other => other,
        })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.contains(',') && !grouped_correctly(&cleaned) {
        return None;
    }
    cleaned.replace(',', "").parse::<f64>().ok()
}

/// Western (3-digit) or Indian (2-digit, last group 3) digit grouping in the
/// integer part, with no commas after the decimal point.
fn grouped_correctly(s: &str) -> bool {
    let (int_part, frac) = s.split_once('.').unwrap_or((s, ""));
    if frac.contains(',') {
        return false;
    }
    let int_part = int_part.trim_start_matches(['+', '-']);
    let groups: Vec<&str> = int_part.split(',').collect();
    let digits = |g: &str| g.bytes().all(|b| b.is_ascii_digit());
    let last = groups.len() - 1;
    groups.iter().enumerate().all(|(i, g)| {
        let len_ok = match i {
            0 => (1..=3).contains(&g.len()),
            i if i == last => g.len() == 3,
            _ => g.len() == 2 || g.len() == 3,
        };
        len_ok && digits(g)
    })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    fn extracted(v: Value) -> ExtractedRecord {
        ExtractedRecord::from_json_object(v.as_object().unwrap())
    }

    fn column<'a>(schema: &Schema, rec: &'a MappedRecord, name: &str) -> &'a ColumnValue {
        let idx = schema.fields.iter().position(|f| f.column == name).unwrap();
        &rec.values[idx]
    }

    #[test]
    fn zero_defaults_and_numeric_text() {
        let schema = Schema::ledger();
        let rec = map_extracted(
            &schema,
            &extracted(json!({"quantity": null, "amount": "12.5"})),
            today(),
        );
        assert_eq!(column(&schema, &rec, "quantity"), &ColumnValue::Integer(0));
        assert_eq!(column(&schema, &rec, "amount"), &ColumnValue::Float(12.5));
        assert_eq!(column(&schema, &rec, "rate"), &ColumnValue::Null);
        assert_eq!(column(&schema, &rec, "particulars"), &ColumnValue::Null);
    }

    #[test]
    fn ledger_date_is_always_processing_date() {
        let schema = Schema::ledger();
        let rec = map_extracted(&schema, &extracted(json!({"date": "2019-04-01"})), today());
        assert_eq!(column(&schema, &rec, "entry_date"), &ColumnValue::Date(today()));
    }

    #[test]
    fn unknown_keys_are_discarded_and_aliases_match() {
        let schema = Schema::ledger();
        let rec = map_extracted(
            &schema,
            &extracted(json!({"Party": "Ramesh Traders", "Total": 1200, "page": 3, "confidence": 0.9})),
            today(),
        );
        assert_eq!(rec.values.len(), schema.fields.len());
        assert_eq!(
            column(&schema, &rec, "party_name"),
            &ColumnValue::Text("Ramesh Traders".into())
        );
        assert_eq!(column(&schema, &rec, "amount"), &ColumnValue::Float(1200.0));
    }

    #[test]
    fn first_alias_in_reply_order_wins() {
        let schema = Schema::ledger();
        let rec = map_extracted(&schema, &extracted(json!({"total": 5, "amount": 7})), today());
        assert_eq!(column(&schema, &rec, "amount"), &ColumnValue::Float(5.0));
        let rec = map_extracted(&schema, &extracted(json!({"amount": 7, "total": 5})), today());
        assert_eq!(column(&schema, &rec, "amount"), &ColumnValue::Float(7.0));
    }

    #[test]
    fn integer_coercion() {
        let schema = Schema::ledger();
        let q = |v: Value| {
            let rec = map_extracted(&schema, &extracted(json!({ "quantity": v })), today());
            column(&schema, &rec, "quantity").clone()
        };
        assert_eq!(q(json!("1,200")), ColumnValue::Integer(1200));
        assert_eq!(q(json!(3.0)), ColumnValue::Integer(3));
        assert_eq!(q(json!(2.5)), ColumnValue::Integer(0));
        assert_eq!(q(json!("twelve")), ColumnValue::Integer(0));
    }

    #[test]
    fn out_of_range_integers_fall_back_to_zero() {
        let schema = Schema::ledger();
        let q = |v: Value| {
            let rec = map_extracted(&schema, &extracted(json!({ "quantity": v })), today());
            column(&schema, &rec, "quantity").clone()
        };
        assert_eq!(q(json!("1e30")), ColumnValue::Integer(0));
        assert_eq!(q(json!(u64::MAX)), ColumnValue::Integer(0));
        assert_eq!(q(json!(-1e19)), ColumnValue::Integer(0));
        assert_eq!(q(json!(i64::MAX)), ColumnValue::Integer(i64::MAX));
        assert_eq!(q(json!("-9000")), ColumnValue::Integer(-9000));
    }

    #[test]
    fn commas_must_group_digits() {
        let schema = Schema::ledger();
        let amount = |v: &str| {
            let rec = map_extracted(&schema, &extracted(json!({ "amount": v })), today());
            column(&schema, &rec, "amount").clone()
        };
        assert_eq!(amount("1,200.50"), ColumnValue::Float(1200.5));
        assert_eq!(amount("1,00,000"), ColumnValue::Float(100000.0));
        assert_eq!(amount("-12,345,678"), ColumnValue::Float(-12345678.0));
        assert_eq!(amount("12,5"), ColumnValue::Float(0.0));
        assert_eq!(amount("12,50"), ColumnValue::Float(0.0));
        assert_eq!(amount("1,2345"), ColumnValue::Float(0.0));
        assert_eq!(amount("1.5,000"), ColumnValue::Float(0.0));
    }

    #[test]
    fn student_optional_numbers_stay_null() {
        let schema = Schema::student();
        let rec = map_extracted(
            &schema,
            &extracted(json!({"name": "  आशा ", "weight": "१८.५", "remark": ""})),
            today(),
        );
        assert_eq!(
            column(&schema, &rec, "बालकांचे नाव"),
            &ColumnValue::Text("आशा".into())
        );
        assert_eq!(column(&schema, &rec, "वजन (किलो)"), &ColumnValue::Float(18.5));
        assert_eq!(column(&schema, &rec, "उंची (सेमी)"), &ColumnValue::Null);
        assert_eq!(column(&schema, &rec, "शेरा"), &ColumnValue::Null);
        assert_eq!(column(&schema, &rec, "वर्ग क्र."), &ColumnValue::Null);
    }

    #[test]
    fn map_columns_keeps_given_date() {
        let schema = Schema::ledger();
        let row = json!({"id": 4, "entry_date": "03/02/2024", "amount": 10, "quantity": "2"});
        let rec = map_columns(&schema, row.as_object().unwrap());
        assert_eq!(
            column(&schema, &rec, "entry_date"),
            &ColumnValue::Date(NaiveDate::from_ymd_opt(2024, 2, 3).unwrap())
        );
        assert_eq!(column(&schema, &rec, "quantity"), &ColumnValue::Integer(2));
    }

    #[test]
    fn map_columns_uses_column_names_only() {
        let schema = Schema::student();
        let row = json!({"वर्ग क्र.": "3", "name": "ignored"});
        let rec = map_columns(&schema, row.as_object().unwrap());
        assert_eq!(column(&schema, &rec, "वर्ग क्र."), &ColumnValue::Text("3".into()));
        assert_eq!(column(&schema, &rec, "बालकांचे नाव"), &ColumnValue::Null);
    }

    #[test]
    fn identity_parsing() {
        let schema = Schema::student();
        let id = |v: Value| identity_of(&schema, json!({ "अ.क्र.": v }).as_object().unwrap());
        assert_eq!(id(json!(5)), Some(5));
        assert_eq!(id(json!("12")), Some(12));
        assert_eq!(id(json!(1.5)), None);
        assert_eq!(id(Value::Null), None);
        assert_eq!(identity_of(&schema, &Map::new()), None);
    }
}
