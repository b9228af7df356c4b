//! Response decoding: turn the model's free text into records.
//!
//! ## Why is this not just `serde_json::from_str`?
//!
//! Even when told to output only JSON, multimodal models regularly:
//!
//! - wrap the array in a ` ```json ... ``` ` fence
//! - prepend a sentence ("Here is the extracted data:")
//! - return a bare object when there is a single row
//!
//! [`json_payload`] locates the JSON with a fixed, deterministic sequence of
//! steps; it never repairs or guesses. If the located text is not valid JSON
//! the whole extraction fails.
//!
//! The positional decoder is a separate, explicitly selected mode for flat
//! schemas. It is lossy by construction and is never tried as a fallback.

use crate::config::ResponseDecoder;
use crate::error::LedgerError;
use crate::record::{ExtractedRecord, ScalarValue};
use crate::schema::Schema;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Decode a model reply with the configured decoder.
pub fn decode(
    decoder: ResponseDecoder,
    text: &str,
    schema: &Schema,
) -> Result<Vec<ExtractedRecord>, LedgerError> {
    match decoder {
        ResponseDecoder::Json => decode_json(text),
        ResponseDecoder::Positional => {
            let columns: Vec<&str> = schema
                .positional_fields()
                .map(|f| f.column.as_str())
                .collect();
            if columns.is_empty() {
                return Err(LedgerError::InvalidConfig(format!(
                    "the {} schema declares no positional fields",
                    schema.variant
                )));
            }
            Ok(decode_positional(text, &columns))
        }
    }
}

// ── JSON decoder ─────────────────────────────────────────────────────────────

/// Parse the reply as one object or an array of objects.
pub fn decode_json(text: &str) -> Result<Vec<ExtractedRecord>, LedgerError> {
    let payload = json_payload(text)?;
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| LedgerError::format(format!("invalid JSON: {e}")))?;

    let records = match value {
        Value::Object(obj) => vec![ExtractedRecord::from_json_object(&obj)],
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(obj) => Ok(ExtractedRecord::from_json_object(obj)),
                other => Err(LedgerError::format(format!(
                    "array element {i} is {}, expected an object",
                    json_type(other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(LedgerError::format(format!(
                "expected an object or array, got {}",
                json_type(&other)
            )))
        }
    };

    debug!("Decoded {} records from JSON reply", records.len());
    Ok(records)
}

static RE_FENCED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)\r?\n?[ \t]*```$").unwrap()
});

/// Locate the JSON text inside a reply.
///
/// 1. Trim surrounding whitespace.
/// 2. Fenced block (optionally language-tagged) → the fenced content.
/// 3. Starts with `[` or `{` → the whole text.
/// 4. Otherwise the first balanced array/object substring.
pub fn json_payload(text: &str) -> Result<&str, LedgerError> {
    let trimmed = text.trim();

    if let Some(inner) = RE_FENCED.captures(trimmed).and_then(|c| c.get(1)) {
        return Ok(inner.as_str().trim());
    }

    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return Ok(trimmed);
    }

    find_balanced(trimmed).ok_or_else(|| {
        LedgerError::format(format!(
            "no JSON array or object found in reply: {:?}",
            preview(trimmed)
        ))
    })
}

/// First substring that opens with `[`/`{` and closes with its match.
///
/// Brackets inside string literals are ignored; escapes are honoured.
fn find_balanced(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'[' || **b == b'{')
        .find_map(|(start, _)| balanced_len(&bytes[start..]).map(|len| &text[start..start + len]))
}

fn balanced_len(bytes: &[u8]) -> Option<usize> {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => stack.push(b),
            b']' | b'}' => {
                let open = stack.pop()?;
                if (open == b'[') != (b == b']') {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > 80 {
        format!("{}\u{2026}", s.chars().take(79).collect::<String>())
    } else {
        s.to_string()
    }
}

// ── Positional decoder ───────────────────────────────────────────────────────

/// Split each non-empty line on commas and assign segments by position.
///
/// Lossy and position-dependent: segment 1 → `columns[0]`, segment 2 →
/// `columns[1]`, and so on. Missing trailing segments and empty segments
/// are absent; extra segments are ignored. Values stay text; the mapper
/// coerces them.
pub fn decode_positional(text: &str, columns: &[&str]) -> Vec<ExtractedRecord> {
    let trimmed = text.trim();
    let body = RE_FENCED
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut record = ExtractedRecord::new();
            for (column, segment) in columns.iter().zip(line.split(',')) {
                let segment = segment.trim();
                if !segment.is_empty() {
                    record.insert(*column, ScalarValue::Text(segment.to_string()));
                }
            }
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_with_language_tag() {
        let recs = decode_json("```json\n[{\"a\":1}]\n```").unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0]["a"], ScalarValue::Integer(1));
    }

    #[test]
    fn fence_without_tag_is_stripped() {
        assert_eq!(json_payload("```\n{\"a\":1}\n```").unwrap(), "{\"a\":1}");
    }

    #[test]
    fn bare_object_is_wrapped() {
        let recs = decode_json("{\"a\":1}").unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0]["a"], ScalarValue::Integer(1));
    }

    #[test]
    fn no_json_is_a_format_error() {
        let err = decode_json("no json here").unwrap_err();
        assert!(matches!(err, LedgerError::ExtractionFormat { .. }));
    }

    #[test]
    fn json_embedded_in_prose_is_found() {
        let text = "Here is the extracted data:\n[{\"name\": \"Asha\"}, {\"name\": \"Ravi\"}]\nLet me know!";
        let recs = decode_json(text).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1]["name"], ScalarValue::Text("Ravi".into()));
    }

    #[test]
    fn brackets_inside_strings_do_not_confuse_matching() {
        let text = r#"Result: {"remark": "absent ] {today", "note": "say \"hi\" }"} trailing"#;
        let payload = json_payload(text).unwrap();
        assert!(payload.starts_with('{') && payload.ends_with('}'));
        let recs = decode_json(text).unwrap();
        assert_eq!(
            recs[0]["remark"],
            ScalarValue::Text("absent ] {today".into())
        );
    }

    #[test]
    fn unbalanced_is_a_format_error() {
        let err = decode_json("Sure: [{\"a\": 1").unwrap_err();
        assert!(matches!(err, LedgerError::ExtractionFormat { .. }));
    }

    #[test]
    fn malformed_json_is_not_guessed() {
        let err = decode_json("[{'a': 1}]").unwrap_err();
        assert!(err.to_string().contains("invalid JSON"), "got: {err}");
    }

    #[test]
    fn scalar_and_non_object_elements_are_errors() {
        assert!(decode_json("```json\n42\n```").is_err());
        assert!(decode_json("[1, 2]").is_err());
    }

    #[test]
    fn empty_array_yields_no_records() {
        assert!(decode_json("[]").unwrap().is_empty());
    }

    #[test]
    fn positional_assigns_by_position() {
        let cols = ["name", "weight", "height", "remark"];
        let recs = decode_positional("Asha, 18.5, 102, good\nRavi, 20", &cols);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0]["remark"], ScalarValue::Text("good".into()));
        assert_eq!(recs[1]["weight"], ScalarValue::Text("20".into()));
        assert!(!recs[1].contains_key("height"));
        assert!(!recs[1].contains_key("remark"));
    }

    #[test]
    fn positional_ignores_extra_and_empty_segments() {
        let recs = decode_positional("Asha,,102,ok,extra", &["name", "weight", "height", "remark"]);
        assert_eq!(recs[0].len(), 3);
        assert!(!recs[0].contains_key("weight"));
    }

    #[test]
    fn positional_decoder_uses_schema_columns() {
        let schema = Schema::student();
        let recs = decode(ResponseDecoder::Positional, "Asha, 18", &schema).unwrap();
        assert_eq!(
            recs[0]["बालकांचे नाव"],
            ScalarValue::Text("Asha".into())
        );
        assert_eq!(recs[0]["वजन (किलो)"], ScalarValue::Text("18".into()));
    }

    #[test]
    fn positional_rejected_for_schema_without_positional_fields() {
        let err = decode(ResponseDecoder::Positional, "a,b", &Schema::ledger()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidConfig(_)));
    }
}
