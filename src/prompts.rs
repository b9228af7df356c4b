//! Extraction instructions sent with every batch of page images.
//!
//! One instruction per schema variant. Callers can override it via
//! [`crate::config::PipelineConfig::instruction`]; the constants here are
//! used only when no override is provided.

use crate::config::ResponseDecoder;
use crate::schema::SchemaVariant;

/// Instruction for handwritten ledger pages.
pub const LEDGER_INSTRUCTION: &str = r#"You are reading photographed or scanned pages of a handwritten financial ledger.

Extract every ledger entry, in reading order, across all attached pages.

Return a JSON array. Each element is one entry with exactly these keys:
  "date"         the entry date as written (string, or null)
  "party_name"   the person or account name (string, or null)
  "particulars"  the description of the entry (string, or null)
  "quantity"     the quantity as a number (or null)
  "rate"         the unit rate as a number (or null)
  "amount"       the amount as a number (or null)
  "remarks"      any remark written next to the entry (string, or null)

Rules:
- Use null for anything you cannot read. Never guess digits.
- Numbers must be plain JSON numbers without currency symbols or separators.
- Skip column headings, totals carried forward and blank lines.
- Output ONLY the JSON array. No commentary."#;

/// Instruction for the student measurement register.
pub const STUDENT_INSTRUCTION: &str = r#"You are reading photographed or scanned pages of a handwritten student register.

Extract student data for every student row, in reading order, across all attached pages: name, weight (kg), height (cm), remark.

Return a JSON array. Each element has exactly these keys:
  "name"    the student's name as written (string)
  "weight"  weight in kilograms as a number (or null)
  "height"  height in centimetres as a number (or null)
  "remark"  the remark column (string, or null)

Rules:
- Keep names in the script they are written in.
- Use null for anything you cannot read. Never guess digits.
- Output ONLY the JSON array. No commentary."#;

/// Instruction for the student register when the positional decoder is active.
pub const STUDENT_POSITIONAL_INSTRUCTION: &str = r#"You are reading photographed or scanned pages of a handwritten student register.

Extract student data: name, weight (kg), height (cm), remark.

Write one line per student, in reading order, with the four values separated by commas:
name, weight, height, remark

Leave a value empty if you cannot read it. Do not use commas inside values. Output nothing else."#;

/// The built-in instruction for a schema and decoder pair.
pub fn default_instruction(schema: SchemaVariant, decoder: ResponseDecoder) -> &'static str {
    match (schema, decoder) {
        (SchemaVariant::Ledger, _) => LEDGER_INSTRUCTION,
        (SchemaVariant::Student, ResponseDecoder::Json) => STUDENT_INSTRUCTION,
        (SchemaVariant::Student, ResponseDecoder::Positional) => STUDENT_POSITIONAL_INSTRUCTION,
    }
}
