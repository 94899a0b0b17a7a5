//! Per-cell validation for editable fields.

use measview_protocol::MutableFieldSet;
use serde_json::Value;

pub const INVALID_NUMBER: &str = "Enter a valid number";

/// Returns an error message for an invalid cell, `None` when the value is acceptable.
///
/// Only numeric fields are checked. Text and non-editable fields always pass.
pub fn validate_cell(fields: &MutableFieldSet, field: &str, value: &Value) -> Option<String> {
    if !fields.is_mutable(field) || !fields.is_numeric(field) {
        return None;
    }
    if is_numeric_input(value) {
        None
    } else {
        Some(INVALID_NUMBER.to_string())
    }
}

/// Empty and null inputs are allowed (clearing a cell). Text is accepted when it
/// starts with a number, so `"12V"` passes and `"abc"` does not.
fn is_numeric_input(value: &Value) -> bool {
    match value {
        Value::Null | Value::Number(_) => true,
        Value::String(text) => text.is_empty() || has_numeric_prefix(text),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => false,
    }
}

fn has_numeric_prefix(text: &str) -> bool {
    let trimmed = text.trim_start();
    let unsigned = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
    if unsigned.starts_with("Infinity") {
        return true;
    }
    let mut chars = unsigned.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Interprets typed input: JSON scalars (`12`, `true`, `null`, `"quoted"`) keep
/// their type, anything else is kept as text.
pub fn parse_cell_input(input: &str) -> Value {
    match serde_json::from_str::<Value>(input.trim()) {
        Ok(value) if !value.is_array() && !value.is_object() => value,
        _ => Value::String(input.to_string()),
    }
}
