//! Record files: JSON arrays of flat objects, standing in for the backend.

use std::path::Path;

use measview_core::{ingest, IdentityField};
use measview_protocol::Record;
use serde_json::Value;

pub fn read_records(path: &Path, identity: &IdentityField) -> Result<Vec<Record>, String> {
    let content = fs_err::read_to_string(path).map_err(|e| e.to_string())?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| format!("{} is not valid JSON: {}", path.display(), e))?;
    ingest(value, identity).map_err(|e| format!("{}: {}", path.display(), e))
}

pub fn write_records(path: &Path, records: &[Record]) -> Result<(), String> {
    let mut content = records_to_string(records)?;
    content.push('\n');
    fs_err::write(path, content).map_err(|e| e.to_string())
}

pub fn records_to_string(records: &[Record]) -> Result<String, String> {
    let value = Value::Array(records.iter().cloned().map(Value::Object).collect());
    serde_json::to_string_pretty(&value).map_err(|e| format!("Failed to serialize records: {}", e))
}
