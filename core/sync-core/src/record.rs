//! Record ingestion and row identity.
//!
//! Producers spell the identity field several ways (`groupIndex`, `GroupIndex`,
//! ...). Aliases are rewritten to the canonical name once, at ingestion, so the
//! reconciliation engine only ever looks at one field.

use std::fmt;

use measview_protocol::{parse_records, Record};
use serde_json::{Number, Value};

use crate::error::{Result, SyncError};

/// Canonical identity field name plus the aliases accepted on input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityField {
    canonical: String,
    aliases: Vec<String>,
}

impl IdentityField {
    pub fn new(canonical: impl Into<String>) -> Self {
        Self {
            canonical: canonical.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases
            .into_iter()
            .map(Into::into)
            .filter(|alias| *alias != self.canonical)
            .collect();
        self
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Renames the first alias found to the canonical name, keeping its position.
    ///
    /// A record that already carries the canonical field is returned unchanged.
    pub fn canonicalize(&self, record: Record) -> Record {
        if record.contains_key(&self.canonical) {
            return record;
        }
        let alias = match self.aliases.iter().find(|alias| record.contains_key(*alias)) {
            Some(alias) => alias.clone(),
            None => return record,
        };

        record
            .into_iter()
            .map(|(field, value)| {
                if field == alias {
                    (self.canonical.clone(), value)
                } else {
                    (field, value)
                }
            })
            .collect()
    }

    pub fn identity_of(&self, record: &Record) -> Option<RowIdentity> {
        record.get(&self.canonical).and_then(RowIdentity::from_value)
    }
}

/// Correlation key between an edited row and a master row. Not unique.
///
/// Numbers are rendered canonically so `1` and `1.0` compare equal; strings are
/// trimmed. Null, booleans and empty strings carry no identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowIdentity(String);

impl RowIdentity {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => Some(RowIdentity(canonical_number(number))),
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(RowIdentity(trimmed.to_string()))
                }
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_number(number: &Number) -> String {
    if let Some(value) = number.as_i64() {
        return value.to_string();
    }
    if let Some(value) = number.as_u64() {
        return value.to_string();
    }
    match number.as_f64() {
        Some(value) if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 => {
            format!("{}", value as i64)
        }
        Some(value) => value.to_string(),
        None => number.to_string(),
    }
}

/// Validates raw rows and canonicalizes the identity field on each.
pub fn ingest(value: Value, identity: &IdentityField) -> Result<Vec<Record>> {
    let records = parse_records(value).map_err(|info| SyncError::InvalidRecord(info.message))?;
    Ok(canonicalize_all(records, identity))
}

pub fn canonicalize_all(records: Vec<Record>, identity: &IdentityField) -> Vec<Record> {
    records
        .into_iter()
        .map(|record| identity.canonicalize(record))
        .collect()
}

/// Text form of a cell, as shown in the table and matched by filters.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_index() -> IdentityField {
        IdentityField::new("groupIndex").with_aliases(["GroupIndex", "group_index"])
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn canonicalize_renames_alias_in_place() {
        let row = record(json!({"probe": "L3-12", "GroupIndex": 7, "v": 1}));
        let row = group_index().canonicalize(row);
        let fields: Vec<_> = row.keys().cloned().collect();
        assert_eq!(fields, vec!["probe", "groupIndex", "v"]);
        assert_eq!(row["groupIndex"], json!(7));
    }

    #[test]
    fn canonicalize_keeps_existing_canonical_field() {
        let row = record(json!({"groupIndex": 1, "GroupIndex": 2}));
        let row = group_index().canonicalize(row);
        assert_eq!(row["groupIndex"], json!(1));
        assert_eq!(row["GroupIndex"], json!(2));
    }

    #[test]
    fn identity_treats_integral_floats_as_integers() {
        let field = IdentityField::new("id");
        let a = field.identity_of(&record(json!({"id": 1})));
        let b = field.identity_of(&record(json!({"id": 1.0})));
        assert_eq!(a, b);
        assert_eq!(a.unwrap().as_str(), "1");
    }

    #[test]
    fn identity_absent_for_null_blank_and_bool() {
        let field = IdentityField::new("id");
        assert!(field.identity_of(&record(json!({"id": null}))).is_none());
        assert!(field.identity_of(&record(json!({"id": "  "}))).is_none());
        assert!(field.identity_of(&record(json!({"id": true}))).is_none());
        assert!(field.identity_of(&record(json!({"other": 1}))).is_none());
    }

    #[test]
    fn ingest_rejects_nested_values() {
        let err = ingest(json!([{"id": 1, "list": [1, 2]}]), &IdentityField::new("id"))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidRecord(_)));
    }

    #[test]
    fn ingest_canonicalizes_every_row() {
        let rows = ingest(
            json!([{"group_index": 1}, {"groupIndex": 2}]),
            &group_index(),
        )
        .expect("ingest");
        assert!(rows.iter().all(|row| row.contains_key("groupIndex")));
    }

    #[test]
    fn cell_text_renders_scalars() {
        assert_eq!(cell_text(&json!(null)), "");
        assert_eq!(cell_text(&json!("abc")), "abc");
        assert_eq!(cell_text(&json!(12.5)), "12.5");
        assert_eq!(cell_text(&json!(false)), "false");
    }
}
