//! Store keys, message types and validation for MeasView sync.
//!
//! This crate is shared by the parent (orchestrator) and the editor context to
//! prevent schema drift. Each side validates what it receives; the types here
//! let both sides construct valid payloads.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024; // 8MB

/// A single row: field name → scalar value, in display order.
pub type Record = Map<String, Value>;

/// Logical key names in the shared store.
pub mod keys {
    /// Filtered view written by the parent and the edited view written back by the editor.
    pub const DATASET: &str = "dataset";
    /// Alternate producers (verification report / summary table).
    pub const REPORT_DATA: &str = "reportData";
    pub const SUMMARY_DATA: &str = "summaryData";
    pub const MUTABLE_FIELDS: &str = "mutableFields";
    pub const SESSION_OPEN: &str = "sessionOpen";
    pub const OWNER_SESSION_ID: &str = "ownerSessionId";
    pub const DATA_SOURCE: &str = "dataViewSource";
    pub const MASTER_DATASET: &str = "masterDataset";
    pub const EDITOR_HEARTBEAT: &str = "editorHeartbeat";

    /// Load order tried by the editor; earlier keys win.
    pub const DEFAULT_CANDIDATES: [&str; 3] = [REPORT_DATA, SUMMARY_DATA, DATASET];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    Parent,
    Child,
}

impl ContextRole {
    pub fn other(self) -> Self {
        match self {
            ContextRole::Parent => ContextRole::Child,
            ContextRole::Child => ContextRole::Parent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextRole::Parent => "parent",
            ContextRole::Child => "child",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value.as_str()? {
            "open" => Some(SessionStatus::Open),
            "closed" => Some(SessionStatus::Closed),
            _ => None,
        }
    }
}

/// Fields the editor may change, plus display order and numeric typing.
///
/// Serialized as `{columns, editableKeys, numericKeys}`. Older producers only
/// write `{columns, editableKeys}`; `numericKeys` then defaults to empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutableFieldSet {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub editable_keys: Vec<String>,
    #[serde(default)]
    pub numeric_keys: Vec<String>,
}

pub const DEFAULT_EDITABLE_KEYS: [&str; 4] = [
    "measSetComments",
    "maxTxVoltageVolt",
    "ceilTxVoltageVolt",
    "numTxCycles",
];

pub const DEFAULT_NUMERIC_KEYS: [&str; 3] =
    ["maxTxVoltageVolt", "ceilTxVoltageVolt", "numTxCycles"];

impl MutableFieldSet {
    pub fn new<I, S>(editable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: Vec::new(),
            editable_keys: editable.into_iter().map(Into::into).collect(),
            numeric_keys: Vec::new(),
        }
    }

    pub fn with_numeric<I, S>(mut self, numeric: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.numeric_keys = numeric.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Measurement-set columns editable in the original data view.
    pub fn measurement_defaults() -> Self {
        Self::new(DEFAULT_EDITABLE_KEYS).with_numeric(DEFAULT_NUMERIC_KEYS)
    }

    pub fn is_mutable(&self, field: &str) -> bool {
        self.editable_keys.iter().any(|key| key == field)
    }

    pub fn is_numeric(&self, field: &str) -> bool {
        self.numeric_keys.iter().any(|key| key == field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    /// Parent → child: the filtered view and editing rules.
    #[serde(rename_all = "camelCase")]
    InitData {
        data: Vec<Record>,
        editable_columns: MutableFieldSet,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_type: Option<String>,
    },
    /// Child → parent: the edited view was written to the store.
    DataModified { data: Vec<Record>, timestamp: i64 },
    /// Ask the other side for its latest data.
    RequestLatestData,
    /// Parent → child: replace the working data.
    RefreshData { data: Vec<Record> },
}

impl SyncMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::InitData { .. } => "INIT_DATA",
            SyncMessage::DataModified { .. } => "DATA_MODIFIED",
            SyncMessage::RequestLatestData => "REQUEST_LATEST_DATA",
            SyncMessage::RefreshData { .. } => "REFRESH_DATA",
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self {
            SyncMessage::InitData { data, .. } | SyncMessage::RefreshData { data } => {
                validate_records(data)
            }
            SyncMessage::DataModified { data, timestamp } => {
                if *timestamp <= 0 {
                    return Err(ErrorInfo::new(
                        "invalid_timestamp",
                        "timestamp must be a positive epoch millisecond value",
                    ));
                }
                validate_records(data)
            }
            SyncMessage::RequestLatestData => Ok(()),
        }
    }
}

/// Wire wrapper used by transports that cross a process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub protocol_version: u32,
    pub from: ContextRole,
    pub sent_at: String,
    pub message: SyncMessage,
}

impl Envelope {
    pub fn new(from: ContextRole, sent_at: String, message: SyncMessage) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            from,
            sent_at,
            message,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(ErrorInfo::new(
                "protocol_mismatch",
                format!(
                    "unsupported protocol version {} (expected {})",
                    self.protocol_version, PROTOCOL_VERSION
                ),
            ));
        }
        if DateTime::parse_from_rfc3339(&self.sent_at).is_err() {
            return Err(ErrorInfo::new("invalid_timestamp", "sent_at must be RFC3339"));
        }
        self.message.validate()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Rows must hold scalars only (string, number, boolean, null).
pub fn validate_records(records: &[Record]) -> Result<(), ErrorInfo> {
    for (index, record) in records.iter().enumerate() {
        for (field, value) in record {
            if value.is_array() || value.is_object() {
                return Err(ErrorInfo::new(
                    "invalid_record",
                    format!("row {} field {} is not a scalar", index, field),
                ));
            }
        }
    }
    Ok(())
}

/// Parses a JSON array of rows, rejecting non-object rows and nested values.
pub fn parse_records(value: Value) -> Result<Vec<Record>, ErrorInfo> {
    let rows = match value {
        Value::Array(rows) => rows,
        _ => {
            return Err(ErrorInfo::new(
                "invalid_records",
                "dataset must be a JSON array",
            ))
        }
    };

    let mut records = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        match row {
            Value::Object(record) => records.push(record),
            _ => {
                return Err(ErrorInfo::new(
                    "invalid_record",
                    format!("row {} is not an object", index),
                ))
            }
        }
    }
    validate_records(&records)?;
    Ok(records)
}

pub fn parse_message(value: Value) -> Result<SyncMessage, ErrorInfo> {
    let message: SyncMessage = serde_json::from_value(value).map_err(|err| {
        ErrorInfo::new(
            "invalid_message",
            format!("message payload is invalid: {}", err),
        )
    })?;
    message.validate()?;
    Ok(message)
}

pub fn parse_envelope(bytes: &[u8]) -> Result<Envelope, ErrorInfo> {
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(ErrorInfo::new(
            "message_too_large",
            "message exceeded maximum size",
        ));
    }
    let envelope: Envelope = serde_json::from_slice(bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("envelope was not valid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}
