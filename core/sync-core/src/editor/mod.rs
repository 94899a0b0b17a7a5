//! Editor session: the secondary context's working copy of a filtered view.
//!
//! ```text
//! Loading ──load/INIT_DATA──▶ Ready ⇄ Editing ──save──▶ Saving ──▶ Ready
//!    │                          │         │
//!    └──no data──▶ Error        └─teardown┴──▶ Closed
//! ```
//!
//! The session keeps two copies of the loaded rows. The pristine copy is what
//! was loaded (or last saved) and supplies `original_value` for edits and the
//! target of a revert. The working copy receives edits immediately and grows
//! when rows are copied. Deletions are only flags until the next save.
//!
//! Row indices always refer to the working copy. Sorting and filtering are a
//! projection ([`EditorSession::display_rows`]) and never renumber rows.

mod validation;
mod view;

pub use validation::{parse_cell_input, validate_cell, INVALID_NUMBER};
pub use view::{compare_cells, filter_options, SortDirection, SortSpec, ViewState};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use measview_protocol::{keys, MutableFieldSet, Record, SessionStatus, SyncMessage};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reconcile::values_equal;
use crate::record::{canonicalize_all, IdentityField};
use crate::transport::{get_records, put_records, Transport, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorState {
    Loading,
    Ready,
    Editing,
    Saving,
    Closed,
    Error(String),
}

impl EditorState {
    pub fn name(&self) -> &'static str {
        match self {
            EditorState::Loading => "loading",
            EditorState::Ready => "ready",
            EditorState::Editing => "editing",
            EditorState::Saving => "saving",
            EditorState::Closed => "closed",
            EditorState::Error(_) => "error",
        }
    }

    fn is_loaded(&self) -> bool {
        matches!(self, EditorState::Ready | EditorState::Editing)
    }
}

/// Questions the session asks the user before destructive operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmPrompt {
    DeleteRow { row: usize },
    RestoreDeleted { count: usize },
    RevertChanges,
}

impl fmt::Display for ConfirmPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmPrompt::DeleteRow { row } => write!(
                f,
                "Delete row {}? This can be undone until you save.",
                row
            ),
            ConfirmPrompt::RestoreDeleted { count } => {
                write!(f, "Restore {} deleted row(s)?", count)
            }
            ConfirmPrompt::RevertChanges => {
                write!(f, "Discard all changes and restore the original data?")
            }
        }
    }
}

/// User confirmation port.
pub trait Confirm {
    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&ConfirmPrompt) -> bool,
{
    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool {
        self(prompt)
    }
}

/// Answers yes to every prompt (non-interactive use).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&mut self, _prompt: &ConfirmPrompt) -> bool {
        true
    }
}

/// Key of an edit or validation error. Displays as `row-field`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub row: usize,
    pub field: String,
}

impl CellKey {
    pub fn new(row: usize, field: impl Into<String>) -> Self {
        Self {
            row,
            field: field.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.row, self.field)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditEntry {
    pub row_index: usize,
    pub field_name: String,
    pub new_value: Value,
    pub original_value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeSummary {
    pub changed_cells: usize,
    pub pending_deletions: usize,
    pub added_rows: usize,
    pub validation_errors: usize,
}

impl ChangeSummary {
    pub fn is_clean(&self) -> bool {
        self.changed_cells == 0 && self.pending_deletions == 0 && self.added_rows == 0
    }
}

/// What handling a transport event did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorReaction {
    Ignored,
    Loaded { rows: usize },
    Refreshed { rows: usize },
    Saved { rows: usize },
    SaveBlocked { keys: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct EditorSession {
    state: EditorState,
    identity: IdentityField,
    default_fields: MutableFieldSet,
    fields: MutableFieldSet,
    columns: Vec<String>,
    data_source: Option<String>,
    pristine: Vec<Record>,
    working: Vec<Record>,
    edits: BTreeMap<CellKey, EditEntry>,
    errors: BTreeMap<CellKey, String>,
    deleted: BTreeSet<usize>,
    view: ViewState,
}

impl EditorSession {
    /// `default_fields` is used when the parent did not publish `mutableFields`.
    pub fn new(identity: IdentityField, default_fields: MutableFieldSet) -> Self {
        Self {
            state: EditorState::Loading,
            identity,
            fields: default_fields.clone(),
            default_fields,
            columns: Vec::new(),
            data_source: None,
            pristine: Vec::new(),
            working: Vec::new(),
            edits: BTreeMap::new(),
            errors: BTreeMap::new(),
            deleted: BTreeSet::new(),
            view: ViewState::default(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.identity_field(), config.default_mutable_fields())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn fields(&self) -> &MutableFieldSet {
        &self.fields
    }

    /// Display column order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Producer tag (`dataViewSource`) when the parent published one.
    pub fn data_source(&self) -> Option<&str> {
        self.data_source.as_deref()
    }

    /// The working copy, deleted rows included.
    pub fn records(&self) -> &[Record] {
        &self.working
    }

    pub fn edits(&self) -> &BTreeMap<CellKey, EditEntry> {
        &self.edits
    }

    pub fn validation_errors(&self) -> &BTreeMap<CellKey, String> {
        &self.errors
    }

    pub fn deleted_rows(&self) -> &BTreeSet<usize> {
        &self.deleted
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Visible rows in display order, each with its working-copy index.
    pub fn display_rows(&self) -> Vec<(usize, &Record)> {
        self.view.project(&self.working, &self.deleted)
    }

    pub fn change_summary(&self) -> ChangeSummary {
        ChangeSummary {
            changed_cells: self.edits.len(),
            pending_deletions: self.deleted.len(),
            added_rows: self.working.len().saturating_sub(self.pristine.len()),
            validation_errors: self.errors.len(),
        }
    }

    /// Distinct values per display column over rows not marked for deletion.
    pub fn filter_options(&self) -> Vec<(String, Vec<Value>)> {
        let live: Vec<&Record> = self
            .working
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.deleted.contains(index))
            .map(|(_, row)| row)
            .collect();
        filter_options(live.iter().copied(), &self.columns)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────────────

    /// Loads the first non-empty dataset found under `candidates`, in order.
    pub fn load<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        candidates: &[String],
    ) -> Result<usize> {
        self.require_state("load", |state| {
            matches!(state, EditorState::Loading | EditorState::Error(_))
        })?;

        let mut found = None;
        for key in candidates {
            match get_records(transport, key) {
                Ok(Some(records)) if !records.is_empty() => {
                    found = Some((key.clone(), records));
                    break;
                }
                Ok(_) => continue,
                Err(err) => {
                    self.state = EditorState::Error(err.to_string());
                    return Err(err);
                }
            }
        }

        let (key, records) = match found {
            Some(found) => found,
            None => {
                let err = SyncError::Load {
                    candidates: candidates.to_vec(),
                };
                self.state = EditorState::Error(err.to_string());
                return Err(err);
            }
        };

        let fields = match transport.get(keys::MUTABLE_FIELDS)? {
            Some(value) => serde_json::from_value::<MutableFieldSet>(value)
                .map_err(|err| SyncError::json("mutableFields", err))?,
            None => self.default_fields.clone(),
        };
        self.data_source = transport
            .get(keys::DATA_SOURCE)?
            .and_then(|value| value.as_str().map(str::to_string));

        let rows = records.len();
        self.install(records, Some(fields));
        transport.put(
            keys::SESSION_OPEN,
            Value::String(SessionStatus::Open.as_str().to_string()),
        )?;
        info!(key = %key, rows, "Editor loaded dataset");
        Ok(rows)
    }

    fn install(&mut self, records: Vec<Record>, fields: Option<MutableFieldSet>) {
        let records = canonicalize_all(records, &self.identity);
        if let Some(fields) = fields {
            self.fields = fields;
        }
        self.columns = if self.fields.columns.is_empty() {
            records
                .first()
                .map(|row| row.keys().cloned().collect())
                .unwrap_or_default()
        } else {
            self.fields.columns.clone()
        };
        self.pristine = records.clone();
        self.working = records;
        self.edits.clear();
        self.errors.clear();
        self.deleted.clear();
        self.state = EditorState::Ready;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Editing
    // ─────────────────────────────────────────────────────────────────────

    pub fn edit_cell(&mut self, row: usize, field: &str, value: Value) -> Result<()> {
        self.require_loaded("edit_cell")?;
        if !self.fields.is_mutable(field) {
            return Err(SyncError::FieldNotEditable(field.to_string()));
        }
        self.require_live_row(row)?;

        let key = CellKey::new(row, field);
        let original = match self.edits.get(&key) {
            Some(entry) => entry.original_value.clone(),
            None => self
                .pristine
                .get(row)
                .or_else(|| self.working.get(row))
                .and_then(|record| record.get(field))
                .cloned()
                .unwrap_or(Value::Null),
        };

        self.working[row].insert(field.to_string(), value.clone());

        match validate_cell(&self.fields, field, &value) {
            Some(message) => {
                self.errors.insert(key.clone(), message);
            }
            None => {
                self.errors.remove(&key);
            }
        }

        if values_equal(&value, &original) {
            self.edits.remove(&key);
        } else {
            self.edits.insert(
                key,
                EditEntry {
                    row_index: row,
                    field_name: field.to_string(),
                    new_value: value,
                    original_value: original,
                },
            );
        }

        self.settle();
        Ok(())
    }

    /// Flags `row` for deletion. Returns `false` if the user declined or the
    /// row was already flagged.
    pub fn delete_row(&mut self, row: usize, confirm: &mut dyn Confirm) -> Result<bool> {
        self.require_loaded("delete_row")?;
        self.require_row(row)?;
        if self.deleted.contains(&row) {
            return Ok(false);
        }
        if !confirm.confirm(&ConfirmPrompt::DeleteRow { row }) {
            return Ok(false);
        }

        let purged: Vec<CellKey> = self
            .edits
            .keys()
            .filter(|key| key.row == row)
            .cloned()
            .collect();
        for key in purged {
            if let Some(entry) = self.edits.remove(&key) {
                self.working[row].insert(entry.field_name, entry.original_value);
            }
        }
        self.errors.retain(|key, _| key.row != row);
        self.deleted.insert(row);

        debug!(row, "Row flagged for deletion");
        self.settle();
        Ok(true)
    }

    pub fn restore_deleted(&mut self, confirm: &mut dyn Confirm) -> Result<bool> {
        self.require_loaded("restore_deleted")?;
        if self.deleted.is_empty() {
            return Ok(false);
        }
        let count = self.deleted.len();
        if !confirm.confirm(&ConfirmPrompt::RestoreDeleted { count }) {
            return Ok(false);
        }
        self.deleted.clear();
        self.settle();
        Ok(true)
    }

    /// Appends a copy of `row` to the working set and returns the new index.
    pub fn copy_row(&mut self, row: usize) -> Result<usize> {
        self.require_loaded("copy_row")?;
        self.require_live_row(row)?;
        let copy = self.working[row].clone();
        self.working.push(copy);
        self.settle();
        Ok(self.working.len() - 1)
    }

    /// Restores the pristine copy, dropping edits, copies and deletions.
    pub fn revert_changes(&mut self, confirm: &mut dyn Confirm) -> Result<bool> {
        self.require_loaded("revert_changes")?;
        if !confirm.confirm(&ConfirmPrompt::RevertChanges) {
            return Ok(false);
        }
        self.working = self.pristine.clone();
        self.edits.clear();
        self.errors.clear();
        self.deleted.clear();
        self.settle();
        Ok(true)
    }

    pub fn sort_by(&mut self, field: &str) -> SortDirection {
        self.view.sort_by(field)
    }

    pub fn set_filter(&mut self, field: &str, value: &str) {
        self.view.set_filter(field, value);
    }

    pub fn clear_filter(&mut self, field: &str) {
        self.view.clear_filter(field);
    }

    pub fn clear_all_filters(&mut self) {
        self.view.clear_all_filters();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Publishing
    // ─────────────────────────────────────────────────────────────────────

    /// Publishes the edited view: writes `dataset` and sends `DATA_MODIFIED`.
    ///
    /// Any validation error blocks the save and nothing is written.
    pub fn save<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Vec<Record>> {
        self.require_loaded("save")?;
        if !self.errors.is_empty() {
            let keys: Vec<String> = self.errors.keys().map(ToString::to_string).collect();
            warn!(errors = keys.len(), "Save blocked by validation errors");
            return Err(SyncError::Validation { keys });
        }

        self.state = EditorState::Saving;
        match self.flush(transport, true) {
            Ok(records) => {
                self.pristine = records.clone();
                self.working = records.clone();
                self.edits.clear();
                self.deleted.clear();
                self.state = EditorState::Ready;
                info!(rows = records.len(), "Editor saved");
                Ok(records)
            }
            Err(err) => {
                self.state = EditorState::Editing;
                self.settle();
                Err(err)
            }
        }
    }

    /// Best-effort close: flushes pending changes without the validation gate,
    /// then marks the session closed.
    pub fn teardown<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        if self.state == EditorState::Closed {
            return Ok(());
        }

        if self.state.is_loaded() && !self.change_summary().is_clean() {
            if !self.errors.is_empty() {
                warn!(
                    errors = self.errors.len(),
                    "Flushing changes with validation errors on close"
                );
            }
            if let Err(err) = self.flush(transport, false) {
                warn!(error = %err, "Failed to flush changes on close");
            }
        }

        self.state = EditorState::Closed;
        transport.put(
            keys::SESSION_OPEN,
            Value::String(SessionStatus::Closed.as_str().to_string()),
        )?;
        info!("Editor session closed");
        Ok(())
    }

    pub fn heartbeat<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.state == EditorState::Closed {
            return Ok(());
        }
        write_heartbeat(transport, now)
    }

    /// Writes `dataset` then announces it. With `restore_on_failure`, a failed
    /// send puts the previous `dataset` back so the store never runs ahead of
    /// what the parent was told.
    fn flush<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        restore_on_failure: bool,
    ) -> Result<Vec<Record>> {
        let mut records = self.working.clone();
        for entry in self.edits.values() {
            if let Some(row) = records.get_mut(entry.row_index) {
                row.insert(entry.field_name.clone(), entry.new_value.clone());
            }
        }
        for &index in self.deleted.iter().rev() {
            if index < records.len() {
                records.remove(index);
            }
        }

        let previous = if restore_on_failure {
            Some(transport.get(keys::DATASET)?)
        } else {
            None
        };
        put_records(transport, keys::DATASET, &records)?;
        let sent = transport.send(SyncMessage::DataModified {
            data: records.clone(),
            timestamp: Utc::now().timestamp_millis(),
        });
        if let Err(err) = sent {
            if let Some(previous) = previous {
                let restored = match previous {
                    Some(value) => transport.put(keys::DATASET, value),
                    None => transport.remove(keys::DATASET),
                };
                if let Err(restore_err) = restored {
                    warn!(error = %restore_err, "Failed to restore dataset after send failure");
                }
            }
            return Err(err);
        }
        Ok(records)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Messages from the parent
    // ─────────────────────────────────────────────────────────────────────

    pub fn handle_event<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        event: TransportEvent,
    ) -> Result<EditorReaction> {
        let message = match event {
            TransportEvent::Message(message) => message,
            TransportEvent::StoreChanged { key } => {
                debug!(key = %key, "Ignoring store change from parent");
                return Ok(EditorReaction::Ignored);
            }
        };
        message.validate()?;

        match message {
            SyncMessage::InitData {
                data,
                editable_columns,
                data_type,
            } => {
                if !matches!(self.state, EditorState::Loading | EditorState::Error(_)) {
                    debug!(state = self.state.name(), "Ignoring INIT_DATA after load");
                    return Ok(EditorReaction::Ignored);
                }
                let rows = data.len();
                if data_type.is_some() {
                    self.data_source = data_type;
                }
                self.install(data, Some(editable_columns));
                transport.put(
                    keys::SESSION_OPEN,
                    Value::String(SessionStatus::Open.as_str().to_string()),
                )?;
                info!(rows, "Editor loaded dataset from INIT_DATA");
                Ok(EditorReaction::Loaded { rows })
            }
            SyncMessage::RefreshData { data } => {
                if !self.state.is_loaded() {
                    debug!(state = self.state.name(), "Ignoring REFRESH_DATA");
                    return Ok(EditorReaction::Ignored);
                }
                let rows = data.len();
                self.install(data, None);
                info!(rows, "Editor data refreshed by parent");
                Ok(EditorReaction::Refreshed { rows })
            }
            SyncMessage::RequestLatestData => {
                if !self.state.is_loaded() {
                    return Ok(EditorReaction::Ignored);
                }
                match self.save(transport) {
                    Ok(records) => Ok(EditorReaction::Saved {
                        rows: records.len(),
                    }),
                    Err(SyncError::Validation { keys }) => Ok(EditorReaction::SaveBlocked { keys }),
                    Err(err) => Err(err),
                }
            }
            SyncMessage::DataModified { .. } => {
                debug!("Ignoring DATA_MODIFIED addressed to the editor");
                Ok(EditorReaction::Ignored)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    fn settle(&mut self) {
        if !self.state.is_loaded() {
            return;
        }
        self.state = if self.change_summary().is_clean() {
            EditorState::Ready
        } else {
            EditorState::Editing
        };
    }

    fn require_state(
        &self,
        operation: &'static str,
        allowed: impl Fn(&EditorState) -> bool,
    ) -> Result<()> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(SyncError::InvalidState {
                operation,
                state: self.state.name().to_string(),
            })
        }
    }

    fn require_loaded(&self, operation: &'static str) -> Result<()> {
        self.require_state(operation, EditorState::is_loaded)
    }

    fn require_row(&self, row: usize) -> Result<()> {
        if row >= self.working.len() {
            return Err(SyncError::RowOutOfRange {
                index: row,
                len: self.working.len(),
            });
        }
        Ok(())
    }

    fn require_live_row(&self, row: usize) -> Result<()> {
        self.require_row(row)?;
        if self.deleted.contains(&row) {
            return Err(SyncError::RowDeleted(row));
        }
        Ok(())
    }
}

/// Stamps `editorHeartbeat`. Usable without a session, e.g. from a handle
/// kept aside while the session is busy.
pub fn write_heartbeat<T: Transport + ?Sized>(transport: &mut T, now: DateTime<Utc>) -> Result<()> {
    transport.put(keys::EDITOR_HEARTBEAT, Value::String(now.to_rfc3339()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryHub;
    use measview_protocol::ContextRole;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Record> {
        value
            .as_array()
            .expect("array")
            .iter()
            .map(|row| row.as_object().cloned().expect("object"))
            .collect()
    }

    fn fields() -> MutableFieldSet {
        MutableFieldSet::new(["v", "note"]).with_numeric(["v"])
    }

    fn candidates() -> Vec<String> {
        vec![keys::DATASET.to_string()]
    }

    /// Hub with the parent side already published, plus a loaded child session.
    fn loaded(data: Value) -> (MemoryHub, crate::transport::MemoryTransport, EditorSession) {
        let hub = MemoryHub::new();
        let mut parent = hub.endpoint(ContextRole::Parent);
        put_records(&mut parent, keys::DATASET, &rows(data)).expect("put dataset");
        parent
            .put(keys::MUTABLE_FIELDS, serde_json::to_value(fields()).expect("fields"))
            .expect("put fields");

        let mut child = hub.endpoint(ContextRole::Child);
        let mut session = EditorSession::new(IdentityField::new("id"), MutableFieldSet::default());
        session.load(&mut child, &candidates()).expect("load");
        (hub, child, session)
    }

    fn yes() -> AlwaysConfirm {
        AlwaysConfirm
    }

    #[test]
    fn load_prefers_earlier_candidates() {
        let hub = MemoryHub::new();
        let mut parent = hub.endpoint(ContextRole::Parent);
        put_records(&mut parent, keys::REPORT_DATA, &rows(json!([{"id": 1}]))).unwrap();
        put_records(&mut parent, keys::DATASET, &rows(json!([{"id": 2}, {"id": 3}]))).unwrap();

        let mut child = hub.endpoint(ContextRole::Child);
        let mut session = EditorSession::new(IdentityField::new("id"), fields());
        let candidates: Vec<String> = keys::DEFAULT_CANDIDATES.iter().map(|k| k.to_string()).collect();

        assert_eq!(session.load(&mut child, &candidates).unwrap(), 1);
        assert_eq!(session.state(), &EditorState::Ready);
        assert_eq!(session.fields(), &fields());
        assert_eq!(hub.peek(keys::SESSION_OPEN), Some(json!("open")));
    }

    #[test]
    fn load_skips_empty_candidates() {
        let hub = MemoryHub::new();
        let mut parent = hub.endpoint(ContextRole::Parent);
        put_records(&mut parent, keys::REPORT_DATA, &[]).unwrap();
        put_records(&mut parent, keys::DATASET, &rows(json!([{"id": 2}]))).unwrap();

        let mut child = hub.endpoint(ContextRole::Child);
        let mut session = EditorSession::new(IdentityField::new("id"), fields());
        let candidates = vec![keys::REPORT_DATA.to_string(), keys::DATASET.to_string()];
        assert_eq!(session.load(&mut child, &candidates).unwrap(), 1);
    }

    #[test]
    fn load_without_data_is_an_error_state() {
        let hub = MemoryHub::new();
        let mut child = hub.endpoint(ContextRole::Child);
        let mut session = EditorSession::new(IdentityField::new("id"), fields());

        let err = session.load(&mut child, &candidates()).unwrap_err();
        assert!(matches!(err, SyncError::Load { .. }));
        assert!(matches!(session.state(), EditorState::Error(_)));
        assert!(session.edit_cell(0, "v", json!(1)).is_err());
    }

    #[test]
    fn scenario_c_invalid_number_blocks_save() {
        let (hub, mut child, mut session) = loaded(json!([{"id": 1, "v": 10}]));
        let writes_before = hub.write_count();

        session.edit_cell(0, "v", json!("abc")).unwrap();
        assert_eq!(
            session.validation_errors().get(&CellKey::new(0, "v")).map(String::as_str),
            Some(INVALID_NUMBER)
        );

        let err = session.save(&mut child).unwrap_err();
        match err {
            SyncError::Validation { keys } => assert_eq!(keys, vec!["0-v".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hub.write_count(), writes_before);
        assert_eq!(hub.sent_count(), 0);
    }

    #[test]
    fn fixing_a_cell_clears_its_validation_error() {
        let (_hub, _child, mut session) = loaded(json!([{"id": 1, "v": 10}]));
        session.edit_cell(0, "v", json!("abc")).unwrap();
        session.edit_cell(0, "v", json!("12")).unwrap();
        assert!(session.validation_errors().is_empty());
    }

    #[test]
    fn edit_records_original_from_pristine_copy() {
        let (_hub, _child, mut session) = loaded(json!([{"id": 1, "v": 10}]));
        session.edit_cell(0, "v", json!(11)).unwrap();
        session.edit_cell(0, "v", json!(12)).unwrap();

        let entry = &session.edits()[&CellKey::new(0, "v")];
        assert_eq!(entry.original_value, json!(10));
        assert_eq!(entry.new_value, json!(12));
        assert_eq!(session.records()[0]["v"], json!(12));
        assert_eq!(session.state(), &EditorState::Editing);
    }

    #[test]
    fn editing_back_to_original_drops_the_entry() {
        let (_hub, _child, mut session) = loaded(json!([{"id": 1, "v": 10}]));
        session.edit_cell(0, "v", json!(11)).unwrap();
        session.edit_cell(0, "v", json!(10.0)).unwrap();
        assert!(session.edits().is_empty());
        assert_eq!(session.state(), &EditorState::Ready);
    }

    #[test]
    fn non_mutable_field_is_rejected() {
        let (_hub, _child, mut session) = loaded(json!([{"id": 1, "v": 10}]));
        let err = session.edit_cell(0, "id", json!(2)).unwrap_err();
        assert!(matches!(err, SyncError::FieldNotEditable(_)));
        let err = session.edit_cell(3, "v", json!(2)).unwrap_err();
        assert!(matches!(err, SyncError::RowOutOfRange { index: 3, len: 1 }));
    }

    #[test]
    fn save_applies_edits_and_deletions_then_resets() {
        let (hub, mut child, mut session) =
            loaded(json!([{"id": 1, "v": 1}, {"id": 2, "v": 2}, {"id": 3, "v": 3}]));
        session.edit_cell(2, "v", json!(30)).unwrap();
        session.delete_row(0, &mut yes()).unwrap();

        let saved = session.save(&mut child).unwrap();
        assert_eq!(saved, rows(json!([{"id": 2, "v": 2}, {"id": 3, "v": 30}])));
        assert_eq!(hub.peek(keys::DATASET), Some(json!([{"id": 2, "v": 2}, {"id": 3, "v": 30}])));
        assert_eq!(hub.sent_count(), 1);
        assert_eq!(session.state(), &EditorState::Ready);
        assert!(session.change_summary().is_clean());
        assert_eq!(session.records(), saved.as_slice());
    }

    #[test]
    fn failed_send_restores_dataset_and_keeps_edits() {
        let (hub, mut child, mut session) = loaded(json!([{"id": 1, "v": 1}]));
        hub.fail_sends(Some("blocked"));
        session.edit_cell(0, "v", json!(9)).unwrap();

        let err = session.save(&mut child).unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(hub.peek(keys::DATASET), Some(json!([{"id": 1, "v": 1}])));
        assert_eq!(session.state(), &EditorState::Editing);
        assert_eq!(session.edits().len(), 1);

        hub.fail_sends(None);
        session.save(&mut child).unwrap();
        assert_eq!(hub.peek(keys::DATASET), Some(json!([{"id": 1, "v": 9}])));
    }

    #[test]
    fn failed_send_without_prior_dataset_removes_key() {
        let hub = MemoryHub::new();
        let mut parent = hub.endpoint(ContextRole::Parent);
        put_records(&mut parent, keys::REPORT_DATA, &rows(json!([{"id": 1, "v": 1}]))).unwrap();
        let mut child = hub.endpoint(ContextRole::Child);
        let mut session = EditorSession::new(IdentityField::new("id"), fields());
        session
            .load(&mut child, &[keys::REPORT_DATA.to_string()])
            .unwrap();
        session.edit_cell(0, "v", json!(2)).unwrap();

        hub.fail_sends(Some("blocked"));
        assert!(session.save(&mut child).is_err());
        assert_eq!(hub.peek(keys::DATASET), None);
    }

    #[test]
    fn deletion_order_does_not_matter() {
        let data = json!([{"id": 0}, {"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}, {"id": 5}]);

        let (_h1, mut c1, mut together) = loaded(data.clone());
        together.delete_row(2, &mut yes()).unwrap();
        together.delete_row(5, &mut yes()).unwrap();

        let (_h2, mut c2, mut apart) = loaded(data);
        apart.delete_row(5, &mut yes()).unwrap();
        apart.delete_row(2, &mut yes()).unwrap();

        let a = together.save(&mut c1).unwrap();
        let b = apart.save(&mut c2).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, rows(json!([{"id": 0}, {"id": 1}, {"id": 3}, {"id": 4}])));
    }

    #[test]
    fn delete_purges_row_edits_and_errors() {
        let (_hub, _child, mut session) = loaded(json!([{"id": 1, "v": 1}, {"id": 2, "v": 2}]));
        session.edit_cell(0, "v", json!("bad")).unwrap();
        session.edit_cell(1, "v", json!(5)).unwrap();

        assert!(session.delete_row(0, &mut yes()).unwrap());
        assert!(session.validation_errors().is_empty());
        assert_eq!(session.edits().len(), 1);
        assert_eq!(session.records()[0]["v"], json!(1));
        assert_eq!(
            session.display_rows().iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![1]
        );
    }

    #[test]
    fn declined_confirmation_changes_nothing() {
        let (_hub, _child, mut session) = loaded(json!([{"id": 1, "v": 1}]));
        let mut no = |_: &ConfirmPrompt| false;
        assert!(!session.delete_row(0, &mut no).unwrap());
        assert!(session.deleted_rows().is_empty());
    }

    #[test]
    fn restore_deleted_brings_rows_back() {
        let (_hub, _child, mut session) = loaded(json!([{"id": 1}, {"id": 2}]));
        session.delete_row(1, &mut yes()).unwrap();

        let mut asked = Vec::new();
        let mut confirm = |prompt: &ConfirmPrompt| {
            asked.push(prompt.clone());
            true
        };
        assert!(session.restore_deleted(&mut confirm).unwrap());
        assert_eq!(asked, vec![ConfirmPrompt::RestoreDeleted { count: 1 }]);
        assert_eq!(session.display_rows().len(), 2);
        assert_eq!(session.state(), &EditorState::Ready);
    }

    #[test]
    fn copy_row_appends_duplicate() {
        let (_hub, _child, mut session) = loaded(json!([{"id": 1, "v": 1}]));
        let index = session.copy_row(0).unwrap();
        assert_eq!(index, 1);
        assert_eq!(session.records()[1], session.records()[0]);
        assert_eq!(session.change_summary().added_rows, 1);

        session.edit_cell(1, "v", json!(9)).unwrap();
        assert_eq!(session.edits()[&CellKey::new(1, "v")].original_value, json!(1));
    }

    #[test]
    fn revert_restores_pristine_copy() {
        let (_hub, _child, mut session) = loaded(json!([{"id": 1, "v": 1}]));
        session.edit_cell(0, "v", json!("x")).unwrap();
        session.copy_row(0).unwrap();
        session.delete_row(0, &mut yes()).unwrap();

        assert!(session.revert_changes(&mut yes()).unwrap());
        assert_eq!(session.records(), rows(json!([{"id": 1, "v": 1}])).as_slice());
        assert_eq!(session.change_summary(), ChangeSummary::default());
        assert_eq!(session.state(), &EditorState::Ready);
    }

    #[test]
    fn teardown_flushes_without_validation_and_marks_closed() {
        let (hub, mut child, mut session) = loaded(json!([{"id": 1, "v": 1}]));
        session.edit_cell(0, "v", json!("abc")).unwrap();

        session.teardown(&mut child).unwrap();
        assert_eq!(hub.peek(keys::DATASET), Some(json!([{"id": 1, "v": "abc"}])));
        assert_eq!(hub.peek(keys::SESSION_OPEN), Some(json!("closed")));
        assert_eq!(session.state(), &EditorState::Closed);
    }

    #[test]
    fn teardown_keeps_dataset_when_send_fails() {
        let (hub, mut child, mut session) = loaded(json!([{"id": 1, "v": 1}]));
        session.edit_cell(0, "v", json!(4)).unwrap();
        hub.fail_sends(Some("parent gone"));

        session.teardown(&mut child).unwrap();
        assert_eq!(hub.peek(keys::DATASET), Some(json!([{"id": 1, "v": 4}])));
        assert_eq!(session.state(), &EditorState::Closed);
    }

    #[test]
    fn teardown_without_changes_only_marks_closed() {
        let (hub, mut child, mut session) = loaded(json!([{"id": 1, "v": 1}]));
        session.teardown(&mut child).unwrap();
        assert_eq!(hub.sent_count(), 0);
        assert_eq!(hub.peek(keys::SESSION_OPEN), Some(json!("closed")));
    }

    #[test]
    fn init_data_loads_waiting_session() {
        let hub = MemoryHub::new();
        let mut child = hub.endpoint(ContextRole::Child);
        let mut session = EditorSession::new(IdentityField::new("id"), MutableFieldSet::default());

        let reaction = session
            .handle_event(
                &mut child,
                TransportEvent::Message(SyncMessage::InitData {
                    data: rows(json!([{"ID": 1, "v": 1}])),
                    editable_columns: fields().with_columns(["v", "ID"]),
                    data_type: Some("report".to_string()),
                }),
            )
            .unwrap();

        assert_eq!(reaction, EditorReaction::Loaded { rows: 1 });
        assert_eq!(session.columns(), ["v".to_string(), "ID".to_string()]);
        assert_eq!(session.data_source(), Some("report"));
    }

    #[test]
    fn refresh_replaces_data_and_resets_edits() {
        let (_hub, mut child, mut session) = loaded(json!([{"id": 1, "v": 1}]));
        session.edit_cell(0, "v", json!(2)).unwrap();

        let reaction = session
            .handle_event(
                &mut child,
                TransportEvent::Message(SyncMessage::RefreshData {
                    data: rows(json!([{"id": 1, "v": 5}, {"id": 2, "v": 6}])),
                }),
            )
            .unwrap();

        assert_eq!(reaction, EditorReaction::Refreshed { rows: 2 });
        assert!(session.edits().is_empty());
        assert_eq!(session.records()[0]["v"], json!(5));
    }

    #[test]
    fn request_latest_data_saves_or_reports_block() {
        let (hub, mut child, mut session) = loaded(json!([{"id": 1, "v": 1}]));
        session.edit_cell(0, "v", json!(2)).unwrap();
        let reaction = session
            .handle_event(&mut child, TransportEvent::Message(SyncMessage::RequestLatestData))
            .unwrap();
        assert_eq!(reaction, EditorReaction::Saved { rows: 1 });
        assert_eq!(hub.sent_count(), 1);

        session.edit_cell(0, "v", json!("abc")).unwrap();
        let reaction = session
            .handle_event(&mut child, TransportEvent::Message(SyncMessage::RequestLatestData))
            .unwrap();
        assert_eq!(
            reaction,
            EditorReaction::SaveBlocked {
                keys: vec!["0-v".to_string()]
            }
        );
    }

    #[test]
    fn heartbeat_writes_timestamp() {
        let (hub, mut child, mut session) = loaded(json!([{"id": 1}]));
        let now = Utc::now();
        session.heartbeat(&mut child, now).unwrap();
        assert_eq!(hub.peek(keys::EDITOR_HEARTBEAT), Some(json!(now.to_rfc3339())));
    }

    #[test]
    fn filter_options_skip_deleted_rows() {
        let (_hub, _child, mut session) = loaded(json!([{"id": 1, "p": "A"}, {"id": 2, "p": "B"}]));
        session.delete_row(1, &mut yes()).unwrap();
        let options = session.filter_options();
        assert_eq!(options[1], ("p".to_string(), vec![json!("A")]));
    }
}
