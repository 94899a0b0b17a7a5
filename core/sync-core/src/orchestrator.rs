//! Parent-side session: launches the editor and folds its edits into master.
//!
//! Every signal that the editor may have published something funnels into
//! [`SyncOrchestrator::reconcile_latest`]:
//!
//! | trigger | source |
//! |---|---|
//! | `StoreChanged(dataset)` | editor saved |
//! | `DATA_MODIFIED` | editor saved (message channel) |
//! | `sessionOpen = closed` | editor tore down |
//! | liveness monitor fires | editor vanished without a signal |
//!
//! The store is read on every trigger, so duplicate or reordered signals are
//! harmless. A view identical to the last applied one is skipped.

use std::fmt;

use chrono::{DateTime, Utc};
use measview_protocol::{keys, validate_records, MutableFieldSet, Record, SessionStatus, SyncMessage};
use serde_json::Value;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::{LivenessConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::liveness::{
    AllAlive, HeartbeatProbe, LivenessContext, LivenessMonitor, LivenessProbe, SessionFlagProbe,
};
use crate::reconcile::{reconcile, ReconcileOutcome};
use crate::record::{canonicalize_all, cell_text, IdentityField};
use crate::transport::{get_records, put_records, Transport, TransportEvent};

/// Opens and closes the editor context.
pub trait ContextLauncher {
    /// Opens the editor for `session_id`. A blocked open must be reported as
    /// [`SyncError::Transport`].
    fn open(&mut self, session_id: &str) -> Result<()>;

    fn close(&mut self);

    /// `Some(false)` once the launcher knows the editor is gone. Launchers that
    /// cannot observe the editor return `None`.
    fn is_running(&mut self) -> Option<bool> {
        None
    }
}

/// Selects the rows of master shown in the editor.
pub trait RowPredicate {
    fn matches(&self, row: &Record) -> bool;
}

impl<F> RowPredicate for F
where
    F: Fn(&Record) -> bool,
{
    fn matches(&self, row: &Record) -> bool {
        self(row)
    }
}

/// Every row.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAll;

impl RowPredicate for MatchAll {
    fn matches(&self, _row: &Record) -> bool {
        true
    }
}

/// Rows whose `field` contains `needle`, ignoring case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstringMatch {
    field: String,
    needle: String,
}

impl SubstringMatch {
    pub fn new(field: impl Into<String>, needle: &str) -> Self {
        Self {
            field: field.into(),
            needle: needle.to_lowercase(),
        }
    }
}

impl RowPredicate for SubstringMatch {
    fn matches(&self, row: &Record) -> bool {
        row.get(&self.field)
            .map(|value| cell_text(value).to_lowercase().contains(&self.needle))
            .unwrap_or(false)
    }
}

impl fmt::Display for SubstringMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} contains {:?}", self.field, self.needle)
    }
}

struct ActiveSession {
    id: String,
    predicate: Box<dyn RowPredicate>,
    fields: MutableFieldSet,
    started_at: DateTime<Utc>,
    monitor: LivenessMonitor,
    last_applied: Option<Vec<Record>>,
    open: bool,
}

/// Keys written when a session starts; restored if the start fails.
const SESSION_KEYS: [&str; 4] = [
    keys::DATASET,
    keys::MUTABLE_FIELDS,
    keys::SESSION_OPEN,
    keys::OWNER_SESSION_ID,
];

pub struct SyncOrchestrator<T: Transport, L: ContextLauncher> {
    transport: T,
    launcher: L,
    identity: IdentityField,
    liveness: LivenessConfig,
    probe: Box<dyn LivenessProbe>,
    master: Vec<Record>,
    session: Option<ActiveSession>,
}

impl<T: Transport, L: ContextLauncher> SyncOrchestrator<T, L> {
    pub fn new(transport: T, launcher: L, config: &SyncConfig) -> Self {
        let probe = AllAlive::new()
            .with(SessionFlagProbe)
            .with(HeartbeatProbe::new(config.liveness.heartbeat_timeout()));
        Self {
            transport,
            launcher,
            identity: config.identity_field(),
            liveness: config.liveness.clone(),
            probe: Box::new(probe),
            master: Vec::new(),
            session: None,
        }
    }

    /// Like [`new`](Self::new), with master restored from `masterDataset`.
    pub fn restore(transport: T, launcher: L, config: &SyncConfig) -> Result<Self> {
        let mut orchestrator = Self::new(transport, launcher, config);
        if let Some(records) = get_records(&orchestrator.transport, keys::MASTER_DATASET)? {
            orchestrator.master = canonicalize_all(records, &orchestrator.identity);
            info!(rows = orchestrator.master.len(), "Restored master dataset");
        }
        Ok(orchestrator)
    }

    /// Replaces the liveness probe used for launched editors.
    pub fn with_probe(mut self, probe: impl LivenessProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn master(&self) -> &[Record] {
        &self.master
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.id.as_str())
    }

    pub fn is_session_open(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.open)
    }

    /// Installs a new master (e.g. fetched from the backend) and persists it.
    pub fn load_master(&mut self, records: Vec<Record>) -> Result<()> {
        validate_records(&records)?;
        let records = canonicalize_all(records, &self.identity);
        put_records(&mut self.transport, keys::MASTER_DATASET, &records)?;
        self.master = records;
        Ok(())
    }

    /// Rows of master currently selected by the session predicate.
    pub fn current_view(&self) -> Vec<Record> {
        match &self.session {
            Some(session) => self
                .master
                .iter()
                .filter(|row| session.predicate.matches(row))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Publishes the filtered view of master and opens the editor on it.
    ///
    /// An open session is closed first. If the editor cannot be opened or
    /// `INIT_DATA` cannot be delivered, the store is rolled back and the
    /// previous (closed) state is kept.
    pub fn start_session<P>(
        &mut self,
        predicate: P,
        fields: MutableFieldSet,
        now: DateTime<Utc>,
    ) -> Result<String>
    where
        P: RowPredicate + 'static,
    {
        if self.is_session_open() {
            self.close_session()?;
        }

        let view: Vec<Record> = self
            .master
            .iter()
            .filter(|row| predicate.matches(row))
            .cloned()
            .collect();
        let session_id = Ulid::new().to_string();

        let mut previous = Vec::with_capacity(SESSION_KEYS.len());
        for key in SESSION_KEYS {
            previous.push((key, self.transport.get(key)?));
        }

        if let Err(err) = self.publish_session(&session_id, &view, &fields) {
            warn!(session_id = %session_id, error = %err, "Editor session failed to start");
            self.rollback(&previous);
            return Err(err);
        }

        self.session = Some(ActiveSession {
            id: session_id.clone(),
            predicate: Box::new(predicate),
            fields,
            started_at: now,
            monitor: LivenessMonitor::new(self.liveness.poll_interval()),
            last_applied: Some(view.clone()),
            open: true,
        });
        info!(session_id = %session_id, rows = view.len(), "Editor session started");
        Ok(session_id)
    }

    fn publish_session(
        &mut self,
        session_id: &str,
        view: &[Record],
        fields: &MutableFieldSet,
    ) -> Result<()> {
        let fields_value =
            serde_json::to_value(fields).map_err(|err| SyncError::json("mutableFields", err))?;

        put_records(&mut self.transport, keys::DATASET, view)?;
        self.transport.put(keys::MUTABLE_FIELDS, fields_value)?;
        self.transport.put(
            keys::SESSION_OPEN,
            Value::String(SessionStatus::Open.as_str().to_string()),
        )?;
        self.transport
            .put(keys::OWNER_SESSION_ID, Value::String(session_id.to_string()))?;

        self.launcher.open(session_id)?;
        if let Err(err) = self.transport.send(SyncMessage::InitData {
            data: view.to_vec(),
            editable_columns: fields.clone(),
            data_type: None,
        }) {
            self.launcher.close();
            return Err(err);
        }
        Ok(())
    }

    fn rollback(&mut self, previous: &[(&str, Option<Value>)]) {
        for (key, value) in previous {
            let result = match value {
                Some(value) => self.transport.put(key, value.clone()),
                None => self.transport.remove(key),
            };
            if let Err(err) = result {
                warn!(key = %key, error = %err, "Failed to roll back store key");
            }
        }
    }

    /// Final reconcile, then closes the editor and stops liveness polling.
    pub fn close_session(&mut self) -> Result<()> {
        if !self.is_session_open() {
            return Ok(());
        }

        let result = self.reconcile_latest(None).map(|_| ());

        self.launcher.close();
        if let Some(session) = self.session.as_mut() {
            session.monitor.cancel();
            session.open = false;
            info!(session_id = %session.id, "Editor session closed");
        }
        result
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.close_session()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────

    /// Merges `edited` into master with the session's mutable fields and
    /// persists the result.
    pub fn reconcile(&mut self, edited: &[Record]) -> Result<ReconcileOutcome> {
        let fields = match &self.session {
            Some(session) => &session.fields,
            None => {
                return Err(SyncError::InvalidState {
                    operation: "reconcile",
                    state: "no session".to_string(),
                })
            }
        };

        let edited = canonicalize_all(edited.to_vec(), &self.identity);
        let outcome = reconcile(&self.master, &edited, fields, &self.identity);
        put_records(&mut self.transport, keys::MASTER_DATASET, &outcome.records)?;
        self.master = outcome.records.clone();

        info!(
            session_id = self.session_id().unwrap_or_default(),
            updated = outcome.updated,
            appended = outcome.appended,
            warnings = outcome.warnings.len(),
            "Reconciled editor changes"
        );
        Ok(outcome)
    }

    /// Reconciles the latest stored view. `fallback` (a message payload) is
    /// used only when the store holds no view.
    ///
    /// Returns `None` when there was nothing new to apply.
    pub fn reconcile_latest(&mut self, fallback: Option<&[Record]>) -> Result<Option<ReconcileOutcome>> {
        let session_id = match &self.session {
            Some(session) => session.id.clone(),
            None => return Ok(None),
        };

        if let Some(Value::String(owner)) = self.transport.get(keys::OWNER_SESSION_ID)? {
            if owner != session_id {
                debug!(session_id = %session_id, owner = %owner, "Store owned by another session");
                return Ok(None);
            }
        }

        let edited = match get_records(&self.transport, keys::DATASET)? {
            Some(records) => records,
            None => match fallback {
                Some(records) => records.to_vec(),
                None => return Ok(None),
            },
        };
        let edited = canonicalize_all(edited, &self.identity);

        let unchanged = self
            .session
            .as_ref()
            .and_then(|session| session.last_applied.as_ref())
            .is_some_and(|last| *last == edited);
        if unchanged {
            debug!(session_id = %session_id, "Edited view unchanged; skipping reconcile");
            return Ok(None);
        }

        let outcome = self.reconcile(&edited)?;
        if let Some(session) = self.session.as_mut() {
            session.last_applied = Some(edited);
        }
        Ok(Some(outcome))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event loop
    // ─────────────────────────────────────────────────────────────────────

    /// Drains transport events, dispatches them, and checks liveness.
    ///
    /// Returns whether the session is still open.
    pub fn pump(&mut self, now: DateTime<Utc>) -> Result<bool> {
        for event in self.transport.poll_events()? {
            self.dispatch(event)?;
        }

        if self.is_session_open() {
            let context = self.liveness_context(now)?;
            let launcher = &mut self.launcher;
            let probe = &mut self.probe;
            let mut editor_alive = |context: &LivenessContext| {
                launcher.is_running() != Some(false) && probe.is_alive(context)
            };
            let dead = match self.session.as_mut() {
                Some(session) => session.monitor.poll(&mut editor_alive, &context),
                None => false,
            };
            if dead {
                info!(
                    session_id = self.session_id().unwrap_or_default(),
                    "Editor stopped responding"
                );
                self.close_session()?;
            }
        }

        Ok(self.is_session_open())
    }

    fn dispatch(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::StoreChanged { key } if key == keys::DATASET => {
                self.reconcile_latest(None)?;
            }
            TransportEvent::StoreChanged { key } if key == keys::SESSION_OPEN => {
                let status = self
                    .transport
                    .get(keys::SESSION_OPEN)?
                    .as_ref()
                    .and_then(SessionStatus::from_value);
                if status == Some(SessionStatus::Closed) {
                    self.close_session()?;
                }
            }
            TransportEvent::StoreChanged { key } => {
                debug!(key = %key, "Store change from editor");
            }
            TransportEvent::Message(message) => {
                if let Err(info) = message.validate() {
                    warn!(kind = message.kind(), error = %info, "Dropping invalid message");
                    return Ok(());
                }
                match message {
                    SyncMessage::DataModified { data, .. } => {
                        self.reconcile_latest(Some(data.as_slice()))?;
                    }
                    SyncMessage::RequestLatestData => {
                        if self.is_session_open() {
                            let data = self.current_view();
                            self.transport.send(SyncMessage::RefreshData { data })?;
                        }
                    }
                    other => debug!(kind = other.kind(), "Ignoring message from editor"),
                }
            }
        }
        Ok(())
    }

    fn liveness_context(&self, now: DateTime<Utc>) -> Result<LivenessContext> {
        let started_at = self
            .session
            .as_ref()
            .map_or(now, |session| session.started_at);
        let last_heartbeat = self
            .transport
            .get(keys::EDITOR_HEARTBEAT)?
            .and_then(|value| value.as_str().map(str::to_string))
            .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
            .map(|time| time.with_timezone(&Utc));
        let session_status = self
            .transport
            .get(keys::SESSION_OPEN)?
            .as_ref()
            .and_then(SessionStatus::from_value);

        Ok(LivenessContext {
            now,
            started_at,
            last_heartbeat,
            session_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryHub, MemoryTransport};
    use chrono::Duration;
    use measview_protocol::ContextRole;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct LaunchLog {
        opened: Vec<String>,
        closed: usize,
        fail_open: bool,
        running: Option<bool>,
    }

    #[derive(Clone, Default)]
    struct FakeLauncher(Rc<RefCell<LaunchLog>>);

    impl ContextLauncher for FakeLauncher {
        fn open(&mut self, session_id: &str) -> Result<()> {
            let mut log = self.0.borrow_mut();
            if log.fail_open {
                return Err(SyncError::Transport("popup blocked".to_string()));
            }
            log.opened.push(session_id.to_string());
            Ok(())
        }

        fn close(&mut self) {
            self.0.borrow_mut().closed += 1;
        }

        fn is_running(&mut self) -> Option<bool> {
            self.0.borrow().running
        }
    }

    fn rows(value: Value) -> Vec<Record> {
        value
            .as_array()
            .expect("array")
            .iter()
            .map(|row| row.as_object().cloned().expect("object"))
            .collect()
    }

    fn config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.identity.field = "id".to_string();
        config.identity.aliases = vec!["ID".to_string()];
        config
    }

    fn setup(
        master: Value,
    ) -> (
        MemoryHub,
        FakeLauncher,
        SyncOrchestrator<MemoryTransport, FakeLauncher>,
        MemoryTransport,
    ) {
        let hub = MemoryHub::new();
        let launcher = FakeLauncher::default();
        let mut orchestrator =
            SyncOrchestrator::new(hub.endpoint(ContextRole::Parent), launcher.clone(), &config());
        orchestrator.load_master(rows(master)).expect("load master");
        let child = hub.endpoint(ContextRole::Child);
        (hub, launcher, orchestrator, child)
    }

    fn only_v() -> MutableFieldSet {
        MutableFieldSet::new(["v"])
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-01T09:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
            + Duration::seconds(seconds)
    }

    #[test]
    fn start_session_publishes_view_and_init_data() {
        let (hub, launcher, mut orchestrator, mut child) =
            setup(json!([{"id": 1, "p": "L3", "v": 1}, {"id": 2, "p": "C5", "v": 2}]));

        let id = orchestrator
            .start_session(SubstringMatch::new("p", "l3"), only_v(), at(0))
            .unwrap();

        assert_eq!(hub.peek(keys::DATASET), Some(json!([{"id": 1, "p": "L3", "v": 1}])));
        assert_eq!(hub.peek(keys::SESSION_OPEN), Some(json!("open")));
        assert_eq!(hub.peek(keys::OWNER_SESSION_ID), Some(json!(id.clone())));
        assert_eq!(launcher.0.borrow().opened, vec![id]);

        let init = child
            .poll_events()
            .unwrap()
            .into_iter()
            .find_map(|event| match event {
                TransportEvent::Message(message) => Some(message),
                _ => None,
            })
            .expect("INIT_DATA");
        assert_eq!(init.kind(), "INIT_DATA");
    }

    #[test]
    fn blocked_open_rolls_back_store() {
        let (hub, launcher, mut orchestrator, _child) = setup(json!([{"id": 1, "v": 1}]));
        launcher.0.borrow_mut().fail_open = true;

        let err = orchestrator
            .start_session(MatchAll, only_v(), at(0))
            .unwrap_err();

        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(hub.peek(keys::DATASET), None);
        assert_eq!(hub.peek(keys::SESSION_OPEN), None);
        assert!(!orchestrator.is_session_open());
    }

    #[test]
    fn failed_send_rolls_back_and_closes_editor() {
        let (hub, launcher, mut orchestrator, _child) = setup(json!([{"id": 1, "v": 1}]));
        hub.fail_sends(Some("window closed"));

        assert!(orchestrator.start_session(MatchAll, only_v(), at(0)).is_err());
        assert_eq!(hub.peek(keys::OWNER_SESSION_ID), None);
        assert_eq!(launcher.0.borrow().closed, 1);
        assert_eq!(orchestrator.session_id(), None);
    }

    #[test]
    fn dataset_change_reconciles_into_master() {
        let (hub, _launcher, mut orchestrator, mut child) =
            setup(json!([{"id": 1, "v": 10}, {"id": 2, "v": 20}, {"id": 3, "v": 30}]));
        orchestrator
            .start_session(|row: &Record| row["id"] != json!(1), only_v(), at(0))
            .unwrap();

        put_records(&mut child, keys::DATASET, &rows(json!([{"id": 2, "v": 25}, {"id": 3, "v": 30}])))
            .unwrap();
        assert!(orchestrator.pump(at(0)).unwrap());

        assert_eq!(
            orchestrator.master(),
            rows(json!([{"id": 1, "v": 10}, {"id": 2, "v": 25}, {"id": 3, "v": 30}])).as_slice()
        );
        assert_eq!(
            hub.peek(keys::MASTER_DATASET),
            Some(json!([{"id": 1, "v": 10}, {"id": 2, "v": 25}, {"id": 3, "v": 30}]))
        );
    }

    #[test]
    fn duplicate_triggers_apply_once() {
        let (_hub, _launcher, mut orchestrator, mut child) = setup(json!([{"id": 1, "v": 1}]));
        orchestrator.start_session(MatchAll, only_v(), at(0)).unwrap();

        let edited = rows(json!([{"id": 1, "v": 1}, {"id": 1, "v": 2}]));
        put_records(&mut child, keys::DATASET, &edited).unwrap();
        child
            .send(SyncMessage::DataModified {
                data: edited,
                timestamp: 1_700_000_000_000,
            })
            .unwrap();
        orchestrator.pump(at(0)).unwrap();

        assert_eq!(orchestrator.master().len(), 2);
    }

    #[test]
    fn foreign_owner_is_ignored() {
        let (_hub, _launcher, mut orchestrator, mut child) = setup(json!([{"id": 1, "v": 1}]));
        orchestrator.start_session(MatchAll, only_v(), at(0)).unwrap();

        child
            .put(keys::OWNER_SESSION_ID, json!("someone-else"))
            .unwrap();
        put_records(&mut child, keys::DATASET, &rows(json!([{"id": 1, "v": 9}]))).unwrap();
        orchestrator.pump(at(0)).unwrap();

        assert_eq!(orchestrator.master()[0]["v"], json!(1));
    }

    #[test]
    fn request_latest_data_is_answered_with_refresh() {
        let (_hub, _launcher, mut orchestrator, mut child) =
            setup(json!([{"id": 1, "v": 1}, {"id": 2, "v": 2}]));
        orchestrator
            .start_session(|row: &Record| row["id"] == json!(2), only_v(), at(0))
            .unwrap();
        child.poll_events().unwrap();

        child.send(SyncMessage::RequestLatestData).unwrap();
        orchestrator.pump(at(0)).unwrap();

        let events = child.poll_events().unwrap();
        assert_eq!(
            events,
            vec![TransportEvent::Message(SyncMessage::RefreshData {
                data: rows(json!([{"id": 2, "v": 2}]))
            })]
        );
    }

    #[test]
    fn closed_flag_ends_session_with_final_reconcile() {
        let (_hub, launcher, mut orchestrator, mut child) = setup(json!([{"id": 1, "v": 1}]));
        orchestrator.start_session(MatchAll, only_v(), at(0)).unwrap();

        put_records(&mut child, keys::DATASET, &rows(json!([{"id": 1, "v": 5}]))).unwrap();
        child.put(keys::SESSION_OPEN, json!("closed")).unwrap();
        assert!(!orchestrator.pump(at(0)).unwrap());

        assert_eq!(orchestrator.master()[0]["v"], json!(5));
        assert_eq!(launcher.0.borrow().closed, 1);
    }

    #[test]
    fn missing_heartbeat_fires_liveness_once() {
        let (_hub, launcher, mut orchestrator, _child) = setup(json!([{"id": 1, "v": 1}]));
        orchestrator.start_session(MatchAll, only_v(), at(0)).unwrap();

        assert!(orchestrator.pump(at(5)).unwrap());
        assert!(!orchestrator.pump(at(11)).unwrap());
        assert!(!orchestrator.pump(at(20)).unwrap());
        assert_eq!(launcher.0.borrow().closed, 1);
    }

    #[test]
    fn fresh_heartbeat_keeps_session_alive() {
        let (_hub, _launcher, mut orchestrator, mut child) = setup(json!([{"id": 1, "v": 1}]));
        orchestrator.start_session(MatchAll, only_v(), at(0)).unwrap();

        child
            .put(keys::EDITOR_HEARTBEAT, json!(at(8).to_rfc3339()))
            .unwrap();
        assert!(orchestrator.pump(at(15)).unwrap());
    }

    #[test]
    fn launcher_reporting_exit_ends_session() {
        let (_hub, launcher, mut orchestrator, _child) = setup(json!([{"id": 1, "v": 1}]));
        orchestrator.start_session(MatchAll, only_v(), at(0)).unwrap();
        launcher.0.borrow_mut().running = Some(false);
        assert!(!orchestrator.pump(at(1)).unwrap());
    }

    #[test]
    fn starting_again_closes_previous_session() {
        let (_hub, launcher, mut orchestrator, _child) = setup(json!([{"id": 1, "v": 1}]));
        let first = orchestrator.start_session(MatchAll, only_v(), at(0)).unwrap();
        let second = orchestrator.start_session(MatchAll, only_v(), at(1)).unwrap();

        assert_ne!(first, second);
        assert_eq!(launcher.0.borrow().closed, 1);
        assert_eq!(orchestrator.session_id(), Some(second.as_str()));
    }

    #[test]
    fn restore_reads_persisted_master_with_aliases() {
        let hub = MemoryHub::new();
        let mut other = hub.endpoint(ContextRole::Parent);
        put_records(&mut other, keys::MASTER_DATASET, &rows(json!([{"ID": 4, "v": 1}]))).unwrap();

        let orchestrator = SyncOrchestrator::restore(
            hub.endpoint(ContextRole::Parent),
            FakeLauncher::default(),
            &config(),
        )
        .unwrap();
        assert_eq!(orchestrator.master(), rows(json!([{"id": 4, "v": 1}])).as_slice());
    }

    #[test]
    fn reconcile_without_session_is_invalid() {
        let (_hub, _launcher, mut orchestrator, _child) = setup(json!([{"id": 1, "v": 1}]));
        assert!(matches!(
            orchestrator.reconcile(&[]),
            Err(SyncError::InvalidState { .. })
        ));
    }
}
