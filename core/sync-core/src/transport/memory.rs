//! In-process transport: two endpoints sharing one store and two inboxes.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use measview_protocol::{ContextRole, SyncMessage};
use serde_json::Value;

use super::{Transport, TransportEvent};
use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
struct HubState {
    store: BTreeMap<String, Value>,
    inboxes: HashMap<ContextRole, VecDeque<TransportEvent>>,
    send_failure: Option<String>,
    writes: usize,
    sent: usize,
}

/// Shared backing state for a [`MemoryTransport`] pair.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, role: ContextRole) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            role,
        }
    }

    /// Makes every subsequent `send` fail with `reason` (`None` restores delivery).
    pub fn fail_sends(&self, reason: Option<&str>) {
        self.lock().send_failure = reason.map(str::to_string);
    }

    /// Reads the store without going through an endpoint.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.lock().store.get(key).cloned()
    }

    /// Number of store writes (puts) so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Number of messages delivered so far.
    pub fn sent_count(&self) -> usize {
        self.lock().sent
    }

    pub fn pending(&self, role: ContextRole) -> usize {
        self.lock().inboxes.get(&role).map_or(0, VecDeque::len)
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    role: ContextRole,
}

impl Transport for MemoryTransport {
    fn role(&self) -> ContextRole {
        self.role
    }

    fn put(&mut self, key: &str, value: Value) -> Result<()> {
        let mut state = self.hub.lock();
        state.store.insert(key.to_string(), value);
        state.writes += 1;
        state
            .inboxes
            .entry(self.role.other())
            .or_default()
            .push_back(TransportEvent::StoreChanged {
                key: key.to_string(),
            });
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.hub.lock().store.get(key).cloned())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.hub.lock().store.remove(key);
        Ok(())
    }

    fn send(&mut self, message: SyncMessage) -> Result<()> {
        let mut state = self.hub.lock();
        if let Some(reason) = state.send_failure.as_ref() {
            return Err(SyncError::Transport(format!(
                "{} delivery failed: {}",
                message.kind(),
                reason
            )));
        }
        state.sent += 1;
        state
            .inboxes
            .entry(self.role.other())
            .or_default()
            .push_back(TransportEvent::Message(message));
        Ok(())
    }

    fn poll_events(&mut self) -> Result<Vec<TransportEvent>> {
        let mut state = self.hub.lock();
        Ok(state
            .inboxes
            .get_mut(&self.role)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default())
    }
}
