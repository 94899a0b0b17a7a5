//! Shared transport between the parent and editor contexts.
//!
//! A transport is two things glued together:
//!
//! - a key/value store both contexts can read and write synchronously
//! - a point-to-point message channel to the other context
//!
//! Both contexts run single-threaded loops, so change notifications are pulled
//! rather than pushed: [`Transport::poll_events`] returns everything delivered
//! to this side since the previous poll. A store write only produces a
//! [`TransportEvent::StoreChanged`] on the *other* side. There is no ordering
//! guarantee between a store write and a message sent around the same time.
//!
//! # Implementations
//!
//! - [`MemoryHub`]: two in-process endpoints over one shared map (tests, embedding)
//! - [`FileTransport`]: a directory shared by two processes

mod file;
mod memory;

pub use file::FileTransport;
pub use memory::{MemoryHub, MemoryTransport};

use measview_protocol::{parse_records, ContextRole, Record, SyncMessage};
use serde_json::Value;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The other context wrote `key`.
    StoreChanged { key: String },
    Message(SyncMessage),
}

pub trait Transport {
    /// Which side of the pair this endpoint belongs to.
    fn role(&self) -> ContextRole;

    fn put(&mut self, key: &str, value: Value) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn remove(&mut self, key: &str) -> Result<()>;

    /// Fire-and-forget delivery to the other context.
    fn send(&mut self, message: SyncMessage) -> Result<()>;

    fn poll_events(&mut self) -> Result<Vec<TransportEvent>>;
}

/// Reads a dataset stored under `key`. Missing keys and `null` read as `None`.
pub fn get_records<T: Transport + ?Sized>(transport: &T, key: &str) -> Result<Option<Vec<Record>>> {
    match transport.get(key)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_records(value)
            .map(Some)
            .map_err(|info| SyncError::InvalidRecord(format!("{}: {}", key, info.message))),
    }
}

pub fn put_records<T: Transport + ?Sized>(transport: &mut T, key: &str, records: &[Record]) -> Result<()> {
    let value = Value::Array(records.iter().cloned().map(Value::Object).collect());
    transport.put(key, value)
}
