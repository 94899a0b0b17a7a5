//! Directory-backed transport shared by two processes.
//!
//! # Layout
//!
//! ```text
//! {dir}/
//! ├── store.json           # { version, next_revision, entries: { key: { value, revision, writer, updated_at } } }
//! ├── store.lock/          # present while one side rewrites store.json
//! ├── inbox-parent.jsonl   # envelopes addressed to the parent, one per line
//! └── inbox-child.jsonl    # envelopes addressed to the editor
//! ```
//!
//! Every write bumps a store-wide revision counter and tags the entry with the
//! writer's role. Each endpoint remembers the revisions it has seen, so a poll
//! reports exactly the keys the other side wrote since.
//!
//! # Defensive Design
//!
//! Both processes rewrite `store.json`. The read-modify-write runs under an
//! atomic `mkdir` lock so concurrent writers to different keys never drop each
//! other's entries. Readers take no lock and we handle:
//! - Empty or corrupt files (treated as an empty store, logged)
//! - Version mismatches (treated as an empty store, logged)
//! - Partial writes (temp file + rename)
//! - Half-written inbox lines (only complete lines are consumed)
//! - Locks left behind by a crashed writer (taken over once stale)

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs_err as fs;
use measview_protocol::{parse_envelope, ContextRole, Envelope, SyncMessage, MAX_MESSAGE_BYTES};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{Transport, TransportEvent};
use crate::error::{Result, SyncError};

const STORE_FILE: &str = "store.json";
const STORE_VERSION: u32 = 1;
const LOCK_DIR: &str = "store.lock";
const LOCK_RETRY: Duration = Duration::from_millis(2);
const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    next_revision: u64,
    entries: BTreeMap<String, StoreEntry>,
}

impl Default for StoreFile {
    fn default() -> Self {
        StoreFile {
            version: STORE_VERSION,
            next_revision: 1,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreEntry {
    value: Value,
    revision: u64,
    writer: ContextRole,
    updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct FileTransport {
    dir: PathBuf,
    role: ContextRole,
    seen: HashMap<String, u64>,
    inbox_offset: u64,
}

impl FileTransport {
    /// Starts a fresh exchange: clears the store and both inboxes.
    pub fn create(dir: &Path, role: ContextRole) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|err| SyncError::io("Failed to create transport directory", err))?;
        {
            let _lock = StoreLock::acquire(dir)?;
            save_store(dir, &StoreFile::default())?;
        }
        for inbox_role in [ContextRole::Parent, ContextRole::Child] {
            fs::write(inbox_path(dir, inbox_role), b"")
                .map_err(|err| SyncError::io("Failed to reset inbox", err))?;
        }
        Self::open(dir, role)
    }

    /// Joins an existing exchange. Keys already in the store do not produce
    /// change events; messages already in this side's inbox are delivered.
    pub fn open(dir: &Path, role: ContextRole) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|err| SyncError::io("Failed to create transport directory", err))?;
        let store = load_store(dir)?;
        let seen = store
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.revision))
            .collect();

        Ok(FileTransport {
            dir: dir.to_path_buf(),
            role,
            seen,
            inbox_offset: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys currently in the store with their writer, for inspection.
    pub fn entries(&self) -> Result<Vec<(String, ContextRole, DateTime<Utc>)>> {
        Ok(load_store(&self.dir)?
            .entries
            .into_iter()
            .map(|(key, entry)| (key, entry.writer, entry.updated_at))
            .collect())
    }

    fn poll_store(&mut self, events: &mut Vec<TransportEvent>) -> Result<()> {
        let store = load_store(&self.dir)?;
        for (key, entry) in store.entries {
            let is_new = self
                .seen
                .get(&key)
                .map_or(true, |revision| entry.revision > *revision);
            if !is_new {
                continue;
            }
            if entry.writer != self.role {
                events.push(TransportEvent::StoreChanged { key: key.clone() });
            }
            self.seen.insert(key, entry.revision);
        }
        Ok(())
    }

    fn poll_inbox(&mut self, events: &mut Vec<TransportEvent>) -> Result<()> {
        let path = inbox_path(&self.dir, self.role);
        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(SyncError::io("Failed to open inbox", err)),
        };

        let len = file
            .metadata()
            .map_err(|err| SyncError::io("Failed to stat inbox", err))?
            .len();
        if len < self.inbox_offset {
            debug!(role = self.role.as_str(), "Inbox truncated; rewinding");
            self.inbox_offset = 0;
        }

        file.seek(SeekFrom::Start(self.inbox_offset))
            .map_err(|err| SyncError::io("Failed to seek inbox", err))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .map_err(|err| SyncError::io("Failed to read inbox", err))?;

        let complete = match buffer.iter().rposition(|b| *b == b'\n') {
            Some(index) => index + 1,
            None => return Ok(()),
        };
        self.inbox_offset += complete as u64;

        for line in buffer[..complete].split(|b| *b == b'\n') {
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            match parse_envelope(line) {
                Ok(envelope) if envelope.from == self.role => {
                    debug!("Ignoring self-addressed envelope");
                }
                Ok(envelope) => events.push(TransportEvent::Message(envelope.message)),
                Err(err) => {
                    warn!(code = %err.code, message = %err.message, "Dropping invalid inbox line");
                }
            }
        }
        Ok(())
    }
}

impl Transport for FileTransport {
    fn role(&self) -> ContextRole {
        self.role
    }

    fn put(&mut self, key: &str, value: Value) -> Result<()> {
        let _lock = StoreLock::acquire(&self.dir)?;
        let mut store = load_store(&self.dir)?;
        let revision = store.next_revision;
        store.next_revision += 1;
        store.entries.insert(
            key.to_string(),
            StoreEntry {
                value,
                revision,
                writer: self.role,
                updated_at: Utc::now(),
            },
        );
        save_store(&self.dir, &store)?;
        self.seen.insert(key.to_string(), revision);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(load_store(&self.dir)?
            .entries
            .remove(key)
            .map(|entry| entry.value))
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let _lock = StoreLock::acquire(&self.dir)?;
        let mut store = load_store(&self.dir)?;
        if store.entries.remove(key).is_some() {
            save_store(&self.dir, &store)?;
        }
        self.seen.remove(key);
        Ok(())
    }

    fn send(&mut self, message: SyncMessage) -> Result<()> {
        let kind = message.kind();
        let envelope = Envelope::new(self.role, Utc::now().to_rfc3339(), message);
        envelope.validate()?;

        let mut line = serde_json::to_vec(&envelope)
            .map_err(|err| SyncError::json("Failed to serialize envelope", err))?;
        if line.len() > MAX_MESSAGE_BYTES {
            return Err(SyncError::Transport(format!(
                "{} exceeds maximum message size",
                kind
            )));
        }
        line.push(b'\n');

        let path = inbox_path(&self.dir, self.role.other());
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| SyncError::Transport(format!("{} delivery failed: {}", kind, err)))?;
        file.write_all(&line)
            .and_then(|_| file.flush())
            .map_err(|err| SyncError::Transport(format!("{} delivery failed: {}", kind, err)))?;
        debug!(kind, to = self.role.other().as_str(), "Message sent");
        Ok(())
    }

    fn poll_events(&mut self) -> Result<Vec<TransportEvent>> {
        let mut events = Vec::new();
        self.poll_store(&mut events)?;
        self.poll_inbox(&mut events)?;
        Ok(events)
    }
}

/// Held across a store read-modify-write. `mkdir` is atomic, so whoever
/// creates the directory owns the store until the guard drops.
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_DIR);
        let mut waited = Duration::ZERO;
        loop {
            match fs::create_dir(&path) {
                Ok(()) => return Ok(StoreLock { path }),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        warn!(path = %path.display(), "Taking over stale store lock");
                        if let Err(err) = fs::remove_dir(&path) {
                            debug!(error = %err, "Stale store lock already gone");
                        }
                        continue;
                    }
                    if waited >= LOCK_WAIT {
                        return Err(SyncError::Transport(format!(
                            "Timed out waiting for store lock at {}",
                            path.display()
                        )));
                    }
                    thread::sleep(LOCK_RETRY);
                    waited += LOCK_RETRY;
                }
                Err(err) => return Err(SyncError::io("Failed to create store lock", err)),
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir(&self.path) {
            warn!(error = %err, "Failed to release store lock");
        }
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}

fn inbox_path(dir: &Path, role: ContextRole) -> PathBuf {
    dir.join(format!("inbox-{}.jsonl", role.as_str()))
}

fn load_store(dir: &Path) -> Result<StoreFile> {
    let path = dir.join(STORE_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(StoreFile::default()),
        Err(err) => return Err(SyncError::io("Failed to read store", err)),
    };

    if content.trim().is_empty() {
        warn!(path = %path.display(), "Empty store file, treating as empty store");
        return Ok(StoreFile::default());
    }

    match serde_json::from_str::<StoreFile>(&content) {
        Ok(store) if store.version == STORE_VERSION => Ok(store),
        Ok(store) => {
            warn!(
                version = store.version,
                expected = STORE_VERSION,
                "Unsupported store version, treating as empty store"
            );
            Ok(StoreFile::default())
        }
        Err(err) => {
            warn!(error = %err, "Failed to parse store file, treating as empty store");
            Ok(StoreFile::default())
        }
    }
}

fn save_store(dir: &Path, store: &StoreFile) -> Result<()> {
    let content = serde_json::to_string_pretty(store)
        .map_err(|err| SyncError::json("Failed to serialize store", err))?;

    let mut temp_file = NamedTempFile::new_in(dir)
        .map_err(|err| SyncError::io("Failed to create temp store file", err))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(|err| SyncError::io("Failed to write temp store file", err))?;
    temp_file
        .flush()
        .map_err(|err| SyncError::io("Failed to flush temp store file", err))?;
    temp_file
        .persist(dir.join(STORE_FILE))
        .map_err(|err| SyncError::io("Failed to commit store file", err.error))?;
    Ok(())
}
