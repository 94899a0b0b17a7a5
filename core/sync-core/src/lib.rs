//! # measview-core
//!
//! Cross-window editing for MeasView: a parent context hands a filtered view of
//! its master dataset to an editor context, and folds the edited view back in.
//!
//! ## Design Principles
//!
//! - **Synchronous**: both contexts are single-threaded loops that pull events.
//! - **No direct calls**: the contexts share only a [`Transport`] (key/value
//!   store plus message channel).
//! - **Idempotent merge**: every trigger re-reads the stored view, and
//!   [`reconcile`] overwrites, so duplicate signals are harmless.
//! - **Graceful degradation**: a corrupt store file reads as empty, a missing
//!   config file yields defaults.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use measview_core::{MemoryHub, SyncConfig, SyncOrchestrator, SubstringMatch};
//! use measview_protocol::{ContextRole, MutableFieldSet};
//!
//! let hub = MemoryHub::new();
//! let mut parent = SyncOrchestrator::new(hub.endpoint(ContextRole::Parent), launcher, &SyncConfig::default());
//! parent.load_master(records)?;
//! parent.start_session(SubstringMatch::new("probe", "L3"), MutableFieldSet::measurement_defaults(), Utc::now())?;
//! while parent.pump(Utc::now())? { /* ... */ }
//! ```

pub mod config;
pub mod editor;
pub mod error;
pub mod liveness;
pub mod orchestrator;
pub mod reconcile;
pub mod record;
pub mod storage;
pub mod transport;

pub use config::{load_config, EditorConfig, IdentityConfig, LivenessConfig, SyncConfig};
pub use editor::{
    AlwaysConfirm, CellKey, ChangeSummary, Confirm, ConfirmPrompt, EditEntry, EditorReaction,
    EditorSession, EditorState, SortDirection,
};
pub use error::{Result, SyncError};
pub use liveness::{
    poll_liveness, AllAlive, HeartbeatProbe, LivenessContext, LivenessMonitor, LivenessProbe,
    MonitorState, ProcessProbe, SessionFlagProbe,
};
pub use orchestrator::{ContextLauncher, MatchAll, RowPredicate, SubstringMatch, SyncOrchestrator};
pub use reconcile::{reconcile, ReconcileOutcome, ReconciliationWarning};
pub use record::{ingest, IdentityField, RowIdentity};
pub use storage::StorageConfig;
pub use transport::{FileTransport, MemoryHub, MemoryTransport, Transport, TransportEvent};
