//! Parent context: publishes a view of the master file, runs the editor as a
//! child process, and merges its edits until the editor goes away.

use std::env;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use measview_core::{
    ContextLauncher, FileTransport, MatchAll, RowPredicate, StorageConfig, SubstringMatch,
    SyncConfig, SyncError, SyncOrchestrator,
};
use measview_protocol::{ContextRole, MutableFieldSet, Record};
use tracing::{info, warn};

use crate::files::{read_records, write_records};
use crate::reconcile::mutable_fields;

const PUMP_INTERVAL: Duration = Duration::from_millis(200);

pub struct SessionArgs {
    pub master: PathBuf,
    pub selection: Option<(String, String)>,
    pub mutable: Vec<String>,
    pub output: Option<PathBuf>,
    pub dir: PathBuf,
    pub launch: bool,
}

enum Selection {
    All(MatchAll),
    Contains(SubstringMatch),
}

impl RowPredicate for Selection {
    fn matches(&self, row: &Record) -> bool {
        match self {
            Selection::All(all) => all.matches(row),
            Selection::Contains(contains) => contains.matches(row),
        }
    }
}

/// Spawns `measview editor` for each session and watches the child.
pub struct ProcessLauncher {
    exe: PathBuf,
    root: PathBuf,
    dir: PathBuf,
    child: Option<Child>,
}

impl ProcessLauncher {
    pub fn new(root: PathBuf, dir: PathBuf) -> Result<Self, String> {
        let exe = env::current_exe().map_err(|e| format!("Cannot locate measview binary: {}", e))?;
        Ok(Self {
            exe,
            root,
            dir,
            child: None,
        })
    }
}

impl ContextLauncher for ProcessLauncher {
    fn open(&mut self, session_id: &str) -> measview_core::Result<()> {
        let child = Command::new(&self.exe)
            .arg("--root")
            .arg(&self.root)
            .arg("editor")
            .arg("--dir")
            .arg(&self.dir)
            .arg("--parent-pid")
            .arg(std::process::id().to_string())
            .spawn()
            .map_err(|e| SyncError::Transport(format!("Failed to launch editor: {}", e)))?;
        info!(session_id = %session_id, pid = child.id(), "Editor launched");
        self.child = Some(child);
        Ok(())
    }

    fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(None) = child.try_wait() {
            if let Err(err) = child.kill() {
                warn!(error = %err, "Failed to stop editor");
            }
        }
        if let Err(err) = child.wait() {
            warn!(error = %err, "Failed to reap editor");
        }
    }

    fn is_running(&mut self) -> Option<bool> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(_)) => Some(false),
            Ok(None) => Some(true),
            Err(_) => None,
        }
    }
}

/// Waits for an editor started by hand; liveness comes from the store only.
pub struct DetachedLauncher {
    dir: PathBuf,
}

impl ContextLauncher for DetachedLauncher {
    fn open(&mut self, session_id: &str) -> measview_core::Result<()> {
        eprintln!(
            "Session {} ready. Start the editor with: measview editor --dir {}",
            session_id,
            self.dir.display()
        );
        Ok(())
    }

    fn close(&mut self) {}
}

pub fn run(config: &SyncConfig, storage: &StorageConfig, args: SessionArgs) -> Result<(), String> {
    let identity = config.identity_field();
    let master = read_records(&args.master, &identity)?;
    let fields = mutable_fields(config, &args.mutable);
    let selection = match args.selection {
        Some((field, needle)) => Selection::Contains(SubstringMatch::new(field, &needle)),
        None => Selection::All(MatchAll),
    };
    let output = args.output.clone().unwrap_or_else(|| args.master.clone());

    let transport = FileTransport::create(&args.dir, ContextRole::Parent)?;
    let merged = if args.launch {
        let launcher = ProcessLauncher::new(storage.root().to_path_buf(), args.dir.clone())?;
        drive(SyncOrchestrator::new(transport, launcher, config), master, selection, fields)?
    } else {
        let launcher = DetachedLauncher {
            dir: args.dir.clone(),
        };
        drive(SyncOrchestrator::new(transport, launcher, config), master, selection, fields)?
    };

    write_records(&output, &merged)?;
    info!(rows = merged.len(), path = %output.display(), "Master written");
    Ok(())
}

fn drive<L: ContextLauncher>(
    mut orchestrator: SyncOrchestrator<FileTransport, L>,
    master: Vec<Record>,
    selection: Selection,
    fields: MutableFieldSet,
) -> Result<Vec<Record>, String> {
    orchestrator.load_master(master)?;
    let session_id = orchestrator.start_session(selection, fields, Utc::now())?;
    info!(
        session_id = %session_id,
        rows = orchestrator.current_view().len(),
        "Waiting for editor"
    );

    loop {
        match orchestrator.pump(Utc::now()) {
            Ok(true) => thread::sleep(PUMP_INTERVAL),
            Ok(false) => break,
            Err(err) => {
                warn!(error = %err, "Sync step failed; ending session");
                break;
            }
        }
    }

    if let Err(err) = orchestrator.shutdown() {
        warn!(error = %err, "Final reconcile failed");
    }
    Ok(orchestrator.master().to_vec())
}
