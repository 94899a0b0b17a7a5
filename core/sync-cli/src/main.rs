//! measview: parent and editor contexts for cross-window data editing.
//!
//! The two contexts run as separate processes and share a transport directory
//! (`<root>/transport` unless `--dir` is given).
//!
//! ## Subcommands
//!
//! - `session`: Parent context. Publishes a filtered view of a master file,
//!   launches the editor, and merges its edits back into the master file
//! - `editor`: Editor context (spawned by `session`, or run by hand)
//! - `reconcile`: One-shot merge of an edited file into a master file
//! - `store`: Inspect the shared store

mod editor;
mod files;
mod logging;
mod reconcile;
mod session;
mod store;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use measview_core::{load_config, StorageConfig, SyncConfig};

#[derive(Parser)]
#[command(name = "measview")]
#[command(about = "Edit a filtered view of a dataset in a second context and merge it back")]
#[command(version)]
struct Cli {
    /// Data root (defaults to $MEASVIEW_HOME or ~/.measview)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge an edited view into a master dataset file
    Reconcile {
        /// Master dataset (JSON array of records)
        #[arg(long)]
        master: PathBuf,

        /// Edited view (JSON array of records)
        #[arg(long)]
        edited: PathBuf,

        /// Mutable fields, comma separated (defaults to config)
        #[arg(long, value_delimiter = ',')]
        mutable: Vec<String>,

        /// Write the merged dataset here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run the parent context for one editing session
    Session {
        /// Master dataset (JSON array of records)
        #[arg(long)]
        master: PathBuf,

        /// Field used to select rows for the editor
        #[arg(long, requires = "contains")]
        field: Option<String>,

        /// Case-insensitive substring the selected rows must contain
        #[arg(long, requires = "field")]
        contains: Option<String>,

        /// Mutable fields, comma separated (defaults to config)
        #[arg(long, value_delimiter = ',')]
        mutable: Vec<String>,

        /// Where to write the merged master (defaults to overwriting --master)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Transport directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Do not spawn the editor; wait for one started by hand
        #[arg(long)]
        no_launch: bool,
    },

    /// Run the editor context
    Editor {
        /// Transport directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Parent process to watch; the editor closes when it exits
        #[arg(long)]
        parent_pid: Option<u32>,

        /// Answer yes to every confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Show the shared store, or one key
    Store {
        /// Transport directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Key to print
        key: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    let storage = match cli.root {
        Some(root) => StorageConfig::with_root(root),
        None => StorageConfig::default(),
    };
    let _logging_guard = logging::init(&storage);

    if let Err(e) = run(cli.command, &storage) {
        tracing::error!(error = %e, "measview failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands, storage: &StorageConfig) -> Result<(), String> {
    let config: SyncConfig = load_config(&storage.config_file())?;

    match command {
        Commands::Reconcile {
            master,
            edited,
            mutable,
            output,
        } => reconcile::run(&config, &master, &edited, &mutable, output.as_deref()),
        Commands::Session {
            master,
            field,
            contains,
            mutable,
            output,
            dir,
            no_launch,
        } => session::run(
            &config,
            storage,
            session::SessionArgs {
                master,
                selection: field.zip(contains),
                mutable,
                output,
                dir: dir.unwrap_or_else(|| storage.transport_dir()),
                launch: !no_launch,
            },
        ),
        Commands::Editor {
            dir,
            parent_pid,
            yes,
        } => editor::run(
            &config,
            &dir.unwrap_or_else(|| storage.transport_dir()),
            parent_pid,
            yes,
        ),
        Commands::Store { dir, key } => store::run(
            &dir.unwrap_or_else(|| storage.transport_dir()),
            key.as_deref(),
        ),
    }
}
