//! One-shot merge of an edited view file into a master file.

use std::path::Path;

use measview_core::{reconcile, SyncConfig};
use measview_protocol::MutableFieldSet;
use tracing::info;

use crate::files::{read_records, records_to_string, write_records};

pub fn run(
    config: &SyncConfig,
    master_path: &Path,
    edited_path: &Path,
    mutable: &[String],
    output: Option<&Path>,
) -> Result<(), String> {
    let identity = config.identity_field();
    let master = read_records(master_path, &identity)?;
    let edited = read_records(edited_path, &identity)?;
    let fields = mutable_fields(config, mutable);

    let outcome = reconcile(&master, &edited, &fields, &identity);
    for warning in &outcome.warnings {
        eprintln!("warning: {}", warning);
    }
    info!(
        updated = outcome.updated,
        appended = outcome.appended,
        rows = outcome.records.len(),
        "Merged edited view"
    );

    match output {
        Some(path) => write_records(path, &outcome.records),
        None => {
            println!("{}", records_to_string(&outcome.records)?);
            Ok(())
        }
    }
}

/// Fields named on the command line, or the configured defaults. Numeric
/// typing follows the config for whichever fields are chosen.
pub fn mutable_fields(config: &SyncConfig, mutable: &[String]) -> MutableFieldSet {
    if mutable.is_empty() {
        return config.default_mutable_fields();
    }
    let numeric: Vec<String> = config
        .editor
        .numeric_keys
        .iter()
        .filter(|key| mutable.contains(key))
        .cloned()
        .collect();
    MutableFieldSet::new(mutable.iter().cloned()).with_numeric(numeric)
}
