//! Merge of an edited view back into the master dataset.
//!
//! The editor only ever works on a snapshot of a subset of master, so rows are
//! correlated by content rather than by position:
//!
//! ```text
//! edited row f  ──(identity == && non-mutable fields ==)──▶ master row m
//!     match     → overwrite m's mutable fields with f's (order kept)
//!     no match  → append f verbatim
//! ```
//!
//! Master rows outside the edited subset are never touched. Deletions are
//! resolved by the editor before it publishes, so the engine never removes
//! rows. Merging is an overwrite, so applying the same view twice yields the
//! same dataset.
//!
//! A master row is claimed by at most one edited row per merge, first edited
//! row first, and each edited row takes the first unclaimed match in master
//! order. A copied row therefore appends instead of collapsing onto its source.

use std::collections::HashMap;
use std::fmt;

use measview_protocol::{MutableFieldSet, Record};
use serde_json::Value;
use tracing::{debug, warn};

use crate::record::{IdentityField, RowIdentity};

/// Non-fatal conditions observed while merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationWarning {
    /// A master row has no usable identity; it is never matched.
    MasterRowWithoutIdentity { index: usize },
    /// An edited row has no usable identity; it was appended.
    EditedRowWithoutIdentity { index: usize },
    /// An edited row matched no master row; it was appended.
    Unmatched { index: usize, identity: RowIdentity },
}

impl fmt::Display for ReconciliationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationWarning::MasterRowWithoutIdentity { index } => {
                write!(f, "master row {} has no identity and was skipped", index)
            }
            ReconciliationWarning::EditedRowWithoutIdentity { index } => {
                write!(f, "edited row {} has no identity and was appended", index)
            }
            ReconciliationWarning::Unmatched { index, identity } => write!(
                f,
                "edited row {} (identity {}) matched no master row and was appended",
                index, identity
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub records: Vec<Record>,
    pub updated: usize,
    pub appended: usize,
    pub warnings: Vec<ReconciliationWarning>,
}

pub fn reconcile(
    master: &[Record],
    edited: &[Record],
    mutable: &MutableFieldSet,
    identity: &IdentityField,
) -> ReconcileOutcome {
    let mut warnings = Vec::new();
    let mut by_identity: HashMap<RowIdentity, Vec<usize>> = HashMap::new();

    for (index, row) in master.iter().enumerate() {
        match identity.identity_of(row) {
            Some(id) => by_identity.entry(id).or_default().push(index),
            None => warnings.push(ReconciliationWarning::MasterRowWithoutIdentity { index }),
        }
    }

    let mut records = master.to_vec();
    let mut claimed = vec![false; master.len()];
    let mut updated = 0;
    let mut appended = 0;

    for (index, row) in edited.iter().enumerate() {
        let id = match identity.identity_of(row) {
            Some(id) => id,
            None => {
                warnings.push(ReconciliationWarning::EditedRowWithoutIdentity { index });
                records.push(row.clone());
                appended += 1;
                continue;
            }
        };

        let target = by_identity.get(&id).and_then(|positions| {
            positions
                .iter()
                .copied()
                .find(|&pos| !claimed[pos] && immutable_fields_equal(&master[pos], row, mutable))
        });

        match target {
            Some(pos) => {
                claimed[pos] = true;
                overwrite_mutable(&mut records[pos], row, mutable);
                updated += 1;
            }
            None => {
                warnings.push(ReconciliationWarning::Unmatched {
                    index,
                    identity: id,
                });
                records.push(row.clone());
                appended += 1;
            }
        }
    }

    for warning in &warnings {
        warn!(warning = %warning, "Reconciliation warning");
    }
    debug!(
        master = master.len(),
        edited = edited.len(),
        updated,
        appended,
        "Reconciled edited view into master"
    );

    ReconcileOutcome {
        records,
        updated,
        appended,
        warnings,
    }
}

/// True when every field outside the whitelist holds the same value in both rows.
///
/// A missing field is treated as null.
fn immutable_fields_equal(master: &Record, edited: &Record, mutable: &MutableFieldSet) -> bool {
    let null = Value::Null;
    master
        .keys()
        .chain(edited.keys())
        .filter(|field| !mutable.is_mutable(field))
        .all(|field| {
            let left = master.get(field).unwrap_or(&null);
            let right = edited.get(field).unwrap_or(&null);
            values_equal(left, right)
        })
}

pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        _ => left == right,
    }
}

fn overwrite_mutable(target: &mut Record, source: &Record, mutable: &MutableFieldSet) {
    for field in &mutable.editable_keys {
        if let Some(value) = source.get(field) {
            target.insert(field.clone(), value.clone());
        }
    }
}
