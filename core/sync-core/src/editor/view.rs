//! Sort and filter state for the editor table.
//!
//! The view never reorders or drops rows in the working set. It projects the
//! working set into display order, so row indices stay stable for edits.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use measview_protocol::Record;
use serde_json::Value;

use crate::record::cell_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    sort: Option<SortSpec>,
    /// Active filters in the order they were set. Values are stored trimmed.
    filters: Vec<(String, String)>,
}

impl ViewState {
    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    /// Sorts ascending, or flips direction when `field` is already the sort key.
    pub fn sort_by(&mut self, field: &str) -> SortDirection {
        let direction = match &self.sort {
            Some(spec) if spec.field == field && spec.direction == SortDirection::Ascending => {
                SortDirection::Descending
            }
            _ => SortDirection::Ascending,
        };
        self.sort = Some(SortSpec {
            field: field.to_string(),
            direction,
        });
        direction
    }

    /// Sets (or replaces) the filter on `field`. A blank value clears it.
    pub fn set_filter(&mut self, field: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            self.clear_filter(field);
            return;
        }
        match self.filters.iter_mut().find(|(name, _)| name == field) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.filters.push((field.to_string(), value.to_string())),
        }
    }

    pub fn clear_filter(&mut self, field: &str) {
        self.filters.retain(|(name, _)| name != field);
    }

    pub fn clear_all_filters(&mut self) {
        self.filters.clear();
    }

    /// A row passes when every filtered cell equals the filter value, ignoring case.
    pub fn matches(&self, row: &Record) -> bool {
        self.filters.iter().all(|(field, wanted)| {
            let cell = row.get(field).map(cell_text).unwrap_or_default();
            cell.to_lowercase() == wanted.to_lowercase()
        })
    }

    /// Working-set rows in display order, skipping `hidden` rows and rows that
    /// fail a filter. Each entry carries the row's working-set index.
    pub fn project<'a>(
        &self,
        rows: &'a [Record],
        hidden: &BTreeSet<usize>,
    ) -> Vec<(usize, &'a Record)> {
        let mut visible: Vec<(usize, &Record)> = rows
            .iter()
            .enumerate()
            .filter(|(index, row)| !hidden.contains(index) && self.matches(row))
            .collect();

        if let Some(spec) = &self.sort {
            visible.sort_by(|(_, a), (_, b)| {
                compare_cells(a.get(&spec.field), b.get(&spec.field), spec.direction)
            });
        }
        visible
    }
}

/// Nulls (and missing cells) sort last in both directions. Numbers come before
/// text, text before booleans; direction applies within a type. Text compares
/// case-insensitively.
pub fn compare_cells(a: Option<&Value>, b: Option<&Value>, direction: SortDirection) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);

    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }

    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    let ordering = match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    };

    match direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Bool(_) => 2,
        _ => 3,
    }
}

/// Distinct values per column, in first-seen order.
pub fn filter_options<'a, I>(rows: I, columns: &[String]) -> Vec<(String, Vec<Value>)>
where
    I: IntoIterator<Item = &'a Record> + Clone,
{
    columns
        .iter()
        .map(|column| {
            let mut values: Vec<Value> = Vec::new();
            for row in rows.clone() {
                let value = row.get(column).cloned().unwrap_or(Value::Null);
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            (column.clone(), values)
        })
        .collect()
}
