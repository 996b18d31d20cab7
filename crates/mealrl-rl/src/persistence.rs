//! Value-table persistence
//!
//! The file is a human-inspectable JSON object:
//!
//! ```text
//! { "<state_key>": { "<action_id>": <float>, ... }, ... }
//! ```
//!
//! Action ids are decimal strings on disk and [`ActionId`] in memory; this
//! module is the only place the two forms meet.
//!
//! Saves overwrite the file in place unless `atomic_writes` is enabled. An
//! in-place write interrupted by a crash leaves a truncated file, which the
//! next [`TableStore::load`] treats as corrupt (warning, empty table).
//! Enabling `atomic_writes` writes a sibling `.tmp` file and renames it over
//! the target, so readers see either the old or the new table.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use mealrl_core::util::with_suffix;
use mealrl_core::{ActionId, MealRlError, Result};

use crate::lock::{lock_path_for, FileLock};
use crate::table::{Row, ValueTable};

/// File name the first generation of agents wrote to
pub const LEGACY_TABLE_FILE: &str = "q_table.json";

/// Default bound on waiting for the table lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// On-disk shape; sorted for stable diffs
type TableFile = BTreeMap<String, BTreeMap<String, f64>>;

/// Loads and saves a [`ValueTable`] at a fixed path
#[derive(Debug, Clone)]
pub struct TableStore {
    path: PathBuf,
    legacy_paths: Vec<PathBuf>,
    lock_timeout: Duration,
    atomic_writes: bool,
}

impl TableStore {
    /// Store at `path` with the default legacy file name, lock timeout and
    /// in-place writes.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let legacy = resolve_beside(&path, Path::new(LEGACY_TABLE_FILE));
        Self {
            legacy_paths: if legacy == path { vec![] } else { vec![legacy] },
            path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            atomic_writes: false,
        }
    }

    /// Replace the legacy candidates. Relative names resolve next to the
    /// primary file.
    pub fn with_legacy_paths<I, P>(mut self, legacy: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.legacy_paths = legacy
            .into_iter()
            .map(|p| resolve_beside(&self.path, p.as_ref()))
            .filter(|p| *p != self.path)
            .collect();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_atomic_writes(mut self, atomic: bool) -> Self {
        self.atomic_writes = atomic;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.path)
    }

    pub fn legacy_paths(&self) -> &[PathBuf] {
        &self.legacy_paths
    }

    /// Load the table.
    ///
    /// Missing file -> empty table. Corrupt file -> warning and empty
    /// table. Other read errors are returned. If only a legacy file exists,
    /// it is loaded and re-saved under the primary path; a failed re-save
    /// is logged and the loaded table is still returned, so the next
    /// successful save completes the migration.
    pub fn load(&self) -> Result<ValueTable> {
        if self.path.exists() {
            return read_table(&self.path);
        }

        let Some(legacy) = self.legacy_paths.iter().find(|p| p.exists()) else {
            debug!("No table at {:?}; starting empty", self.path);
            return Ok(ValueTable::new());
        };

        let table = read_table(legacy)?;
        match self.save(&table) {
            Ok(()) => info!("Migrated legacy table {:?} -> {:?}", legacy, self.path),
            Err(e) => warn!(
                "Loaded legacy table {:?} but could not write {:?}: {}. Migration will be retried on next save.",
                legacy, self.path, e
            ),
        }
        Ok(table)
    }

    /// Write the whole table under the cross-process lock.
    pub fn save(&self, table: &ValueTable) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let body = serde_json::to_vec_pretty(&to_file(table))?;
        let _lock = FileLock::acquire(&self.lock_path(), self.lock_timeout)?;

        if self.atomic_writes {
            let tmp = with_suffix(&self.path, ".tmp");
            write_all(&tmp, &body)?;
            fs::rename(&tmp, &self.path)?;
        } else {
            write_all(&self.path, &body)?;
        }

        debug!(
            "Saved table to {:?} ({} states, {} entries)",
            self.path,
            table.len(),
            table.entry_count()
        );
        Ok(())
    }
}

fn resolve_beside(primary: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    match primary.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(candidate),
        _ => candidate.to_path_buf(),
    }
}

fn write_all(path: &Path, body: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(body)?;
    file.flush()?;
    Ok(())
}

/// Read and decode a table file, tolerating corruption.
pub fn read_table(path: &Path) -> Result<ValueTable> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ValueTable::new()),
        Err(e) => return Err(e.into()),
    };

    let raw: Value = match serde_json::from_str(&contents) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                "Failed to parse table {:?}: {}. Starting with empty table.",
                path, e
            );
            return Ok(ValueTable::new());
        }
    };

    match from_value(&raw) {
        Ok(table) => Ok(table),
        Err(e) => {
            warn!("Table {:?} has an unexpected shape: {}. Starting with empty table.", path, e);
            Ok(ValueTable::new())
        }
    }
}

/// Decode the on-disk JSON shape into a table.
///
/// Entries with a non-integer action key or a non-numeric value are
/// skipped; numeric strings are accepted as values.
pub fn from_value(raw: &Value) -> Result<ValueTable> {
    let states = raw
        .as_object()
        .ok_or_else(|| MealRlError::Persistence("top level is not an object".to_string()))?;

    let mut table = ValueTable::new();
    for (state_key, actions) in states {
        let Some(actions) = actions.as_object() else {
            warn!("Skipping state {:?}: row is not an object", state_key);
            continue;
        };
        let mut row = Row::with_capacity(actions.len());
        for (action_key, value) in actions {
            let Ok(action) = action_key.parse::<ActionId>() else {
                warn!("Skipping non-integer action id {:?}", action_key);
                continue;
            };
            match numeric(value) {
                Some(v) => {
                    row.insert(action, v);
                }
                None => warn!("Skipping non-numeric value for action {}", action),
            }
        }
        table.insert_row(state_key.clone(), row);
    }
    Ok(table)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// JSON has no infinities: saturate them to the largest finite value and
/// drop NaN, which serde_json would otherwise write as `null`.
fn to_file(table: &ValueTable) -> TableFile {
    table
        .iter()
        .map(|(state_key, row)| {
            let actions = row
                .iter()
                .filter_map(|(action, value)| {
                    finite_for_disk(*value, state_key, *action).map(|v| (action.to_string(), v))
                })
                .collect();
            (state_key.clone(), actions)
        })
        .collect()
}

fn finite_for_disk(value: f64, state_key: &str, action: ActionId) -> Option<f64> {
    if value.is_finite() {
        return Some(value);
    }
    if value.is_nan() {
        warn!("Dropping NaN value for action {} in state {:?}", action, state_key);
        return None;
    }
    let clamped = if value > 0.0 { f64::MAX } else { f64::MIN };
    warn!(
        "Clamping infinite value for action {} in state {:?} to {:e}",
        action, state_key, clamped
    );
    Some(clamped)
}
