//! Human-readable summary of a table file

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use mealrl_core::util::preview;
use mealrl_core::Result;

use crate::persistence::read_table;

/// Characters of a state key shown in previews
pub const STATE_PREVIEW_CHARS: usize = 120;

/// One of the highest values in the table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopEntry {
    pub value: f64,
    pub action: String,
    pub state_preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleState {
    pub state_preview: String,
    pub actions: BTreeMap<String, f64>,
}

/// Size, shape and highlights of a persisted table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableReport {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Local>>,
    pub states: usize,
    pub avg_actions: f64,
    pub median_actions: f64,
    pub top: Vec<TopEntry>,
    pub sample: Vec<SampleState>,
}

impl TableReport {
    /// Build a report for the table at `path`; `Ok(None)` if it does not exist.
    pub fn load(path: &Path, top_n: usize, sample_n: usize) -> Result<Option<Self>> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = metadata.modified().ok().map(DateTime::<Local>::from);
        let table = read_table(path)?;

        // Sorted for a stable sample
        let rows: BTreeMap<&String, BTreeMap<String, f64>> = table
            .iter()
            .map(|(state, row)| {
                let actions = row.iter().map(|(a, v)| (a.to_string(), *v)).collect();
                (state, actions)
            })
            .collect();

        let mut counts: Vec<usize> = rows.values().map(BTreeMap::len).collect();
        counts.sort_unstable();

        let mut top: Vec<TopEntry> = rows
            .iter()
            .flat_map(|(state, actions)| {
                actions.iter().map(move |(action, value)| TopEntry {
                    value: *value,
                    action: action.clone(),
                    state_preview: preview(state, STATE_PREVIEW_CHARS).to_string(),
                })
            })
            .collect();
        top.sort_by(|a, b| b.value.total_cmp(&a.value));
        top.truncate(top_n);

        let sample = rows
            .iter()
            .take(sample_n)
            .map(|(state, actions)| SampleState {
                state_preview: preview(state, STATE_PREVIEW_CHARS).to_string(),
                actions: actions.clone(),
            })
            .collect();

        Ok(Some(Self {
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            modified,
            states: rows.len(),
            avg_actions: mean(&counts),
            median_actions: median(&counts),
            top,
            sample,
        }))
    }
}

fn mean(sorted: &[usize]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.iter().sum::<usize>() as f64 / sorted.len() as f64
}

fn median(sorted: &[usize]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2] as f64,
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0,
    }
}

impl fmt::Display for TableReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Q-table path: {}", self.path.display())?;
        writeln!(f, "File size (bytes): {}", self.size_bytes)?;
        match &self.modified {
            Some(t) => writeln!(f, "Last modified: {}", t.format("%a %b %e %H:%M:%S %Y"))?,
            None => writeln!(f, "Last modified: unknown")?,
        }
        writeln!(f, "Number of states: {}", self.states)?;
        writeln!(
            f,
            "Actions per state: avg={:.2}, med={}",
            self.avg_actions, self.median_actions
        )?;

        writeln!(f)?;
        writeln!(f, "Top {} Q-values:", self.top.len())?;
        for entry in &self.top {
            writeln!(
                f,
                "  Q={:.6}  action={}  state_preview=\"{}\"",
                entry.value, entry.action, entry.state_preview
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Sample {} states:", self.sample.len())?;
        for state in &self.sample {
            writeln!(f, " STATE: {}", state.state_preview)?;
            writeln!(f, "  actions: {:?}", state.actions)?;
        }
        Ok(())
    }
}
