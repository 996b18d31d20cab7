//! Tabular state-action values
//!
//! Rows are created explicitly through [`ValueTable::ensure`] and
//! [`ValueTable::ensure_row`]; reads never insert.

use std::collections::HashMap;

use mealrl_core::{ActionId, StateKey};

/// One state's action values
pub type Row = HashMap<ActionId, f64>;

/// State key -> (action -> value). Absent entries read as 0.0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueTable {
    rows: HashMap<StateKey, Row>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `(key, action)`, 0.0 when unset. Never mutates.
    pub fn get(&self, key: &str, action: ActionId) -> f64 {
        self.rows
            .get(key)
            .and_then(|row| row.get(&action))
            .copied()
            .unwrap_or(0.0)
    }

    /// Materialize an empty row for `key`. Returns true if it was created.
    pub fn ensure_row(&mut self, key: &str) -> bool {
        if self.rows.contains_key(key) {
            return false;
        }
        self.rows.insert(key.to_string(), Row::new());
        true
    }

    /// Materialize `(key, action)` at 0.0 unless already present.
    /// Returns true if an entry was created.
    pub fn ensure(&mut self, key: &str, action: ActionId) -> bool {
        if let Some(row) = self.rows.get_mut(key) {
            if row.contains_key(&action) {
                return false;
            }
            row.insert(action, 0.0);
            return true;
        }
        self.rows.insert(key.to_string(), Row::from([(action, 0.0)]));
        true
    }

    pub fn set(&mut self, key: &str, action: ActionId, value: f64) {
        match self.rows.get_mut(key) {
            Some(row) => {
                row.insert(action, value);
            }
            None => {
                self.rows.insert(key.to_string(), Row::from([(action, value)]));
            }
        }
    }

    /// Row for `key`; `None` is equivalent to an empty row.
    pub fn row(&self, key: &str) -> Option<&Row> {
        self.rows.get(key)
    }

    /// True when `key` has at least one action value.
    pub fn has_experience(&self, key: &str) -> bool {
        self.rows.get(key).is_some_and(|row| !row.is_empty())
    }

    /// Maximum value in the row, `None` for a missing or empty row.
    pub fn max_value(&self, key: &str) -> Option<f64> {
        self.rows
            .get(key)?
            .values()
            .copied()
            .fold(None, |best, v| match best {
                Some(b) if b >= v => Some(b),
                _ => Some(v),
            })
    }

    /// Number of state rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total number of (state, action) entries
    pub fn entry_count(&self) -> usize {
        self.rows.values().map(HashMap::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &Row)> {
        self.rows.iter()
    }

    pub(crate) fn insert_row(&mut self, key: StateKey, row: Row) {
        self.rows.insert(key, row);
    }
}
