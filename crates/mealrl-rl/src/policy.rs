//! Epsilon-greedy action selection
//!
//! Every selection carries a [`SelectionLabel`] saying why the action was
//! chosen. Downstream logs and the serving API rely on these labels to tell
//! exploration, exploitation and the fallbacks apart.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use mealrl_core::ActionId;

use crate::table::{Row, ValueTable};

/// Why an action was (or was not) chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionLabel {
    Exploration,
    Exploitation,
    FallbackNoExperience,
    FallbackNoValidValues,
    ErrorNoCandidates,
}

impl SelectionLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionLabel::Exploration => "exploration",
            SelectionLabel::Exploitation => "exploitation",
            SelectionLabel::FallbackNoExperience => "fallback_no_experience",
            SelectionLabel::FallbackNoValidValues => "fallback_no_valid_values",
            SelectionLabel::ErrorNoCandidates => "error_no_candidates",
        }
    }

    /// Human-readable diagnostic message
    pub fn message(self) -> &'static str {
        match self {
            SelectionLabel::Exploration => "Exploration choice",
            SelectionLabel::Exploitation => "Exploitation choice",
            SelectionLabel::FallbackNoExperience => "Fallback: No experience",
            SelectionLabel::FallbackNoValidValues => "Fallback: No valid Q-values",
            SelectionLabel::ErrorNoCandidates => "No possible actions provided.",
        }
    }

    /// True for the labels that resolved by uniform random choice
    pub fn is_random(self) -> bool {
        matches!(
            self,
            SelectionLabel::Exploration
                | SelectionLabel::FallbackNoExperience
                | SelectionLabel::FallbackNoValidValues
        )
    }
}

impl std::fmt::Display for SelectionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a policy decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// `None` only when there were no candidates
    pub action: Option<ActionId>,
    pub label: SelectionLabel,
}

/// Epsilon-greedy selector over a per-call candidate set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonGreedy {
    pub epsilon: f64,
}

impl EpsilonGreedy {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// Choose among `candidates` for the state `key`.
    ///
    /// 1. no candidates -> `ErrorNoCandidates`
    /// 2. u < epsilon -> uniform choice, `Exploration`
    /// 3. no row or empty row -> uniform choice, `FallbackNoExperience`
    /// 4. no row entry among candidates -> uniform choice, `FallbackNoValidValues`
    /// 5. otherwise the highest-valued candidate, `Exploitation`
    pub fn select<R: Rng + ?Sized>(
        &self,
        table: &ValueTable,
        key: &str,
        candidates: &[ActionId],
        rng: &mut R,
    ) -> Selection {
        let Some(&random_pick) = candidates.choose(rng) else {
            return Selection {
                action: None,
                label: SelectionLabel::ErrorNoCandidates,
            };
        };

        if rng.gen::<f64>() < self.epsilon {
            return Selection {
                action: Some(random_pick),
                label: SelectionLabel::Exploration,
            };
        }

        let row = match table.row(key) {
            Some(row) if !row.is_empty() => row,
            _ => {
                return Selection {
                    action: Some(random_pick),
                    label: SelectionLabel::FallbackNoExperience,
                }
            }
        };

        match greedy_among(row, candidates) {
            Some(best) => Selection {
                action: Some(best),
                label: SelectionLabel::Exploitation,
            },
            None => Selection {
                action: Some(random_pick),
                label: SelectionLabel::FallbackNoValidValues,
            },
        }
    }
}

impl Default for EpsilonGreedy {
    fn default() -> Self {
        Self::new(0.1)
    }
}

/// Highest-valued candidate that has an entry in `row`.
///
/// Ties go to the candidate that appears first in `candidates`. Candidates
/// without an entry are skipped; `None` if no candidate has one.
pub fn greedy_among(row: &Row, candidates: &[ActionId]) -> Option<ActionId> {
    let mut best: Option<(ActionId, f64)> = None;
    for &action in candidates {
        let Some(&value) = row.get(&action) else {
            continue;
        };
        if best.map_or(true, |(_, best_value)| value > best_value) {
            best = Some((action, value));
        }
    }
    best.map(|(action, _)| action)
}
