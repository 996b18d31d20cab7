//! Temporal-difference update rules
//!
//! Both rules share `new = old + alpha * (target - old)` and differ only in
//! how `target` bootstraps from the next state.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use mealrl_core::{ActionId, Hyperparameters, StateKey};

use crate::experience::KeyedTransition;
use crate::table::ValueTable;

/// Value written for any negative reward under the serving Q-learning rule
pub const NEGATIVE_REWARD_PENALTY: f64 = -999.0;

/// Result of applying one update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update {
    pub state_key: StateKey,
    pub action: ActionId,
    pub old: f64,
    pub new: f64,
    pub target: f64,
    /// `target - old`, before scaling by alpha
    pub td_error: f64,
}

/// Trait for tabular TD update rules
pub trait UpdateRule: Send + Sync {
    /// Rule name
    fn name(&self) -> &str;

    /// Record actions offered to the policy; rules that need an action
    /// universe (SARSA's next-action approximation) accumulate them.
    fn observe_actions(&mut self, _actions: &[ActionId]) {}

    /// Apply one transition to the table
    fn update(
        &self,
        table: &mut ValueTable,
        transition: &KeyedTransition,
        params: &Hyperparameters,
    ) -> Update;
}

/// Which update rule an agent runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Off-policy, max-based bootstrap
    #[default]
    QLearning,
    /// On-policy, bootstraps from the next action
    Sarsa,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::QLearning => "q_learning",
            RuleKind::Sarsa => "sarsa",
        }
    }

    /// Defaults the reference agents ship with for each rule
    pub fn default_hyperparameters(self) -> Hyperparameters {
        match self {
            RuleKind::QLearning => Hyperparameters::new(0.5, 0.9, 0.1),
            RuleKind::Sarsa => Hyperparameters::new(0.1, 0.99, 0.1),
        }
    }
}

/// Off-policy Q-learning
///
/// With `negative_reward_penalty` set, any negative reward overwrites the
/// value with the penalty, skipping the learning-rate blend entirely: a
/// single "never suggest this again" signal sticks.
#[derive(Debug, Clone, PartialEq)]
pub struct QLearning {
    pub negative_reward_penalty: Option<f64>,
}

impl QLearning {
    pub fn new(negative_reward_penalty: Option<f64>) -> Self {
        Self {
            negative_reward_penalty,
        }
    }

    /// Plain Q-learning without the penalty clamp, as used for offline training
    pub fn unclamped() -> Self {
        Self::new(None)
    }
}

impl Default for QLearning {
    fn default() -> Self {
        Self::new(Some(NEGATIVE_REWARD_PENALTY))
    }
}

impl UpdateRule for QLearning {
    fn name(&self) -> &str {
        "q_learning"
    }

    fn update(
        &self,
        table: &mut ValueTable,
        t: &KeyedTransition,
        params: &Hyperparameters,
    ) -> Update {
        table.ensure(&t.state_key, t.action);
        let old = table.get(&t.state_key, t.action);

        let (target, new) = match self.negative_reward_penalty {
            Some(penalty) if t.reward < 0.0 => (penalty, penalty),
            _ => {
                let next_max = if t.done {
                    0.0
                } else {
                    table.max_value(&t.next_state_key).unwrap_or(0.0)
                };
                let target = t.reward + params.gamma * next_max;
                (target, old + params.alpha * (target - old))
            }
        };

        table.set(&t.state_key, t.action, new);

        Update {
            state_key: t.state_key.clone(),
            action: t.action,
            old,
            new,
            target,
            td_error: target - old,
        }
    }
}

/// On-policy SARSA
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sarsa {
    /// Every action offered so far, in first-seen order
    known_actions: Vec<ActionId>,
    seen: HashSet<ActionId>,
}

impl Sarsa {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a fixed action space (grid environments)
    pub fn with_actions(actions: &[ActionId]) -> Self {
        let mut rule = Self::new();
        rule.observe_actions(actions);
        rule
    }

    pub fn known_actions(&self) -> &[ActionId] {
        &self.known_actions
    }

    /// Stand-in for the next action when the caller could not supply one.
    ///
    /// Greedy over the known action universe when the next state has any
    /// experience; otherwise the current action bootstraps itself.
    pub fn approximate_next_action(
        &self,
        table: &ValueTable,
        next_state_key: &str,
        current: ActionId,
    ) -> ActionId {
        if !table.has_experience(next_state_key) {
            return current;
        }
        let mut best: Option<(ActionId, f64)> = None;
        for &action in &self.known_actions {
            let value = table.get(next_state_key, action);
            if best.map_or(true, |(_, best_value)| value > best_value) {
                best = Some((action, value));
            }
        }
        best.map_or(current, |(action, _)| action)
    }
}

impl UpdateRule for Sarsa {
    fn name(&self) -> &str {
        "sarsa"
    }

    fn observe_actions(&mut self, actions: &[ActionId]) {
        for &action in actions {
            if self.seen.insert(action) {
                self.known_actions.push(action);
            }
        }
    }

    fn update(
        &self,
        table: &mut ValueTable,
        t: &KeyedTransition,
        params: &Hyperparameters,
    ) -> Update {
        table.ensure_row(&t.next_state_key);
        table.ensure(&t.state_key, t.action);
        let old = table.get(&t.state_key, t.action);

        let next_action = t
            .next_action
            .unwrap_or_else(|| self.approximate_next_action(table, &t.next_state_key, t.action));

        let bootstrap = if t.done {
            0.0
        } else {
            params.gamma * table.get(&t.next_state_key, next_action)
        };
        let target = t.reward + bootstrap;
        let new = old + params.alpha * (target - old);

        table.set(&t.state_key, t.action, new);

        Update {
            state_key: t.state_key.clone(),
            action: t.action,
            old,
            new,
            target,
            td_error: target - old,
        }
    }
}

/// Build the boxed rule for a [`RuleKind`]
pub fn build_rule(kind: RuleKind, negative_reward_penalty: Option<f64>) -> Box<dyn UpdateRule> {
    match kind {
        RuleKind::QLearning => Box::new(QLearning::new(negative_reward_penalty)),
        RuleKind::Sarsa => Box::new(Sarsa::new()),
    }
}
