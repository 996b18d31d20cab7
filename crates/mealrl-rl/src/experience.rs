//! Transitions - the unit of learning

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mealrl_core::{ActionId, Reward, StateKey};

use crate::state::StateEncoder;

/// A single transition (s, a, r, s', done) as observed by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub state: Value,
    pub action: ActionId,
    pub reward: Reward,
    pub next_state: Value,
    pub done: bool,
    /// Action actually taken in `next_state`, when the caller knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<ActionId>,
}

impl Transition {
    /// Create a new transition
    pub fn new(state: Value, action: ActionId, reward: Reward, next_state: Value, done: bool) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
            done,
            next_action: None,
        }
    }

    /// Attach the on-policy next action
    pub fn with_next_action(mut self, next_action: ActionId) -> Self {
        self.next_action = Some(next_action);
        self
    }

    /// Resolve both observations to state keys
    pub fn encode(&self, encoder: &StateEncoder) -> KeyedTransition {
        KeyedTransition {
            state_key: encoder.encode(&self.state),
            action: self.action,
            reward: self.reward,
            next_state_key: encoder.encode(&self.next_state),
            done: self.done,
            next_action: self.next_action,
        }
    }
}

/// A transition whose states are already encoded
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedTransition {
    pub state_key: StateKey,
    pub action: ActionId,
    pub reward: Reward,
    pub next_state_key: StateKey,
    pub done: bool,
    pub next_action: Option<ActionId>,
}
