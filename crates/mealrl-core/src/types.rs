//! Common types used throughout mealrl

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MealRlError, Result};

/// Deterministic fingerprint of a state observation, used as a table row id
pub type StateKey = String;

/// Scalar reward received as feedback
pub type Reward = f64;

/// Identifier of a recommendable action (a recipe id, or a small index
/// into a fixed action space when training against a grid environment).
///
/// This is the only in-memory representation of an action. Callers that
/// send `"12"` and callers that send `12` refer to the same action; the
/// string form only exists at the serialization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub i64);

impl ActionId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for ActionId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = MealRlError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(ActionId)
            .map_err(|_| MealRlError::Internal(format!("Invalid action id: {s:?}")))
    }
}

impl Serialize for ActionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

struct ActionIdVisitor;

impl Visitor<'_> for ActionIdVisitor {
    type Value = ActionId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer action id or its decimal string form")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<ActionId, E> {
        Ok(ActionId(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<ActionId, E> {
        i64::try_from(v)
            .map(ActionId)
            .map_err(|_| E::custom(format!("action id {v} out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<ActionId, E> {
        if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            Ok(ActionId(v as i64))
        } else {
            Err(E::custom(format!("action id {v} is not an integer")))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<ActionId, E> {
        v.parse().map_err(|_| E::custom(format!("invalid action id {v:?}")))
    }
}

impl<'de> Deserialize<'de> for ActionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ActionIdVisitor)
    }
}

/// Learning hyperparameters.
///
/// No range is enforced beyond finiteness; callers own sane values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Learning rate (alpha)
    pub alpha: f64,
    /// Discount factor (gamma)
    pub gamma: f64,
    /// Exploration probability (epsilon)
    pub epsilon: f64,
}

impl Hyperparameters {
    pub fn new(alpha: f64, gamma: f64, epsilon: f64) -> Self {
        Self {
            alpha,
            gamma,
            epsilon,
        }
    }

    /// Reject NaN and infinite values.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("alpha", self.alpha),
            ("gamma", self.gamma),
            ("epsilon", self.epsilon),
        ] {
            if !value.is_finite() {
                return Err(MealRlError::Config(format!(
                    "{name} must be a finite number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self::new(0.5, 0.9, 0.1)
    }
}
