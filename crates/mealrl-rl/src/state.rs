//! State canonicalization
//!
//! Turns an arbitrary JSON observation into the [`StateKey`] used as a
//! value-table row id. The serving schema and the trainer schema are two
//! [`FieldBindings`] of the same encoder, so equal states produce equal keys
//! regardless of which upstream delivered them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mealrl_core::StateKey;

/// Meal time used when the observation carries no context
pub const DEFAULT_MEAL_TIME: &str = "lunch";

/// Number of trailing history entries that contribute to the key
pub const HISTORY_WINDOW: usize = 3;

/// Where the recent-action history list lives in an observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryLocation {
    /// `observation[field]`
    TopLevel(String),
    /// `observation[context][field]`
    InContext(String),
}

/// Field names the encoder reads from an observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBindings {
    /// List of available items (ingredients)
    pub items: String,
    /// Optional context object
    pub context: String,
    /// Meal-time field inside the context object
    pub meal_time: String,
    pub history: HistoryLocation,
    /// Accepted spellings of the action id inside a history entry, tried in order
    pub history_id_fields: Vec<String>,
    pub default_meal_time: String,
}

impl FieldBindings {
    /// Schema sent by the serving backend:
    /// `{avail: [...], history: [{recipeId}], context: {meal_time}}`
    pub fn serving() -> Self {
        Self {
            items: "avail".to_string(),
            context: "context".to_string(),
            meal_time: "meal_time".to_string(),
            history: HistoryLocation::TopLevel("history".to_string()),
            history_id_fields: vec!["recipeId".to_string(), "recipe_id".to_string()],
            default_meal_time: DEFAULT_MEAL_TIME.to_string(),
        }
    }

    /// Schema returned by the kitchen simulator:
    /// `{available_ingredients: [...], context: {meal_time, history: [{recipe_id}]}}`
    pub fn trainer() -> Self {
        Self {
            items: "available_ingredients".to_string(),
            context: "context".to_string(),
            meal_time: "meal_time".to_string(),
            history: HistoryLocation::InContext("history".to_string()),
            history_id_fields: vec!["recipe_id".to_string(), "recipeId".to_string()],
            default_meal_time: DEFAULT_MEAL_TIME.to_string(),
        }
    }
}

/// How observations are interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    /// Items / meal time / history, read through the given bindings
    Fields(FieldBindings),
    /// The observation itself is the state (grid cells, pre-hashed keys)
    Opaque,
}

/// Named schema selection used in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    #[default]
    Serving,
    Trainer,
    Opaque,
}

impl From<SchemaKind> for Schema {
    fn from(kind: SchemaKind) -> Self {
        match kind {
            SchemaKind::Serving => Schema::Fields(FieldBindings::serving()),
            SchemaKind::Trainer => Schema::Fields(FieldBindings::trainer()),
            SchemaKind::Opaque => Schema::Opaque,
        }
    }
}

/// Deterministic observation -> key encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEncoder {
    schema: Schema,
}

impl StateEncoder {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn serving() -> Self {
        Self::new(Schema::Fields(FieldBindings::serving()))
    }

    pub fn trainer() -> Self {
        Self::new(Schema::Fields(FieldBindings::trainer()))
    }

    pub fn opaque() -> Self {
        Self::new(Schema::Opaque)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Encode an observation into its state key.
    pub fn encode(&self, observation: &Value) -> StateKey {
        match &self.schema {
            Schema::Fields(bindings) => encode_fields(bindings, observation),
            Schema::Opaque => encode_opaque(observation),
        }
    }
}

impl Default for StateEncoder {
    fn default() -> Self {
        Self::serving()
    }
}

fn encode_fields(bindings: &FieldBindings, observation: &Value) -> StateKey {
    // Duplicates are kept; only order and case are normalized.
    let mut items: Vec<String> = observation
        .get(&bindings.items)
        .and_then(Value::as_array)
        .map(|list| list.iter().map(item_text).collect())
        .unwrap_or_default();
    items.sort();

    let context = observation.get(&bindings.context).filter(|c| c.is_object());

    let meal_time = context
        .and_then(|c| c.get(&bindings.meal_time))
        .and_then(Value::as_str)
        .unwrap_or(&bindings.default_meal_time);

    let history = match &bindings.history {
        HistoryLocation::TopLevel(field) => observation.get(field),
        HistoryLocation::InContext(field) => context.and_then(|c| c.get(field)),
    };
    let recent: Vec<Value> = history
        .and_then(Value::as_array)
        .map(|entries| {
            let start = entries.len().saturating_sub(HISTORY_WINDOW);
            entries[start..]
                .iter()
                .map(|entry| history_id(entry, &bindings.history_id_fields))
                .collect()
        })
        .unwrap_or_default();

    format!(
        "avail={}|meal_time={}|history={}",
        Value::from(items),
        Value::from(meal_time),
        Value::from(recent)
    )
}

fn item_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

fn history_id(entry: &Value, id_fields: &[String]) -> Value {
    match entry {
        Value::Object(fields) => id_fields
            .iter()
            .find_map(|name| fields.get(name).filter(|v| !v.is_null()))
            .cloned()
            .unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn encode_opaque(observation: &Value) -> StateKey {
    match observation {
        Value::String(s) => s.clone(),
        other => canonical(other).to_string(),
    }
}

/// Rebuild objects with keys inserted in sorted order, so the text form
/// does not depend on whether serde_json preserves insertion order.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(fields.len());
            for key in keys {
                sorted.insert(key.clone(), canonical(&fields[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}
