//! Online agent - composition root for predict and learn
//!
//! One [`OnlineAgent`] owns its table, policy, update rule, store, RNG and
//! tracing span. Nothing is process-global, so several agents (one per
//! model file) can live side by side.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Span};

use mealrl_core::{ActionId, Hyperparameters, Result};

use crate::algorithm::{build_rule, RuleKind, Update, UpdateRule, NEGATIVE_REWARD_PENALTY};
use crate::experience::Transition;
use crate::persistence::{TableStore, LEGACY_TABLE_FILE};
use crate::policy::{EpsilonGreedy, SelectionLabel};
use crate::state::{SchemaKind, StateEncoder};
use crate::table::ValueTable;

/// Default table file for the serving agent
pub const DEFAULT_MODEL_PATH: &str = "q_table_online.json";

const LEARNED_MESSAGE: &str = "Agent has learned from feedback";

/// Agent configuration
///
/// Unset hyperparameters fall back to the defaults of the selected rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub rule: RuleKind,
    pub alpha: Option<f64>,
    pub gamma: Option<f64>,
    pub epsilon: Option<f64>,
    pub model_path: PathBuf,
    /// Older file names to migrate from, relative to the model's directory
    pub legacy_paths: Vec<PathBuf>,
    pub lock_timeout_ms: u64,
    /// Write to `<model>.tmp` and rename instead of overwriting in place
    pub atomic_writes: bool,
    /// Insert 0.0 entries for every candidate on predict.
    /// Defaults to true for SARSA, false for Q-learning.
    pub materialize_candidates: Option<bool>,
    /// Q-learning only; `None` disables the negative-reward clamp
    pub negative_reward_penalty: Option<f64>,
    pub schema: SchemaKind,
    pub seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            rule: RuleKind::QLearning,
            alpha: None,
            gamma: None,
            epsilon: None,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            legacy_paths: vec![PathBuf::from(LEGACY_TABLE_FILE)],
            lock_timeout_ms: 5_000,
            atomic_writes: false,
            materialize_candidates: None,
            negative_reward_penalty: Some(NEGATIVE_REWARD_PENALTY),
            schema: SchemaKind::Serving,
            seed: None,
        }
    }
}

impl AgentConfig {
    /// Default configuration for `rule`
    pub fn for_rule(rule: RuleKind) -> Self {
        Self {
            rule,
            ..Self::default()
        }
    }

    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = path.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Effective hyperparameters after rule defaults are applied
    pub fn hyperparameters(&self) -> Hyperparameters {
        let defaults = self.rule.default_hyperparameters();
        Hyperparameters::new(
            self.alpha.unwrap_or(defaults.alpha),
            self.gamma.unwrap_or(defaults.gamma),
            self.epsilon.unwrap_or(defaults.epsilon),
        )
    }

    pub fn materializes_candidates(&self) -> bool {
        self.materialize_candidates
            .unwrap_or(self.rule == RuleKind::Sarsa)
    }

    /// Table store described by this configuration
    pub fn store(&self) -> TableStore {
        TableStore::new(&self.model_path)
            .with_legacy_paths(&self.legacy_paths)
            .with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
            .with_atomic_writes(self.atomic_writes)
    }
}

/// Answer to a predict call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// `None` only when no candidates were given
    pub chosen: Option<ActionId>,
    pub label: SelectionLabel,
    pub message: String,
    pub epsilon: f64,
    /// Current value of every candidate, keyed by the action id's string form
    pub q_values: BTreeMap<String, f64>,
}

/// Answer to a learn call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnOutcome {
    pub status: String,
    pub message: String,
    pub td_error: f64,
    pub old_value: f64,
    pub new_value: f64,
}

impl From<&Update> for LearnOutcome {
    fn from(update: &Update) -> Self {
        Self {
            status: "ok".to_string(),
            message: LEARNED_MESSAGE.to_string(),
            td_error: update.td_error,
            old_value: update.old,
            new_value: update.new,
        }
    }
}

/// Agent statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentStats {
    pub rule: String,
    pub alpha: f64,
    pub gamma: f64,
    pub epsilon: f64,
    pub model_path: String,
    pub states: usize,
    pub entries: usize,
    pub predictions: u64,
    pub updates: u64,
    pub saves: u64,
    pub save_failures: u64,
    pub total_reward: f64,
    /// Selection counts by label wire name
    pub labels: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct Counters {
    predictions: u64,
    updates: u64,
    saves: u64,
    save_failures: u64,
    total_reward: f64,
    labels: BTreeMap<String, u64>,
}

/// Tabular epsilon-greedy agent backed by a JSON table file
pub struct OnlineAgent {
    params: Hyperparameters,
    rule_kind: RuleKind,
    encoder: StateEncoder,
    table: ValueTable,
    policy: EpsilonGreedy,
    rule: Box<dyn UpdateRule>,
    store: TableStore,
    materialize_candidates: bool,
    rng: StdRng,
    counters: Counters,
    span: Span,
}

impl std::fmt::Debug for OnlineAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnlineAgent")
            .field("rule", &self.rule_kind)
            .field("params", &self.params)
            .field("states", &self.table.len())
            .field("path", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl OnlineAgent {
    /// Build an agent and load its table.
    ///
    /// A corrupt table file yields an empty table with a warning; any other
    /// read failure is returned, so an unreadable table is never replaced
    /// by the first save of a fresh one.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let params = config.hyperparameters();
        params.validate()?;

        let store = config.store();
        let span = info_span!(
            "agent",
            rule = config.rule.as_str(),
            model = %store.path().display()
        );

        let table = {
            let _enter = span.enter();
            match store.load() {
                Ok(table) if !table.is_empty() => {
                    info!(
                        "Loaded table from {:?} ({} states)",
                        store.path(),
                        table.len()
                    );
                    table
                }
                Ok(table) => {
                    warn!("No table found at {:?}; a new one will be created on first feedback", store.path());
                    table
                }
                Err(e) => {
                    error!("Failed to load table from {:?}: {}", store.path(), e);
                    return Err(e);
                }
            }
        };

        let penalty = match config.rule {
            RuleKind::QLearning => config.negative_reward_penalty,
            RuleKind::Sarsa => None,
        };

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            params,
            rule_kind: config.rule,
            encoder: StateEncoder::new(config.schema.into()),
            table,
            policy: EpsilonGreedy::new(params.epsilon),
            rule: build_rule(config.rule, penalty),
            store,
            materialize_candidates: config.materializes_candidates(),
            rng,
            counters: Counters::default(),
            span,
        })
    }

    /// Replace the update rule (e.g. a SARSA rule seeded with a fixed
    /// action space).
    pub fn with_rule(mut self, rule: Box<dyn UpdateRule>) -> Self {
        self.rule = rule;
        self
    }

    /// Choose one of `candidates` for `state`. Pure in-memory; never fails.
    pub fn predict(&mut self, state: &Value, candidates: &[ActionId]) -> Prediction {
        let _enter = self.span.enter();

        let key = self.encoder.encode(state);
        debug!("Handling state key: {}", key);

        self.rule.observe_actions(candidates);
        if self.materialize_candidates {
            for &action in candidates {
                self.table.ensure(&key, action);
            }
        }

        let selection = self
            .policy
            .select(&self.table, &key, candidates, &mut self.rng);

        match selection.label {
            SelectionLabel::Exploitation => {
                info!("Exploitation, suggesting action {:?}", selection.action)
            }
            SelectionLabel::Exploration => {
                info!("Exploration among {} actions", candidates.len())
            }
            SelectionLabel::ErrorNoCandidates => warn!("Predict called without candidates"),
            label => warn!("{} for state {}", label.message(), key),
        }

        self.counters.predictions += 1;
        *self
            .counters
            .labels
            .entry(selection.label.as_str().to_string())
            .or_default() += 1;

        let q_values = candidates
            .iter()
            .map(|&action| (action.to_string(), self.table.get(&key, action)))
            .collect();

        Prediction {
            chosen: selection.action,
            label: selection.label,
            message: selection.label.message().to_string(),
            epsilon: self.params.epsilon,
            q_values,
        }
    }

    /// Apply one transition to the in-memory table without saving.
    pub fn apply(&mut self, transition: &Transition) -> Update {
        let _enter = self.span.enter();

        let keyed = transition.encode(&self.encoder);
        debug!(
            "Learning: s={}, a={}, r={}, s'={}",
            keyed.state_key, keyed.action, keyed.reward, keyed.next_state_key
        );

        let update = self.rule.update(&mut self.table, &keyed, &self.params);
        self.counters.updates += 1;
        self.counters.total_reward += transition.reward;

        debug!(
            "Updated value for ({}, {}) from {:.3} -> {:.3}",
            update.state_key, update.action, update.old, update.new
        );
        update
    }

    /// Apply one transition and persist the table.
    ///
    /// If saving fails the in-memory update is kept and the error returned;
    /// the file lags until the next successful save.
    pub fn learn(&mut self, transition: &Transition) -> Result<LearnOutcome> {
        let update = self.apply(transition);
        self.save()?;
        info!(
            "Learned from feedback: action {} reward {} ({:.3} -> {:.3})",
            update.action, transition.reward, update.old, update.new
        );
        Ok(LearnOutcome::from(&update))
    }

    /// Persist the table.
    pub fn save(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        match self.store.save(&self.table) {
            Ok(()) => {
                self.counters.saves += 1;
                Ok(())
            }
            Err(e) => {
                self.counters.save_failures += 1;
                error!("Failed to save table to {:?}: {}", self.store.path(), e);
                Err(e)
            }
        }
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.params.alpha = alpha;
    }

    pub fn set_gamma(&mut self, gamma: f64) {
        self.params.gamma = gamma;
    }

    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.params.epsilon = epsilon;
        self.policy.epsilon = epsilon;
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        self.params
    }

    pub fn rule_kind(&self) -> RuleKind {
        self.rule_kind
    }

    pub fn encoder(&self) -> &StateEncoder {
        &self.encoder
    }

    pub fn table(&self) -> &ValueTable {
        &self.table
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            rule: self.rule.name().to_string(),
            alpha: self.params.alpha,
            gamma: self.params.gamma,
            epsilon: self.params.epsilon,
            model_path: self.store.path().display().to_string(),
            states: self.table.len(),
            entries: self.table.entry_count(),
            predictions: self.counters.predictions,
            updates: self.counters.updates,
            saves: self.counters.saves,
            save_failures: self.counters.save_failures,
            total_reward: self.counters.total_reward,
            labels: self.counters.labels.clone(),
        }
    }
}
