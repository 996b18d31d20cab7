//! mealrl RL - tabular value learning for recipe recommendation
//!
//! An [`OnlineAgent`] encodes observations into state keys, picks actions
//! epsilon-greedily from a [`ValueTable`], learns from feedback with a
//! Q-learning or SARSA rule, and persists the table as JSON under a
//! cross-process file lock.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::float_cmp)]
#![allow(clippy::similar_names)]

pub mod agent;
pub mod algorithm;
pub mod env;
pub mod experience;
pub mod lock;
pub mod persistence;
pub mod policy;
pub mod report;
pub mod state;
pub mod table;
pub mod trainer;

pub use agent::{AgentConfig, AgentStats, LearnOutcome, OnlineAgent, Prediction};
pub use algorithm::{QLearning, RuleKind, Sarsa, Update, UpdateRule};
pub use env::{Environment, FrozenLake, StepOutcome};
pub use experience::{KeyedTransition, Transition};
pub use persistence::TableStore;
pub use policy::{EpsilonGreedy, Selection, SelectionLabel};
pub use report::TableReport;
pub use state::{SchemaKind, StateEncoder};
pub use table::ValueTable;
pub use trainer::{Trainer, TrainerConfig, TrainingReport};
