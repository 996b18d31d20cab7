//! mealrl Core - Core types and shared functionality
//!
//! This crate provides the foundational types used across all mealrl
//! components: action identifiers, hyperparameters and the error taxonomy.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod types;
pub mod util;

pub use error::{MealRlError, Result};
pub use types::*;
