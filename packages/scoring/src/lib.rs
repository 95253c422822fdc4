#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Safety metric aggregation and scoring.
//!
//! For each [`MetricDefinition`](safety_metrics_scoring_models::MetricDefinition)
//! the [`aggregate`] module filters a scope's resolved incidents, groups
//! them by region, and folds in neighbor counts; [`score`] turns weighted
//! counts into 0-10 safety scores; [`format`] produces the persisted
//! [`MetricRecord`](safety_metrics_scoring_models::MetricRecord)s with
//! stable ids and human-readable descriptions. Built-in metric definitions
//! live in [`registry`].

pub mod aggregate;
pub mod format;
pub mod registry;
pub mod score;

pub use score::ScoringParams;

/// Errors that can occur while configuring scoring.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    /// An embedded or configured metric definition is malformed.
    #[error("Invalid metric definition '{name}': {source}")]
    Definition {
        /// Name of the definition file or entry.
        name: String,
        /// Parse error.
        source: toml::de::Error,
    },

    /// Scoring parameters are out of range.
    #[error("Invalid scoring parameter: {message}")]
    Params {
        /// Description of what is wrong.
        message: String,
    },

    /// The same metric id is defined more than once.
    #[error("Duplicate metric definition '{id}'")]
    DuplicateMetric {
        /// Duplicated id.
        id: String,
    },
}
