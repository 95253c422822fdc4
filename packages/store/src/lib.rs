#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Persistence for metric records and point-of-interest scores.
//!
//! [`MetricStore`] is the seam between the pipeline and the database.
//! [`rest::RestMetricStore`] implements it against a PostgREST-style API;
//! [`upload`] layers batching and failure accounting on top.

pub mod rest;
pub mod upload;

use async_trait::async_trait;
use safety_metrics_geoindex::RequestError;
use safety_metrics_geography_models::PointOfInterest;
use safety_metrics_scoring_models::{MetricRecord, ScoreUpdate};

pub use rest::{RestMetricStore, StoreConfig};
pub use upload::{UploadSummary, apply_score_updates, replace_scope};

/// Errors from a single store call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The request failed after retries.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The store is not configured.
    #[error("Store misconfigured: {message}")]
    Config {
        /// Description of what is missing.
        message: String,
    },
}

/// Storage backend for metric records and POI scores.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Removes every metric record of `scope_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    async fn delete_scope(&self, scope_id: &str) -> Result<(), StoreError>;

    /// Inserts or replaces `records` by id. Returns the number of rows
    /// the store reports as written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn upsert_metric_records(&self, records: &[MetricRecord]) -> Result<u64, StoreError>;

    /// Applies score updates to points of interest. Returns the number of
    /// rows the store reports as updated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn apply_score_updates(&self, updates: &[ScoreUpdate]) -> Result<u64, StoreError>;

    /// Loads every metric record of `scope_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    async fn load_metric_records(&self, scope_id: &str) -> Result<Vec<MetricRecord>, StoreError>;

    /// Loads the points of interest of `scope_id` that have coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    async fn load_points_of_interest(
        &self,
        scope_id: &str,
    ) -> Result<Vec<PointOfInterest>, StoreError>;
}
