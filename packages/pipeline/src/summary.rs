//! Structured per-scope and per-run summaries.
//!
//! Every stage records its counts here so the CLI can emit one JSON
//! document describing what happened, including partial failures.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use safety_metrics_geoindex::neighbors::NeighborStats;
use safety_metrics_geoindex::regions::RegionStats;
use safety_metrics_scoring::aggregate::AggregateStats;
use safety_metrics_scoring_models::MetricType;
use safety_metrics_source::normalize::NormalizeSummary;
use safety_metrics_spatial::LinkSummary;
use safety_metrics_store::UploadSummary;
use serde::{Deserialize, Serialize};

/// A source that could not be read at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: String,
}

/// Aggregation and formatting counts for one metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSummary {
    #[serde(flatten)]
    pub aggregate: AggregateStats,
    /// Records produced for the metric.
    pub records: usize,
}

/// Everything that happened to one scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeSummary {
    pub scope_id: String,
    /// Set when the scope stopped early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sources: Vec<NormalizeSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_failures: Vec<SourceFailure>,
    /// Incidents that survived normalization.
    pub incidents: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<RegionStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbors: Option<NeighborStats>,
    pub metrics: BTreeMap<MetricType, MetricSummary>,
    pub records: usize,
    /// Metric record upload. Absent on dry runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkSummary>,
    /// POI score writes. Absent on dry runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poi_updates: Option<UploadSummary>,
}

impl ScopeSummary {
    #[must_use]
    pub fn new(scope_id: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
            ..Self::default()
        }
    }

    /// A scope that failed before doing any work.
    #[must_use]
    pub fn failed(scope_id: impl Into<String>, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(scope_id)
        }
    }

    /// Returns `true` when the scope finished without stopping early and
    /// every write succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self.upload.as_ref().is_none_or(UploadSummary::is_complete)
            && self.poi_updates.as_ref().is_none_or(UploadSummary::is_complete)
    }
}

/// Summary of one CLI invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub scopes: Vec<ScopeSummary>,
}

impl RunSummary {
    /// Scope ids that stopped early or had failed writes.
    #[must_use]
    pub fn failed_scopes(&self) -> Vec<&str> {
        self.scopes
            .iter()
            .filter(|s| !s.is_success())
            .map(|s| s.scope_id.as_str())
            .collect()
    }

    /// Pretty JSON for logging.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
