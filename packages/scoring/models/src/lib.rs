#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Metric definitions, per-region aggregates, and the records persisted
//! by the safety metrics pipeline.
//!
//! A [`MetricDefinition`] describes one safety question (e.g. "Can I go
//! outside after dark?"). The aggregator turns incidents into
//! [`RegionMetricAggregate`]s, the formatter turns those into
//! [`MetricRecord`]s, and the POI linker reduces nearby records into a
//! [`ScoreUpdate`] per point of interest.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use safety_metrics_geography_models::RegionId;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Identifier of a safety metric (e.g. `night`, `vehicle`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricType(pub String);

impl MetricType {
    /// Creates a metric type from anything string-like.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MetricType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Set of local hours (0-23) during which an incident counts toward a
/// metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HourFilter(pub BTreeSet<u32>);

impl HourFilter {
    /// Builds a filter covering `start..end` hours, wrapping past midnight
    /// when `end <= start` (e.g. `range(18, 6)` is 18:00 through 05:59).
    #[must_use]
    pub fn range(start: u32, end: u32) -> Self {
        let start = start % 24;
        let end = end % 24;
        let mut hours = BTreeSet::new();
        let mut hour = start;
        loop {
            hours.insert(hour);
            hour = (hour + 1) % 24;
            if hour == end {
                break;
            }
        }
        Self(hours)
    }

    /// Returns `true` when `hour` is in the filter.
    #[must_use]
    pub fn contains(&self, hour: u32) -> bool {
        self.0.contains(&hour)
    }

    /// Returns `true` when the filter names no hours.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Risk bucket derived from a 0-10 score.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Score of 8 or more
    #[strum(to_string = "Very Low")]
    VeryLow,
    /// Score in `[6, 8)`
    #[strum(to_string = "Low")]
    Low,
    /// Score in `[4, 6)`
    #[strum(to_string = "Moderate")]
    Moderate,
    /// Score in `[2, 4)`
    #[strum(to_string = "High")]
    High,
    /// Score below 2
    #[strum(to_string = "Very High")]
    VeryHigh,
}

impl RiskLevel {
    /// Buckets a 0-10 safety score. Higher scores mean lower risk.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Self::VeryLow
        } else if score >= 6.0 {
            Self::Low
        } else if score >= 4.0 {
            Self::Moderate
        } else if score >= 2.0 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    /// Returns all variants of this enum, lowest risk first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::VeryLow,
            Self::Low,
            Self::Moderate,
            Self::High,
            Self::VeryHigh,
        ]
    }

    /// Sentence appended to generated fallback descriptions.
    #[must_use]
    pub const fn advice(self) -> Option<&'static str> {
        match self {
            Self::VeryLow | Self::Low => None,
            Self::Moderate => Some("Exercise reasonable caution."),
            Self::High => Some("Increased awareness is advised."),
            Self::VeryHigh => Some("Take significant precautions."),
        }
    }
}

/// Optional per-risk-level description overrides for a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskTexts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub very_low: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub very_high: Option<String>,
}

impl RiskTexts {
    /// Returns the override text for `level`, if any.
    #[must_use]
    pub fn get(&self, level: RiskLevel) -> Option<&str> {
        match level {
            RiskLevel::VeryLow => self.very_low.as_deref(),
            RiskLevel::Low => self.low.as_deref(),
            RiskLevel::Moderate => self.moderate.as_deref(),
            RiskLevel::High => self.high.as_deref(),
            RiskLevel::VeryHigh => self.very_high.as_deref(),
        }
    }
}

/// Definition of a single safety metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Metric identifier.
    pub id: MetricType,
    /// User-facing question the metric answers.
    pub question: String,
    /// Short noun phrase describing what is measured, used in generated
    /// fallback descriptions.
    pub description: String,
    /// Local hours during which incidents count. `None` counts every hour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<HourFilter>,
    /// Per-risk-level description overrides.
    #[serde(default)]
    pub risk_texts: RiskTexts,
}

/// Per-(region, metric) aggregate produced by the metric aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetricAggregate {
    pub region_id: RegionId,
    pub metric_type: MetricType,
    /// Incidents of this metric located in the region.
    pub direct_incident_count: u64,
    /// Mean latitude of the region's incidents.
    pub latitude: f64,
    /// Mean longitude of the region's incidents.
    pub longitude: f64,
    pub population: u64,
    /// Residents per housing unit (0 when there are no housing units).
    pub density_proxy: f64,
    /// Sum of direct counts over distinct neighbors with incidents for the
    /// same metric.
    pub neighbor_incident_total: u64,
    /// Number of distinct neighbors contributing to the total.
    pub contributing_neighbors: usize,
    pub weighted_incident_count: f64,
    /// Safety score in `[0, 10]`, higher is safer.
    pub score: f64,
    pub incidents_per_1000: f64,
}

/// A persisted per-(scope, region, metric) safety record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Deterministic id derived from `(scope, region, metric_type)`.
    pub id: Uuid,
    pub scope_id: String,
    pub region_id: RegionId,
    pub latitude: f64,
    pub longitude: f64,
    pub metric_type: MetricType,
    pub score: f64,
    pub question: String,
    pub description: String,
    pub direct_incident_count: u64,
    pub weighted_incident_count: f64,
    pub density_proxy: f64,
    pub incidents_per_1000: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Score assignment for one point of interest.
///
/// `overall_score` and `metric_types_found` are either both present (with
/// at least one metric type found) or both absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub poi_id: String,
    pub scope_id: String,
    /// Overall safety in `[0, 100]`.
    pub overall_score: Option<u8>,
    /// Region of the closest metric record that contributed.
    pub inferred_region_id: Option<RegionId>,
    pub metric_types_found: Option<usize>,
}

impl ScoreUpdate {
    /// An update clearing every score field for a POI with no nearby
    /// metrics.
    #[must_use]
    pub fn unscored(poi_id: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            poi_id: poi_id.into(),
            scope_id: scope_id.into(),
            overall_score: None,
            inferred_region_id: None,
            metric_types_found: None,
        }
    }

    /// Returns `true` when the update carries a score.
    #[must_use]
    pub const fn is_scored(&self) -> bool {
        self.overall_score.is_some()
    }
}
