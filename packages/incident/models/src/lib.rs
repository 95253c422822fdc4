#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical incident format.
//!
//! Every source is normalized into [`CanonicalIncident`] before any
//! region resolution or scoring happens.

use chrono::{DateTime, Utc};
use safety_metrics_geography_models::LatLng;
use serde::{Deserialize, Serialize};

/// A single incident after source-specific normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalIncident {
    /// Identifier of the source definition the incident came from.
    pub source_id: String,
    /// Source-specific category code, trimmed.
    pub category_code: String,
    /// When the incident occurred, in UTC.
    pub occurred_at: DateTime<Utc>,
    /// Hour of day (0-23) in the source's local time. `None` when the
    /// source did not report a usable time.
    pub hour: Option<u32>,
    /// Hour-of-day predicates are not applied to this incident.
    #[serde(default)]
    pub hour_filter_exempt: bool,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
}

impl CanonicalIncident {
    /// Returns the incident location.
    #[must_use]
    pub const fn location(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// Evaluates an hour predicate against this incident.
    ///
    /// Exempt incidents always pass. Incidents without a known hour never
    /// pass a predicate.
    pub fn passes_hour_filter(&self, predicate: impl Fn(u32) -> bool) -> bool {
        if self.hour_filter_exempt {
            return true;
        }
        self.hour.is_some_and(predicate)
    }
}
