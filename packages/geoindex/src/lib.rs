#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Clients for the external geospatial index.
//!
//! The index owns point-in-polygon matching and radius adjacency. This
//! crate wraps it behind the [`GeoIndex`] trait and layers batching,
//! bounded concurrency, caching, retry, and rate limiting on top:
//!
//! * [`regions::resolve_regions`] maps incident coordinates to regions.
//! * [`neighbors::resolve_neighbors`] finds adjacent regions for the set
//!   of regions that have incidents.

pub mod cache;
pub mod http;
pub mod neighbors;
pub mod rate_limit;
pub mod regions;
pub mod retry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use safety_metrics_geography_models::{LatLng, Region, RegionId};

pub use cache::RegionCache;
pub use http::{GeoIndexConfig, HttpGeoIndex};
pub use rate_limit::RateLimiter;
pub use retry::{RequestError, RetryPolicy};

/// Errors from a single geospatial index call.
#[derive(Debug, thiserror::Error)]
pub enum GeoIndexError {
    /// Client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The request failed after retries.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Response returned a different number of results than requested.
    #[error("Response length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Number of inputs sent.
        expected: usize,
        /// Number of results received.
        actual: usize,
    },

    /// The index is not configured.
    #[error("Geospatial index misconfigured: {message}")]
    Config {
        /// Description of what is missing.
        message: String,
    },
}

/// A geospatial index capable of matching points to regions and finding
/// nearby regions.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    /// Matches each point to the region containing it.
    ///
    /// The result has one entry per input point, in input order. `None`
    /// means no region contains the point.
    ///
    /// # Errors
    ///
    /// Returns [`GeoIndexError`] if the lookup fails.
    async fn match_points(&self, points: &[LatLng]) -> Result<Vec<Option<Region>>, GeoIndexError>;

    /// Returns the regions within `radius_m` meters of each requested
    /// region.
    ///
    /// # Errors
    ///
    /// Returns [`GeoIndexError`] if the lookup fails.
    async fn find_neighbors(
        &self,
        region_ids: &[RegionId],
        radius_m: f64,
    ) -> Result<BTreeMap<RegionId, Vec<RegionId>>, GeoIndexError>;
}
