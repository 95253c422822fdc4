//! REST implementation of [`GeoIndex`].
//!
//! Talks to a PostgREST-style RPC endpoint: each lookup is a JSON `POST`
//! to `{base_url}/rpc/{function}`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use safety_metrics_geography_models::{LatLng, Region, RegionId};
use serde::{Deserialize, Serialize};

use crate::neighbors::NeighborOptions;
use crate::rate_limit::RateLimiter;
use crate::regions::ResolveOptions;
use crate::retry::{self, RetryPolicy};
use crate::{GeoIndex, GeoIndexError};

const fn default_region_chunk_size() -> usize {
    20_000
}

const fn default_concurrency() -> usize {
    5
}

const fn default_neighbor_chunk_size() -> usize {
    30
}

fn default_match_points_fn() -> String {
    "match_points_to_block_groups".to_string()
}

fn default_neighbors_fn() -> String {
    "find_block_neighbors_batch".to_string()
}

/// `[geo_index]` section of the run config.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoIndexConfig {
    /// REST base URL. May be supplied through the environment instead.
    #[serde(default)]
    pub base_url: String,
    /// RPC function matching points to regions.
    #[serde(default = "default_match_points_fn")]
    pub match_points_fn: String,
    /// RPC function returning neighbors for a batch of regions.
    #[serde(default = "default_neighbors_fn")]
    pub neighbors_fn: String,
    /// Points per region lookup request.
    #[serde(default = "default_region_chunk_size")]
    pub region_chunk_size: usize,
    /// Region lookup requests in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Region ids per neighbor lookup request.
    #[serde(default = "default_neighbor_chunk_size")]
    pub neighbor_chunk_size: usize,
}

impl Default for GeoIndexConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            match_points_fn: default_match_points_fn(),
            neighbors_fn: default_neighbors_fn(),
            region_chunk_size: default_region_chunk_size(),
            concurrency: default_concurrency(),
            neighbor_chunk_size: default_neighbor_chunk_size(),
        }
    }
}

impl GeoIndexConfig {
    /// Batching options for region resolution.
    #[must_use]
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            chunk_size: self.region_chunk_size.max(1),
            concurrency: self.concurrency.max(1),
        }
    }

    /// Batching options for neighbor resolution.
    #[must_use]
    pub fn neighbor_options(&self) -> NeighborOptions {
        NeighborOptions {
            chunk_size: self.neighbor_chunk_size.max(1),
        }
    }
}

#[derive(Serialize)]
struct MatchPointsRequest<'a> {
    points_json: &'a [LatLng],
}

#[derive(Serialize)]
struct FindNeighborsRequest<'a> {
    target_block_ids: &'a [RegionId],
    radius_meters: f64,
}

/// [`GeoIndex`] backed by a REST RPC API.
pub struct HttpGeoIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    match_points_fn: String,
    neighbors_fn: String,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl HttpGeoIndex {
    /// Creates a client for the index described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`GeoIndexError::Config`] if no base URL is configured, or
    /// [`GeoIndexError::Client`] if the HTTP client cannot be built.
    pub fn new(
        config: &GeoIndexConfig,
        api_key: Option<String>,
        retry: RetryPolicy,
        limiter: RateLimiter,
    ) -> Result<Self, GeoIndexError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(GeoIndexError::Config {
                message: "geo_index.base_url is not set".to_string(),
            });
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
            match_points_fn: config.match_points_fn.clone(),
            neighbors_fn: config.neighbors_fn.clone(),
            retry,
            limiter,
        })
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rpc/{function}", self.base_url)
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        match &self.api_key {
            Some(key) => builder
                .header("apikey", key)
                .header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }
}

#[async_trait]
impl GeoIndex for HttpGeoIndex {
    async fn match_points(&self, points: &[LatLng]) -> Result<Vec<Option<Region>>, GeoIndexError> {
        let url = self.rpc_url(&self.match_points_fn);
        let body = MatchPointsRequest {
            points_json: points,
        };
        self.limiter.wait().await;
        let regions: Vec<Option<Region>> =
            retry::send_json(&self.retry, || self.post(&url).json(&body)).await?;
        log::debug!(
            "{}: {} points -> {} matched",
            self.match_points_fn,
            points.len(),
            regions.iter().filter(|r| r.is_some()).count()
        );
        Ok(regions)
    }

    async fn find_neighbors(
        &self,
        region_ids: &[RegionId],
        radius_m: f64,
    ) -> Result<BTreeMap<RegionId, Vec<RegionId>>, GeoIndexError> {
        let url = self.rpc_url(&self.neighbors_fn);
        let body = FindNeighborsRequest {
            target_block_ids: region_ids,
            radius_meters: radius_m,
        };
        self.limiter.wait().await;
        let neighbors: Option<BTreeMap<RegionId, Option<Vec<RegionId>>>> =
            retry::send_json(&self.retry, || self.post(&url).json(&body)).await?;
        Ok(neighbors
            .unwrap_or_default()
            .into_iter()
            .map(|(id, list)| (id, list.unwrap_or_default()))
            .collect())
    }
}
