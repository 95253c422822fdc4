//! PostgREST-style implementation of [`MetricStore`].
//!
//! Metric records live in one table keyed by id, points of interest in
//! another. Score updates go through an RPC function so a whole batch is
//! applied in one request and the server reports how many rows changed.

use async_trait::async_trait;
use reqwest::Method;
use safety_metrics_geoindex::retry::{self, RetryPolicy};
use safety_metrics_geoindex::RateLimiter;
use safety_metrics_geography_models::PointOfInterest;
use safety_metrics_scoring_models::{MetricRecord, ScoreUpdate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{MetricStore, StoreError};

fn default_metrics_table() -> String {
    "safety_metrics".to_string()
}

fn default_poi_table() -> String {
    "points_of_interest".to_string()
}

fn default_scope_column() -> String {
    "scope_id".to_string()
}

fn default_apply_scores_fn() -> String {
    "apply_poi_safety_scores".to_string()
}

const fn default_upload_batch_size() -> usize {
    100
}

const fn default_update_batch_size() -> usize {
    500
}

const fn default_page_size() -> usize {
    1000
}

/// `[store]` section of the run config.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// REST base URL. May be supplied through the environment instead.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_metrics_table")]
    pub metrics_table: String,
    #[serde(default = "default_poi_table")]
    pub poi_table: String,
    /// Column of the POI table holding the scope id.
    #[serde(default = "default_scope_column")]
    pub poi_scope_column: String,
    /// RPC function applying a batch of score updates.
    #[serde(default = "default_apply_scores_fn")]
    pub apply_scores_fn: String,
    /// Metric records per upsert request.
    #[serde(default = "default_upload_batch_size")]
    pub upload_batch_size: usize,
    /// Score updates per request.
    #[serde(default = "default_update_batch_size")]
    pub update_batch_size: usize,
    /// Rows per page when loading.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            metrics_table: default_metrics_table(),
            poi_table: default_poi_table(),
            poi_scope_column: default_scope_column(),
            apply_scores_fn: default_apply_scores_fn(),
            upload_batch_size: default_upload_batch_size(),
            update_batch_size: default_update_batch_size(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Serialize)]
struct ApplyScoresRequest<'a> {
    updates: &'a [ScoreUpdate],
}

/// [`MetricStore`] backed by a PostgREST-style API.
pub struct RestMetricStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    config: StoreConfig,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl RestMetricStore {
    /// Creates a client for the store described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if no base URL is configured, or
    /// [`StoreError::Client`] if the HTTP client cannot be built.
    pub fn new(
        config: &StoreConfig,
        api_key: Option<String>,
        retry: RetryPolicy,
        limiter: RateLimiter,
    ) -> Result<Self, StoreError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(StoreError::Config {
                message: "store.base_url is not set".to_string(),
            });
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
            config: config.clone(),
            retry,
            limiter,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.base_url)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rpc/{function}", self.base_url)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder
                .header("apikey", key)
                .header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    /// Reads every row matching `filters`, one page at a time.
    async fn load_paged<T: DeserializeOwned>(
        &self,
        table: &str,
        select: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let url = self.table_url(table);
        let page_size = self.config.page_size.max(1);
        let mut rows = Vec::new();
        loop {
            let offset = rows.len().to_string();
            let limit = page_size.to_string();
            self.limiter.wait().await;
            let page: Vec<T> = retry::send_json(&self.retry, || {
                self.request(Method::GET, &url)
                    .query(&[("select", select)])
                    .query(filters)
                    .query(&[("offset", offset.as_str()), ("limit", limit.as_str())])
            })
            .await?;
            let fetched = page.len();
            rows.extend(page);
            log::debug!("{table}: fetched {fetched} rows (total {})", rows.len());
            if fetched < page_size {
                break;
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl MetricStore for RestMetricStore {
    async fn delete_scope(&self, scope_id: &str) -> Result<(), StoreError> {
        let url = self.table_url(&self.config.metrics_table);
        let filter = format!("eq.{scope_id}");
        self.limiter.wait().await;
        retry::send(&self.retry, || {
            self.request(Method::DELETE, &url)
                .query(&[("scope_id", filter.as_str())])
        })
        .await?;
        Ok(())
    }

    async fn upsert_metric_records(&self, records: &[MetricRecord]) -> Result<u64, StoreError> {
        let url = self.table_url(&self.config.metrics_table);
        self.limiter.wait().await;
        let written: Vec<serde_json::Value> = retry::send_json(&self.retry, || {
            self.request(Method::POST, &url)
                .query(&[("select", "id")])
                .header(
                    "Prefer",
                    "resolution=merge-duplicates,return=representation",
                )
                .json(records)
        })
        .await?;
        Ok(written.len() as u64)
    }

    async fn apply_score_updates(&self, updates: &[ScoreUpdate]) -> Result<u64, StoreError> {
        let url = self.rpc_url(&self.config.apply_scores_fn);
        let body = ApplyScoresRequest { updates };
        self.limiter.wait().await;
        let updated: Option<u64> =
            retry::send_json(&self.retry, || self.request(Method::POST, &url).json(&body)).await?;
        Ok(updated.unwrap_or_default())
    }

    async fn load_metric_records(&self, scope_id: &str) -> Result<Vec<MetricRecord>, StoreError> {
        let records: Vec<MetricRecord> = self
            .load_paged(
                &self.config.metrics_table,
                "*",
                &[("scope_id", format!("eq.{scope_id}"))],
            )
            .await?;
        log::info!(
            "Loaded {} metric records for scope '{scope_id}'",
            records.len()
        );
        Ok(records)
    }

    async fn load_points_of_interest(
        &self,
        scope_id: &str,
    ) -> Result<Vec<PointOfInterest>, StoreError> {
        let pois: Vec<PointOfInterest> = self
            .load_paged(
                &self.config.poi_table,
                "id,latitude,longitude",
                &[
                    (
                        self.config.poi_scope_column.as_str(),
                        format!("eq.{scope_id}"),
                    ),
                    ("latitude", "not.is.null".to_string()),
                    ("longitude", "not.is.null".to_string()),
                ],
            )
            .await?;
        log::info!(
            "Loaded {} points of interest for scope '{scope_id}'",
            pois.len()
        );
        Ok(pois)
    }
}
