//! Per-scope orchestration.
//!
//! A scope runs through normalize, resolve regions, resolve neighbors,
//! aggregate and format per metric, upload, and finally POI linking.
//! Failures degrade the affected stage and are recorded in the
//! [`ScopeSummary`]; only [`PipelineError::NoMetricDefinitions`] stops a
//! whole run.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use safety_metrics_geoindex::neighbors::resolve_neighbors;
use safety_metrics_geoindex::regions::resolve_regions;
use safety_metrics_geoindex::{GeoIndex, RegionCache};
use safety_metrics_geography_models::{LatLng, Region, RegionId};
use safety_metrics_incident_models::CanonicalIncident;
use safety_metrics_scoring::aggregate::{active_regions, aggregate_metric};
use safety_metrics_scoring::format::format_records;
use safety_metrics_scoring_models::{MetricDefinition, MetricRecord};
use safety_metrics_source::normalize::normalize_records;
use safety_metrics_source::progress::{ProgressCallback, null_progress};
use safety_metrics_source::reader::load_records;
use safety_metrics_spatial::{MetricIndex, link_points};
use safety_metrics_store::{MetricStore, StoreError, apply_score_updates, replace_scope};

use crate::config::{ConfigError, RunConfig, ScopeConfig};
use crate::summary::{MetricSummary, RunSummary, ScopeSummary, SourceFailure};

/// Errors that stop a scope or a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Nothing to compute. Stops the whole run.
    #[error("No metric definitions available")]
    NoMetricDefinitions,

    /// Every source of a scope was unreadable or produced no usable
    /// incidents.
    #[error("Scope '{scope_id}' has no valid incidents")]
    NoValidIncidents { scope_id: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates one progress reporter per pipeline stage.
pub trait StageProgress: Send + Sync {
    fn stage(&self, label: &str) -> Arc<dyn ProgressCallback>;

    /// Reporter for a counter whose total is known up front.
    fn steps(&self, label: &str) -> Arc<dyn ProgressCallback> {
        self.stage(label)
    }
}

/// Discards all progress.
pub struct NoProgress;

impl StageProgress for NoProgress {
    fn stage(&self, _label: &str) -> Arc<dyn ProgressCallback> {
        null_progress()
    }
}

/// Shared state for one invocation.
pub struct Pipeline<'a> {
    config: &'a RunConfig,
    metrics: Vec<MetricDefinition>,
    store: Option<&'a dyn MetricStore>,
    progress: &'a dyn StageProgress,
    dry_run: bool,
}

impl<'a> Pipeline<'a> {
    /// Prepares a run. Without a store nothing is written and POIs are not
    /// linked.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoMetricDefinitions`] if there is nothing
    /// to compute, or [`PipelineError::Config`] if the metric definitions
    /// are invalid.
    pub fn new(
        config: &'a RunConfig,
        store: Option<&'a dyn MetricStore>,
        progress: &'a dyn StageProgress,
        dry_run: bool,
    ) -> Result<Self, PipelineError> {
        let metrics = config.metric_definitions()?;
        if metrics.is_empty() {
            return Err(PipelineError::NoMetricDefinitions);
        }
        log::info!(
            "{} metric definitions: {}",
            metrics.len(),
            metrics
                .iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if dry_run {
            log::info!("Dry run: nothing will be written");
        }
        Ok(Self {
            config,
            metrics,
            store,
            progress,
            dry_run,
        })
    }

    #[must_use]
    pub fn metrics(&self) -> &[MetricDefinition] {
        &self.metrics
    }

    /// Runs every selected scope end to end.
    pub async fn run(&self, index: &dyn GeoIndex, scope_filter: Option<String>) -> RunSummary {
        let started_at = Utc::now();
        let (scopes, unknown) = self.config.select_scopes(scope_filter);
        let mut cache = RegionCache::new();
        let mut summaries = unknown_scope_summaries(unknown);

        let steps = self.progress.steps("Scopes");
        steps.set_total(scopes.len() as u64);
        for scope in scopes {
            steps.set_message(format!("Scope {}", scope.name()));
            summaries.push(self.run_scope(index, scope, &mut cache).await);
            steps.inc(1);
        }
        steps.finish("All scopes processed".to_string());

        self.finish(started_at, summaries)
    }

    /// Recomputes POI scores from the metric records already stored.
    pub async fn relink(&self, scope_filter: Option<String>) -> RunSummary {
        let started_at = Utc::now();
        let (scopes, unknown) = self.config.select_scopes(scope_filter);
        let mut summaries = unknown_scope_summaries(unknown);

        for scope in scopes {
            let mut summary = ScopeSummary::new(&scope.id);
            let Some(store) = self.store else {
                summary.error = Some("no store configured".to_string());
                summaries.push(summary);
                continue;
            };
            match store.load_metric_records(&scope.id).await {
                Ok(records) => {
                    summary.records = records.len();
                    self.link_scope(&scope.id, records, &mut summary).await;
                }
                Err(e) => {
                    log::error!("[{}] Failed to load metric records: {e}", scope.id);
                    summary.error = Some(e.to_string());
                }
            }
            summaries.push(summary);
        }

        self.finish(started_at, summaries)
    }

    /// Runs one scope. Never fails: problems are recorded in the summary.
    pub async fn run_scope(
        &self,
        index: &dyn GeoIndex,
        scope: &ScopeConfig,
        cache: &mut RegionCache,
    ) -> ScopeSummary {
        log::info!("[{}] Processing scope {}", scope.id, scope.name());
        let mut summary = ScopeSummary::new(&scope.id);
        match self.compute_scope(index, scope, cache, &mut summary).await {
            Ok(records) => {
                self.persist(&scope.id, &records, &mut summary).await;
                self.link_scope(&scope.id, records, &mut summary).await;
            }
            Err(e) => {
                log::error!("[{}] {e}", scope.id);
                summary.error = Some(e.to_string());
            }
        }
        summary
    }

    async fn compute_scope(
        &self,
        index: &dyn GeoIndex,
        scope: &ScopeConfig,
        cache: &mut RegionCache,
        summary: &mut ScopeSummary,
    ) -> Result<Vec<MetricRecord>, PipelineError> {
        scope.validate(&self.metrics)?;

        let incidents = self.load_incidents(scope, summary).await;
        summary.incidents = incidents.len();
        if incidents.is_empty() {
            return Err(PipelineError::NoValidIncidents {
                scope_id: scope.id.clone(),
            });
        }

        // ── Regions ──────────────────────────────────────────────────
        let points: Vec<LatLng> = incidents.iter().map(CanonicalIncident::location).collect();
        let bar = self.progress.stage(&format!("[{}] Matching regions", scope.id));
        let resolution = resolve_regions(
            index,
            &points,
            cache,
            &self.config.geo_index.resolve_options(),
            bar.as_ref(),
        )
        .await;
        summary.regions = Some(resolution.stats);
        let regions = resolution.regions;

        // ── Neighbors ────────────────────────────────────────────────
        let active = active_regions(&regions);
        let bar = self.progress.stage(&format!("[{}] Finding neighbors", scope.id));
        let neighbors = resolve_neighbors(
            index,
            &active,
            scope.neighbor_radius_m,
            &self.config.geo_index.neighbor_options(),
            bar.as_ref(),
        )
        .await;
        summary.neighbors = Some(neighbors.stats);

        Ok(self.score_metrics(scope, &incidents, &regions, &neighbors.neighbors, summary))
    }

    async fn load_incidents(
        &self,
        scope: &ScopeConfig,
        summary: &mut ScopeSummary,
    ) -> Vec<CanonicalIncident> {
        let mut incidents = Vec::new();
        for source in &scope.sources {
            let loaded = async {
                let path = self.config.records_path(scope, source)?;
                log::info!("[{}] Reading {}", source.id, path.display());
                let records = load_records(&path).await?;
                let bar = self
                    .progress
                    .stage(&format!("[{}] Normalizing {}", scope.id, source.name()));
                Ok::<_, ConfigError>(normalize_records(source, &records, bar.as_ref())?)
            }
            .await;

            match loaded {
                Ok((mut normalized, source_summary)) => {
                    incidents.append(&mut normalized);
                    summary.sources.push(source_summary);
                }
                Err(e) => {
                    log::error!("[{}] Skipping source '{}': {e}", scope.id, source.id);
                    summary.source_failures.push(SourceFailure {
                        source_id: source.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        incidents
    }

    /// Aggregates and formats every metric for a scope.
    fn score_metrics(
        &self,
        scope: &ScopeConfig,
        incidents: &[CanonicalIncident],
        regions: &[Option<Region>],
        neighbors: &BTreeMap<RegionId, Vec<RegionId>>,
        summary: &mut ScopeSummary,
    ) -> Vec<MetricRecord> {
        let created_at = Utc::now();
        let params = &self.config.scoring;
        let mut records = Vec::new();

        for definition in &self.metrics {
            let codes = scope.codes_for(&definition.id);
            let aggregation =
                aggregate_metric(definition, &codes, incidents, regions, neighbors, params);
            let formatted = format_records(
                &scope.id,
                definition,
                &aggregation.aggregates,
                params,
                created_at,
            );
            summary.metrics.insert(
                definition.id.clone(),
                MetricSummary {
                    aggregate: aggregation.stats,
                    records: formatted.len(),
                },
            );
            records.extend(formatted);
        }

        summary.records = records.len();
        log::info!(
            "[{}] {} metric records across {} metrics",
            scope.id,
            records.len(),
            self.metrics.len()
        );
        records
    }

    async fn persist(&self, scope_id: &str, records: &[MetricRecord], summary: &mut ScopeSummary) {
        if self.dry_run {
            log::info!(
                "[{scope_id}] Dry run: would replace scope with {} metric records",
                records.len()
            );
            return;
        }
        let Some(store) = self.store else {
            log::warn!("[{scope_id}] No store configured, metric records not uploaded");
            return;
        };
        let bar = self.progress.stage(&format!("[{scope_id}] Uploading metrics"));
        summary.upload = Some(
            replace_scope(
                store,
                scope_id,
                records,
                self.config.store.upload_batch_size,
                bar.as_ref(),
            )
            .await,
        );
    }

    /// Links the scope's POIs to `records` and writes the scores.
    async fn link_scope(
        &self,
        scope_id: &str,
        records: Vec<MetricRecord>,
        summary: &mut ScopeSummary,
    ) {
        let Some(store) = self.store else {
            log::warn!("[{scope_id}] No store configured, skipping POI linking");
            return;
        };
        let pois = match store.load_points_of_interest(scope_id).await {
            Ok(pois) => pois,
            Err(e) => {
                log::error!("[{scope_id}] Failed to load points of interest: {e}");
                summary.error = Some(e.to_string());
                return;
            }
        };
        if pois.is_empty() {
            log::info!("[{scope_id}] No points of interest to link");
            return;
        }

        let index = MetricIndex::new(records);
        let bar = self.progress.stage(&format!("[{scope_id}] Linking POIs"));
        let (updates, link_summary) =
            link_points(&index, &pois, scope_id, &self.config.linker, bar.as_ref());
        summary.link = Some(link_summary);

        if self.dry_run {
            log::info!(
                "[{scope_id}] Dry run: would apply {} POI score updates",
                updates.len()
            );
            return;
        }
        let bar = self.progress.stage(&format!("[{scope_id}] Updating POIs"));
        summary.poi_updates = Some(
            apply_score_updates(
                store,
                &updates,
                self.config.store.update_batch_size,
                bar.as_ref(),
            )
            .await,
        );
    }

    fn finish(
        &self,
        started_at: chrono::DateTime<Utc>,
        scopes: Vec<ScopeSummary>,
    ) -> RunSummary {
        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            dry_run: self.dry_run,
            scopes,
        };
        let failed = summary.failed_scopes();
        if failed.is_empty() {
            log::info!("{} scopes completed", summary.scopes.len());
        } else {
            log::warn!(
                "{} of {} scopes had problems: {}",
                failed.len(),
                summary.scopes.len(),
                failed.join(", ")
            );
        }
        summary
    }
}

fn unknown_scope_summaries(unknown: Vec<String>) -> Vec<ScopeSummary> {
    unknown
        .into_iter()
        .map(|scope_id| {
            let error = ConfigError::UnknownScope {
                scope_id: scope_id.clone(),
            };
            ScopeSummary::failed(scope_id, error)
        })
        .collect()
}
