//! Run configuration.
//!
//! A single TOML file describes the external services, the scoring
//! constants, and every scope with its incident sources and per-metric
//! category codes. Service URLs and the API key can also come from the
//! environment so the file can be committed without secrets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use safety_metrics_geoindex::{GeoIndexConfig, RateLimiter, RetryPolicy};
use safety_metrics_scoring::{ScoringError, ScoringParams, registry};
use safety_metrics_scoring_models::{MetricDefinition, MetricType};
use safety_metrics_source::SourceError;
use safety_metrics_source::source_def::SourceDefinition;
use safety_metrics_spatial::{LinkOptions, LinkOptionsError};
use safety_metrics_store::StoreConfig;
use serde::Deserialize;

/// Overrides `geo_index.base_url`.
pub const GEO_INDEX_URL_ENV: &str = "SAFETY_METRICS_GEO_INDEX_URL";
/// Overrides `store.base_url`.
pub const STORE_URL_ENV: &str = "SAFETY_METRICS_STORE_URL";
/// API key sent to both services.
pub const API_KEY_ENV: &str = "SAFETY_METRICS_API_KEY";
/// Comma-separated scope filter used when none is given on the command
/// line.
pub const SCOPES_ENV: &str = "SAFETY_METRICS_SCOPES";

/// Errors that can occur while loading or checking the run config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid TOML for a run config.
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Metric definitions or scoring parameters are invalid.
    #[error(transparent)]
    Scoring(#[from] ScoringError),

    /// A source definition is invalid.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The `[linker]` section is unusable.
    #[error(transparent)]
    Linker(#[from] LinkOptionsError),

    /// Two scopes share an id.
    #[error("Duplicate scope '{scope_id}'")]
    DuplicateScope { scope_id: String },

    /// A scope was requested that is not configured.
    #[error("Unknown scope '{scope_id}'")]
    UnknownScope { scope_id: String },

    /// A scope has no category codes for a metric.
    #[error("Scope '{scope_id}' has no category codes for metric '{metric}'")]
    MissingCodes { scope_id: String, metric: MetricType },

    /// A scope has no incident sources.
    #[error("Scope '{scope_id}' has no sources")]
    NoSources { scope_id: String },

    /// A source does not say where its records are.
    #[error("Source '{source_id}' in scope '{scope_id}' has no records_path")]
    MissingRecordsPath { scope_id: String, source_id: String },
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_base_backoff_secs() -> f64 {
    2.0
}

const fn default_timeout_secs() -> u64 {
    60
}

const fn default_min_interval_ms() -> u64 {
    100
}

/// `[retry]` section: retry schedule and pacing shared by all clients.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further retry.
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum delay between calls to the same service.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_secs: default_base_backoff_secs(),
            timeout_secs: default_timeout_secs(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff: Duration::try_from_secs_f64(self.base_backoff_secs)
                .unwrap_or(Duration::ZERO),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    /// A fresh limiter. Each client gets its own.
    #[must_use]
    pub const fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(Duration::from_millis(self.min_interval_ms))
    }
}

const fn default_neighbor_radius_m() -> f64 {
    400.0
}

/// One `[[scopes]]` entry: an area processed as a unit.
#[derive(Debug, Clone, Deserialize)]
pub struct ScopeConfig {
    /// Scope identifier written to every record.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Radius for neighbor lookups, in meters.
    #[serde(default = "default_neighbor_radius_m")]
    pub neighbor_radius_m: f64,
    /// Category codes counted toward each metric, keyed by metric id.
    #[serde(default)]
    pub codes: BTreeMap<MetricType, Vec<String>>,
    #[serde(default)]
    pub sources: Vec<SourceDefinition>,
}

impl ScopeConfig {
    /// Returns the human-readable name, falling back to the id.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Trimmed, non-empty category codes for `metric`.
    #[must_use]
    pub fn codes_for(&self, metric: &MetricType) -> BTreeSet<String> {
        self.codes
            .get(metric)
            .into_iter()
            .flatten()
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .collect()
    }

    /// Checks that the scope can be run with `metrics`.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: no sources, an invalid source, a
    /// source without a records path, or a metric without codes.
    pub fn validate(&self, metrics: &[MetricDefinition]) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources {
                scope_id: self.id.clone(),
            });
        }
        for source in &self.sources {
            source.validate()?;
            if source.records_path.is_none() {
                return Err(ConfigError::MissingRecordsPath {
                    scope_id: self.id.clone(),
                    source_id: source.id.clone(),
                });
            }
        }
        for metric in metrics {
            if self.codes_for(&metric.id).is_empty() {
                return Err(ConfigError::MissingCodes {
                    scope_id: self.id.clone(),
                    metric: metric.id.clone(),
                });
            }
        }
        for metric in self.codes.keys() {
            if registry::find(metrics, metric).is_none() {
                log::warn!(
                    "Scope '{}' lists codes for unknown metric '{metric}'",
                    self.id
                );
            }
        }
        Ok(())
    }
}

/// The whole run config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub scoring: ScoringParams,
    #[serde(default)]
    pub geo_index: GeoIndexConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub linker: LinkOptions,
    /// Replaces the built-in metric definitions when non-empty.
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,
    /// Directory relative source paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// API key for both services.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl RunConfig {
    /// Reads a config file and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or
    /// fails [`RunConfig::check`].
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut config = Self::from_toml_str(&contents, base_dir)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        log::info!(
            "Loaded config {} ({} scopes)",
            path.display(),
            config.scopes.len()
        );
        Ok(config)
    }

    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is invalid or fails
    /// [`RunConfig::check`].
    pub fn from_toml_str(contents: &str, base_dir: PathBuf) -> Result<Self, ConfigError> {
        let mut config: Self = toml::de::from_str(contents)?;
        config.base_dir = base_dir;
        config.check()?;
        Ok(config)
    }

    /// Run-wide checks: scoring and linker parameters, unique scope ids.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on the first problem found.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;
        self.linker.validate()?;
        let mut seen = BTreeSet::new();
        for scope in &self.scopes {
            if !seen.insert(scope.id.as_str()) {
                return Err(ConfigError::DuplicateScope {
                    scope_id: scope.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Applies service URL and API key overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(GEO_INDEX_URL_ENV).filter(|v| !v.is_empty()) {
            log::debug!("geo_index.base_url overridden by {GEO_INDEX_URL_ENV}");
            self.geo_index.base_url = url;
        }
        if let Some(url) = lookup(STORE_URL_ENV).filter(|v| !v.is_empty()) {
            log::debug!("store.base_url overridden by {STORE_URL_ENV}");
            self.store.base_url = url;
        }
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.api_key = Some(key);
        }
    }

    /// Configured metric definitions, or the built-in set when the config
    /// defines none.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Scoring`] if the built-in definitions fail to
    /// load or two definitions share an id.
    pub fn metric_definitions(&self) -> Result<Vec<MetricDefinition>, ConfigError> {
        if self.metrics.is_empty() {
            return Ok(registry::all_metrics()?);
        }
        registry::ensure_unique(&self.metrics)?;
        Ok(self.metrics.clone())
    }

    /// Splits `filter` (or the scope env var when `None`) into configured
    /// scopes and unknown ids. No filter selects every scope.
    #[must_use]
    pub fn select_scopes(&self, filter: Option<String>) -> (Vec<&ScopeConfig>, Vec<String>) {
        self.select_scopes_with(filter, |key| std::env::var(key).ok())
    }

    fn select_scopes_with(
        &self,
        filter: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> (Vec<&ScopeConfig>, Vec<String>) {
        let Some(filter) = filter.or_else(|| lookup(SCOPES_ENV)) else {
            return (self.scopes.iter().collect(), Vec::new());
        };

        let mut selected = Vec::new();
        let mut unknown = Vec::new();
        for id in filter.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match self.scopes.iter().find(|s| s.id == id) {
                Some(scope) => {
                    if !selected.iter().any(|s: &&ScopeConfig| s.id == id) {
                        selected.push(scope);
                    }
                }
                None => unknown.push(id.to_string()),
            }
        }
        if !unknown.is_empty() {
            log::warn!(
                "Unknown scopes {unknown:?}. Available: {}",
                self.scopes
                    .iter()
                    .map(|s| s.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        (selected, unknown)
    }

    /// Absolute location of a source's records.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRecordsPath`] if the source has none.
    pub fn records_path(
        &self,
        scope: &ScopeConfig,
        source: &SourceDefinition,
    ) -> Result<PathBuf, ConfigError> {
        let path = source
            .records_path
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRecordsPath {
                scope_id: scope.id.clone(),
                source_id: source.id.clone(),
            })?;
        Ok(if path.is_absolute() {
            path.clone()
        } else {
            self.base_dir.join(path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = include_str!("../config/example.toml");

    fn example() -> RunConfig {
        RunConfig::from_toml_str(EXAMPLE, PathBuf::from("/etc/safety")).unwrap()
    }

    #[test]
    fn example_config_parses() {
        let config = example();
        assert_eq!(config.scopes.len(), 1);
        let scope = &config.scopes[0];
        assert_eq!(scope.id, "los_angeles");
        assert!((scope.neighbor_radius_m - 400.0).abs() < f64::EPSILON);
        assert_eq!(scope.sources.len(), 1);
        assert!((config.scoring.decay_k - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.linker.k_nearest, 50);
    }

    #[test]
    fn example_scope_covers_every_builtin_metric() {
        let config = example();
        let metrics = config.metric_definitions().unwrap();
        assert_eq!(metrics.len(), 6);
        config.scopes[0].validate(&metrics).unwrap();
    }

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = RunConfig::from_toml_str("", PathBuf::new()).unwrap();
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert_eq!(config.store.upload_batch_size, 100);
        assert_eq!(config.store.update_batch_size, 500);
        assert_eq!(config.geo_index.region_chunk_size, 20_000);
        assert!((config.linker.max_distance_km - 4.0).abs() < f64::EPSILON);
        assert_eq!(config.scoring.expiry_days, 90);
        assert!(config.scopes.is_empty());
    }

    #[test]
    fn missing_codes_fail_the_scope() {
        let mut config = example();
        let metrics = config.metric_definitions().unwrap();
        config.scopes[0].codes.remove(&MetricType::new("vehicle"));
        assert!(matches!(
            config.scopes[0].validate(&metrics),
            Err(ConfigError::MissingCodes { metric, .. }) if metric.as_str() == "vehicle"
        ));
    }

    #[test]
    fn blank_codes_do_not_count() {
        let mut config = example();
        config.scopes[0]
            .codes
            .insert(MetricType::new("night"), vec![" ".to_string(), " 210 ".to_string()]);
        let codes = config.scopes[0].codes_for(&MetricType::new("night"));
        assert_eq!(codes, BTreeSet::from(["210".to_string()]));
    }

    #[test]
    fn rejects_duplicate_scopes() {
        let toml = r#"
[[scopes]]
id = "a"

[[scopes]]
id = "a"
"#;
        assert!(matches!(
            RunConfig::from_toml_str(toml, PathBuf::new()),
            Err(ConfigError::DuplicateScope { scope_id }) if scope_id == "a"
        ));
    }

    #[test]
    fn rejects_invalid_scoring_params() {
        let toml = "[scoring]\ndecay_k = -1.0\n";
        assert!(matches!(
            RunConfig::from_toml_str(toml, PathBuf::new()),
            Err(ConfigError::Scoring(ScoringError::Params { .. }))
        ));
    }

    #[test]
    fn custom_metrics_replace_builtins() {
        let toml = r#"
[[metrics]]
id = "late_night"
question = "Is it safe after midnight?"
description = "late night safety"
hours = [0, 1, 2, 3]
"#;
        let config = RunConfig::from_toml_str(toml, PathBuf::new()).unwrap();
        let metrics = config.metric_definitions().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].id.as_str(), "late_night");
    }

    #[test]
    fn env_overrides_urls_and_key() {
        let mut config = example();
        config.apply_overrides(|key| match key {
            GEO_INDEX_URL_ENV => Some("https://geo.test".to_string()),
            API_KEY_ENV => Some("secret".to_string()),
            STORE_URL_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.geo_index.base_url, "https://geo.test");
        assert_eq!(config.store.base_url, "https://db.example.com/rest/v1");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn scope_filter_reports_unknown_ids() {
        let config = example();
        let (selected, unknown) =
            config.select_scopes_with(Some("los_angeles, nowhere".to_string()), |_| None);
        assert_eq!(selected.len(), 1);
        assert_eq!(unknown, vec!["nowhere".to_string()]);

        let (all, none) = config.select_scopes_with(None, |_| None);
        assert_eq!(all.len(), 1);
        assert!(none.is_empty());

        let (from_env, _) =
            config.select_scopes_with(None, |_| Some("nowhere".to_string()));
        assert!(from_env.is_empty());
    }

    #[test]
    fn rejects_unusable_linker_settings() {
        for linker in ["max_distance_km = nan", "max_distance_km = -2.0", "k_nearest = 0"] {
            let toml = format!("[linker]\n{linker}\n");
            let err = RunConfig::from_toml_str(&toml, PathBuf::new()).unwrap_err();
            assert!(matches!(err, ConfigError::Linker(_)), "{linker}: {err}");
        }
    }

    #[test]
    fn relative_records_paths_resolve_against_config_dir() {
        let config = example();
        let scope = &config.scopes[0];
        let path = config.records_path(scope, &scope.sources[0]).unwrap();
        assert_eq!(path, PathBuf::from("/etc/safety/data/lapd.json"));
    }
}
