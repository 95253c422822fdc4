#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! End-to-end safety metrics pipeline.
//!
//! [`config::RunConfig`] describes scopes, their incident sources, and the
//! external services. [`run::Pipeline`] drives each scope through
//! normalization, region and neighbor resolution, scoring, upload, and
//! POI linking, collecting a [`summary::RunSummary`] along the way.

pub mod config;
pub mod run;
pub mod summary;

pub use config::{ConfigError, RunConfig, ScopeConfig};
pub use run::{NoProgress, Pipeline, PipelineError, StageProgress};
pub use summary::{RunSummary, ScopeSummary};
