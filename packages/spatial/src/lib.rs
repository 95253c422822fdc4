#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory nearest-neighbor index over metric records.
//!
//! Built once per run from every [`MetricRecord`] of a scope. The
//! [`link`] module queries it to assign each point of interest an overall
//! safety score from the closest record of each metric type.

pub mod link;

use std::collections::BTreeSet;

use geo::{Distance as _, Haversine, Point};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use safety_metrics_scoring_models::{MetricRecord, MetricType};

pub use link::{LinkOptions, LinkOptionsError, LinkSummary, link_points};

/// R-tree entry: `[lon, lat]` plus the index of the record it belongs to.
type Entry = GeomWithData<[f64; 2], usize>;

/// A metric record found near a query point.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub record: &'a MetricRecord,
    /// Great-circle distance from the query point in kilometers.
    pub distance_km: f64,
}

/// Pre-built spatial index of metric records.
pub struct MetricIndex {
    records: Vec<MetricRecord>,
    tree: RTree<Entry>,
    metric_types: BTreeSet<MetricType>,
}

impl MetricIndex {
    /// Builds the index. Records with non-finite coordinates are skipped.
    #[must_use]
    pub fn new(records: Vec<MetricRecord>) -> Self {
        let entries: Vec<Entry> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.latitude.is_finite() && r.longitude.is_finite())
            .map(|(i, r)| GeomWithData::new([r.longitude, r.latitude], i))
            .collect();
        let skipped = records.len() - entries.len();
        if skipped > 0 {
            log::warn!("Skipped {skipped} metric records with invalid coordinates");
        }

        let metric_types = entries
            .iter()
            .map(|e| records[e.data].metric_type.clone())
            .collect();
        let tree = RTree::bulk_load(entries);
        log::info!("Loaded {} metric records into spatial index", tree.size());

        Self {
            records,
            tree,
            metric_types,
        }
    }

    /// Number of indexed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Distinct metric types present in the index.
    #[must_use]
    pub const fn metric_types(&self) -> &BTreeSet<MetricType> {
        &self.metric_types
    }

    /// The `k` records nearest to `(lat, lon)` in planar coordinate order,
    /// each with its haversine distance.
    ///
    /// Planar nearest-neighbor order is only used to pick candidates; the
    /// returned distances are great-circle kilometers.
    pub fn nearest(&self, lat: f64, lon: f64, k: usize) -> impl Iterator<Item = Candidate<'_>> {
        self.tree
            .nearest_neighbor_iter(&[lon, lat])
            .take(k)
            .map(move |entry| {
                let record = &self.records[entry.data];
                Candidate {
                    record,
                    distance_km: haversine_km(lat, lon, record.latitude, record.longitude),
                }
            })
    }
}

/// Great-circle distance between two `(lat, lon)` pairs in kilometers.
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    Haversine.distance(Point::new(lon1, lat1), Point::new(lon2, lat2)) / 1000.0
}
