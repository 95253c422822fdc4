//! Batched, cached, bounded-concurrency point to region resolution.

use std::collections::BTreeSet;

use futures::StreamExt as _;
use safety_metrics_geography_models::{LatLng, Region};
use safety_metrics_source::progress::ProgressCallback;
use serde::{Deserialize, Serialize};

use crate::cache::RegionCache;
use crate::{GeoIndex, GeoIndexError};

/// Batching options for [`resolve_regions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Points per request.
    pub chunk_size: usize,
    /// Requests in flight at once.
    pub concurrency: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            chunk_size: 20_000,
            concurrency: 5,
        }
    }
}

/// Counts describing one [`resolve_regions`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionStats {
    /// Input points, including duplicates.
    pub total_points: usize,
    /// Distinct coordinates among the inputs.
    pub unique_points: usize,
    /// Distinct coordinates answered from the cache.
    pub cache_hits: usize,
    /// Distinct coordinates sent to the index.
    pub requested: usize,
    pub chunks_ok: usize,
    pub chunks_failed: usize,
    /// Input points that resolved to a region.
    pub matched: usize,
    /// Input points with no region (unmatched or in a failed chunk).
    pub unmatched: usize,
}

impl RegionStats {
    /// Fraction of input points that resolved to a region.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn match_rate(&self) -> f64 {
        if self.total_points == 0 {
            0.0
        } else {
            self.matched as f64 / self.total_points as f64
        }
    }
}

/// Output of [`resolve_regions`].
#[derive(Debug, Clone)]
pub struct RegionResolution {
    /// One entry per input point, in input order.
    pub regions: Vec<Option<Region>>,
    pub stats: RegionStats,
}

/// Resolves every point to its containing region.
///
/// Identical coordinates are looked up once. Cached coordinates are not
/// re-sent. Remaining coordinates are split into chunks resolved with at
/// most `options.concurrency` requests in flight. A chunk that fails, or
/// whose response length differs from the request, maps its points to
/// `None` and is not cached. The returned mapping always has one entry per
/// input point.
pub async fn resolve_regions(
    index: &dyn GeoIndex,
    points: &[LatLng],
    cache: &mut RegionCache,
    options: &ResolveOptions,
    progress: &dyn ProgressCallback,
) -> RegionResolution {
    let mut stats = RegionStats {
        total_points: points.len(),
        ..RegionStats::default()
    };

    // ── Dedupe and consult the cache ─────────────────────────────────
    let mut seen = BTreeSet::new();
    let mut misses = Vec::new();
    for point in points {
        if !seen.insert(point.key()) {
            continue;
        }
        if cache.contains(point) {
            stats.cache_hits += 1;
        } else {
            misses.push(*point);
        }
    }
    stats.unique_points = seen.len();
    stats.requested = misses.len();

    let chunk_size = options.chunk_size.max(1);
    let total_chunks = misses.len().div_ceil(chunk_size);
    log::info!(
        "Resolving {} points ({} unique, {} cached) in {total_chunks} chunks of up to {chunk_size}",
        stats.total_points,
        stats.unique_points,
        stats.cache_hits,
    );

    // ── Fan out over chunks ──────────────────────────────────────────
    progress.set_total(misses.len() as u64);
    let results: Vec<(usize, &[LatLng], Result<Vec<Option<Region>>, GeoIndexError>)> =
        futures::stream::iter(misses.chunks(chunk_size).enumerate())
            .map(|(i, chunk)| async move {
                let result = index.match_points(chunk).await.and_then(|regions| {
                    if regions.len() == chunk.len() {
                        Ok(regions)
                    } else {
                        Err(GeoIndexError::LengthMismatch {
                            expected: chunk.len(),
                            actual: regions.len(),
                        })
                    }
                });
                progress.inc(chunk.len() as u64);
                (i, chunk, result)
            })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;

    // ── Merge ────────────────────────────────────────────────────────
    for (i, chunk, result) in results {
        match result {
            Ok(regions) => {
                stats.chunks_ok += 1;
                for (point, region) in chunk.iter().zip(regions) {
                    cache.insert(point, region);
                }
            }
            Err(e) => {
                stats.chunks_failed += 1;
                log::warn!(
                    "Region lookup chunk {}/{total_chunks} ({} points) failed: {e}",
                    i + 1,
                    chunk.len()
                );
            }
        }
    }

    let regions: Vec<Option<Region>> = points
        .iter()
        .map(|point| cache.get(point).cloned().flatten())
        .collect();
    stats.matched = regions.iter().filter(|r| r.is_some()).count();
    stats.unmatched = stats.total_points - stats.matched;

    progress.finish(format!(
        "Resolved {}/{} points",
        stats.matched, stats.total_points
    ));
    log::info!(
        "Region resolution: {}/{} points matched ({:.1}%), chunks ok={} failed={}",
        stats.matched,
        stats.total_points,
        stats.match_rate() * 100.0,
        stats.chunks_ok,
        stats.chunks_failed,
    );
    if stats.chunks_failed > 0 {
        log::warn!(
            "{} region lookup chunks failed; their points are treated as unmatched",
            stats.chunks_failed
        );
    }

    RegionResolution { regions, stats }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use safety_metrics_geography_models::RegionId;
    use safety_metrics_source::progress::NullProgress;

    use super::*;
    use crate::RequestError;

    /// Fake index: points with positive latitude match a region named after
    /// their latitude; chunks containing a poisoned latitude fail.
    pub struct FakeIndex {
        pub poison_latitude: Option<f64>,
        pub short_response: bool,
        pub match_calls: AtomicUsize,
        pub points_seen: AtomicUsize,
        pub neighbors: BTreeMap<RegionId, Vec<RegionId>>,
        pub failing_neighbor_ids: BTreeSet<RegionId>,
        pub neighbor_calls: Mutex<Vec<Vec<RegionId>>>,
    }

    impl FakeIndex {
        pub fn new() -> Self {
            Self {
                poison_latitude: None,
                short_response: false,
                match_calls: AtomicUsize::new(0),
                points_seen: AtomicUsize::new(0),
                neighbors: BTreeMap::new(),
                failing_neighbor_ids: BTreeSet::new(),
                neighbor_calls: Mutex::new(Vec::new()),
            }
        }
    }

    fn unavailable() -> GeoIndexError {
        GeoIndexError::Request(RequestError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })
    }

    #[async_trait]
    impl GeoIndex for FakeIndex {
        async fn match_points(
            &self,
            points: &[LatLng],
        ) -> Result<Vec<Option<Region>>, GeoIndexError> {
            self.match_calls.fetch_add(1, Ordering::SeqCst);
            self.points_seen.fetch_add(points.len(), Ordering::SeqCst);
            if let Some(poison) = self.poison_latitude
                && points.iter().any(|p| (p.latitude - poison).abs() < f64::EPSILON)
            {
                return Err(unavailable());
            }
            let mut regions: Vec<Option<Region>> = points
                .iter()
                .map(|p| {
                    (p.latitude > 0.0).then(|| Region {
                        id: RegionId::new(format!("r{}", p.latitude)),
                        population: 100,
                        housing_units: 50,
                        centroid: None,
                    })
                })
                .collect();
            if self.short_response {
                regions.pop();
            }
            Ok(regions)
        }

        async fn find_neighbors(
            &self,
            region_ids: &[RegionId],
            _radius_m: f64,
        ) -> Result<BTreeMap<RegionId, Vec<RegionId>>, GeoIndexError> {
            self.neighbor_calls
                .lock()
                .unwrap()
                .push(region_ids.to_vec());
            if region_ids.iter().any(|id| self.failing_neighbor_ids.contains(id)) {
                return Err(unavailable());
            }
            Ok(region_ids
                .iter()
                .filter_map(|id| self.neighbors.get(id).map(|n| (id.clone(), n.clone())))
                .collect())
        }
    }

    fn options(chunk_size: usize) -> ResolveOptions {
        ResolveOptions {
            chunk_size,
            concurrency: 3,
        }
    }

    #[tokio::test]
    async fn maps_every_point_in_input_order() {
        let index = FakeIndex::new();
        let mut cache = RegionCache::new();
        let points = vec![
            LatLng::new(1.0, 1.0),
            LatLng::new(-1.0, 1.0),
            LatLng::new(2.0, 1.0),
            LatLng::new(3.0, 1.0),
            LatLng::new(4.0, 1.0),
        ];
        let resolution =
            resolve_regions(&index, &points, &mut cache, &options(2), &NullProgress).await;

        assert_eq!(resolution.regions.len(), points.len());
        assert_eq!(resolution.regions[0].as_ref().unwrap().id.as_str(), "r1");
        assert!(resolution.regions[1].is_none());
        assert_eq!(resolution.regions[4].as_ref().unwrap().id.as_str(), "r4");
        assert_eq!(resolution.stats.chunks_ok, 3);
        assert_eq!(resolution.stats.matched, 4);
        assert_eq!(resolution.stats.unmatched, 1);
        assert!((resolution.stats.match_rate() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn duplicate_coordinates_are_sent_once() {
        let index = FakeIndex::new();
        let mut cache = RegionCache::new();
        let points = vec![LatLng::new(1.0, 1.0); 10];
        let resolution =
            resolve_regions(&index, &points, &mut cache, &options(100), &NullProgress).await;

        assert_eq!(index.points_seen.load(Ordering::SeqCst), 1);
        assert_eq!(resolution.stats.unique_points, 1);
        assert_eq!(resolution.stats.matched, 10);
    }

    #[tokio::test]
    async fn cache_skips_previously_resolved_points() {
        let index = FakeIndex::new();
        let mut cache = RegionCache::new();
        let first = vec![LatLng::new(1.0, 1.0), LatLng::new(-1.0, 1.0)];
        resolve_regions(&index, &first, &mut cache, &options(100), &NullProgress).await;

        let second = vec![
            LatLng::new(1.0, 1.0),
            LatLng::new(-1.0, 1.0),
            LatLng::new(2.0, 1.0),
        ];
        let resolution =
            resolve_regions(&index, &second, &mut cache, &options(100), &NullProgress).await;

        assert_eq!(resolution.stats.cache_hits, 2);
        assert_eq!(resolution.stats.requested, 1);
        assert_eq!(index.points_seen.load(Ordering::SeqCst), 3);
        assert_eq!(resolution.stats.matched, 2);
    }

    #[tokio::test]
    async fn failed_chunk_degrades_only_its_points() {
        let mut index = FakeIndex::new();
        index.poison_latitude = Some(3.0);
        let mut cache = RegionCache::new();
        let points = vec![
            LatLng::new(1.0, 1.0),
            LatLng::new(2.0, 1.0),
            LatLng::new(3.0, 1.0),
            LatLng::new(4.0, 1.0),
        ];
        let resolution =
            resolve_regions(&index, &points, &mut cache, &options(2), &NullProgress).await;

        assert_eq!(resolution.regions.len(), 4);
        assert!(resolution.regions[0].is_some());
        assert!(resolution.regions[1].is_some());
        assert!(resolution.regions[2].is_none());
        assert!(resolution.regions[3].is_none());
        assert_eq!(resolution.stats.chunks_ok, 1);
        assert_eq!(resolution.stats.chunks_failed, 1);
        assert!(!cache.contains(&LatLng::new(3.0, 1.0)));
        assert!(!cache.contains(&LatLng::new(4.0, 1.0)));
    }

    #[tokio::test]
    async fn failed_points_are_retried_on_next_call() {
        let mut index = FakeIndex::new();
        index.poison_latitude = Some(2.0);
        let mut cache = RegionCache::new();
        let points = vec![LatLng::new(2.0, 1.0)];
        resolve_regions(&index, &points, &mut cache, &options(10), &NullProgress).await;

        index.poison_latitude = None;
        let resolution =
            resolve_regions(&index, &points, &mut cache, &options(10), &NullProgress).await;
        assert_eq!(resolution.stats.cache_hits, 0);
        assert_eq!(resolution.stats.matched, 1);
    }

    #[tokio::test]
    async fn length_mismatch_fails_the_chunk() {
        let mut index = FakeIndex::new();
        index.short_response = true;
        let mut cache = RegionCache::new();
        let points = vec![LatLng::new(1.0, 1.0), LatLng::new(2.0, 1.0)];
        let resolution =
            resolve_regions(&index, &points, &mut cache, &options(10), &NullProgress).await;

        assert_eq!(resolution.regions, vec![None, None]);
        assert_eq!(resolution.stats.chunks_failed, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let index = FakeIndex::new();
        let mut cache = RegionCache::new();
        let resolution =
            resolve_regions(&index, &[], &mut cache, &options(10), &NullProgress).await;
        assert!(resolution.regions.is_empty());
        assert_eq!(index.match_calls.load(Ordering::SeqCst), 0);
        assert!(resolution.stats.match_rate().abs() < f64::EPSILON);
    }
}
