//! Batched neighbor lookups for the set of regions that have incidents.

use std::collections::{BTreeMap, BTreeSet};

use safety_metrics_geography_models::RegionId;
use safety_metrics_source::progress::ProgressCallback;
use serde::{Deserialize, Serialize};

use crate::GeoIndex;

/// Batching options for [`resolve_neighbors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborOptions {
    /// Region ids per request.
    pub chunk_size: usize,
}

impl Default for NeighborOptions {
    fn default() -> Self {
        Self { chunk_size: 30 }
    }
}

/// Counts describing one [`resolve_neighbors`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborStats {
    /// Distinct region ids requested.
    pub requested: usize,
    pub chunks_ok: usize,
    pub chunks_failed: usize,
    /// Requested regions with at least one neighbor.
    pub with_neighbors: usize,
}

/// Output of [`resolve_neighbors`].
#[derive(Debug, Clone, Default)]
pub struct NeighborResolution {
    /// Neighbors of every requested region (possibly empty), without the
    /// region itself and without duplicates.
    pub neighbors: BTreeMap<RegionId, Vec<RegionId>>,
    pub stats: NeighborStats,
}

/// Finds the regions within `radius_m` of each region in `region_ids`.
///
/// Requests are sent sequentially in chunks; pacing is left to the index
/// client's rate limiter. A failed chunk leaves empty neighbor lists for
/// its ids. Every requested id has an entry in the result.
pub async fn resolve_neighbors(
    index: &dyn GeoIndex,
    region_ids: &[RegionId],
    radius_m: f64,
    options: &NeighborOptions,
    progress: &dyn ProgressCallback,
) -> NeighborResolution {
    let unique: Vec<RegionId> = region_ids
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let chunk_size = options.chunk_size.max(1);
    let total_chunks = unique.len().div_ceil(chunk_size);

    let mut resolution = NeighborResolution {
        stats: NeighborStats {
            requested: unique.len(),
            ..NeighborStats::default()
        },
        ..NeighborResolution::default()
    };

    log::info!(
        "Fetching neighbors within {radius_m}m for {} regions in {total_chunks} batches",
        unique.len()
    );
    progress.set_total(total_chunks as u64);

    for (i, chunk) in unique.chunks(chunk_size).enumerate() {
        log::debug!(
            "Fetching neighbors: batch {}/{total_chunks} ({} regions)",
            i + 1,
            chunk.len()
        );
        match index.find_neighbors(chunk, radius_m).await {
            Ok(mut found) => {
                resolution.stats.chunks_ok += 1;
                for id in chunk {
                    let list: BTreeSet<RegionId> = found
                        .remove(id)
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|n| n != id)
                        .collect();
                    resolution
                        .neighbors
                        .insert(id.clone(), list.into_iter().collect());
                }
            }
            Err(e) => {
                resolution.stats.chunks_failed += 1;
                log::warn!(
                    "Neighbor batch {}/{total_chunks} ({} regions) failed: {e}",
                    i + 1,
                    chunk.len()
                );
                for id in chunk {
                    resolution.neighbors.insert(id.clone(), Vec::new());
                }
            }
        }
        progress.inc(1);
    }

    resolution.stats.with_neighbors = resolution
        .neighbors
        .values()
        .filter(|list| !list.is_empty())
        .count();
    progress.finish(format!(
        "Neighbors for {} regions",
        resolution.stats.requested
    ));
    log::info!(
        "Neighbor resolution: {} regions, {} with neighbors, batches ok={} failed={}",
        resolution.stats.requested,
        resolution.stats.with_neighbors,
        resolution.stats.chunks_ok,
        resolution.stats.chunks_failed,
    );
    if resolution.stats.chunks_failed > 0 {
        log::warn!(
            "Neighbor data is incomplete: {} batches failed",
            resolution.stats.chunks_failed
        );
    }

    resolution
}

#[cfg(test)]
mod tests {
    use safety_metrics_source::progress::NullProgress;

    use super::*;
    use crate::regions::tests::FakeIndex;

    fn ids(names: &[&str]) -> Vec<RegionId> {
        names.iter().map(|n| RegionId::new(*n)).collect()
    }

    #[tokio::test]
    async fn every_requested_id_has_an_entry() {
        let mut index = FakeIndex::new();
        index.neighbors.insert(RegionId::new("a"), ids(&["b"]));
        let resolution = resolve_neighbors(
            &index,
            &ids(&["a", "z"]),
            400.0,
            &NeighborOptions::default(),
            &NullProgress,
        )
        .await;

        assert_eq!(resolution.neighbors.len(), 2);
        assert_eq!(resolution.neighbors[&RegionId::new("a")], ids(&["b"]));
        assert!(resolution.neighbors[&RegionId::new("z")].is_empty());
        assert_eq!(resolution.stats.with_neighbors, 1);
    }

    #[tokio::test]
    async fn removes_self_and_duplicates() {
        let mut index = FakeIndex::new();
        index
            .neighbors
            .insert(RegionId::new("a"), ids(&["a", "c", "b", "c"]));
        let resolution = resolve_neighbors(
            &index,
            &ids(&["a"]),
            400.0,
            &NeighborOptions::default(),
            &NullProgress,
        )
        .await;

        assert_eq!(resolution.neighbors[&RegionId::new("a")], ids(&["b", "c"]));
    }

    #[tokio::test]
    async fn batches_sequentially_by_chunk_size() {
        let index = FakeIndex::new();
        let requested: Vec<RegionId> = (0..7).map(|i| RegionId::new(format!("r{i}"))).collect();
        let resolution = resolve_neighbors(
            &index,
            &requested,
            400.0,
            &NeighborOptions { chunk_size: 3 },
            &NullProgress,
        )
        .await;

        let calls = index.neighbor_calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].len(), 3);
        assert_eq!(calls[2].len(), 1);
        assert_eq!(resolution.stats.chunks_ok, 3);
    }

    #[tokio::test]
    async fn failed_batch_yields_empty_lists() {
        let mut index = FakeIndex::new();
        index.neighbors.insert(RegionId::new("a"), ids(&["b"]));
        index.neighbors.insert(RegionId::new("c"), ids(&["d"]));
        index.failing_neighbor_ids.insert(RegionId::new("c"));
        let resolution = resolve_neighbors(
            &index,
            &ids(&["a", "c"]),
            400.0,
            &NeighborOptions { chunk_size: 1 },
            &NullProgress,
        )
        .await;

        assert_eq!(resolution.neighbors[&RegionId::new("a")], ids(&["b"]));
        assert!(resolution.neighbors[&RegionId::new("c")].is_empty());
        assert_eq!(resolution.stats.chunks_ok, 1);
        assert_eq!(resolution.stats.chunks_failed, 1);
    }

    #[tokio::test]
    async fn duplicate_requests_are_collapsed() {
        let index = FakeIndex::new();
        let resolution = resolve_neighbors(
            &index,
            &ids(&["a", "a", "a"]),
            400.0,
            &NeighborOptions::default(),
            &NullProgress,
        )
        .await;
        assert_eq!(resolution.stats.requested, 1);
        assert_eq!(index.neighbor_calls.lock().unwrap()[0].len(), 1);
    }
}
