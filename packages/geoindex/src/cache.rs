//! Run-scoped coordinate to region cache.
//!
//! Created once per run and passed explicitly to every
//! [`crate::regions::resolve_regions`] call, so coordinates shared between
//! sources or scopes are only sent to the index once. Only successful
//! lookups are cached; a coordinate whose chunk failed is retried on the
//! next call.

use std::collections::BTreeMap;

use safety_metrics_geography_models::{CoordKey, LatLng, Region};

/// Coordinate to region lookups resolved so far in this run.
#[derive(Debug, Default)]
pub struct RegionCache {
    entries: BTreeMap<CoordKey, Option<Region>>,
}

impl RegionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached lookup for `point`. The outer `None` means "not cached"; the
    /// inner `None` means the index reported no containing region.
    #[must_use]
    pub fn get(&self, point: &LatLng) -> Option<&Option<Region>> {
        self.entries.get(&point.key())
    }

    /// Returns `true` if `point` has a cached lookup.
    #[must_use]
    pub fn contains(&self, point: &LatLng) -> bool {
        self.entries.contains_key(&point.key())
    }

    /// Records a successful lookup.
    pub fn insert(&mut self, point: &LatLng, region: Option<Region>) {
        self.entries.insert(point.key(), region);
    }

    /// Number of cached coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use safety_metrics_geography_models::RegionId;

    use super::*;

    #[test]
    fn distinguishes_uncached_from_unmatched() {
        let mut cache = RegionCache::new();
        let matched = LatLng::new(34.05, -118.24);
        let unmatched = LatLng::new(35.0, -119.0);
        let unknown = LatLng::new(36.0, -120.0);

        cache.insert(
            &matched,
            Some(Region {
                id: RegionId::new("b1"),
                population: 10,
                housing_units: 5,
                centroid: None,
            }),
        );
        cache.insert(&unmatched, None);

        assert_eq!(
            cache.get(&matched).unwrap().as_ref().unwrap().id.as_str(),
            "b1"
        );
        assert_eq!(cache.get(&unmatched), Some(&None));
        assert!(cache.get(&unknown).is_none());
        assert!(cache.contains(&unmatched));
        assert_eq!(cache.len(), 2);
    }
}
