#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region, coordinate, and point-of-interest types.
//!
//! Regions are the smallest spatial unit (e.g. a census block) to which
//! incidents and demographics resolve. They are produced by the external
//! geospatial index and treated as read-only reference data for a run.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Opaque identifier of a region as assigned by the geospatial index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub String);

impl RegionId {
    /// Creates a region id from anything string-like.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in decimal degrees.
    #[serde(rename = "lat")]
    pub latitude: f64,
    /// Longitude in decimal degrees.
    #[serde(rename = "lon")]
    pub longitude: f64,
}

impl LatLng {
    /// Creates a coordinate pair.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` when both components are finite, within WGS84
    /// bounds, and the pair is not the `(0, 0)` null-island placeholder.
    #[must_use]
    pub fn is_plausible(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }

    /// Bit-exact key for deduplicating identical coordinates.
    #[must_use]
    pub const fn key(&self) -> CoordKey {
        CoordKey(self.latitude.to_bits(), self.longitude.to_bits())
    }
}

/// Hashable, totally ordered identity of a [`LatLng`].
///
/// Two coordinates share a key only when both components are bit-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoordKey(u64, u64);

/// A region returned by the geospatial index, with the demographic
/// attributes embedded in the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Region identifier.
    pub id: RegionId,
    /// Resident population (0 when unknown).
    #[serde(default, alias = "total_population", deserialize_with = "null_as_zero")]
    pub population: u64,
    /// Number of housing units (0 when unknown).
    #[serde(default, deserialize_with = "null_as_zero")]
    pub housing_units: u64,
    /// Region centroid, when the index provides one.
    #[serde(default)]
    pub centroid: Option<LatLng>,
}

impl Region {
    /// Residents per housing unit, or `0.0` when there are no housing units.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn density_proxy(&self) -> f64 {
        if self.housing_units == 0 {
            0.0
        } else {
            self.population as f64 / self.housing_units as f64
        }
    }
}

/// Treats an explicit JSON `null` (or a negative number) as zero.
fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<f64> = Option::deserialize(deserializer)?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(value.filter(|v| v.is_finite() && *v > 0.0).map_or(0, |v| v as u64))
}

/// A point-of-interest entity (e.g. an accommodation listing) that
/// consumes computed scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    /// External identifier of the POI.
    pub id: String,
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
}

impl PointOfInterest {
    /// Returns the POI location.
    #[must_use]
    pub const fn location(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_proxy_divides_population_by_housing() {
        let region = Region {
            id: RegionId::new("b1"),
            population: 1000,
            housing_units: 500,
            centroid: None,
        };
        assert!((region.density_proxy() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn density_proxy_is_zero_without_housing() {
        let region = Region {
            id: RegionId::new("b1"),
            population: 1000,
            housing_units: 0,
            centroid: None,
        };
        assert!(region.density_proxy().abs() < f64::EPSILON);
    }

    #[test]
    fn deserializes_index_region_with_nulls() {
        let region: Region = serde_json::from_value(serde_json::json!({
            "id": "060371234",
            "total_population": null,
            "housing_units": 12
        }))
        .unwrap();
        assert_eq!(region.id.as_str(), "060371234");
        assert_eq!(region.population, 0);
        assert_eq!(region.housing_units, 12);
        assert!(region.centroid.is_none());
    }

    #[test]
    fn rejects_null_island_and_out_of_range() {
        assert!(!LatLng::new(0.0, 0.0).is_plausible());
        assert!(!LatLng::new(f64::NAN, 10.0).is_plausible());
        assert!(!LatLng::new(91.0, 10.0).is_plausible());
        assert!(LatLng::new(0.0, -118.2).is_plausible());
        assert!(LatLng::new(34.05, -118.24).is_plausible());
    }

    #[test]
    fn identical_coordinates_share_a_key() {
        let a = LatLng::new(34.05, -118.24);
        let b = LatLng::new(34.05, -118.24);
        let c = LatLng::new(34.050_000_1, -118.24);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }
}
