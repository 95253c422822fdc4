//! Config-driven incident source definition.
//!
//! [`SourceDefinition`] captures everything unique about an incident source
//! in a serializable config struct: which JSON fields hold the category,
//! timestamp, and coordinates, plus the source's local UTC offset and any
//! known data-quality quirks. A single generic normalizer handles all
//! sources.

use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDateTime, NaiveTime, Timelike as _, Utc};
use serde::Deserialize;

use crate::parsing::{
    ParsedDateTime, coerce_f64, coerce_text, local_to_utc, noon, parse_datetime, parse_hhmm,
    parse_hhmmss,
};
use crate::{NormalizeError, SourceError};

// ── Top-level source definition ──────────────────────────────────────────

/// A complete, config-driven incident source definition.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDefinition {
    /// Unique identifier (e.g., `"lapd"`).
    pub id: String,
    /// Human-readable name. Defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    /// Path to the raw records (JSON array or JSON Lines), relative to the
    /// run config file when not absolute.
    #[serde(default)]
    pub records_path: Option<PathBuf>,
    /// Offset of the source's local wall-clock time from UTC, in minutes
    /// (e.g. `-480` for UTC-8). Only used for values without their own
    /// offset.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// The source's time-of-day values are known to be wrong. Hour-of-day
    /// predicates are skipped for its incidents.
    #[serde(default)]
    pub time_unreliable: bool,
    /// Field name mappings for normalization.
    pub fields: FieldMapping,
}

/// Maps source-specific JSON field names to canonical incident fields.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldMapping {
    /// JSON field names for the category code, tried in order (first
    /// non-empty wins).
    pub category: Vec<String>,
    /// How to extract the `occurred_at` timestamp.
    pub occurred_at: DateExtractor,
    /// Latitude coordinate field.
    pub lat: CoordField,
    /// Longitude coordinate field.
    pub lng: CoordField,
}

// ── Strategy enums ───────────────────────────────────────────────────────

/// How to extract the `occurred_at` timestamp from a raw record.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DateExtractor {
    /// Single datetime field (ISO 8601 or US style, date-only allowed).
    Simple {
        /// JSON field name.
        field: String,
    },
    /// Date field + `HHMM` time (zero-padded to 4 digits).
    DatePlusHhmm {
        /// JSON field for the date portion.
        date_field: String,
        /// JSON field for the HHMM time.
        time_field: String,
    },
    /// Date field + `"HH:MM:SS"` time string.
    DatePlusHhmmss {
        /// JSON field for the date portion.
        date_field: String,
        /// JSON field for the time string.
        time_field: String,
    },
    /// Epoch milliseconds.
    EpochMs {
        /// JSON field name.
        field: String,
    },
}

/// A coordinate field and its type.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordField {
    /// JSON field name.
    pub field: String,
    /// How the coordinate is stored in the raw record.
    #[serde(rename = "type", default)]
    pub coord_type: CoordType,
}

/// How a coordinate is stored in the raw record.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordType {
    /// Plain JSON value, either a string or a number.
    #[default]
    Value,
    /// Latitude from a `GeoJSON` Point (`coordinates[1]`) or a location
    /// object with a `latitude` key.
    PointLat,
    /// Longitude from a `GeoJSON` Point (`coordinates[0]`) or a location
    /// object with a `longitude` key.
    PointLng,
}

/// Timestamp pulled out of a raw record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedTime {
    /// Instant the incident occurred.
    pub occurred_at: DateTime<Utc>,
    /// Local hour of day, `None` when the time of day was not reported.
    pub hour: Option<u32>,
}

// ── Helper methods on extractors ─────────────────────────────────────────

/// Gets a trimmed, non-empty text value from a JSON object by field name.
pub(crate) fn get_text(record: &serde_json::Value, field: &str) -> Option<String> {
    coerce_text(record.get(field)?)
}

impl CoordField {
    /// Extracts a coordinate value from a JSON record.
    #[must_use]
    pub fn extract(&self, record: &serde_json::Value) -> Option<f64> {
        let value = record.get(&self.field)?;
        match self.coord_type {
            CoordType::Value => coerce_f64(value),
            CoordType::PointLat => {
                // GeoJSON Point: {"type":"Point","coordinates":[lng, lat]}
                if let Some(coords) = value.get("coordinates").and_then(|c| c.as_array()) {
                    return coords.get(1).and_then(coerce_f64);
                }
                value.get("latitude").and_then(coerce_f64)
            }
            CoordType::PointLng => {
                if let Some(coords) = value.get("coordinates").and_then(|c| c.as_array()) {
                    return coords.first().and_then(coerce_f64);
                }
                value.get("longitude").and_then(coerce_f64)
            }
        }
    }
}

/// Combines a date with an optional time of day. Unknown times fall back to
/// noon with no hour.
fn at_local_time(
    parsed: ParsedDateTime,
    time: Option<NaiveTime>,
    offset: FixedOffset,
    raw: &str,
) -> Result<ExtractedTime, NormalizeError> {
    let (naive, hour) = time.map_or_else(
        || (NaiveDateTime::new(parsed.date(), noon()), None),
        |t| (NaiveDateTime::new(parsed.date(), t), Some(t.hour())),
    );
    let occurred_at = local_to_utc(naive, offset).ok_or_else(|| NormalizeError::InvalidDate {
        value: raw.to_string(),
    })?;
    Ok(ExtractedTime { occurred_at, hour })
}

impl DateExtractor {
    /// Extracts the incident timestamp from a JSON record, interpreting
    /// wall-clock values in `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError::MissingDate`] if the date field is absent
    /// and [`NormalizeError::InvalidDate`] if it cannot be parsed.
    pub fn extract(
        &self,
        record: &serde_json::Value,
        offset: FixedOffset,
    ) -> Result<ExtractedTime, NormalizeError> {
        match self {
            Self::Simple { field } => {
                let raw = get_text(record, field).ok_or(NormalizeError::MissingDate)?;
                let parsed = parse_datetime(&raw).ok_or_else(|| NormalizeError::InvalidDate {
                    value: raw.clone(),
                })?;
                match parsed {
                    ParsedDateTime::Zoned(dt) => Ok(ExtractedTime {
                        occurred_at: dt.with_timezone(&Utc),
                        hour: Some(dt.hour()),
                    }),
                    ParsedDateTime::Local(naive) => at_local_time(
                        ParsedDateTime::DateOnly(naive.date()),
                        Some(naive.time()),
                        offset,
                        &raw,
                    ),
                    ParsedDateTime::DateOnly(_) => at_local_time(parsed, None, offset, &raw),
                }
            }
            Self::DatePlusHhmm {
                date_field,
                time_field,
            } => {
                let raw = get_text(record, date_field).ok_or(NormalizeError::MissingDate)?;
                let parsed = parse_datetime(&raw).ok_or_else(|| NormalizeError::InvalidDate {
                    value: raw.clone(),
                })?;
                let time = get_text(record, time_field).and_then(|t| parse_hhmm(&t));
                at_local_time(parsed, time, offset, &raw)
            }
            Self::DatePlusHhmmss {
                date_field,
                time_field,
            } => {
                let raw = get_text(record, date_field).ok_or(NormalizeError::MissingDate)?;
                let parsed = parse_datetime(&raw).ok_or_else(|| NormalizeError::InvalidDate {
                    value: raw.clone(),
                })?;
                let time = get_text(record, time_field).and_then(|t| parse_hhmmss(&t));
                at_local_time(parsed, time, offset, &raw)
            }
            Self::EpochMs { field } => {
                let value = record.get(field).ok_or(NormalizeError::MissingDate)?;
                let invalid = || NormalizeError::InvalidDate {
                    value: value.to_string(),
                };
                let ms = coerce_f64(value)
                    .filter(|ms| ms.is_finite())
                    .ok_or_else(invalid)?;
                #[allow(clippy::cast_possible_truncation)]
                let occurred_at = DateTime::from_timestamp_millis(ms as i64).ok_or_else(invalid)?;
                Ok(ExtractedTime {
                    occurred_at,
                    hour: Some(occurred_at.with_timezone(&offset).hour()),
                })
            }
        }
    }
}

impl SourceDefinition {
    /// Returns the human-readable name, falling back to the id.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Returns the source's fixed UTC offset.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidDefinition`] if the offset is outside
    /// ±24 hours.
    pub fn utc_offset(&self) -> Result<FixedOffset, SourceError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| SourceError::InvalidDefinition {
                source_id: self.id.clone(),
                message: format!(
                    "utc_offset_minutes {} is out of range",
                    self.utc_offset_minutes
                ),
            })
    }

    /// Checks the definition for problems that would make every record
    /// unusable.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidDefinition`] describing the first
    /// problem found.
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.id.trim().is_empty() {
            return Err(SourceError::InvalidDefinition {
                source_id: self.id.clone(),
                message: "id must not be empty".to_string(),
            });
        }
        if self.fields.category.is_empty() {
            return Err(SourceError::InvalidDefinition {
                source_id: self.id.clone(),
                message: "at least one category field is required".to_string(),
            });
        }
        self.utc_offset().map(|_| ())
    }
}

/// Parses a [`SourceDefinition`] from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or missing required fields.
pub fn parse_source_toml(toml_str: &str) -> Result<SourceDefinition, SourceError> {
    let def: SourceDefinition = toml::de::from_str(toml_str)?;
    def.validate()?;
    Ok(def)
}
