//! Record-by-record normalization into [`CanonicalIncident`]s.

use std::collections::BTreeMap;

use chrono::FixedOffset;
use safety_metrics_geography_models::LatLng;
use safety_metrics_incident_models::CanonicalIncident;
use serde::{Deserialize, Serialize};

use crate::progress::ProgressCallback;
use crate::source_def::{SourceDefinition, get_text};
use crate::{DropReason, NormalizeError, SourceError};

/// Number of dropped records logged individually per source.
const LOGGED_DROPS: usize = 5;

/// Per-source normalization counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeSummary {
    /// Source the counts belong to.
    pub source_id: String,
    /// Raw records read.
    pub input: usize,
    /// Incidents produced.
    pub output: usize,
    /// Dropped records by reason.
    pub dropped: BTreeMap<DropReason, usize>,
    /// Incidents kept without a time of day.
    pub missing_time: usize,
    /// Hour predicates are skipped for this source's incidents.
    pub hour_filter_exempt: bool,
}

impl NormalizeSummary {
    /// Total records dropped across all reasons.
    #[must_use]
    pub fn total_dropped(&self) -> usize {
        self.dropped.values().sum()
    }

    /// Adds another source's counts into this one.
    pub fn merge(&mut self, other: &Self) {
        self.input += other.input;
        self.output += other.output;
        self.missing_time += other.missing_time;
        for (reason, count) in &other.dropped {
            *self.dropped.entry(*reason).or_default() += count;
        }
    }
}

/// Normalizes one raw record.
///
/// # Errors
///
/// Returns a [`NormalizeError`] naming why the record is unusable.
pub fn normalize_record(
    def: &SourceDefinition,
    offset: FixedOffset,
    record: &serde_json::Value,
) -> Result<CanonicalIncident, NormalizeError> {
    let fields = &def.fields;

    // ── Category ─────────────────────────────────────────────────────
    let category_code = fields
        .category
        .iter()
        .find_map(|f| get_text(record, f))
        .ok_or(NormalizeError::MissingCategory)?;

    // ── Coordinates ──────────────────────────────────────────────────
    let (Some(latitude), Some(longitude)) = (fields.lat.extract(record), fields.lng.extract(record))
    else {
        return Err(NormalizeError::MissingCoordinates);
    };
    if !LatLng::new(latitude, longitude).is_plausible() {
        return Err(NormalizeError::InvalidCoordinates {
            latitude,
            longitude,
        });
    }

    // ── Timestamp ────────────────────────────────────────────────────
    let extracted = fields.occurred_at.extract(record, offset)?;

    Ok(CanonicalIncident {
        source_id: def.id.clone(),
        category_code,
        occurred_at: extracted.occurred_at,
        hour: if def.time_unreliable {
            None
        } else {
            extracted.hour
        },
        hour_filter_exempt: def.time_unreliable,
        latitude,
        longitude,
    })
}

/// Normalizes a batch of raw records from one source.
///
/// Unusable records are dropped individually and counted in the returned
/// [`NormalizeSummary`].
///
/// # Errors
///
/// Returns [`SourceError::InvalidDefinition`] if the definition itself is
/// unusable (e.g. an out-of-range UTC offset).
pub fn normalize_records(
    def: &SourceDefinition,
    records: &[serde_json::Value],
    progress: &dyn ProgressCallback,
) -> Result<(Vec<CanonicalIncident>, NormalizeSummary), SourceError> {
    def.validate()?;
    let offset = def.utc_offset()?;

    if def.time_unreliable {
        log::warn!(
            "Source '{}' has unreliable times; hour-of-day filters will not be applied to its incidents",
            def.id
        );
    }

    let mut summary = NormalizeSummary {
        source_id: def.id.clone(),
        input: records.len(),
        hour_filter_exempt: def.time_unreliable,
        ..NormalizeSummary::default()
    };
    let mut incidents = Vec::with_capacity(records.len());

    progress.set_total(records.len() as u64);
    for (index, record) in records.iter().enumerate() {
        match normalize_record(def, offset, record) {
            Ok(incident) => {
                if incident.hour.is_none() && !incident.hour_filter_exempt {
                    summary.missing_time += 1;
                }
                incidents.push(incident);
            }
            Err(e) => {
                if summary.total_dropped() < LOGGED_DROPS {
                    log::debug!("[{}] Dropping record {index}: {e}", def.id);
                }
                *summary.dropped.entry(e.reason()).or_default() += 1;
            }
        }
        progress.inc(1);
    }
    progress.finish(format!("{}: {} incidents", def.id, incidents.len()));

    summary.output = incidents.len();
    log::info!(
        "[{}] Normalized {}/{} records ({} dropped, {} without time of day)",
        def.id,
        summary.output,
        summary.input,
        summary.total_dropped(),
        summary.missing_time,
    );
    for (reason, count) in &summary.dropped {
        log::info!("[{}]   dropped {count} ({reason})", def.id);
    }

    Ok((incidents, summary))
}
