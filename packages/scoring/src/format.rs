//! Turns region aggregates into persisted [`MetricRecord`]s.

use chrono::{DateTime, Duration, Utc};
use safety_metrics_geography_models::RegionId;
use safety_metrics_scoring_models::{
    MetricDefinition, MetricRecord, MetricType, RegionMetricAggregate, RiskLevel,
};
use uuid::Uuid;

use crate::score::ScoringParams;

/// Deterministic record id for a `(scope, region, metric)` triple.
///
/// The id is a UUID v5 in the DNS namespace over `scope:region:metric`,
/// so re-running a scope produces the same ids.
#[must_use]
pub fn metric_record_id(scope_id: &str, region_id: &RegionId, metric_type: &MetricType) -> Uuid {
    let name = format!("{scope_id}:{region_id}:{metric_type}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
}

/// Human-readable description for a record with the given score.
///
/// Uses the metric's risk text for the score's bucket when present, else a
/// generated sentence naming the risk level. The metric question is
/// prepended.
#[must_use]
pub fn risk_description(definition: &MetricDefinition, score: f64) -> String {
    let level = RiskLevel::from_score(score);
    let text = definition
        .risk_texts
        .get(level)
        .map_or_else(|| fallback_text(definition, level), str::to_string);
    format!("{}: {text}", definition.question)
}

fn fallback_text(definition: &MetricDefinition, level: RiskLevel) -> String {
    let label = sentence_case(&level.to_string());
    let mut text = format!("{label} risk regarding {}.", definition.description);
    if let Some(advice) = level.advice() {
        text.push(' ');
        text.push_str(advice);
    }
    text
}

/// `"Very High"` -> `"Very high"`.
fn sentence_case(label: &str) -> String {
    let mut chars = label.chars();
    chars.next().map_or_else(String::new, |first| {
        first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect()
    })
}

/// Builds records for every aggregate with at least one direct incident.
///
/// All records share `created_at`, and expire `expiry_days` later.
#[must_use]
pub fn format_records(
    scope_id: &str,
    definition: &MetricDefinition,
    aggregates: &[RegionMetricAggregate],
    params: &ScoringParams,
    created_at: DateTime<Utc>,
) -> Vec<MetricRecord> {
    let expires_at = created_at + Duration::days(params.expiry_days);

    aggregates
        .iter()
        .filter(|agg| agg.direct_incident_count > 0)
        .map(|agg| MetricRecord {
            id: metric_record_id(scope_id, &agg.region_id, &agg.metric_type),
            scope_id: scope_id.to_string(),
            region_id: agg.region_id.clone(),
            latitude: agg.latitude,
            longitude: agg.longitude,
            metric_type: agg.metric_type.clone(),
            score: agg.score,
            question: definition.question.clone(),
            description: risk_description(definition, agg.score),
            direct_incident_count: agg.direct_incident_count,
            weighted_incident_count: agg.weighted_incident_count,
            density_proxy: agg.density_proxy,
            incidents_per_1000: agg.incidents_per_1000,
            created_at,
            expires_at,
        })
        .collect()
}
