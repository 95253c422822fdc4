//! Metric registry: the built-in metric definitions.
//!
//! Each `.toml` file in `packages/scoring/metrics/` is baked into the binary
//! at compile time via [`include_str!`]. A run config may replace the set
//! with its own `[[metrics]]` entries.

use std::collections::BTreeSet;

use safety_metrics_scoring_models::{MetricDefinition, MetricType};

use crate::ScoringError;

/// Metric definitions embedded at compile time.
const METRIC_TOMLS: &[(&str, &str)] = &[
    ("night", include_str!("../metrics/night.toml")),
    ("daytime", include_str!("../metrics/daytime.toml")),
    ("vehicle", include_str!("../metrics/vehicle.toml")),
    ("transit", include_str!("../metrics/transit.toml")),
    ("women", include_str!("../metrics/women.toml")),
    ("property", include_str!("../metrics/property.toml")),
];

/// Parses a single metric definition from TOML.
///
/// # Errors
///
/// Returns [`ScoringError::Definition`] if the TOML is malformed.
pub fn parse_metric_toml(name: &str, toml_str: &str) -> Result<MetricDefinition, ScoringError> {
    toml::de::from_str(toml_str).map_err(|source| ScoringError::Definition {
        name: name.to_string(),
        source,
    })
}

/// Returns every built-in metric definition.
///
/// # Errors
///
/// Returns an error if an embedded definition fails to parse or two share
/// an id.
pub fn all_metrics() -> Result<Vec<MetricDefinition>, ScoringError> {
    let metrics = METRIC_TOMLS
        .iter()
        .map(|(name, toml)| parse_metric_toml(name, toml))
        .collect::<Result<Vec<_>, _>>()?;
    ensure_unique(&metrics)?;
    Ok(metrics)
}

/// Checks that no two definitions share an id.
///
/// # Errors
///
/// Returns [`ScoringError::DuplicateMetric`] naming the first repeated id.
pub fn ensure_unique(metrics: &[MetricDefinition]) -> Result<(), ScoringError> {
    let mut seen = BTreeSet::new();
    for metric in metrics {
        if !seen.insert(&metric.id) {
            return Err(ScoringError::DuplicateMetric {
                id: metric.id.to_string(),
            });
        }
    }
    Ok(())
}

/// Finds a definition by id.
#[must_use]
pub fn find<'a>(metrics: &'a [MetricDefinition], id: &MetricType) -> Option<&'a MetricDefinition> {
    metrics.iter().find(|m| &m.id == id)
}

#[cfg(test)]
mod tests {
    use safety_metrics_scoring_models::RiskLevel;

    use super::*;

    #[test]
    fn loads_all_metrics() {
        let metrics = all_metrics().unwrap();
        assert_eq!(metrics.len(), METRIC_TOMLS.len());
        assert_eq!(metrics.len(), 6);
    }

    #[test]
    fn file_names_match_ids() {
        for (name, toml) in METRIC_TOMLS {
            let def = parse_metric_toml(name, toml).unwrap();
            assert_eq!(def.id.as_str(), *name);
        }
    }

    #[test]
    fn all_metrics_have_required_fields() {
        for metric in all_metrics().unwrap() {
            assert!(!metric.question.is_empty(), "{} has no question", metric.id);
            assert!(!metric.description.is_empty(), "{} has no description", metric.id);
            for level in RiskLevel::all() {
                assert!(
                    metric.risk_texts.get(*level).is_some(),
                    "{} has no {level} risk text",
                    metric.id
                );
            }
        }
    }

    #[test]
    fn time_of_day_metrics_have_complementary_hours() {
        let metrics = all_metrics().unwrap();
        let night = find(&metrics, &MetricType::new("night")).unwrap();
        let day = find(&metrics, &MetricType::new("daytime")).unwrap();
        let night_hours = night.hours.as_ref().unwrap();
        let day_hours = day.hours.as_ref().unwrap();

        for hour in 0..24 {
            assert!(
                night_hours.contains(hour) ^ day_hours.contains(hour),
                "hour {hour} must belong to exactly one of night/daytime"
            );
        }
        assert!(find(&metrics, &MetricType::new("vehicle")).unwrap().hours.is_none());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut metrics = all_metrics().unwrap();
        metrics.push(metrics[0].clone());
        assert!(matches!(
            ensure_unique(&metrics),
            Err(ScoringError::DuplicateMetric { id }) if id == "night"
        ));
    }

    #[test]
    fn malformed_definition_is_an_error() {
        assert!(matches!(
            parse_metric_toml("broken", "id = "),
            Err(ScoringError::Definition { name, .. }) if name == "broken"
        ));
    }
}
