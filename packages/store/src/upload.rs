//! Batched writes with per-batch failure accounting.
//!
//! A failed batch is logged and counted, and the remaining batches still
//! run. Only the scope delete is a precondition: if it fails no records
//! are written, so a scope never ends up with a mix of stale and fresh
//! records.

use safety_metrics_scoring_models::{MetricRecord, ScoreUpdate};
use safety_metrics_source::progress::ProgressCallback;
use serde::{Deserialize, Serialize};

use crate::MetricStore;

/// Counts describing one batched write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    /// Items handed to the uploader.
    pub attempted: usize,
    /// Rows the store reported as written.
    pub written: u64,
    pub batches_ok: usize,
    pub batches_failed: usize,
    /// Items in failed batches.
    pub failed_items: usize,
    /// Set when the scope delete failed and nothing was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl UploadSummary {
    /// Returns `true` when every batch succeeded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.batches_failed == 0 && self.aborted.is_none()
    }
}

/// Replaces every metric record of `scope_id` with `records`.
///
/// Existing records are deleted first. If the delete fails the upload is
/// skipped and the summary's `aborted` field carries the error.
pub async fn replace_scope(
    store: &dyn MetricStore,
    scope_id: &str,
    records: &[MetricRecord],
    batch_size: usize,
    progress: &dyn ProgressCallback,
) -> UploadSummary {
    log::info!("Deleting existing metric records for scope '{scope_id}'");
    if let Err(e) = store.delete_scope(scope_id).await {
        log::error!("Failed to delete existing metric records for scope '{scope_id}': {e}");
        return UploadSummary {
            attempted: records.len(),
            aborted: Some(e.to_string()),
            ..UploadSummary::default()
        };
    }

    let batch_size = batch_size.max(1);
    let total_batches = records.len().div_ceil(batch_size);
    let mut summary = UploadSummary {
        attempted: records.len(),
        ..UploadSummary::default()
    };
    log::info!(
        "Uploading {} metric records for scope '{scope_id}' in {total_batches} batches",
        records.len()
    );
    progress.set_total(total_batches as u64);

    for (i, batch) in records.chunks(batch_size).enumerate() {
        match store.upsert_metric_records(batch).await {
            Ok(written) => {
                summary.batches_ok += 1;
                summary.written += written;
                log::info!(
                    "Metric batch {}/{total_batches}: {written} of {} records written",
                    i + 1,
                    batch.len()
                );
                if written < batch.len() as u64 {
                    log::warn!(
                        "Metric batch {}/{total_batches} partially written ({written}/{})",
                        i + 1,
                        batch.len()
                    );
                }
            }
            Err(e) => {
                summary.batches_failed += 1;
                summary.failed_items += batch.len();
                log::error!(
                    "Metric batch {}/{total_batches} ({} records) failed: {e}",
                    i + 1,
                    batch.len()
                );
            }
        }
        progress.inc(1);
    }
    progress.finish(format!("Uploaded {} metric records", summary.written));

    log::info!(
        "Metric upload for '{scope_id}': {} written, {} batches failed ({} records)",
        summary.written,
        summary.batches_failed,
        summary.failed_items
    );
    summary
}

/// Applies POI score updates in batches.
pub async fn apply_score_updates(
    store: &dyn MetricStore,
    updates: &[ScoreUpdate],
    batch_size: usize,
    progress: &dyn ProgressCallback,
) -> UploadSummary {
    let batch_size = batch_size.max(1);
    let total_batches = updates.len().div_ceil(batch_size);
    let mut summary = UploadSummary {
        attempted: updates.len(),
        ..UploadSummary::default()
    };
    log::info!(
        "Applying {} POI score updates in {total_batches} batches",
        updates.len()
    );
    progress.set_total(total_batches as u64);

    for (i, batch) in updates.chunks(batch_size).enumerate() {
        match store.apply_score_updates(batch).await {
            Ok(updated) => {
                summary.batches_ok += 1;
                summary.written += updated;
                log::info!(
                    "POI batch {}/{total_batches}: {updated} of {} rows updated",
                    i + 1,
                    batch.len()
                );
                if updated != batch.len() as u64 {
                    log::warn!(
                        "POI batch {}/{total_batches}: expected {} updates, store reported {updated}",
                        i + 1,
                        batch.len()
                    );
                }
            }
            Err(e) => {
                summary.batches_failed += 1;
                summary.failed_items += batch.len();
                log::error!(
                    "POI batch {}/{total_batches} ({} updates) failed: {e}",
                    i + 1,
                    batch.len()
                );
            }
        }
        progress.inc(1);
    }
    progress.finish(format!("Updated {} POIs", summary.written));

    if summary.batches_failed > 0 {
        log::warn!(
            "{} POI update batches failed ({} updates)",
            summary.batches_failed,
            summary.failed_items
        );
    }
    summary
}
