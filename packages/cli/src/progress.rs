//! Terminal rendering of pipeline stages.

use std::sync::Arc;

use safety_metrics_cli_utils::{IndicatifProgress, MultiProgress};
use safety_metrics_pipeline::StageProgress;
use safety_metrics_source::progress::ProgressCallback;

/// Adds one `indicatif` bar per stage to a shared [`MultiProgress`].
pub struct TerminalProgress {
    multi: MultiProgress,
}

impl TerminalProgress {
    pub const fn new(multi: MultiProgress) -> Self {
        Self { multi }
    }
}

impl StageProgress for TerminalProgress {
    fn stage(&self, label: &str) -> Arc<dyn ProgressCallback> {
        IndicatifProgress::stage_bar(&self.multi, label)
    }

    fn steps(&self, label: &str) -> Arc<dyn ProgressCallback> {
        IndicatifProgress::steps_bar(&self.multi, label)
    }
}
