//! Progress reporting for running imports.

use serde::{Deserialize, Serialize};

/// Where an import currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPhase {
    Starting,
    Importing,
    Completed,
    Failed,
}

/// Progress update delivered to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    /// False once the import has terminated.
    pub running: bool,
    /// Rows persisted so far in this import.
    pub processed_count: u64,
    pub phase: ImportPhase,
    /// Optional message with additional details.
    pub message: Option<String>,
}

impl ImportProgress {
    pub fn running(processed_count: u64) -> Self {
        Self {
            running: true,
            processed_count,
            phase: ImportPhase::Importing,
            message: None,
        }
    }
}

/// Receives progress updates. Implementations must not block.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &ImportProgress);
}

/// Observer that discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _progress: &ImportProgress) {}
}

impl<F> ProgressObserver for F
where
    F: Fn(&ImportProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &ImportProgress) {
        self(progress)
    }
}
