use serde::{Deserialize, Serialize};

use crate::train::checkpoint::RunId;

/// Per-epoch training statistics emitted by the epoch loop.
///
/// When a `progress_tx` channel is configured in `LoopConfig`, the loop
/// sends one `EpochStats` value at the end of every completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 0-based epoch number; also the step the scalars are logged at.
    pub epoch: usize,
    /// Total epochs requested for this run.
    pub total_epochs: usize,
    /// Sum of the batch losses of the training pass.
    pub train_loss: f64,
    /// Sum of the batch losses of the validation pass.
    pub valid_loss: f64,
    pub train_batches: usize,
    pub valid_batches: usize,
    /// Whether this epoch overwrote `best_train_model`.
    pub saved_best_train: bool,
    /// Whether this epoch overwrote `best_valid_model`.
    pub saved_best_valid: bool,
    /// Wall-clock duration of this epoch in milliseconds.
    pub elapsed_ms: u64,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: RunId,
    pub epochs: Vec<EpochStats>,
    pub best_train_loss: f64,
    pub best_valid_loss: f64,
}

impl TrainingReport {
    /// Epochs at which `best_train_model` was written.
    pub fn best_train_epochs(&self) -> Vec<usize> {
        self.epochs.iter().filter(|e| e.saved_best_train).map(|e| e.epoch).collect()
    }

    /// Epochs at which `best_valid_model` was written.
    pub fn best_valid_epochs(&self) -> Vec<usize> {
        self.epochs.iter().filter(|e| e.saved_best_valid).map(|e| e.epoch).collect()
    }
}
