use std::time::Duration;

use burn::LearningRate;
use serde::{Deserialize, Serialize};

/// Per-epoch training statistics, reported once every epoch has been evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number
    pub epoch: usize,

    /// Total epochs requested for this run
    pub num_epochs: usize,

    /// Mean cross-entropy loss over the epoch's training batches
    pub train_loss: f64,

    /// Accuracy on the validation split, as a fraction in [0, 1]
    pub valid_accuracy: f64,

    /// Learning rate applied to the last batch of the epoch
    pub learning_rate: LearningRate,

    /// Wall-clock duration of the epoch, including evaluation
    pub elapsed: Duration,
}

/// Bulk inference progress after a batch completes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Rows whose batch has completed, successfully or not
    pub rows_processed: usize,

    /// Rows in the corpus
    pub total_rows: usize,

    /// Batches that have completed
    pub batches_completed: usize,

    /// Batches in the corpus
    pub total_batches: usize,

    /// Rows that received no prediction because their batch failed
    pub failed_rows: usize,

    /// Time since dispatch began
    pub elapsed: Duration,
}

impl Progress {
    /// Rows per second so far
    pub fn throughput(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();

        if seconds > 0.0 {
            self.rows_processed as f64 / seconds
        } else {
            0.0
        }
    }

    /// Rows still waiting for a prediction
    pub fn remaining_rows(&self) -> usize {
        self.total_rows.saturating_sub(self.rows_processed)
    }

    /// Estimated time to classify the remaining rows at the current throughput
    pub fn eta(&self) -> Option<Duration> {
        let throughput = self.throughput();

        if throughput > 0.0 {
            Some(Duration::from_secs_f64(self.remaining_rows() as f64 / throughput))
        } else {
            None
        }
    }
}

/// Receives telemetry from training and inference. Observers never influence control flow.
pub trait Observer {
    /// Called after each training epoch has been evaluated
    fn on_epoch(&mut self, _stats: &EpochStats) {}

    /// Called after each inference batch completes
    fn on_batch(&mut self, _progress: &Progress) {}

    /// Called after classified rows are appended to the output
    fn on_flush(&mut self, _rows: usize, _total_flushed: usize) {}
}

/// Discards all telemetry
impl Observer for () {}
