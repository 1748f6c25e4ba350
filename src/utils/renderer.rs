use derive_new::new;

use crate::pipelines::text_classification::{EpochStats, Observer, Progress};

/// Reports training and inference telemetry as log lines
#[derive(new)]
pub struct LogObserver {}

impl Observer for LogObserver {
    fn on_epoch(&mut self, stats: &EpochStats) {
        info!(
            "Epoch {}/{} | train_loss={:.4} | valid_accuracy={:.2}% | lr={:.2e} | {:.1?}",
            stats.epoch,
            stats.num_epochs,
            stats.train_loss,
            stats.valid_accuracy * 100.0,
            stats.learning_rate,
            stats.elapsed
        );
    }

    fn on_batch(&mut self, progress: &Progress) {
        let eta = progress
            .eta()
            .map(|eta| format!("{:.0?}", eta))
            .unwrap_or_else(|| "unknown".to_string());

        info!(
            "{}/{} rows ({}/{} batches) | {:.1} rows/s | eta {} | {} failed",
            progress.rows_processed,
            progress.total_rows,
            progress.batches_completed,
            progress.total_batches,
            progress.throughput(),
            eta,
            progress.failed_rows
        );
    }

    fn on_flush(&mut self, rows: usize, total_flushed: usize) {
        debug!("Appended {} rows ({} written so far)", rows, total_flushed);
    }
}
