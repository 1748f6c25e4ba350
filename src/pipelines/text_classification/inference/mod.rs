//! Bulk classification of large corpora.
//!
//! The corpus is cut into fixed-size batches in row order. Batches run on a bounded
//! [`rayon`] pool that shares one read-only model, complete in any order, and are put back
//! in row order by a [`Reassembler`]. Every `flush_threshold` ordered rows are appended to
//! the [`Sink`], so a crash loses at most the rows not yet flushed. A batch that fails to
//! encode or classify yields empty predictions for its own rows and nothing else. Malformed
//! corpus rows are written with an empty prediction without being sent to the model.
//!
//! Raising the engine's interrupt flag stops new submissions. Batches already in flight run
//! to completion and the ordered rows they produce are still flushed.

use std::{
    any::Any,
    num::NonZeroUsize,
    ops::Range,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    time::Instant,
};

use burn::tensor::backend::Backend;
use csv::StringRecord;

use crate::{datasets::Corpus, Error, Result};

use super::{Adapter, Model, ModelMode, Observer, Progress};

/// Order-restoring prediction buffer
pub mod reassembly;

/// Output destinations
pub mod sink;

pub use reassembly::Reassembler;
pub use sink::{CsvSink, Sink};

/// Settings for bulk inference
#[derive(burn::config::Config)]
pub struct InferenceConfig {
    /// Maximum sequence length
    #[config(default = 300)]
    pub max_length: usize,

    /// Rows per batch
    #[config(default = 256)]
    pub batch_size: usize,

    /// Ordered rows to accumulate before appending them to the output
    #[config(default = 1000)]
    pub flush_threshold: usize,

    /// Worker threads; defaults to the available parallelism
    pub num_workers: Option<usize>,

    /// Batches allowed in flight before submission blocks; defaults to twice the workers
    pub queue_depth: Option<usize>,

    /// Input column holding the post text
    #[config(default = "\"content\".to_string()")]
    pub text_column: String,

    /// Output column appended with the predicted label
    #[config(default = "\"orientation\".to_string()")]
    pub output_column: String,
}

/// Counters for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Rows in the corpus
    pub rows: usize,

    /// Batches dispatched
    pub batches: usize,

    /// Batches whose rows received no prediction
    pub failed_batches: usize,

    /// Rows written with an empty prediction because their batch failed
    pub failed_rows: usize,

    /// Rows written with an empty prediction because they did not match the header
    pub malformed_rows: usize,

    /// Rows appended to the output
    pub flushed_rows: usize,

    /// Flushes that could not be written
    pub write_failures: usize,

    /// Rows dropped by failed flushes
    pub lost_rows: usize,

    /// The run was interrupted before every batch was submitted
    pub interrupted: bool,
}

/// Classifies a corpus with a shared, read-only model
pub struct Engine<'a, B: Backend, M> {
    adapter: &'a Adapter<B, M>,
    config: InferenceConfig,
    interrupt: Option<&'a AtomicBool>,
}

impl<'a, B, M> Engine<'a, B, M>
where
    B: Backend,
    M: Model<B> + Sync,
{
    /// Create an engine around an inference-mode adapter
    pub fn new(adapter: &'a Adapter<B, M>, config: InferenceConfig) -> Result<Self> {
        for (name, value) in [
            ("batch_size", Some(config.batch_size)),
            ("flush_threshold", Some(config.flush_threshold)),
            ("max_length", Some(config.max_length)),
            ("num_workers", config.num_workers),
            ("queue_depth", config.queue_depth),
        ] {
            if value == Some(0) {
                return Err(Error::InvalidConfig(format!("{} must be at least 1", name)));
            }
        }

        Ok(Self {
            adapter,
            config,
            interrupt: None,
        })
    }

    /// Stop submitting batches once `interrupt` is raised
    pub fn with_interrupt(mut self, interrupt: &'a AtomicBool) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Classify every row of `corpus`, writing the input columns plus the predicted label to
    /// `sink`, which is reset first.
    ///
    /// Returns once every submitted batch has completed and the last partial block has been
    /// flushed. Failed batches and failed flushes are logged and counted, not returned.
    pub fn run<S: Sink, O: Observer>(
        &self,
        corpus: &Corpus,
        sink: &mut S,
        observer: &mut O,
    ) -> Result<Summary> {
        self.adapter.require(ModelMode::Inference)?;

        let mut headers = corpus.headers().clone();
        headers.push_field(&self.config.output_column);
        sink.reset(&headers)?;

        let batch_size = self.config.batch_size;
        let total_rows = corpus.len();
        let total_batches = total_rows.div_ceil(batch_size);

        let workers = self.config.num_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        });
        let queue_depth = self.config.queue_depth.unwrap_or(workers * 2);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("classify-{}", index))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("unable to start worker pool: {}", e)))?;

        info!(
            "Classifying {} rows in {} batches of {} on {} workers",
            total_rows, total_batches, batch_size, workers
        );

        let mut collector = Collector {
            corpus,
            sink,
            observer,
            reassembler: Reassembler::new(batch_size),
            batch_size,
            flush_threshold: self.config.flush_threshold,
            total_batches,
            started: Instant::now(),
            summary: Summary {
                rows: total_rows,
                malformed_rows: corpus.malformed(),
                ..Summary::default()
            },
            rows_processed: 0,
            batches_completed: 0,
        };

        let (tx, rx) = mpsc::channel::<(usize, Result<Vec<Option<usize>>>)>();
        let adapter = self.adapter;
        let max_length = self.config.max_length;
        let interrupt = self.interrupt;

        pool.in_place_scope(|scope| {
            let mut in_flight = 0;

            for batch_index in 0..total_batches {
                // Admission: wait for a slot before submitting more work
                if in_flight >= queue_depth {
                    match rx.recv() {
                        Ok((index, outcome)) => collector.complete(index, outcome),
                        Err(_) => break,
                    }
                    in_flight -= 1;
                }

                if interrupt.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                    warn!(
                        "Interrupted after submitting {} of {} batches, waiting for {} in flight",
                        batch_index, total_batches, in_flight
                    );
                    collector.summary.interrupted = true;
                    break;
                }

                let start = batch_index * batch_size;
                let rows = start..(start + batch_size).min(total_rows);
                let tx = tx.clone();

                scope.spawn(move |_| {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        classify_rows(adapter, corpus, rows, max_length)
                    }))
                    .unwrap_or_else(|panic| Err(Error::Encoding(panic_message(panic))));

                    // The receiver lives until the scope ends
                    let _ = tx.send((batch_index, outcome));
                });
                collector.summary.batches += 1;
                in_flight += 1;
            }

            while in_flight > 0 {
                match rx.recv() {
                    Ok((index, outcome)) => collector.complete(index, outcome),
                    Err(_) => break,
                }
                in_flight -= 1;
            }
        });

        collector.finish();
        let summary = collector.summary;

        info!(
            "Classified {} rows in {:.1?}: {} failed in {} batches, {} flushed, {} lost to {} write failures",
            summary.rows,
            collector.started.elapsed(),
            summary.failed_rows,
            summary.failed_batches,
            summary.flushed_rows,
            summary.lost_rows,
            summary.write_failures
        );

        Ok(summary)
    }
}

/// Orchestrator-side state: everything here is touched only by the calling thread
struct Collector<'c, S, O> {
    corpus: &'c Corpus,
    sink: &'c mut S,
    observer: &'c mut O,
    reassembler: Reassembler,
    batch_size: usize,
    flush_threshold: usize,
    total_batches: usize,
    started: Instant,
    summary: Summary,
    rows_processed: usize,
    batches_completed: usize,
}

impl<'c, S: Sink, O: Observer> Collector<'c, S, O> {
    fn complete(&mut self, batch_index: usize, outcome: Result<Vec<Option<usize>>>) {
        let start = batch_index * self.batch_size;
        let len = self.batch_size.min(self.corpus.len() - start);

        let predictions = match outcome {
            Ok(labels) if labels.len() == len => labels,
            Ok(labels) => self.failed(
                batch_index,
                start,
                len,
                Error::Encoding(format!("{} predictions for {} rows", labels.len(), len)),
            ),
            Err(e) => self.failed(batch_index, start, len, e),
        };

        self.reassembler.complete(batch_index, predictions);
        self.rows_processed += len;
        self.batches_completed += 1;

        self.observer.on_batch(&Progress {
            rows_processed: self.rows_processed,
            total_rows: self.corpus.len(),
            batches_completed: self.batches_completed,
            total_batches: self.total_batches,
            failed_rows: self.summary.failed_rows,
            elapsed: self.started.elapsed(),
        });

        while self.reassembler.ready() >= self.flush_threshold {
            let (first_row, rows) = self.reassembler.take(self.flush_threshold);
            self.flush(first_row, rows);
        }
    }

    fn failed(&mut self, batch_index: usize, start: usize, len: usize, e: Error) -> Vec<Option<usize>> {
        warn!(
            "Batch {} (rows {}..{}) failed and will be written without predictions: {}",
            batch_index,
            start,
            start + len,
            e
        );

        self.summary.failed_batches += 1;
        self.summary.failed_rows += len;

        vec![None; len]
    }

    fn finish(&mut self) {
        let (first_row, rows) = self.reassembler.take(usize::MAX);

        if !rows.is_empty() {
            self.flush(first_row, rows);
        }
    }

    fn flush(&mut self, first_row: usize, predictions: Vec<Option<usize>>) {
        let records: Vec<StringRecord> = predictions
            .iter()
            .enumerate()
            .map(|(offset, prediction)| {
                let mut record = self
                    .corpus
                    .row(first_row + offset)
                    .cloned()
                    .unwrap_or_default();
                record.push_field(&prediction.map(|label| label.to_string()).unwrap_or_default());

                record
            })
            .collect();

        match self.sink.append(&records) {
            Ok(()) => {
                self.summary.flushed_rows += records.len();
                debug!(
                    "Flushed rows {}..{}",
                    first_row,
                    first_row + records.len()
                );
                self.observer
                    .on_flush(records.len(), self.summary.flushed_rows);
            }
            Err(e) => {
                error!(
                    "Rows {}..{} were not written and are lost: {}",
                    first_row,
                    first_row + records.len(),
                    e
                );
                self.summary.write_failures += 1;
                self.summary.lost_rows += records.len();
            }
        }
    }
}

/// Predict the well-formed rows in `rows`; malformed rows get no prediction
fn classify_rows<B: Backend, M: Model<B>>(
    adapter: &Adapter<B, M>,
    corpus: &Corpus,
    rows: Range<usize>,
    max_length: usize,
) -> Result<Vec<Option<usize>>> {
    let well_formed: Vec<usize> = rows.clone().filter(|&row| !corpus.is_malformed(row)).collect();
    let texts: Vec<String> = well_formed
        .iter()
        .map(|&row| corpus.text(row).unwrap_or_default().to_string())
        .collect();

    let batch = adapter.encode(&texts, max_length)?;
    let labels = adapter.predict(&batch)?;

    if labels.len() != texts.len() {
        return Err(Error::Encoding(format!(
            "{} predictions for {} rows",
            labels.len(),
            texts.len()
        )));
    }

    let mut labels = labels.into_iter();

    Ok(rows
        .map(|row| {
            if corpus.is_malformed(row) {
                None
            } else {
                labels.next()
            }
        })
        .collect())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("worker panicked: {}", message)
    } else {
        "worker panicked".to_string()
    }
}
