/// Common model traits for text classification
pub mod model;

/// Tokenization and fixed-length batch encoding
pub mod batcher;

/// Text Classification Items
pub mod item;

/// The encoding adapter: tokenizer, model and device behind one capability
pub mod adapter;

/// Saving and restoring model parameters
pub mod checkpoint;

/// Progress telemetry
pub mod progress;

/// Held-out evaluation
pub mod evaluation;

/// Training
pub mod training;

/// Batched bulk inference
pub mod inference;

pub use adapter::{Adapter, ModelMode};
pub use batcher::{Batcher, EncodedBatch, EncodedItem, Infer, Tokenize, Train};
pub use evaluation::{evaluate, ClassificationReport, Evaluation};
pub use inference::{CsvSink, Engine, InferenceConfig, Sink, Summary};
pub use item::Item;
pub use model::Model;
pub use progress::{EpochStats, Observer, Progress};
pub use training::{Phase, Trained, Trainer, TrainingConfig};
