//! # OrientX
//!
//! Fine-tunes a pretrained BERT encoder to classify short posts into orientation labels,
//! and re-classifies large historical corpora in crash-safe, incrementally flushed batches.
#![forbid(unsafe_code)]

/// Models
pub mod models;

/// Pipelines
pub mod pipelines;

/// Datasets
pub mod datasets;

/// Utilities
pub mod utils;

/// CLI indexes and utilities
pub mod cli;

/// Error taxonomy
pub mod error;

pub use error::{Error, Result};

/// Logging macros
#[macro_use]
extern crate log;
