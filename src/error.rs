use crate::pipelines::text_classification::ModelMode;

/// Errors raised by the classification pipeline
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The input schema is malformed; raised before any compute begins
    #[error("data format error: {0}")]
    DataFormat(String),

    /// A batch could not be tokenized or run through the model
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Model state could not be loaded or saved
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Classified rows could not be written to the output destination
    #[error("unable to write output: {0}")]
    IoWrite(String),

    /// Inputs and labels disagree on the batch size
    #[error("malformed batch: {inputs} input sequences but {labels} labels")]
    BatchShape {
        /// Number of encoded input sequences
        inputs: usize,
        /// Number of labels
        labels: usize,
    },

    /// The model is not in the mode the operation requires
    #[error("model is in {actual} mode but {expected} mode is required")]
    Mode {
        /// The mode the operation requires
        expected: ModelMode,
        /// The mode the adapter was built in
        actual: ModelMode,
    },

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The process was interrupted before batching began
    #[error("interrupted")]
    Interrupted,

    /// Generic I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// CSV reader/writer failure
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Result alias for the pipeline
pub type Result<T, E = Error> = std::result::Result<T, E>;
