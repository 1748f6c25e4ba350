use std::fmt::Display;

/// The unique string token that selects fine-tuning
pub static TRAIN: &str = "train";

/// The unique string token that selects bulk classification
pub static INFERENCE: &str = "inference";

/// Available run modes
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Mode {
    /// Fine-tune a classifier on a labelled dataset and checkpoint it
    Train,
    /// Classify an unlabelled corpus with a saved checkpoint
    Inference,
}

impl TryFrom<&str> for Mode {
    type Error = ModeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            v if v == TRAIN => Ok(Mode::Train),
            v if v == INFERENCE => Ok(Mode::Inference),
            _ => Err(ModeError::Unknown(value.to_string())),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Train => TRAIN,
            Mode::Inference => INFERENCE,
        };

        write!(f, "{}", name)
    }
}

/// Mode Error
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ModeError {
    /// No mode found for the given string
    #[error("no mode found for {0}, expected 'train' or 'inference'")]
    Unknown(String),
}
