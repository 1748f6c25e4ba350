/// bert-base-uncased
pub static BASE_UNCASED: &str = "bert-base-uncased";

/// bert-base-cased
pub static BASE_CASED: &str = "bert-base-cased";

/// All BERT checkpoints known to work with the text classification head
pub static ALL_MODELS: &[&str; 2] = &[BASE_UNCASED, BASE_CASED];

/// The checkpoint fine-tuned when none is configured
pub static DEFAULT_MODEL: &str = BASE_UNCASED;

/// BERT for Text Classification (such as political orientation)
pub mod text_classification;
