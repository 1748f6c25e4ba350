/// The model configuration
pub mod config;

/// BERT with a classification head
pub mod model;

/// Pretrained weights
pub mod loader;

pub use config::Config;
pub use loader::load_pretrained;
pub use model::{Model, ModelRecord};
