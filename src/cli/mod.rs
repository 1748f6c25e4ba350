/// CLI Indexes: Run modes
pub mod mode;

/// CLI Indexes: Pretrained models
pub mod model;

pub use mode::Mode;
pub use model::Model;
