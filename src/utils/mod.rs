/// Accelerator probing and device selection
pub mod device;

/// Hugging Face utilities
pub mod hugging_face;

/// Tensor Utilities
pub mod tensors;

/// Renderer Utilities
pub mod renderer;
