use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use super::batcher::Infer;

/// A trait for models that can be used for Text Classification
pub trait Model<B: Backend>: Module<B> {
    /// Forward pass returning class logits shaped `[batch_size, n_classes]`
    fn forward(&self, input: Infer<B>) -> Tensor<B, 2>;

    /// Total number of classes produced by the classification head
    fn n_classes(&self) -> usize;
}
