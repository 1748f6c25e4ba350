use bert_burn::{
    data::BertInferenceBatch,
    model::{BertModel, BertModelOutput},
};
use burn::{
    module::Module,
    nn::{Dropout, Linear},
    tensor::{backend::Backend, Tensor},
};
use derive_new::new;

use crate::pipelines::text_classification::{self, Infer};

/// BERT for text Classification
#[derive(Module, Debug, new)]
pub struct Model<B: Backend> {
    /// The base BERT model
    pub model: BertModel<B>,

    /// Dropout applied to the pooled output
    pub dropout: Dropout,

    /// Linear layer for text classification
    pub output: Linear<B>,

    /// Total number of classes
    pub n_classes: usize,
}

impl<B: Backend> text_classification::Model<B> for Model<B> {
    fn forward(&self, input: Infer<B>) -> Tensor<B, 2> {
        let [batch_size, _seq_length] = input.tokens.dims();

        let BertModelOutput {
            pooled_output,
            hidden_states,
        } = self.model.forward(BertInferenceBatch {
            tokens: input.tokens,
            mask_pad: input.mask_pad,
        });

        let pooled = self.dropout.forward(pooled_output.unwrap_or(hidden_states));

        self.output
            .forward(pooled)
            .slice([0..batch_size, 0..1])
            .reshape([batch_size, self.n_classes])
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}
