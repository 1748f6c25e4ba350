use std::{fmt::Display, sync::Arc};

use burn::{
    data::dataset::{Dataset, InMemDataset},
    module::{AutodiffModule, Module},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};

use crate::{utils::tensors::argmax_rows, Error, Result};

use super::{EncodedBatch, EncodedItem, Infer, Item, Model, Tokenize};

/// Whether a model may have its parameters updated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelMode {
    /// Parameters are owned and mutated by a single training loop
    Training,

    /// Parameters are read-only and may be shared across workers; dropout is disabled
    Inference,
}

impl Display for ModelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelMode::Training => "training",
            ModelMode::Inference => "inference",
        };

        write!(f, "{}", name)
    }
}

/// Wraps a tokenizer, a classification model and the device it lives on behind a single
/// "text to class" capability. The device is fixed for the adapter's lifetime.
pub struct Adapter<B: Backend, M> {
    /// Tokenizer shared with any adapters derived from this one
    tokenizer: Arc<dyn Tokenize>,

    /// The classification model
    model: M,

    /// Device on which to perform computation (e.g., CPU or CUDA device)
    device: B::Device,

    /// Sequence length used by `classify`
    max_length: usize,

    /// Training or inference
    mode: ModelMode,
}

impl<B: Backend, M: Model<B>> Adapter<B, M> {
    /// Build an adapter whose model will be fine-tuned
    pub fn for_training(
        tokenizer: Arc<dyn Tokenize>,
        model: M,
        device: B::Device,
        max_length: usize,
    ) -> Self {
        Self::new(tokenizer, model, device, max_length, ModelMode::Training)
    }

    /// Build an adapter for read-only classification
    pub fn for_inference(
        tokenizer: Arc<dyn Tokenize>,
        model: M,
        device: B::Device,
        max_length: usize,
    ) -> Self {
        Self::new(tokenizer, model, device, max_length, ModelMode::Inference)
    }

    fn new(
        tokenizer: Arc<dyn Tokenize>,
        model: M,
        device: B::Device,
        max_length: usize,
        mode: ModelMode,
    ) -> Self {
        debug!("Placing {} model on {:?}", mode, device);

        Self {
            tokenizer,
            model: model.fork(&device),
            device,
            max_length,
            mode,
        }
    }

    /// Tokenize `texts`, truncating or padding each one to exactly `max_length` tokens
    pub fn encode(&self, texts: &[String], max_length: usize) -> Result<EncodedBatch> {
        EncodedBatch::encode(self.tokenizer.as_ref(), texts, max_length)
    }

    /// Tokenize every item of a labelled split up front, so batches can be stacked without
    /// further failures
    pub fn encode_dataset<I: Item, D: Dataset<I>>(
        &self,
        dataset: &D,
        max_length: usize,
    ) -> Result<InMemDataset<EncodedItem>> {
        let items: Vec<I> = dataset.iter().collect();
        let texts: Vec<String> = items.iter().map(|item| item.input().to_string()).collect();
        let labels = items
            .iter()
            .map(|item| {
                item.class_id()
                    .ok_or_else(|| Error::DataFormat(format!("unlabelled item: {:?}", item)))
            })
            .collect::<Result<Vec<_>>>()?;

        let batch = self.encode(&texts, max_length)?.with_labels(labels)?;

        Ok(InMemDataset::new(batch.into_items()?))
    }

    /// Class logits for an encoded batch, shaped `[batch_size, n_classes]`
    pub fn logits(&self, batch: &EncodedBatch) -> Tensor<B, 2> {
        self.model.forward(batch.to_infer(&self.device))
    }

    /// Arg-max class id for every sequence in the batch
    pub fn predict(&self, batch: &EncodedBatch) -> Result<Vec<usize>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        self.predict_input(batch.to_infer(&self.device))
    }

    /// Arg-max class id for every row of a batch already on the adapter's device
    pub fn predict_input(&self, input: Infer<B>) -> Result<Vec<usize>> {
        let [sequences, _] = input.tokens.dims();

        let logits = self.model.forward(input);
        let [rows, classes] = logits.dims();

        if rows != sequences || classes != self.model.n_classes() {
            return Err(Error::Encoding(format!(
                "model returned [{}, {}] logits for {} sequences and {} classes",
                rows,
                classes,
                sequences,
                self.model.n_classes()
            )));
        }

        Ok(argmax_rows(logits))
    }

    /// Encode with the adapter's own `max_length` and predict
    pub fn classify(&self, texts: &[String]) -> Result<Vec<usize>> {
        let batch = self.encode(texts, self.max_length)?;

        self.predict(&batch)
    }

    /// Fail unless the adapter was built for `expected`
    pub fn require(&self, expected: ModelMode) -> Result<()> {
        if self.mode != expected {
            return Err(Error::Mode {
                expected,
                actual: self.mode,
            });
        }

        Ok(())
    }

    /// Replace the model with the result of `update`, such as an optimizer step
    pub fn map_model<F: FnOnce(M) -> M>(self, update: F) -> Self {
        Self {
            model: update(self.model),
            ..self
        }
    }

    /// The classification model
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The device the model lives on
    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

impl<B, M> Adapter<B, M>
where
    B: AutodiffBackend,
    M: Model<B> + AutodiffModule<B>,
    M::InnerModule: Model<B::InnerBackend>,
{
    /// A read-only copy of the model on the inner backend, without gradient tracking or dropout
    pub fn valid(&self) -> Adapter<B::InnerBackend, M::InnerModule> {
        Adapter {
            tokenizer: self.tokenizer.clone(),
            model: self.model.valid(),
            device: self.device.clone(),
            max_length: self.max_length,
            mode: ModelMode::Inference,
        }
    }
}
