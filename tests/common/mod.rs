#![allow(dead_code)]

use std::sync::Arc;

use burn::{
    backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
    module::Module,
    nn::{Embedding, EmbeddingConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Tensor},
};
use orientx::{
    datasets::{orientation, Sample},
    pipelines::text_classification::{Adapter, Infer, Model, Tokenize},
    Error, Result,
};

pub type TestBackend = NdArray<f32>;
pub type TestAutodiffBackend = Autodiff<TestBackend>;

pub const VOCAB_SIZE: usize = 64;
pub const HIDDEN_SIZE: usize = 8;
pub const N_CLASSES: usize = 3;

/// Texts containing this marker cannot be tokenized
pub const FAIL_MARKER: &str = "<fail>";

/// Maps every byte to its own id, after a leading [CLS]
pub struct ByteTokenizer;

impl Tokenize for ByteTokenizer {
    fn tokenize(&self, text: &str, _max_length: usize) -> Result<Vec<u32>> {
        if text.contains(FAIL_MARKER) {
            return Err(Error::Encoding(format!("cannot tokenize {:?}", text)));
        }

        let mut ids = vec![1];
        ids.extend(text.bytes().map(|b| (b as u32 % (VOCAB_SIZE as u32 - 2)) + 2));

        Ok(ids)
    }

    fn pad_token_id(&self) -> u32 {
        0
    }
}

/// Mean of token embeddings over the unpadded positions, then a linear head
#[derive(Module, Debug)]
pub struct TinyClassifier<B: Backend> {
    embedding: Embedding<B>,
    output: Linear<B>,
    n_classes: usize,
}

impl<B: Backend> TinyClassifier<B> {
    pub fn new(n_classes: usize, device: &B::Device) -> Self {
        Self {
            embedding: EmbeddingConfig::new(VOCAB_SIZE, HIDDEN_SIZE).init(device),
            output: LinearConfig::new(HIDDEN_SIZE, n_classes).init(device),
            n_classes,
        }
    }
}

impl<B: Backend> Model<B> for TinyClassifier<B> {
    fn forward(&self, input: Infer<B>) -> Tensor<B, 2> {
        let [batch_size, seq_length] = input.tokens.dims();

        let hidden = self.embedding.forward(input.tokens);
        let keep = input
            .mask_pad
            .bool_not()
            .float()
            .reshape([batch_size, seq_length, 1]);

        let summed = (hidden * keep.clone()).sum_dim(1);
        let count = keep.sum_dim(1).clamp_min(1.0);
        let pooled = (summed / count).reshape([batch_size, HIDDEN_SIZE]);

        self.output.forward(pooled)
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

pub fn device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

pub fn tokenizer() -> Arc<dyn Tokenize> {
    Arc::new(ByteTokenizer)
}

pub fn training_adapter(
    n_classes: usize,
) -> Adapter<TestAutodiffBackend, TinyClassifier<TestAutodiffBackend>> {
    TestAutodiffBackend::seed(7);
    let model = TinyClassifier::new(n_classes, &device());

    Adapter::for_training(tokenizer(), model, device(), 16)
}

pub fn inference_adapter(
    n_classes: usize,
) -> Adapter<TestBackend, TinyClassifier<TestBackend>> {
    TestBackend::seed(7);
    let model = TinyClassifier::new(n_classes, &device());

    Adapter::for_inference(tokenizer(), model, device(), 16)
}

/// Three easily separated classes: each text repeats a class-specific word
pub fn separable_samples(per_class: usize) -> Vec<Sample> {
    let words = ["aaaa", "mmmm", "zzzz"];

    (0..per_class)
        .flat_map(|i| {
            words.iter().enumerate().map(move |(label, word)| {
                Sample::new(format!("{} {}", word.repeat(1 + i % 3), word), Some(label))
            })
        })
        .collect()
}

pub fn split(per_class: usize) -> (orientation::Dataset, orientation::Dataset) {
    let samples = separable_samples(per_class);
    let (train, valid) = orientation::stratified_split(samples, 0.25, true, 3).unwrap();

    (orientation::Dataset::new(train), orientation::Dataset::new(valid))
}
