use burn::{
    data::dataloader,
    tensor::{backend::Backend, Bool, Int, Tensor},
};
use derive_new::new;

use crate::{
    utils::tensors::{int_matrix, int_vector},
    Error, Result,
};

/// Converts text into token ids
pub trait Tokenize: Send + Sync {
    /// Tokenize `text`, including any special tokens. The result may be longer than
    /// `max_length`; implementations should truncate when they can do so cleanly.
    fn tokenize(&self, text: &str, max_length: usize) -> Result<Vec<u32>>;

    /// The id used to pad sequences to a fixed length
    fn pad_token_id(&self) -> u32;

    /// Number of distinct ids the tokenizer can emit, if known
    fn vocab_size(&self) -> Option<usize> {
        None
    }
}

/// An inference batch for text classification
#[derive(Debug, Clone, new)]
pub struct Infer<B: Backend> {
    /// Tokenized text as 2D tensor: [batch_size, max_seq_length]
    pub tokens: Tensor<B, 2, Int>,

    /// Padding mask for the tokenized text containing booleans for padding locations
    pub mask_pad: Tensor<B, 2, Bool>,
}

/// A training batch for text classification
#[derive(Clone, Debug, new)]
pub struct Train<B: Backend> {
    /// Model input
    pub input: Infer<B>,

    /// Class ids for the batch
    pub targets: Tensor<B, 1, Int>,
}

/// One labelled sequence, already padded to its batch's `max_length`
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct EncodedItem {
    /// Token ids
    pub input_ids: Vec<u32>,

    /// 1 for real tokens, 0 for padding
    pub attention_mask: Vec<u32>,

    /// Class id
    pub label: usize,
}

/// Token ids and attention masks for a batch of texts, all exactly `max_length` long
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    input_ids: Vec<Vec<u32>>,
    attention_mask: Vec<Vec<u32>>,
    labels: Option<Vec<usize>>,
    max_length: usize,
}

impl EncodedBatch {
    /// Tokenize `texts`, truncating or padding every sequence to exactly `max_length`
    pub fn encode<T: Tokenize + ?Sized>(
        tokenizer: &T,
        texts: &[String],
        max_length: usize,
    ) -> Result<Self> {
        if max_length == 0 {
            return Err(Error::InvalidConfig(
                "max_length must be at least 1".to_string(),
            ));
        }

        let pad = tokenizer.pad_token_id();
        let mut input_ids = Vec::with_capacity(texts.len());
        let mut attention_mask = Vec::with_capacity(texts.len());

        for text in texts {
            let mut ids = tokenizer.tokenize(text, max_length)?;
            ids.truncate(max_length);

            let mut mask = vec![1; ids.len()];
            mask.resize(max_length, 0);
            ids.resize(max_length, pad);

            input_ids.push(ids);
            attention_mask.push(mask);
        }

        Ok(Self {
            input_ids,
            attention_mask,
            labels: None,
            max_length,
        })
    }

    /// Attach class ids, one per encoded sequence
    pub fn with_labels(mut self, labels: Vec<usize>) -> Result<Self> {
        if labels.len() != self.input_ids.len() {
            return Err(Error::BatchShape {
                inputs: self.input_ids.len(),
                labels: labels.len(),
            });
        }

        self.labels = Some(labels);

        Ok(self)
    }

    /// Number of sequences
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// True if the batch holds no sequences
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Token ids per sequence
    pub fn input_ids(&self) -> &[Vec<u32>] {
        &self.input_ids
    }

    /// Attention mask per sequence: 1 for real tokens, 0 for padding
    pub fn attention_mask(&self) -> &[Vec<u32>] {
        &self.attention_mask
    }

    /// Build the inference tensors on `device`
    pub fn to_infer<B: Backend>(&self, device: &B::Device) -> Infer<B> {
        let tokens = int_matrix::<B>(&self.input_ids, self.max_length, device);
        let mask_pad = int_matrix::<B>(&self.attention_mask, self.max_length, device).equal_elem(0);

        Infer { tokens, mask_pad }
    }

    /// Split into one item per sequence; labels must be attached
    pub fn into_items(self) -> Result<Vec<EncodedItem>> {
        let labels = self.labels.unwrap_or_default();

        if labels.len() != self.input_ids.len() {
            return Err(Error::BatchShape {
                inputs: self.input_ids.len(),
                labels: labels.len(),
            });
        }

        Ok(self
            .input_ids
            .into_iter()
            .zip(self.attention_mask)
            .zip(labels)
            .map(|((input_ids, attention_mask), label)| {
                EncodedItem::new(input_ids, attention_mask, label)
            })
            .collect())
    }
}

/// Stacks encoded items into tensors on a fixed device
#[derive(Clone, new)]
pub struct Batcher<B: Backend> {
    device: B::Device,
}

/// Implement Batcher trait for Batcher struct for inference
impl<B: Backend> dataloader::batcher::Batcher<EncodedItem, Infer<B>> for Batcher<B> {
    /// Collects encoded items into an inference batch
    fn batch(&self, items: Vec<EncodedItem>) -> Infer<B> {
        let width = items
            .first()
            .map(|item| item.input_ids.len())
            .unwrap_or_default();

        let (input_ids, attention_mask): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.input_ids, item.attention_mask))
            .unzip();

        let tokens = int_matrix::<B>(&input_ids, width, &self.device);
        let mask_pad = int_matrix::<B>(&attention_mask, width, &self.device).equal_elem(0);

        Infer { tokens, mask_pad }
    }
}

/// Implement Batcher trait for Batcher struct for training
impl<B: Backend> dataloader::batcher::Batcher<EncodedItem, Train<B>> for Batcher<B> {
    /// Collects encoded items into a training batch
    fn batch(&self, items: Vec<EncodedItem>) -> Train<B> {
        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();

        let input = dataloader::batcher::Batcher::<EncodedItem, Infer<B>>::batch(self, items);
        let targets = int_vector::<B>(&labels, &self.device);

        Train { input, targets }
    }
}
