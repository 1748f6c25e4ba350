use std::path::PathBuf;

use hf_hub::api::tokio;
use tokenizers::{Tokenizer, TruncationDirection};

use crate::{pipelines::text_classification::Tokenize, Error, Result};

/// Download model config and weights from Hugging Face Hub
/// If file exists in cache, it will not be downloaded again
pub async fn download_hf_model(model_name: &str) -> Result<(PathBuf, PathBuf)> {
    let api = tokio::Api::new()
        .map_err(|e| Error::Checkpoint(format!("unable to reach Hugging Face Hub: {}", e)))?;
    let repo = api.model(model_name.to_string());

    let model_filepath = repo.get("model.safetensors").await.map_err(|e| {
        Error::Checkpoint(format!(
            "Failed to download: {} weights with name: model.safetensors from HuggingFace Hub: {}",
            model_name, e
        ))
    })?;

    let config_filepath = download_hf_config(model_name).await?;

    Ok((config_filepath, model_filepath))
}

/// Download only the model config, which is enough to rebuild the architecture before
/// loading a fine-tuned checkpoint
pub async fn download_hf_config(model_name: &str) -> Result<PathBuf> {
    let api = tokio::Api::new()
        .map_err(|e| Error::Checkpoint(format!("unable to reach Hugging Face Hub: {}", e)))?;

    api.model(model_name.to_string())
        .get("config.json")
        .await
        .map_err(|e| {
            Error::Checkpoint(format!(
                "Failed to download: {} config with name: config.json from HuggingFace Hub: {}",
                model_name, e
            ))
        })
}

/// A pretrained Hugging Face tokenizer that keeps its special tokens when truncating
pub struct HfTokenizer {
    tokenizer: Tokenizer,
    pad_token_id: u32,
}

impl HfTokenizer {
    /// Fetch the tokenizer published with `model_name`
    pub fn from_pretrained(model_name: &str, pad_token_id: usize) -> Result<Self> {
        let tokenizer = Tokenizer::from_pretrained(model_name, None).map_err(|e| {
            Error::Checkpoint(format!("unable to load tokenizer for {}: {}", model_name, e))
        })?;

        Ok(Self {
            tokenizer,
            pad_token_id: pad_token_id as u32,
        })
    }
}

impl Tokenize for HfTokenizer {
    fn tokenize(&self, text: &str, max_length: usize) -> Result<Vec<u32>> {
        let encoding_error = |e: tokenizers::Error| Error::Encoding(e.to_string());

        let mut encoding = self.tokenizer.encode(text, false).map_err(encoding_error)?;

        // Leave room for [CLS] and [SEP] so they survive truncation
        let special = self
            .tokenizer
            .get_post_processor()
            .map(|processor| tokenizers::PostProcessor::added_tokens(processor, false))
            .unwrap_or(0);
        encoding.truncate(max_length.saturating_sub(special), 0, TruncationDirection::Right);

        let encoding = self
            .tokenizer
            .post_process(encoding, None, true)
            .map_err(encoding_error)?;

        Ok(encoding.get_ids().to_vec())
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    fn vocab_size(&self) -> Option<usize> {
        Some(self.tokenizer.get_vocab_size(true))
    }
}
