//! Adapt Bert for Sequence Classification to the Text Classification pipeline

use std::path::Path;

use bert_burn::model::BertModelConfig;
use burn::{
    config::Config as _,
    nn::{DropoutConfig, LinearConfig},
    tensor::backend::Backend,
};

use crate::{
    models::bert::DEFAULT_MODEL, pipelines::text_classification::Tokenize, Error, Result,
};

use super::Model;

/// The Model Configuration
#[derive(burn::config::Config)]
pub struct Config {
    // -- Fields copied from BertModelConfig because #[serde(flatten)] is not supported yet
    /// Number of attention heads in the multi-head attention
    pub num_attention_heads: usize,
    /// Number of transformer encoder layers/blocks
    pub num_hidden_layers: usize,
    /// Layer normalization epsilon
    pub layer_norm_eps: f64,
    /// Size of bert embedding (e.g., 768 for bert-base)
    pub hidden_size: usize,
    /// Size of the intermediate position wise feedforward layer
    pub intermediate_size: usize,
    /// Size of the vocabulary
    pub vocab_size: usize,
    /// Max position embeddings, for BERT equal to max_seq_len (512)
    pub max_position_embeddings: usize,
    /// Identifier for sentence type in input (e.g., 0 for single sentence, 1 for pair)
    pub type_vocab_size: usize,
    /// Dropout value across layers, typically 0.1
    pub hidden_dropout_prob: f64,
    /// BERT model name (bert)
    pub model_type: String,
    /// Index of the padding token
    pub pad_token_id: usize,
    /// Maximum sequence length for the tokenizer
    pub max_seq_len: Option<usize>,
    /// Whether to add a pooling layer to the model
    pub with_pooling_layer: Option<bool>,
    // -- End fields copied from BertModelConfig
    /// Number of classes produced by the classification head
    pub n_classes: usize,
    /// Dropout applied to the pooled output before the classification head
    #[config(default = 0.1)]
    pub classifier_dropout: f64,
    /// The Hugging Face Hub model the encoder was loaded from, which also names its tokenizer
    pub model_name: Option<String>,
}

impl Config {
    /// Attach a classification head for `n_classes` to a BERT configuration
    pub fn new_with_classes(model: BertModelConfig, n_classes: usize) -> Result<Self> {
        if n_classes == 0 {
            return Err(Error::InvalidConfig(
                "Classes are not defined in the model configuration".to_string(),
            ));
        }

        let config = Config::new(
            model.num_attention_heads,
            model.num_hidden_layers,
            model.layer_norm_eps,
            model.hidden_size,
            model.intermediate_size,
            model.vocab_size,
            model.max_position_embeddings,
            model.type_vocab_size,
            model.hidden_dropout_prob,
            model.model_type,
            model.pad_token_id,
            n_classes,
        )
        .with_max_seq_len(model.max_seq_len)
        .with_with_pooling_layer(model.with_pooling_layer);

        Ok(config)
    }

    /// Load the `config.json` published with the pretrained `model_name`
    pub fn load_pretrained(
        config_file: &Path,
        model_name: &str,
        n_classes: usize,
        dropout: f64,
    ) -> Result<Self> {
        let mut bert_config = BertModelConfig::load(config_file).map_err(|e| {
            Error::Checkpoint(format!("Unable to load Hugging Face Config file: {}", e))
        })?;

        // Enable the pooling layer for sequence classification
        bert_config.with_pooling_layer = Some(true);
        bert_config.max_seq_len = Some(bert_config.max_position_embeddings);
        bert_config.hidden_dropout_prob = dropout;

        Ok(Self::new_with_classes(bert_config, n_classes)?
            .with_classifier_dropout(dropout)
            .with_model_name(Some(model_name.to_string())))
    }

    /// The model whose tokenizer matches this encoder. An explicit `requested` name wins over
    /// the saved one; configurations saved without a name fall back to the default model.
    pub fn tokenizer_model<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        let saved = self.model_name.as_deref();

        if let (Some(requested), Some(saved)) = (requested, saved) {
            if requested != saved {
                warn!(
                    "Using the {} tokenizer for an encoder fine-tuned from {}",
                    requested, saved
                );
            }
        }

        requested.or(saved).unwrap_or(DEFAULT_MODEL)
    }

    /// Fail if `tokenizer` can emit ids beyond the encoder's embedding table
    pub fn check_tokenizer(&self, tokenizer: &dyn Tokenize) -> Result<()> {
        match tokenizer.vocab_size() {
            Some(size) if size > self.vocab_size => Err(Error::InvalidConfig(format!(
                "tokenizer has {} tokens but the encoder only embeds {}",
                size, self.vocab_size
            ))),
            _ => Ok(()),
        }
    }

    /// Load a configuration saved beside a fine-tuned checkpoint
    pub fn load_saved(path: &Path) -> Result<Self> {
        Self::load(path).map_err(|e| {
            Error::Checkpoint(format!(
                "Unable to load model config {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Save the configuration beside a fine-tuned checkpoint
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        self.save(path).map_err(|e| {
            Error::Checkpoint(format!(
                "Unable to save model config {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Get the Bert model configuration
    pub fn get_bert_config(&self) -> BertModelConfig {
        BertModelConfig::new(
            self.num_attention_heads,
            self.num_hidden_layers,
            self.layer_norm_eps,
            self.hidden_size,
            self.intermediate_size,
            self.vocab_size,
            self.max_position_embeddings,
            self.type_vocab_size,
            self.hidden_dropout_prob,
            self.model_type.clone(),
            self.pad_token_id,
        )
        .with_max_seq_len(self.max_seq_len)
        .with_with_pooling_layer(self.with_pooling_layer)
    }

    /// Initialize the model with random weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let model = self.get_bert_config().init(device);

        let dropout = DropoutConfig::new(self.classifier_dropout).init();

        let output = LinearConfig::new(self.hidden_size, self.n_classes).init(device);

        Model {
            model,
            dropout,
            output,
            n_classes: self.n_classes,
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::config::Config as _;
    use pretty_assertions::assert_eq;

    use super::*;

    fn tiny_bert() -> BertModelConfig {
        BertModelConfig::new(2, 1, 1e-12, 8, 16, 32, 16, 2, 0.1, "bert".to_string(), 0)
    }

    #[test]
    fn test_new_with_classes_round_trips_bert_fields() {
        let config = Config::new_with_classes(tiny_bert().with_with_pooling_layer(Some(true)), 3)
            .unwrap();

        assert_eq!(config.n_classes, 3);
        assert_eq!(config.classifier_dropout, 0.1);

        let bert = config.get_bert_config();
        assert_eq!(bert.hidden_size, 8);
        assert_eq!(bert.vocab_size, 32);
        assert_eq!(bert.with_pooling_layer, Some(true));
    }

    #[test]
    fn test_zero_classes_is_rejected() {
        let result = Config::new_with_classes(tiny_bert(), 0);

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    /// Reports a fixed vocabulary size and never tokenizes anything
    struct Vocabulary(usize);

    impl Tokenize for Vocabulary {
        fn tokenize(&self, _text: &str, _max_length: usize) -> Result<Vec<u32>> {
            Ok(Vec::new())
        }

        fn pad_token_id(&self) -> u32 {
            0
        }

        fn vocab_size(&self) -> Option<usize> {
            Some(self.0)
        }
    }

    #[test]
    fn test_pretrained_model_name_is_saved_with_the_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let pretrained = dir.path().join("config.json");
        tiny_bert().save(&pretrained).unwrap();

        let config = Config::load_pretrained(&pretrained, "bert-base-cased", 3, 0.2).unwrap();
        let saved = dir.path().join("model.json");
        config.save_to(&saved).unwrap();

        let loaded = Config::load_saved(&saved).unwrap();
        assert_eq!(loaded.model_name.as_deref(), Some("bert-base-cased"));
        assert_eq!(loaded.tokenizer_model(None), "bert-base-cased");
        assert_eq!(loaded.tokenizer_model(Some("bert-base-uncased")), "bert-base-uncased");
        assert_eq!(loaded.classifier_dropout, 0.2);
        assert_eq!(loaded.with_pooling_layer, Some(true));
    }

    #[test]
    fn test_unnamed_config_uses_the_default_tokenizer() {
        let config = Config::new_with_classes(tiny_bert(), 3).unwrap();

        assert_eq!(config.tokenizer_model(None), DEFAULT_MODEL);
    }

    #[test]
    fn test_larger_tokenizer_vocabulary_is_rejected() {
        let config = Config::new_with_classes(tiny_bert(), 3).unwrap();

        assert!(config.check_tokenizer(&Vocabulary(32)).is_ok());
        assert!(matches!(
            config.check_tokenizer(&Vocabulary(30522)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_saved_config_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");

        let config = Config::new_with_classes(tiny_bert(), 3).unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_saved(&path).unwrap();
        assert_eq!(loaded.n_classes, 3);
        assert_eq!(loaded.model_type, "bert");
    }
}
