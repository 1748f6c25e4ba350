use std::{collections::HashMap, path::Path};

use bert_burn::{
    loader::{
        load_embeddings_from_safetensors, load_encoder_from_safetensors,
        load_pooler_from_safetensors,
    },
    model::{BertModelConfig, BertModelRecord},
};
use burn::{module::Module, tensor::backend::Backend};
use candle_core::{safetensors, Device};

use crate::{Error, Result};

use super::{Config, Model, ModelRecord};

/// Build a classifier from pretrained BERT weights with a freshly initialized head
pub fn load_pretrained<B: Backend>(
    config: &Config,
    model_file: &Path,
    device: &B::Device,
) -> Result<Model<B>> {
    let bert = from_safetensors::<B>(model_file, device, &config.get_bert_config())?;

    let model = config.init::<B>(device);

    // Keep the randomly initialized head, replace only the encoder
    let mut record: ModelRecord<B> = model.clone().into_record();
    record.model = bert;

    Ok(model.load_record(record))
}

fn from_safetensors<B: Backend>(
    file_path: &Path,
    device: &B::Device,
    config: &BertModelConfig,
) -> Result<BertModelRecord<B>> {
    let model_name = config.model_type.as_str();

    // Tensors are staged on the CPU and moved to `device` by the record loaders
    let weights = safetensors::load(file_path, &Device::Cpu).map_err(|e| {
        Error::Checkpoint(format!(
            "Error loading weights from {}: {}",
            file_path.display(),
            e
        ))
    })?;

    // Weights are stored in a HashMap<String, Tensor>
    // For each layer, it will either be prefixed with "encoder.layer.", "embeddings." or "pooler."
    let mut encoder_layers: HashMap<String, candle_core::Tensor> = HashMap::new();
    let mut embeddings_layers: HashMap<String, candle_core::Tensor> = HashMap::new();
    let mut pooler_layers: HashMap<String, candle_core::Tensor> = HashMap::new();

    let prefix = format!("{}.", model_name);

    for (key, value) in weights.iter() {
        // If model name prefix present in keys, remove it to load keys consistently
        // across variants (bert-base-uncased, bert-base-cased etc.)
        let key_without_prefix = key.replace(&prefix, "");

        if key_without_prefix.starts_with("encoder.layer.") {
            encoder_layers.insert(key_without_prefix, value.clone());
        } else if key_without_prefix.starts_with("embeddings.") {
            embeddings_layers.insert(key_without_prefix, value.clone());
        } else if key_without_prefix.starts_with("pooler.") {
            pooler_layers.insert(key_without_prefix, value.clone());
        }
    }

    if encoder_layers.is_empty() || embeddings_layers.is_empty() {
        return Err(Error::Checkpoint(format!(
            "{} does not contain {} encoder and embedding weights",
            file_path.display(),
            model_name
        )));
    }

    let embeddings = load_embeddings_from_safetensors(embeddings_layers, device);
    let encoder = load_encoder_from_safetensors(encoder_layers, device);
    let pooler = load_pooler_from_safetensors(pooler_layers, device);

    Ok(BertModelRecord {
        embeddings,
        encoder,
        pooler: Some(pooler),
    })
}
