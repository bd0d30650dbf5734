use std::sync::Arc;

use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};

use crate::config::ModelConfig;
use crate::layers::LoadOptions;
use crate::layers::embedding::EmbeddingLayer;
use crate::layers::layer::{Layer, ToDevice};
use crate::layers::lm_head::LMHeadLayer;
use crate::layers::rms_norm::RMSNormLayer;
use crate::llm::causal_self_attention::KVCache;
use crate::llm::decoder::DecoderLayer;

/// A causal language model that can be stepped token by token.
pub trait Model: Send + Sync {
    /// Logits of shape `(batch, seq_len, vocab)` for `input_ids` of shape
    /// `(batch, seq_len)`, whose first token sits at absolute `position`.
    fn forward_with_cache(
        &self,
        input_ids: &Tensor,
        kv_caches: &mut [KVCache],
        position: usize,
    ) -> CandleResult<Tensor>;

    fn num_layers(&self) -> usize;

    fn device(&self) -> &Device;

    /// Copy of this model with every weight placed on `device`.
    fn to_device(&self, device: &Device) -> CandleResult<Arc<dyn Model>>;
}

pub struct LlamaModel {
    device: Device,
    embed_layer: EmbeddingLayer,
    decoder_layers: Vec<DecoderLayer>,
    norm_layer: RMSNormLayer,
    lm_head: LMHeadLayer,
    tied_embeddings: bool,
}

impl LlamaModel {
    pub fn new(
        weights: &MmapedSafetensors,
        config: &ModelConfig,
        options: &LoadOptions,
    ) -> CandleResult<Self> {
        let embed_layer = EmbeddingLayer::new(weights, "model.embed_tokens", options)?;

        let decoder_layers = (0..config.num_hidden_layers)
            .map(|layer_idx| {
                DecoderLayer::new(weights, &format!("model.layers.{}", layer_idx), config, options)
            })
            .collect::<CandleResult<Vec<_>>>()?;

        let norm_layer = RMSNormLayer::new(weights, "model.norm", options, config.rms_norm_eps)?;

        let lm_head = if config.tie_word_embeddings {
            LMHeadLayer::tied(embed_layer.weights())
        } else {
            LMHeadLayer::new(weights, "lm_head", options)?
        };

        Ok(Self {
            device: options.device.clone(),
            embed_layer,
            decoder_layers,
            norm_layer,
            lm_head,
            tied_embeddings: config.tie_word_embeddings,
        })
    }

    /// A tied head shares the moved embedding instead of copying it twice.
    fn moved_to(&self, device: &Device) -> CandleResult<Self> {
        let embed_layer = self.embed_layer.to_device(device)?;
        let decoder_layers = self
            .decoder_layers
            .iter()
            .map(|layer| layer.to_device(device))
            .collect::<CandleResult<Vec<_>>>()?;
        let lm_head = if self.tied_embeddings {
            LMHeadLayer::tied(embed_layer.weights())
        } else {
            self.lm_head.to_device(device)?
        };

        Ok(Self {
            device: device.clone(),
            embed_layer,
            decoder_layers,
            norm_layer: self.norm_layer.to_device(device)?,
            lm_head,
            tied_embeddings: self.tied_embeddings,
        })
    }
}

impl Model for LlamaModel {
    fn forward_with_cache(
        &self,
        input_ids: &Tensor,
        kv_caches: &mut [KVCache],
        position: usize,
    ) -> CandleResult<Tensor> {
        let input_ids = input_ids.to_device(&self.device)?;
        let mut hidden_states = self.embed_layer.forward(&input_ids)?;

        for (layer, cache) in self.decoder_layers.iter().zip(kv_caches.iter_mut()) {
            hidden_states = layer.forward_with_cache(&hidden_states, cache, position)?;
        }

        let normed_output = self.norm_layer.forward(&hidden_states)?;
        self.lm_head.forward(&normed_output)
    }

    fn num_layers(&self) -> usize {
        self.decoder_layers.len()
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn to_device(&self, device: &Device) -> CandleResult<Arc<dyn Model>> {
        Ok(Arc::new(self.moved_to(device)?))
    }
}
