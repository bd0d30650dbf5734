use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};

use crate::config::ModelConfig;
use crate::layers::LoadOptions;
use crate::layers::activation::Activation;
use crate::layers::layer::{Layer, ToDevice};
use crate::layers::rms_norm::RMSNormLayer;
use crate::llm::causal_self_attention::{CausalSelfAttentionLayer, KVCache};
use crate::llm::mlp::MlpLayer;

pub struct DecoderLayer {
    self_attn: CausalSelfAttentionLayer,
    mlp: MlpLayer,
    input_norm: RMSNormLayer,
    post_attention_norm: RMSNormLayer,
    device: Device,
}

impl DecoderLayer {
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        config: &ModelConfig,
        options: &LoadOptions,
    ) -> CandleResult<Self> {
        let self_attn = CausalSelfAttentionLayer::new(
            weights,
            &format!("{}.self_attn", prefix),
            config.num_attention_heads,
            config.num_kv_heads(),
            config.hidden_size,
            config.rope_theta,
            options,
        )?;

        let mlp = MlpLayer::new(
            weights,
            &format!("{}.mlp", prefix),
            options,
            Activation::try_from(config.hidden_activation.as_str())?,
        )?;

        let input_norm = RMSNormLayer::new(
            weights,
            &format!("{}.input_layernorm", prefix),
            options,
            config.rms_norm_eps,
        )?;

        let post_attention_norm = RMSNormLayer::new(
            weights,
            &format!("{}.post_attention_layernorm", prefix),
            options,
            config.rms_norm_eps,
        )?;

        Ok(Self {
            self_attn,
            mlp,
            input_norm,
            post_attention_norm,
            device: options.device.clone(),
        })
    }

    pub fn forward_with_cache(
        &self,
        input: &Tensor,
        kv_cache: &mut KVCache,
        position: usize,
    ) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let normed_input = self.input_norm.forward(&input)?;
        let attn_output = self
            .self_attn
            .forward_with_cache(&normed_input, kv_cache, position)?;
        let attn_residual = input.add(&attn_output)?;

        let normed_attn = self.post_attention_norm.forward(&attn_residual)?;
        let mlp_output = self.mlp.forward(&normed_attn)?;
        attn_residual.add(&mlp_output)
    }
}

impl ToDevice for DecoderLayer {
    fn to_device(&self, device: &Device) -> CandleResult<Self> {
        Ok(Self {
            self_attn: self.self_attn.to_device(device)?,
            mlp: self.mlp.to_device(device)?,
            input_norm: self.input_norm.to_device(device)?,
            post_attention_norm: self.post_attention_norm.to_device(device)?,
            device: device.clone(),
        })
    }
}
