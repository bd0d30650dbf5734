use candle_core::{Device, Result as CandleResult, Tensor, safetensors::MmapedSafetensors};

use crate::layers::LoadOptions;
use crate::layers::layer::{Layer, ToDevice};

pub struct EmbeddingLayer {
    weights: Tensor,
    device: Device,
}

impl EmbeddingLayer {
    pub fn new(
        weights_map: &MmapedSafetensors,
        prefix: &str,
        options: &LoadOptions,
    ) -> CandleResult<Self> {
        let weights = options.load(weights_map, &format!("{}.weight", prefix))?;

        Ok(Self {
            weights,
            device: options.device.clone(),
        })
    }

    /// Embedding matrix, shared with the LM head when word embeddings are tied.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }
}

impl Layer for EmbeddingLayer {
    fn forward(&self, input_ids: &Tensor) -> CandleResult<Tensor> {
        let input_ids = input_ids.to_device(&self.device)?;

        let (batch_size, seq_length) = input_ids.dims2()?;

        let flat_input = input_ids.reshape(&[batch_size * seq_length])?;

        let flat_embeddings = self.weights.index_select(&flat_input, 0)?;

        flat_embeddings.reshape(&[batch_size, seq_length, self.weights.dim(1)?])
    }
}

impl ToDevice for EmbeddingLayer {
    fn to_device(&self, device: &Device) -> CandleResult<Self> {
        Ok(Self {
            weights: self.weights.to_device(device)?,
            device: device.clone(),
        })
    }
}
