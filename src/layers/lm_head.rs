use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};

use crate::layers::LoadOptions;
use crate::layers::layer::{Layer, ToDevice};

pub struct LMHeadLayer {
    weights: Tensor,
    device: Device,
}

impl LMHeadLayer {
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        options: &LoadOptions,
    ) -> CandleResult<Self> {
        let weights = options.load(weights, &format!("{}.weight", prefix))?;
        Ok(Self {
            weights,
            device: options.device.clone(),
        })
    }

    /// Head that projects with the (tied) input embedding matrix.
    pub fn tied(embedding: &Tensor) -> Self {
        Self {
            weights: embedding.clone(),
            device: embedding.device().clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn weights(&self) -> &Tensor {
        &self.weights
    }
}

impl Layer for LMHeadLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        input.broadcast_matmul(&self.weights.t()?)
    }
}

impl ToDevice for LMHeadLayer {
    fn to_device(&self, device: &Device) -> CandleResult<Self> {
        Ok(Self {
            weights: self.weights.to_device(device)?,
            device: device.clone(),
        })
    }
}
