use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};
use candle_nn::var_builder::SimpleBackend;

use crate::layers::LoadOptions;
use crate::layers::layer::{Layer, ToDevice};

pub struct LinearLayer {
    weights: Tensor,
    bias: Option<Tensor>,
    device: Device,
}

impl LinearLayer {
    pub fn new(
        weights_map: &MmapedSafetensors,
        prefix: &str,
        options: &LoadOptions,
    ) -> CandleResult<Self> {
        let weights = options.load(weights_map, &format!("{}.weight", prefix))?;

        let bias_name = format!("{}.bias", prefix);
        let bias = if weights_map.contains_tensor(&bias_name) {
            Some(options.load(weights_map, &bias_name)?)
        } else {
            None
        };

        Ok(Self {
            weights,
            bias,
            device: options.device.clone(),
        })
    }

    #[cfg(test)]
    pub fn from_tensors(weights: Tensor, bias: Option<Tensor>) -> Self {
        let device = weights.device().clone();
        Self {
            weights,
            bias,
            device,
        }
    }
}

impl Layer for LinearLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let mut output = input.broadcast_matmul(&self.weights.t()?)?;
        if let Some(bias) = &self.bias {
            output = output.broadcast_add(bias)?
        }
        Ok(output)
    }
}

impl ToDevice for LinearLayer {
    fn to_device(&self, device: &Device) -> CandleResult<Self> {
        let bias = match &self.bias {
            Some(bias) => Some(bias.to_device(device)?),
            None => None,
        };
        Ok(Self {
            weights: self.weights.to_device(device)?,
            bias,
            device: device.clone(),
        })
    }
}
