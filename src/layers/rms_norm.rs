use candle_core::{DType, Device, Result as CandleResult, Tensor, safetensors::MmapedSafetensors};

use crate::layers::LoadOptions;
use crate::layers::layer::{Layer, ToDevice};

pub struct RMSNormLayer {
    weights: Tensor,
    eps: f64,
    device: Device,
}

impl RMSNormLayer {
    pub fn new(
        weights_map: &MmapedSafetensors,
        prefix: &str,
        options: &LoadOptions,
        eps: f64,
    ) -> CandleResult<Self> {
        let weights = options.load(weights_map, &format!("{}.weight", prefix))?;

        Ok(Self {
            weights,
            eps,
            device: options.device.clone(),
        })
    }
}

impl Layer for RMSNormLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let orig_dtype = input.dtype();

        // Variance in f16 overflows for long hidden sizes.
        let input = input.to_device(&self.device)?.to_dtype(DType::F32)?;
        let variance = input.sqr()?.mean_keepdim(candle_core::D::Minus1)?;
        let rms = variance.affine(1.0, self.eps)?.sqrt()?;

        let norm_x = input.broadcast_mul(&rms.recip()?)?.to_dtype(orig_dtype)?;

        norm_x.broadcast_mul(&self.weights)
    }
}

impl ToDevice for RMSNormLayer {
    fn to_device(&self, device: &Device) -> CandleResult<Self> {
        Ok(Self {
            weights: self.weights.to_device(device)?,
            eps: self.eps,
            device: device.clone(),
        })
    }
}
