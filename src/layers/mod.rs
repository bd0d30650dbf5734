pub mod activation;
pub mod embedding;
pub mod layer;
pub mod linear;
pub mod lm_head;
pub mod rms_norm;

use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Result as CandleResult, Tensor};

/// Precision and placement requested when reading weights from safetensors.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub dtype: DType,
    pub device: Device,
}

impl LoadOptions {
    pub fn new(dtype: DType, device: Device) -> Self {
        Self { dtype, device }
    }

    pub(crate) fn load(&self, weights: &MmapedSafetensors, name: &str) -> CandleResult<Tensor> {
        weights.load(name, &self.device)?.to_dtype(self.dtype)
    }
}
