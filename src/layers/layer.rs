use candle_core::{Device, Result as CandleResult, Tensor};

pub trait Layer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor>;
}

/// Layers that can produce a copy of themselves on another device.
pub trait ToDevice: Sized {
    fn to_device(&self, device: &Device) -> CandleResult<Self>;
}
