use candle_core::safetensors::MmapedSafetensors;
use candle_core::{Device, Result as CandleResult, Tensor};

use crate::layers::LoadOptions;
use crate::layers::activation::Activation;
use crate::layers::layer::{Layer, ToDevice};
use crate::layers::linear::LinearLayer;

pub struct MlpLayer {
    gate_proj: LinearLayer,
    up_proj: LinearLayer,
    down_proj: LinearLayer,
    activation: Activation,
    device: Device,
}

impl MlpLayer {
    pub fn new(
        weights_map: &MmapedSafetensors,
        prefix: &str,
        options: &LoadOptions,
        activation: Activation,
    ) -> CandleResult<Self> {
        let gate_proj = LinearLayer::new(weights_map, &format!("{}.gate_proj", prefix), options)?;
        let up_proj = LinearLayer::new(weights_map, &format!("{}.up_proj", prefix), options)?;
        let down_proj = LinearLayer::new(weights_map, &format!("{}.down_proj", prefix), options)?;
        Ok(Self {
            gate_proj,
            up_proj,
            down_proj,
            activation,
            device: options.device.clone(),
        })
    }
}

impl Layer for MlpLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let gate_output = self.gate_proj.forward(&input)?;
        let up_output = self.up_proj.forward(&input)?;
        let activated = self.activation.apply(&gate_output)?;
        self.down_proj.forward(&activated.mul(&up_output)?)
    }
}

impl ToDevice for MlpLayer {
    fn to_device(&self, device: &Device) -> CandleResult<Self> {
        Ok(Self {
            gate_proj: self.gate_proj.to_device(device)?,
            up_proj: self.up_proj.to_device(device)?,
            down_proj: self.down_proj.to_device(device)?,
            activation: self.activation,
            device: device.clone(),
        })
    }
}
