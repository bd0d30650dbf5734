use candle_core::{Result as CandleResult, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Gelu,
    Relu,
    Silu,
}

impl TryFrom<&str> for Activation {
    type Error = candle_core::Error;

    fn try_from(name: &str) -> CandleResult<Self> {
        match name {
            "gelu" | "gelu_new" | "gelu_pytorch_tanh" => Ok(Activation::Gelu),
            "relu" => Ok(Activation::Relu),
            "silu" | "swish" => Ok(Activation::Silu),
            _ => Err(candle_core::Error::Msg(format!(
                "unsupported activation function: {name}"
            ))),
        }
    }
}

impl Activation {
    pub fn apply(&self, input: &Tensor) -> CandleResult<Tensor> {
        match self {
            Activation::Gelu => input.gelu(),
            Activation::Relu => input.relu(),
            Activation::Silu => input.silu(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names() {
        assert_eq!(Activation::try_from("silu").unwrap(), Activation::Silu);
        assert_eq!(Activation::try_from("gelu_new").unwrap(), Activation::Gelu);
        assert!(Activation::try_from("tanhshrink").is_err());
    }

    #[test]
    fn relu_clamps_negatives() {
        let t = Tensor::new(&[-1.0f32, 0.5], &candle_core::Device::Cpu).unwrap();
        let out = Activation::Relu.apply(&t).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(out, vec![0.0, 0.5]);
    }
}
