use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Result as CandleResult, Tensor};

use crate::layers::LoadOptions;
use crate::layers::layer::{Layer, ToDevice};
use crate::layers::linear::LinearLayer;

/// KV cache for storing key and value tensors across generation steps
#[derive(Clone, Default)]
pub struct KVCache {
    pub k_cache: Option<Tensor>,
    pub v_cache: Option<Tensor>,
}

impl KVCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.k_cache
            .as_ref()
            .and_then(|k| k.dim(2).ok())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct CausalSelfAttentionLayer {
    q_proj: LinearLayer,
    k_proj: LinearLayer,
    v_proj: LinearLayer,
    o_proj: LinearLayer,
    n_heads: usize,
    n_kv_heads: usize,
    hidden_size: usize,
    rope_theta: f32,
    device: Device,
}

impl CausalSelfAttentionLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        n_heads: usize,
        n_kv_heads: usize,
        hidden_size: usize,
        rope_theta: f32,
        options: &LoadOptions,
    ) -> CandleResult<Self> {
        let q_proj = LinearLayer::new(weights, &format!("{}.q_proj", prefix), options)?;
        let k_proj = LinearLayer::new(weights, &format!("{}.k_proj", prefix), options)?;
        let v_proj = LinearLayer::new(weights, &format!("{}.v_proj", prefix), options)?;
        let o_proj = LinearLayer::new(weights, &format!("{}.o_proj", prefix), options)?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            n_heads,
            n_kv_heads,
            hidden_size,
            rope_theta,
            device: options.device.clone(),
        })
    }

    fn rotate_half(x: &Tensor) -> CandleResult<Tensor> {
        let last_dim = x.dim(candle_core::D::Minus1)?;

        let xs1 = x.narrow(candle_core::D::Minus1, 0, last_dim / 2)?;
        let xs2 = x.narrow(
            candle_core::D::Minus1,
            last_dim / 2,
            last_dim - last_dim / 2,
        )?;

        Tensor::cat(&[xs2.neg()?, xs1], candle_core::D::Minus1)
    }

    /// cos/sin tables of shape (seq_len, head_dim) for absolute positions
    /// `position..position + seq_len`.
    fn rotary_tables(
        position: usize,
        seq_len: usize,
        head_dim: usize,
        rope_theta: f32,
        dtype: DType,
        device: &Device,
    ) -> CandleResult<(Tensor, Tensor)> {
        let inv_freq: Vec<f32> = (0..head_dim / 2)
            .map(|i| 1.0f32 / rope_theta.powf(2.0 * i as f32 / head_dim as f32))
            .collect();
        let inv_freq_tensor = Tensor::new(inv_freq.as_slice(), device)?;

        let t = Tensor::arange(position as u32, (position + seq_len) as u32, device)?
            .to_dtype(DType::F32)?;

        let freqs = t
            .unsqueeze(1)? // (seq_len, 1)
            .broadcast_mul(&inv_freq_tensor.unsqueeze(0)?)?; // (seq_len, head_dim / 2)

        let emb = Tensor::cat(&[&freqs, &freqs], 1)?; // (seq_len, head_dim)

        Ok((emb.cos()?.to_dtype(dtype)?, emb.sin()?.to_dtype(dtype)?))
    }

    fn apply_rotary_emb(x: &Tensor, cos: &Tensor, sin: &Tensor) -> CandleResult<Tensor> {
        // x' = x * cos + rotate_half(x) * sin
        x.broadcast_mul(cos)? + Self::rotate_half(x)?.broadcast_mul(sin)?
    }

    fn repeat_kv(x: Tensor, n_rep: usize) -> CandleResult<Tensor> {
        if n_rep == 1 {
            return Ok(x);
        }

        let (b_sz, n_kv_heads, seq_len, head_dim) = x.shape().dims4()?;
        x.unsqueeze(2)?
            .expand(&[b_sz, n_kv_heads, n_rep, seq_len, head_dim])?
            .reshape(&[b_sz, n_kv_heads * n_rep, seq_len, head_dim])
    }

    /// Additive mask of shape (1, 1, seq_len, total_len): query row `i` sits at
    /// absolute position `total_len - seq_len + i` and may not see later keys.
    fn causal_mask(seq_len: usize, total_len: usize, device: &Device) -> CandleResult<Tensor> {
        let offset = total_len - seq_len;
        let mask = (0..seq_len)
            .flat_map(|i| {
                (0..total_len).map(move |j| if j > i + offset { f32::NEG_INFINITY } else { 0.0 })
            })
            .collect::<Vec<f32>>();

        Tensor::from_vec(mask, (seq_len, total_len), device)?
            .unsqueeze(0)?
            .unsqueeze(0)
    }

    /// Forward pass with KV cache support
    pub fn forward_with_cache(
        &self,
        input: &Tensor,
        kv_cache: &mut KVCache,
        position: usize,
    ) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let dtype = input.dtype();
        let q = self.q_proj.forward(&input)?;
        let k = self.k_proj.forward(&input)?;
        let v = self.v_proj.forward(&input)?;

        let head_dim = self.hidden_size / self.n_heads;
        let n_rep = self.n_heads / self.n_kv_heads;

        let (b_sz, seq_len, _) = input.shape().dims3()?;

        let q = q
            .reshape((b_sz, seq_len, self.n_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?; // (b_sz, n_heads, seq_len, head_dim)
        let k = k
            .reshape((b_sz, seq_len, self.n_kv_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let mut v = v
            .reshape((b_sz, seq_len, self.n_kv_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (cos, sin) =
            Self::rotary_tables(position, seq_len, head_dim, self.rope_theta, dtype, &self.device)?;
        let q = Self::apply_rotary_emb(&q, &cos, &sin)?;
        let mut k = Self::apply_rotary_emb(&k, &cos, &sin)?;

        if let Some(ref k_cached) = kv_cache.k_cache {
            k = Tensor::cat(&[k_cached, &k], 2)?;
        }
        if let Some(ref v_cached) = kv_cache.v_cache {
            v = Tensor::cat(&[v_cached, &v], 2)?;
        }
        let total_len = k.dim(2)?;

        kv_cache.k_cache = Some(k.clone());
        kv_cache.v_cache = Some(v.clone());

        let k = Self::repeat_kv(k, n_rep)?;
        let v = Self::repeat_kv(v, n_rep)?;

        let scaling = 1.0 / (head_dim as f64).sqrt();
        let mut attn_scores = q
            .matmul(&k.transpose(2, 3)?.contiguous()?)?
            .to_dtype(DType::F32)?
            .affine(scaling, 0.0)?;

        // A single new token attends to everything already cached.
        if seq_len > 1 {
            let mask = Self::causal_mask(seq_len, total_len, &self.device)?;
            attn_scores = attn_scores.broadcast_add(&mask)?;
        }

        let attn_probs =
            candle_nn::ops::softmax(&attn_scores, candle_core::D::Minus1)?.to_dtype(dtype)?;

        let context = attn_probs
            .matmul(&v.contiguous()?)?
            .transpose(1, 2)? // (b_sz, seq_len, n_heads, head_dim)
            .reshape(&[b_sz, seq_len, self.hidden_size])?;

        self.o_proj.forward(&context)
    }
}

impl ToDevice for CausalSelfAttentionLayer {
    fn to_device(&self, device: &Device) -> CandleResult<Self> {
        Ok(Self {
            q_proj: self.q_proj.to_device(device)?,
            k_proj: self.k_proj.to_device(device)?,
            v_proj: self.v_proj.to_device(device)?,
            o_proj: self.o_proj.to_device(device)?,
            n_heads: self.n_heads,
            n_kv_heads: self.n_kv_heads,
            hidden_size: self.hidden_size,
            rope_theta: self.rope_theta,
            device: device.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_blocks_future_positions() {
        let mask = CausalSelfAttentionLayer::causal_mask(2, 3, &Device::Cpu)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert_eq!(mask[0], vec![0.0, 0.0, f32::NEG_INFINITY]);
        assert_eq!(mask[1], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn rotary_tables_start_at_cache_position() {
        let (cos, _) = CausalSelfAttentionLayer::rotary_tables(
            0,
            1,
            4,
            10_000.0,
            DType::F32,
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(cos.to_vec2::<f32>().unwrap()[0], vec![1.0; 4]);

        let (cos, _) = CausalSelfAttentionLayer::rotary_tables(
            5,
            1,
            4,
            10_000.0,
            DType::F32,
            &Device::Cpu,
        )
        .unwrap();
        let first = cos.to_vec2::<f32>().unwrap()[0][0];
        assert!((first - 5.0f32.cos()).abs() < 1e-5);
    }

    #[test]
    fn repeat_kv_expands_heads() {
        let x = Tensor::zeros((1, 2, 3, 4), DType::F32, &Device::Cpu).unwrap();
        let y = CausalSelfAttentionLayer::repeat_kv(x, 3).unwrap();
        assert_eq!(y.dims(), &[1, 6, 3, 4]);
    }
}
