use candle_core::{DType, Tensor};
use candle_nn::ops::softmax;
use rand::SeedableRng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;

use crate::error::{InferenceError, InferenceResult};

/// Picks the next token from a logits vector: greedy when sampling is off,
/// otherwise temperature + nucleus (top-p) sampling. Callers reject a
/// non-positive temperature before sampling.
pub struct Sampler {
    rng: StdRng,
    do_sample: bool,
    temperature: f64,
    top_p: f64,
}

impl Sampler {
    pub fn new(seed: u64, do_sample: bool, temperature: f64, top_p: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            do_sample,
            temperature,
            top_p,
        }
    }

    pub fn sample(&mut self, logits: &Tensor) -> InferenceResult<u32> {
        let logits = logits.to_dtype(DType::F32)?;

        if !self.do_sample {
            return Ok(logits.argmax(0)?.to_scalar::<u32>()?);
        }

        let probs = softmax(&(logits / self.temperature)?, 0)?;
        let mut probs = probs.to_vec1::<f32>()?;
        nucleus_filter(&mut probs, self.top_p);

        let dist =
            WeightedIndex::new(&probs).map_err(|e| InferenceError::Sampling(e.to_string()))?;
        Ok(dist.sample(&mut self.rng) as u32)
    }
}

/// Zeroes every probability outside the smallest set of most likely tokens
/// whose cumulative mass reaches `top_p`. At least one token always survives.
pub fn nucleus_filter(probs: &mut [f32], top_p: f64) {
    if top_p >= 1.0 || probs.is_empty() {
        return;
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cumulative = 0.0f64;
    let mut keep = 0;
    for &idx in &order {
        keep += 1;
        cumulative += probs[idx] as f64;
        if cumulative >= top_p {
            break;
        }
    }

    for &idx in &order[keep..] {
        probs[idx] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    #[test]
    fn nucleus_keeps_minimal_prefix() {
        let mut probs = vec![0.1, 0.5, 0.3, 0.1];
        nucleus_filter(&mut probs, 0.75);
        assert_eq!(probs, vec![0.0, 0.5, 0.3, 0.0]);
    }

    #[test]
    fn nucleus_always_keeps_top_token() {
        let mut probs = vec![0.2, 0.7, 0.1];
        nucleus_filter(&mut probs, 0.0);
        assert_eq!(probs, vec![0.0, 0.7, 0.0]);
    }

    #[test]
    fn nucleus_disabled_at_one() {
        let mut probs = vec![0.2, 0.7, 0.1];
        nucleus_filter(&mut probs, 1.0);
        assert_eq!(probs, vec![0.2, 0.7, 0.1]);
    }

    #[test]
    fn greedy_picks_argmax() {
        let logits = Tensor::new(&[0.1f32, 3.0, -2.0, 1.0], &Device::Cpu).unwrap();
        let mut sampler = Sampler::new(0, false, 0.8, 0.9);
        assert_eq!(sampler.sample(&logits).unwrap(), 1);
    }

    #[test]
    fn sampling_stays_inside_nucleus() {
        // softmax puts ~0.99 on token 2, so top_p 0.9 leaves only that token.
        let logits = Tensor::new(&[0.0f32, 0.0, 8.0, 0.0], &Device::Cpu).unwrap();
        let mut sampler = Sampler::new(7, true, 1.0, 0.9);
        for _ in 0..20 {
            assert_eq!(sampler.sample(&logits).unwrap(), 2);
        }
    }

    #[test]
    fn same_seed_same_tokens() {
        let logits = Tensor::new(&[1.0f32, 1.2, 0.9, 1.1], &Device::Cpu).unwrap();
        let mut a = Sampler::new(42, true, 0.8, 1.0);
        let mut b = Sampler::new(42, true, 0.8, 1.0);
        let xs: Vec<u32> = (0..10).map(|_| a.sample(&logits).unwrap()).collect();
        let ys: Vec<u32> = (0..10).map(|_| b.sample(&logits).unwrap()).collect();
        assert_eq!(xs, ys);
    }
}
