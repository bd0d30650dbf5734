use candle_core::{IndexOp, Tensor};

use crate::error::{InferenceError, InferenceResult};
use crate::llm::causal_self_attention::KVCache;
use crate::llm::models::Model;
use crate::llm::sampling::Sampler;

/// Effective parameters of one generation call, after defaults and clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Upper bound on the whole sequence, prompt included.
    pub max_length: usize,
    pub do_sample: bool,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
    pub eos_token_id: u32,
}

/// Runs autoregressive generation and returns the full sequence: the prompt
/// ids followed by every sampled token, EOS included when it was produced.
/// A prompt that already fills `max_length` is an error, not an empty reply.
pub fn generate(
    input_ids: &[u32],
    model: &dyn Model,
    params: &GenerationParams,
) -> InferenceResult<Vec<u32>> {
    if input_ids.is_empty() {
        return Err(InferenceError::EmptyInput);
    }

    if params.do_sample && (params.temperature.is_nan() || params.temperature <= 0.0) {
        return Err(InferenceError::InvalidTemperature(params.temperature));
    }
    if input_ids.len() >= params.max_length {
        return Err(InferenceError::PromptExceedsMaxLength {
            prompt_tokens: input_ids.len(),
            max_length: params.max_length,
        });
    }

    let mut output_ids = input_ids.to_vec();

    let device = model.device().clone();
    let mut sampler = Sampler::new(
        params.seed,
        params.do_sample,
        params.temperature,
        params.top_p,
    );
    let mut kv_caches = vec![KVCache::new(); model.num_layers()];

    // Prefill with the whole prompt, then feed one token at a time.
    let mut input = Tensor::new(input_ids, &device)?.unsqueeze(0)?;
    let mut position = 0;

    while output_ids.len() < params.max_length {
        let logits = model.forward_with_cache(&input, &mut kv_caches, position)?;
        let next_token_logits = logits.i((0, logits.dim(1)? - 1))?;
        let next_token = sampler.sample(&next_token_logits)?;

        position += input.dim(1)?;
        output_ids.push(next_token);

        if next_token == params.eos_token_id {
            break;
        }

        input = Tensor::new(&[next_token], &device)?.unsqueeze(0)?;
    }

    Ok(output_ids)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{AGAIN, EOS, HELLO, ScriptedModel, WORLD};

    fn greedy(max_length: usize) -> GenerationParams {
        GenerationParams {
            max_length,
            do_sample: false,
            temperature: 0.8,
            top_p: 0.9,
            seed: 0,
            eos_token_id: EOS,
        }
    }

    #[test]
    fn stops_at_eos_and_keeps_it() {
        let model = ScriptedModel::new();
        let ids = generate(&[HELLO], &model, &greedy(256)).unwrap();
        assert_eq!(ids, vec![HELLO, WORLD, EOS]);
    }

    #[test]
    fn stops_at_max_length() {
        let model = ScriptedModel::new();
        let ids = generate(&[AGAIN], &model, &greedy(6)).unwrap();
        assert_eq!(ids, vec![AGAIN; 6]);
    }

    #[test]
    fn prompt_filling_max_length_is_rejected() {
        let model = Arc::new(ScriptedModel::new());
        for max_length in [0, 1, 2] {
            let err = generate(&[HELLO, WORLD], model.as_ref(), &greedy(max_length))
                .unwrap_err();
            assert!(matches!(
                err,
                InferenceError::PromptExceedsMaxLength { prompt_tokens: 2, max_length: m }
                    if m == max_length
            ));
        }
        assert_eq!(model.forward_calls(), 0);
    }

    #[test]
    fn sampling_needs_positive_temperature() {
        let model = ScriptedModel::new();
        for temperature in [0.0, -1.0, f64::NAN] {
            let params = GenerationParams {
                do_sample: true,
                temperature,
                ..greedy(16)
            };
            assert!(matches!(
                generate(&[HELLO], &model, &params),
                Err(InferenceError::InvalidTemperature(_))
            ));
        }
        assert_eq!(model.forward_calls(), 0);

        // greedy decoding ignores temperature
        let params = GenerationParams {
            temperature: 0.0,
            ..greedy(16)
        };
        assert_eq!(generate(&[HELLO], &model, &params).unwrap(), vec![HELLO, WORLD, EOS]);
    }

    #[test]
    fn empty_input_is_rejected() {
        let model = ScriptedModel::new();
        assert!(matches!(
            generate(&[], &model, &greedy(16)),
            Err(InferenceError::EmptyInput)
        ));
    }

    #[test]
    fn positions_advance_with_the_cache() {
        let model = ScriptedModel::new();
        generate(&[HELLO, AGAIN], &model, &greedy(5)).unwrap();
        // prefill at 0 with two tokens, then single steps at 2 and 3
        assert_eq!(model.positions(), vec![0, 2, 3]);
    }
}
