//! In-memory stand-ins for a downloaded checkpoint: a word-level tokenizer and
//! a model that follows a fixed bigram script.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use candle_core::{Device, IndexOp, Result as CandleResult, Tensor};
use tokenizers::Tokenizer;

use crate::app_state::AppState;
use crate::llm::causal_self_attention::KVCache;
use crate::llm::models::Model;

pub const EOS: u32 = 1;
pub const HELLO: u32 = 2;
pub const WORLD: u32 = 3;
pub const AGAIN: u32 = 4;
const VOCAB: usize = 5;

pub const TEST_MODEL_ID: &str = "test/scripted-model";

const TOKENIZER_JSON: &str = r#"{
    "version": "1.0",
    "truncation": null,
    "padding": null,
    "added_tokens": [
        {"id": 1, "content": "</s>", "single_word": false, "lstrip": false,
         "rstrip": false, "normalized": false, "special": true}
    ],
    "normalizer": null,
    "pre_tokenizer": {"type": "Whitespace"},
    "post_processor": null,
    "decoder": null,
    "model": {
        "type": "WordLevel",
        "vocab": {"<unk>": 0, "</s>": 1, "Hello": 2, "world": 3, "again": 4},
        "unk_token": "<unk>"
    }
}"#;

pub fn word_tokenizer() -> Tokenizer {
    Tokenizer::from_bytes(TOKENIZER_JSON.as_bytes()).expect("fixture tokenizer")
}

/// Hello -> world -> </s>, again -> again forever.
pub struct ScriptedModel {
    device: Device,
    fail_forward: bool,
    fail_after_move: bool,
    forward_calls: AtomicUsize,
    positions: Mutex<Vec<usize>>,
    moves: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            device: Device::Cpu,
            fail_forward: false,
            fail_after_move: false,
            forward_calls: AtomicUsize::new(0),
            positions: Mutex::new(Vec::new()),
            moves: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every forward pass on this instance fails as if the device ran out of memory.
    pub fn failing(mut self) -> Self {
        self.fail_forward = true;
        self
    }

    /// Copies produced by `to_device` fail as well.
    pub fn failing_after_move(mut self) -> Self {
        self.fail_after_move = true;
        self
    }

    pub fn forward_calls(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }

    pub fn positions(&self) -> Vec<usize> {
        self.positions.lock().unwrap().clone()
    }

    pub fn moves(&self) -> usize {
        self.moves.load(Ordering::SeqCst)
    }

    fn next_after(token: u32) -> u32 {
        match token {
            HELLO => WORLD,
            AGAIN => AGAIN,
            _ => EOS,
        }
    }
}

impl Model for ScriptedModel {
    fn forward_with_cache(
        &self,
        input_ids: &Tensor,
        _kv_caches: &mut [KVCache],
        position: usize,
    ) -> CandleResult<Tensor> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        self.positions.lock().unwrap().push(position);
        if self.fail_forward {
            return Err(candle_core::Error::Msg("CUDA out of memory".to_string()));
        }

        let (_, seq_len) = input_ids.dims2()?;
        let last = input_ids.i((0, seq_len - 1))?.to_scalar::<u32>()?;
        let mut logits = vec![0f32; seq_len * VOCAB];
        logits[(seq_len - 1) * VOCAB + Self::next_after(last) as usize] = 10.0;
        Tensor::from_vec(logits, (1, seq_len, VOCAB), &self.device)
    }

    fn num_layers(&self) -> usize {
        1
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn to_device(&self, device: &Device) -> CandleResult<Arc<dyn Model>> {
        self.moves.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Self {
            device: device.clone(),
            fail_forward: self.fail_after_move,
            fail_after_move: self.fail_after_move,
            forward_calls: AtomicUsize::new(0),
            positions: Mutex::new(Vec::new()),
            moves: Arc::clone(&self.moves),
        }))
    }
}

pub fn test_state(model: Arc<ScriptedModel>) -> Arc<AppState> {
    Arc::new(AppState::new(
        TEST_MODEL_ID.to_string(),
        word_tokenizer(),
        model,
        EOS,
    ))
}
