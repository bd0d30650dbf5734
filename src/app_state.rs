use std::sync::{Arc, Mutex, PoisonError, RwLock};

use candle_core::Device;
use tokenizers::Tokenizer;
use tracing::warn;

use crate::error::{InferenceError, InferenceResult};
use crate::llm;
use crate::llm::inference::GenerationParams;
use crate::llm::models::Model;
use crate::provider::DeviceKind;

/// Loaded tokenizer and model, shared by every request for the life of the process.
pub struct AppState {
    pub model_id: String,
    pub tokenizer: Tokenizer,
    pub eos_token_id: u32,
    model: RwLock<Arc<dyn Model>>,
    device_switch: Mutex<()>,
}

impl AppState {
    pub fn new(
        model_id: String,
        tokenizer: Tokenizer,
        model: Arc<dyn Model>,
        eos_token_id: u32,
    ) -> Self {
        Self {
            model_id,
            tokenizer,
            eos_token_id,
            model: RwLock::new(model),
            device_switch: Mutex::new(()),
        }
    }

    /// Handle on the current model. Generations keep using the handle they
    /// started with even if the model is moved meanwhile.
    pub fn model(&self) -> Arc<dyn Model> {
        Arc::clone(&*self.model.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn device(&self) -> Device {
        self.model().device().clone()
    }

    pub fn device_kind(&self) -> DeviceKind {
        DeviceKind::from(&self.device())
    }

    /// Replaces the shared model with a copy placed on `device`. The move is
    /// permanent and visible to every later request.
    pub fn move_model_to(&self, device: &Device) -> InferenceResult<Arc<dyn Model>> {
        let _guard = self
            .device_switch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let current = self.model();
        let from = DeviceKind::from(current.device());
        let moved = current.to_device(device)?;

        *self.model.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&moved);
        warn!(
            from = from.as_str(),
            to = DeviceKind::from(device).as_str(),
            model = %self.model_id,
            "moved shared model"
        );
        Ok(moved)
    }

    /// One complete attempt: tokenize, generate on the current model and
    /// decode with special tokens removed.
    pub fn run_generation(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> InferenceResult<String> {
        let model = self.model();
        let input_ids = self.encode(prompt)?;
        let output_ids = llm::inference::generate(&input_ids, model.as_ref(), params)?;
        Ok(self.tokenizer.decode(&output_ids, true)?)
    }

    fn encode(&self, prompt: &str) -> InferenceResult<Vec<u32>> {
        let encoding = self.tokenizer.encode(prompt, true)?;
        let input_ids = encoding
            .get_ids()
            .iter()
            .zip(encoding.get_attention_mask())
            .filter(|&(_, &mask)| mask != 0)
            .map(|(&id, _)| id)
            .collect::<Vec<u32>>();
        if input_ids.is_empty() {
            return Err(InferenceError::EmptyInput);
        }
        Ok(input_ids)
    }
}
