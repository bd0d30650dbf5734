use std::sync::Arc;

use candle_core::Device;
use serde::Deserialize;
use tokio::task;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::error::{GenerateError, InferenceError, InferenceResult, ValidationError};
use crate::llm::inference::GenerationParams;

pub const MAX_PROMPT_CHARS: usize = 5000;
pub const MAX_LENGTH_CAP: usize = 2048;
pub const DEFAULT_MAX_LENGTH: usize = 256;
pub const DEFAULT_TEMPERATURE: f64 = 0.8;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_DO_SAMPLE: bool = true;

/// Body of `POST /generate`. Omitted or `null` fields take their defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_length: Option<usize>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub do_sample: Option<bool>,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    #[cfg(test)]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_length: None,
            temperature: None,
            top_p: None,
            do_sample: None,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(ValidationError::PromptTooLong);
        }
        Ok(())
    }

    pub fn max_length(&self) -> usize {
        self.max_length
            .unwrap_or(DEFAULT_MAX_LENGTH)
            .min(MAX_LENGTH_CAP)
    }

    pub fn params(&self, eos_token_id: u32) -> GenerationParams {
        GenerationParams {
            max_length: self.max_length(),
            do_sample: self.do_sample.unwrap_or(DEFAULT_DO_SAMPLE),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: self.top_p.unwrap_or(DEFAULT_TOP_P),
            seed: self.seed.unwrap_or_else(rand::random),
            eos_token_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub generated_text: String,
    pub full_text: String,
}

/// Reply text: the decoded sequence minus the echoed prompt, trimmed. When
/// the model did not echo the prompt verbatim the whole text is the reply.
pub fn strip_prompt(full_text: &str, prompt: &str) -> String {
    match full_text.strip_prefix(prompt) {
        Some(rest) => rest.trim().to_string(),
        None => full_text.to_string(),
    }
}

async fn run_on_worker<F>(work: F) -> InferenceResult<String>
where
    F: FnOnce() -> InferenceResult<String> + Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| InferenceError::Worker(e.to_string()))?
}

/// Validates the request and generates a continuation. A failed first
/// attempt moves the shared model to the CPU for good and retries once.
pub async fn generate(
    state: Arc<AppState>,
    request: GenerationRequest,
) -> Result<Generation, GenerateError> {
    request.validate()?;

    let params = request.params(state.eos_token_id);
    let prompt = Arc::<str>::from(request.prompt);
    info!(
        prompt_chars = prompt.chars().count(),
        max_length = params.max_length,
        do_sample = params.do_sample,
        "generation request"
    );

    let primary = {
        let (state, prompt, params) = (Arc::clone(&state), Arc::clone(&prompt), params.clone());
        run_on_worker(move || state.run_generation(&prompt, &params)).await
    };

    let full_text = match primary {
        Ok(text) => text,
        Err(primary) => {
            warn!(
                error = %primary,
                device = state.device_kind().as_str(),
                "generation failed, falling back to cpu"
            );
            let fallback = {
                let (state, prompt) = (Arc::clone(&state), Arc::clone(&prompt));
                run_on_worker(move || {
                    state.move_model_to(&Device::Cpu)?;
                    state.run_generation(&prompt, &params)
                })
                .await
            };
            match fallback {
                Ok(text) => text,
                Err(fallback) => {
                    error!(%primary, %fallback, "fallback generation failed");
                    return Err(GenerateError::Generation { primary, fallback });
                }
            }
        }
    };

    Ok(Generation {
        generated_text: strip_prompt(&full_text, &prompt),
        full_text,
    })
}
