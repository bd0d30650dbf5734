use thiserror::Error;

/// Failure of a single generation attempt (tokenize, forward, sample, decode).
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("prompt produced no tokens")]
    EmptyInput,
    #[error("prompt has {prompt_tokens} tokens but max_length is {max_length}")]
    PromptExceedsMaxLength {
        prompt_tokens: usize,
        max_length: usize,
    },
    #[error("temperature must be strictly positive when sampling, got {0}")]
    InvalidTemperature(f64),
    #[error("sampling error: {0}")]
    Sampling(String),
    #[error("worker failed: {0}")]
    Worker(String),
}

impl From<tokenizers::Error> for InferenceError {
    fn from(err: tokenizers::Error) -> Self {
        InferenceError::Tokenizer(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("prompt too long")]
    PromptTooLong,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("generation failed: {primary} | fallback failed: {fallback}")]
    Generation {
        primary: InferenceError,
        fallback: InferenceError,
    },
}

pub type InferenceResult<T> = std::result::Result<T, InferenceError>;
