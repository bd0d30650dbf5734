use serde::Serialize;

use crate::error::GenerateError;
use crate::service::Generation;

pub use crate::service::GenerationRequest;

/// Body of `POST /generate`. Failures are reported in the body with a 200
/// status, so clients must look for the `error` field.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum GenerateResponse {
    Completed {
        generated_text: String,
        full_text: String,
    },
    Failed {
        error: String,
    },
}

impl From<Result<Generation, GenerateError>> for GenerateResponse {
    fn from(result: Result<Generation, GenerateError>) -> Self {
        match result {
            Ok(Generation {
                generated_text,
                full_text,
            }) => GenerateResponse::Completed {
                generated_text,
                full_text,
            },
            Err(err) => GenerateResponse::Failed {
                error: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub device: String,
}
