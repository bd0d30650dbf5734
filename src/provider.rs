use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Error};
use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device};
use hf_hub::api::sync::Api;
use tokenizers::{PaddingParams, Tokenizer};
use tracing::{error, info};

use crate::app_state::AppState;
use crate::config::ModelConfig;
use crate::layers::LoadOptions;
use crate::llm::models::{LlamaModel, Model};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cuda,
    Cpu,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::Cpu => "cpu",
        }
    }
}

impl From<&Device> for DeviceKind {
    fn from(device: &Device) -> Self {
        if device.is_cuda() {
            DeviceKind::Cuda
        } else {
            DeviceKind::Cpu
        }
    }
}

pub fn select_device() -> Result<Device, Error> {
    Ok(Device::cuda_if_available(0)?)
}

/// Local paths of the checkpoint files, fetched through the hub cache.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    fn fetch(model_id: &str) -> Result<Self, Error> {
        let api = Api::new()?;
        let repo = api.model(model_id.to_string());
        Ok(Self {
            config: repo.get("config.json")?,
            tokenizer: repo.get("tokenizer.json")?,
            weights: repo.get("model.safetensors")?,
        })
    }

    fn model_config(&self) -> Result<ModelConfig, Error> {
        let file = File::open(&self.config)
            .with_context(|| format!("opening {}", self.config.display()))?;
        Ok(serde_json::from_reader(file)?)
    }
}

fn load_weights_mmap(path: &Path) -> Result<MmapedSafetensors, Error> {
    let weights = unsafe { MmapedSafetensors::new(path)? };
    Ok(weights)
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer, Error> {
    Tokenizer::from_file(path).map_err(|e| anyhow::anyhow!(e))
}

struct Loaded {
    tokenizer: Tokenizer,
    model: Arc<dyn Model>,
    config: ModelConfig,
}

/// F16 weights memory-mapped and placed straight onto `device`.
fn load_primary(model_id: &str, device: &Device) -> Result<Loaded, Error> {
    let files = ModelFiles::fetch(model_id)?;
    let config = files.model_config()?;
    let weights = load_weights_mmap(&files.weights)?;
    let options = LoadOptions::new(DType::F16, device.clone());
    let model = LlamaModel::new(&weights, &config, &options)?;
    let tokenizer = load_tokenizer(&files.tokenizer)?;
    Ok(Loaded {
        tokenizer,
        model: Arc::new(model),
        config,
    })
}

/// Full precision on the CPU, then an explicit move onto `device`.
fn load_fallback(model_id: &str, device: &Device) -> Result<Loaded, Error> {
    let files = ModelFiles::fetch(model_id)?;
    let tokenizer = load_tokenizer(&files.tokenizer)?;
    let config = files.model_config()?;
    let weights = load_weights_mmap(&files.weights)?;
    let options = LoadOptions::new(DType::F32, Device::Cpu);
    let model = LlamaModel::new(&weights, &config, &options)?;
    let model = model.to_device(device)?;
    Ok(Loaded {
        tokenizer,
        model,
        config,
    })
}

/// Generation pads to a batch of one, so the tokenizer needs a pad token.
/// Reuse EOS when the checkpoint does not configure one.
pub fn ensure_pad_token(tokenizer: &mut Tokenizer, eos_token_id: u32) {
    if tokenizer.get_padding().is_some() {
        return;
    }
    let pad_token = tokenizer
        .id_to_token(eos_token_id)
        .unwrap_or_else(|| "</s>".to_string());
    tokenizer.with_padding(Some(PaddingParams {
        pad_id: eos_token_id,
        pad_token,
        ..Default::default()
    }));
}

/// Loads the tokenizer and model once at startup. An error here means neither
/// load path worked and the process cannot serve.
pub fn load_state(model_id: &str) -> Result<AppState, Error> {
    let device = select_device()?;
    info!(
        model = model_id,
        device = DeviceKind::from(&device).as_str(),
        "loading tokenizer and model"
    );
    load_with(model_id, &device, load_primary, load_fallback)
}

fn load_with<P, F>(
    model_id: &str,
    device: &Device,
    primary: P,
    fallback: F,
) -> Result<AppState, Error>
where
    P: FnOnce(&str, &Device) -> Result<Loaded, Error>,
    F: FnOnce(&str, &Device) -> Result<Loaded, Error>,
{
    let loaded = match primary(model_id, device) {
        Ok(loaded) => {
            info!("model loaded in f16");
            loaded
        }
        Err(err) => {
            error!(error = %err, "f16 load failed, retrying in f32");
            let loaded = fallback(model_id, device).context("fallback load failed")?;
            info!(device = DeviceKind::from(device).as_str(), "fallback model loaded");
            loaded
        }
    };

    let Loaded {
        mut tokenizer,
        model,
        config,
    } = loaded;
    info!(
        architectures = ?config.architectures,
        model_type = %config.model_type,
        layers = model.num_layers(),
        vocab_size = config.vocab_size,
        "model ready"
    );

    ensure_pad_token(&mut tokenizer, config.eos_token_id);

    Ok(AppState::new(
        model_id.to_string(),
        tokenizer,
        model,
        config.eos_token_id,
    ))
}
