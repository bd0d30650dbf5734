use clap::Parser;
use serde::Deserialize;

/// Checkpoint served by this process.
pub const MODEL_ID: &str = "TinyLlama/TinyLlama-1.1B-Chat-v1.0";

#[derive(Parser, Debug, Clone)]
#[command(name = "lm_serve", about = "Serve a causal language model over HTTP")]
pub struct ServerArgs {
    #[arg(long, env = "LM_SERVE_HOST", default_value = "0.0.0.0")]
    pub host: String,
    #[arg(long, env = "LM_SERVE_PORT", default_value_t = 8000)]
    pub port: u16,
}

impl ServerArgs {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Subset of a Hugging Face `config.json` needed to build a Llama-family decoder.
#[derive(Deserialize, Debug, Clone)]
pub struct ModelConfig {
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub model_type: String,
    pub eos_token_id: u32,
    #[serde(rename = "hidden_act", default = "default_hidden_act")]
    pub hidden_activation: String,
    pub hidden_size: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    pub num_key_value_heads: Option<usize>,
    pub rms_norm_eps: f64,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f32,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    pub vocab_size: usize,
}

impl ModelConfig {
    pub fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }
}

fn default_hidden_act() -> String {
    "silu".to_string()
}

fn default_rope_theta() -> f32 {
    10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tinyllama_config() {
        let raw = r#"{
            "architectures": ["LlamaForCausalLM"],
            "attention_bias": false,
            "bos_token_id": 1,
            "eos_token_id": 2,
            "hidden_act": "silu",
            "hidden_size": 2048,
            "intermediate_size": 5632,
            "model_type": "llama",
            "num_attention_heads": 32,
            "num_hidden_layers": 22,
            "num_key_value_heads": 4,
            "rms_norm_eps": 1e-05,
            "rope_theta": 10000.0,
            "tie_word_embeddings": false,
            "torch_dtype": "bfloat16",
            "vocab_size": 32000
        }"#;
        let cfg: ModelConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.eos_token_id, 2);
        assert_eq!(cfg.num_kv_heads(), 4);
        assert_eq!(cfg.hidden_activation, "silu");
    }

    #[test]
    fn missing_optional_fields_fall_back() {
        let raw = r#"{
            "eos_token_id": 2,
            "hidden_size": 64,
            "num_attention_heads": 8,
            "num_hidden_layers": 2,
            "rms_norm_eps": 1e-06,
            "vocab_size": 100
        }"#;
        let cfg: ModelConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.num_kv_heads(), 8);
        assert_eq!(cfg.rope_theta, 10_000.0);
        assert!(!cfg.tie_word_embeddings);
    }

    #[test]
    fn default_bind_address() {
        let args = ServerArgs::parse_from(["lm_serve"]);
        assert_eq!(args.port, 8000);
        assert_eq!(args.bind_addr(), "0.0.0.0:8000");
    }
}
