pub mod causal_self_attention;
pub mod decoder;
pub mod inference;
pub mod mlp;
pub mod models;
pub mod sampling;
