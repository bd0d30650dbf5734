pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod layers;
pub mod llm;
pub mod provider;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use app_state::AppState;
