//! LLM provider implementations.
//!
//! `build(name, config, api_key)` is the factory, called at startup once
//! `Config::validate_secrets` has settled which backend to use.

pub mod dummy;
pub mod groq;

use crate::config::GroqConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Construct a `LlmProvider` by name.
///
/// `api_key` is sourced from `GROQ_API_KEY` (never TOML).
pub fn build(name: &str, config: &GroqConfig, api_key: Option<String>) -> Result<LlmProvider, ProviderError> {
    match name {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider)),
        "groq" => Ok(LlmProvider::Groq(groq::GroqProvider::new(config.clone(), api_key)?)),
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}
