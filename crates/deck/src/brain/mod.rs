//! Generative text service boundary
//!
//! A trait-based abstraction so the generator never depends on a concrete
//! HTTP client; tests swap in scripted providers.

mod openai;
mod provider;
#[cfg(test)]
pub(crate) mod scripted;

pub use openai::OpenAIProvider;
pub use provider::{CompletionProvider, CompletionRequest, ProviderError, ResponseFormat};
