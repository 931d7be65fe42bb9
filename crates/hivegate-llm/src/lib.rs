//! LLM provider abstraction.
//!
//! The [`Provider`] trait covers one OpenAI-compatible endpoint;
//! [`ChatClient`] layers per-model health tracking and fallback chains on
//! top and is what the agent loop talks to.

pub mod client;
pub mod error;
pub mod health;
pub mod openai_compat;
pub mod provider;
pub mod sse;
pub mod types;

pub use client::ChatClient;
pub use error::{ProviderError, Result};
pub use health::{HealthRegistry, ModelHealth};
pub use openai_compat::{OpenAiCompatProvider, ProviderConfig};
pub use provider::Provider;
