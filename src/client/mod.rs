//! Completion client module.
//!
//! The pipeline only sees [`CompletionBackend`]: one prompt pair in, one
//! structured JSON value out. [`LlmClient`] is the HTTP implementation.

mod llm_client;

pub use llm_client::*;

use crate::models::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// One completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f64,
    /// Ask the endpoint for a JSON object reply
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn json(system_prompt: impl Into<String>, user_prompt: impl Into<String>, temperature: f64) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature,
            json_mode: true,
        }
    }

    pub fn text(system_prompt: impl Into<String>, user_prompt: impl Into<String>, temperature: f64) -> Self {
        Self {
            json_mode: false,
            ..Self::json(system_prompt, user_prompt, temperature)
        }
    }
}

/// External completion collaborator.
///
/// Returns the fields the prompt asked for as a JSON value. A reply that is
/// not JSON is wrapped as `{"response": <text>}`. Any transport or endpoint
/// failure is an `Err`; callers never see a partial reply.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value>;
}
