use crate::agents::{AgentError, check_error_marker, prompts};
use crate::client::{CompletionBackend, CompletionRequest};
use crate::models::Category;
use serde_json::Value;
use std::sync::Arc;

/// Produces per-category design guidelines once per run.
pub struct ResearchAgent {
    backend: Arc<dyn CompletionBackend>,
    temperature: f64,
}

impl ResearchAgent {
    pub fn new(backend: Arc<dyn CompletionBackend>, temperature: f64) -> Self {
        Self {
            backend,
            temperature,
        }
    }

    /// Guidelines for `category` as a flat text summary.
    pub async fn research(&self, category: Category) -> Result<String, AgentError> {
        let request = CompletionRequest::json(
            prompts::RESEARCH_SYSTEM,
            prompts::research_prompt(category),
            self.temperature,
        );
        let reply = self.backend.complete(&request).await?;
        check_error_marker(&reply)?;
        Ok(summarize(&reply))
    }
}

/// Plain-text replies pass through; structured ones are kept as compact JSON.
fn summarize(reply: &Value) -> String {
    match reply.get("response").and_then(Value::as_str) {
        Some(text) if reply.as_object().is_some_and(|o| o.len() == 1) => text.to_string(),
        _ => reply.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summarize() {
        assert_eq!(summarize(&json!({"response": "Use d = s × t"})), "Use d = s × t");
        assert_eq!(
            summarize(&json!({"formulas": ["d = s × t"]})),
            r#"{"formulas":["d = s × t"]}"#
        );
    }
}
