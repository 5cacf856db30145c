use crate::agents::{AgentError, check_error_marker, numeric_field, prompts, text_field};
use crate::client::{CompletionBackend, CompletionRequest};
use crate::models::{Category, Difficulty, McqOptions, OptionLabel};
use crate::validation::FormulaParameters;
use serde_json::Value;
use std::sync::Arc;

/// Parsed generator output for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGeneration {
    pub question: String,
    pub options: McqOptions,
    /// Generator's claimed label; `None` when it could not be normalized
    pub correct_answer: Option<OptionLabel>,
    /// Declared formula parameters; `None` when omitted entirely
    pub parameters: Option<FormulaParameters>,
    pub expected_value: Option<f64>,
    pub solution_steps: Option<String>,
}

impl RawGeneration {
    /// Parse a generator reply.
    ///
    /// A blank question, missing options, or any missing A-D option is an
    /// error. Everything else is optional.
    pub fn from_value(reply: &Value) -> Result<Self, AgentError> {
        check_error_marker(reply)?;

        let question = reply
            .get("question")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or(AgentError::MissingField("question"))?
            .to_string();

        let options = reply
            .get("options")
            .and_then(Value::as_object)
            .ok_or(AgentError::MissingField("options"))?;
        let option = |label: OptionLabel| {
            options
                .iter()
                .find(|(key, _)| OptionLabel::normalize(key) == Some(label))
                .and_then(|(_, value)| text_field(value))
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .ok_or_else(|| AgentError::InvalidField {
                    field: "options",
                    detail: format!("option {label} is missing"),
                })
        };
        let options = McqOptions::new(
            option(OptionLabel::A)?,
            option(OptionLabel::B)?,
            option(OptionLabel::C)?,
            option(OptionLabel::D)?,
        );

        let correct_answer = reply
            .get("correct_answer")
            .and_then(Value::as_str)
            .and_then(OptionLabel::normalize);

        let parameters = reply.get("parameters").and_then(FormulaParameters::from_json);

        let expected_value = reply
            .get("expected_value")
            .or_else(|| reply.get("expected_numeric_value"))
            .and_then(numeric_field);

        let solution_steps = reply
            .get("solution_steps")
            .or_else(|| reply.get("ground_truth_calculation"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            question,
            options,
            correct_answer,
            parameters,
            expected_value,
            solution_steps,
        })
    }
}

/// Drafts problems with declared formula parameters.
pub struct GeneratorAgent {
    backend: Arc<dyn CompletionBackend>,
    temperature: f64,
}

impl GeneratorAgent {
    pub fn new(backend: Arc<dyn CompletionBackend>, temperature: f64) -> Self {
        Self {
            backend,
            temperature,
        }
    }

    pub async fn generate(
        &self,
        category: Category,
        difficulty: Difficulty,
        research_summary: &str,
        problem_number: usize,
    ) -> Result<RawGeneration, AgentError> {
        let request = CompletionRequest::json(
            prompts::GENERATOR_SYSTEM,
            prompts::generator_prompt(category, difficulty, research_summary, problem_number),
            self.temperature,
        );
        let reply = self.backend.complete(&request).await?;
        RawGeneration::from_value(&reply)
    }
}
