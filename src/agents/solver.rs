use crate::agents::{AgentError, check_error_marker, numeric_field, prompts};
use crate::client::{CompletionBackend, CompletionRequest};
use crate::models::{McqOptions, OptionLabel, SolverApproach, SolverResult};
use serde_json::Value;
use std::sync::Arc;

/// Confidence assumed when a solver does not report one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// One independent solver.
pub struct SolverAgent {
    backend: Arc<dyn CompletionBackend>,
    approach: SolverApproach,
    temperature: f64,
}

impl SolverAgent {
    /// Solver A.
    pub fn algebraic(backend: Arc<dyn CompletionBackend>, temperature: f64) -> Self {
        Self {
            backend,
            approach: SolverApproach::Algebraic,
            temperature,
        }
    }

    /// Solver B.
    pub fn logical(backend: Arc<dyn CompletionBackend>, temperature: f64) -> Self {
        Self {
            backend,
            approach: SolverApproach::Logical,
            temperature,
        }
    }

    pub fn approach(&self) -> SolverApproach {
        self.approach
    }

    /// Solve from question and options only; never sees the generator's answer.
    pub async fn solve(&self, question: &str, options: &McqOptions) -> Result<SolverResult, AgentError> {
        let system = match self.approach {
            SolverApproach::Algebraic => prompts::SOLVER_A_SYSTEM,
            SolverApproach::Logical => prompts::SOLVER_B_SYSTEM,
        };
        let request = CompletionRequest::json(
            system,
            prompts::solver_prompt(self.approach, question, options),
            self.temperature,
        );
        let reply = self.backend.complete(&request).await?;
        parse_solver_reply(&reply, self.approach, options)
    }
}

/// Parse a solver reply.
///
/// The numeric answer comes from `calculated_value` (or `answer`); when
/// both are absent, from the selected option's value. No number at all is
/// an error.
pub fn parse_solver_reply(
    reply: &Value,
    approach: SolverApproach,
    options: &McqOptions,
) -> Result<SolverResult, AgentError> {
    check_error_marker(reply)?;

    let selected_option = reply
        .get("selected_option")
        .and_then(Value::as_str)
        .and_then(OptionLabel::normalize);

    let answer = reply
        .get("calculated_value")
        .or_else(|| reply.get("answer"))
        .and_then(numeric_field)
        .or_else(|| selected_option.and_then(|label| options.numeric_value(label)))
        .ok_or(AgentError::MissingField("calculated_value"))?;

    let confidence = reply
        .get("confidence")
        .and_then(numeric_field)
        .map(|c| if c > 1.0 && c <= 100.0 { c / 100.0 } else { c })
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    let reasoning = reply
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(SolverResult {
        answer,
        confidence,
        reasoning,
        approach,
        selected_option,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> McqOptions {
        McqOptions::new("4.0 days", "4.8 days", "5.0 days", "6.0 days")
    }

    #[test]
    fn test_parse_well_formed_reply() {
        let reply = json!({
            "approach": "algebraic",
            "reasoning": "1/12 + 1/8 = 5/24",
            "calculated_value": 4.8,
            "selected_option": "B",
            "confidence": 0.95
        });
        let result = parse_solver_reply(&reply, SolverApproach::Algebraic, &options()).unwrap();
        assert_eq!(result.answer, 4.8);
        assert_eq!(result.selected_option, Some(OptionLabel::B));
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.approach, SolverApproach::Algebraic);
    }

    #[test]
    fn test_stray_label_text_is_normalized() {
        let reply = json!({ "calculated_value": "4.8 days", "selected_option": "Option B" });
        let result = parse_solver_reply(&reply, SolverApproach::Logical, &options()).unwrap();
        assert_eq!(result.selected_option, Some(OptionLabel::B));
        assert_eq!(result.answer, 4.8);
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let reply = json!({ "answer": 5, "selected_option": "C", "confidence": 90 });
        let result = parse_solver_reply(&reply, SolverApproach::Logical, &options()).unwrap();
        assert!((result.confidence - 0.9).abs() < 1e-12);

        let reply = json!({ "answer": 5, "selected_option": "C", "confidence": -3 });
        let result = parse_solver_reply(&reply, SolverApproach::Logical, &options()).unwrap();
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_answer_falls_back_to_selected_option() {
        let reply = json!({ "selected_option": "D", "confidence": 0.8 });
        let result = parse_solver_reply(&reply, SolverApproach::Algebraic, &options()).unwrap();
        assert_eq!(result.answer, 6.0);
    }

    #[test]
    fn test_no_number_is_an_error() {
        let reply = json!({ "reasoning": "unclear", "selected_option": "maybe" });
        assert!(matches!(
            parse_solver_reply(&reply, SolverApproach::Algebraic, &options()),
            Err(AgentError::MissingField("calculated_value"))
        ));
    }

    #[test]
    fn test_invalid_label_is_none_not_error() {
        let reply = json!({ "calculated_value": 4.8, "selected_option": "E" });
        let result = parse_solver_reply(&reply, SolverApproach::Algebraic, &options()).unwrap();
        assert_eq!(result.selected_option, None);
    }
}
