//! quantval - validated multiple-choice quantitative problem generation.
//!
//! ## Architecture
//!
//! An LLM drafts a word problem together with the formula parameters it
//! used. Before the problem is accepted, three independent checks run:
//! - **Ground truth**: the declared parameters are re-evaluated by a
//!   deterministic calculator
//! - **Plausibility rules**: physical limits and option spacing
//! - **Solver consensus**: two solvers answer blind, then a consensus
//!   engine compares their picks with the generator and the ground truth
//!
//! A rejected draft is regenerated until the slot's retries run out.
//!
//! ## Modules
//!
//! - `client`: OpenAI-compatible completion client behind [`CompletionBackend`]
//! - `agents`: research, generator and solver prompts and reply parsing
//! - `validation`: calculator, expression solver, rules and consensus
//! - `pipeline`: the retrying generation loop and its report
//! - `models`: configuration, problems, errors and run statistics

pub mod agents;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod validation;

// Re-exports for convenience
pub use client::{CompletionBackend, CompletionRequest, LlmClient};
pub use models::{Category, Config, Problem, QuantvalError, Result, RunStatistics};
pub use pipeline::{GenerationLoop, GenerationReport, GenerationRequest};
pub use validation::{ConsensusEngine, FormulaParameters, FormulaType, GroundTruth};

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted completion backend for pipeline tests.

    use crate::agents::prompts;
    use crate::client::{CompletionBackend, CompletionRequest};
    use crate::models::Result;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Role {
        Research,
        Generator,
        SolverA,
        SolverB,
    }

    impl Role {
        fn of(request: &CompletionRequest) -> Self {
            match request.system_prompt.as_str() {
                s if s == prompts::RESEARCH_SYSTEM => Self::Research,
                s if s == prompts::GENERATOR_SYSTEM => Self::Generator,
                s if s == prompts::SOLVER_A_SYSTEM => Self::SolverA,
                s if s == prompts::SOLVER_B_SYSTEM => Self::SolverB,
                other => panic!("unexpected system prompt: {other}"),
            }
        }
    }

    type Handler = dyn Fn(Role, usize) -> Result<Value> + Send + Sync;

    /// Answers each call from a handler given the caller's role and how
    /// many calls that role has made before.
    pub struct ScriptedBackend {
        handler: Box<Handler>,
        per_role: Mutex<HashMap<Role, usize>>,
        log: Mutex<Vec<(Role, f64)>>,
    }

    impl ScriptedBackend {
        pub fn new<F>(handler: F) -> Arc<Self>
        where
            F: Fn(Role, usize) -> Result<Value> + Send + Sync + 'static,
        {
            Arc::new(Self {
                handler: Box::new(handler),
                per_role: Mutex::new(HashMap::new()),
                log: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            self.log.lock().unwrap().len()
        }

        pub fn roles(&self) -> Vec<Role> {
            self.log.lock().unwrap().iter().map(|(role, _)| *role).collect()
        }

        /// Role and sampling temperature of every call, in order.
        pub fn temperatures(&self) -> Vec<(Role, f64)> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, request: &CompletionRequest) -> Result<Value> {
            let role = Role::of(request);
            let index = {
                let mut per_role = self.per_role.lock().unwrap();
                let count = per_role.entry(role).or_insert(0);
                let index = *count;
                *count += 1;
                index
            };
            self.log.lock().unwrap().push((role, request.temperature));
            (self.handler)(role, index)
        }
    }

    /// A well-formed solver reply.
    pub fn solver_reply(label: &str, value: f64, confidence: f64) -> Value {
        json!({
            "reasoning": "worked it out",
            "calculated_value": value,
            "selected_option": label,
            "confidence": confidence
        })
    }
}
