//! The retrying generation loop.
//!
//! Per requested problem (a "slot"), each attempt runs
//! `Generating → RuleChecking → ComputingGroundTruth → SolvingA → SolvingB →
//! Consensus` and ends accepted or rejected. A rejected attempt restarts from
//! `Generating` with a fresh generation until the slot's retries run out.
//!
//! Calls are issued strictly in sequence. `RunStatistics` and the accepted
//! problems are owned by the running loop and nothing else.

use crate::agents::{GeneratorAgent, RawGeneration, ResearchAgent, SolverAgent};
use crate::client::CompletionBackend;
use crate::models::{
    Category, Config, Difficulty, GenerationConfig, Problem, ProblemDraft, QuantvalError,
    RejectionReason, Result, RunStatistics, SolverResult, ValidationOutcome,
};
use crate::pipeline::{GenerationObserver, GenerationReport, TracingObserver};
use crate::validation::{ConsensusEngine, compute_with_fallback, rules};
use chrono::Utc;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on problems per request.
pub const MAX_PROBLEMS_PER_REQUEST: usize = 20;

/// A validated generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub num_problems: usize,
    pub category: Category,
}

impl GenerationRequest {
    pub fn new(num_problems: usize, category: Category) -> Result<Self> {
        if !(1..=MAX_PROBLEMS_PER_REQUEST).contains(&num_problems) {
            return Err(QuantvalError::InvalidInput(format!(
                "num_problems must be between 1 and {MAX_PROBLEMS_PER_REQUEST}, got {num_problems}"
            )));
        }
        Ok(Self {
            num_problems,
            category,
        })
    }
}

/// Where in the attempt a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStage {
    Generating,
    RuleChecking,
    ComputingGroundTruth,
    SolvingA,
    SolvingB,
    Consensus,
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generating => "generating",
            Self::RuleChecking => "rule_checking",
            Self::ComputingGroundTruth => "computing_ground_truth",
            Self::SolvingA => "solving_a",
            Self::SolvingB => "solving_b",
            Self::Consensus => "consensus",
        };
        f.write_str(name)
    }
}

/// A rejected attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub stage: AttemptStage,
    pub reason: RejectionReason,
    pub detail: String,
}

impl AttemptFailure {
    fn new(stage: AttemptStage, reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            stage,
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.reason, self.stage, self.detail)
    }
}

/// Inputs shared by every attempt of one slot.
struct AttemptContext<'a> {
    category: Category,
    difficulty: Difficulty,
    research_summary: &'a str,
    slot: usize,
    attempt: u32,
    next_id: String,
}

/// Drives generation attempts through validation until enough problems
/// are accepted or the attempt budget is spent.
pub struct GenerationLoop {
    research: ResearchAgent,
    generator: GeneratorAgent,
    solver_a: SolverAgent,
    solver_b: SolverAgent,
    consensus: ConsensusEngine,
    tolerance: f64,
    max_retries: u32,
    generation: GenerationConfig,
    observer: Arc<dyn GenerationObserver>,
}

impl GenerationLoop {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &Config) -> Self {
        let generation = &config.generation;
        Self {
            research: ResearchAgent::new(Arc::clone(&backend), config.research_temperature()),
            generator: GeneratorAgent::new(Arc::clone(&backend), config.generator_temperature()),
            solver_a: SolverAgent::algebraic(Arc::clone(&backend), config.solver_temperature()),
            solver_b: SolverAgent::logical(backend, config.solver_temperature()),
            consensus: ConsensusEngine::new(config.validation.clone()),
            tolerance: config.validation.tolerance,
            max_retries: generation.max_retries.max(1),
            generation: generation.clone(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn GenerationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run one generation request to completion.
    ///
    /// Never fails as a whole: attempt failures become rejection counts and
    /// the report simply holds fewer problems than requested.
    pub async fn run(&self, request: &GenerationRequest) -> GenerationReport {
        let start = Instant::now();
        let run_id = Uuid::new_v4();
        let mut stats = RunStatistics::default();
        let mut problems: Vec<Problem> = Vec::with_capacity(request.num_problems);

        let budget = self.generation.attempt_budget_for(request.num_problems);

        info!(
            run_id = %run_id,
            category = %request.category,
            num_problems = request.num_problems,
            max_retries = self.max_retries,
            budget,
            mode = ?self.consensus.mode(),
            "Starting generation"
        );

        let research_summary = if self.generation.research {
            self.run_research(request.category, &mut stats).await
        } else {
            String::new()
        };

        'slots: for slot in 0..request.num_problems {
            let difficulty = Difficulty::for_slot(slot);
            let mut attempts_used = 0;

            for attempt in 1..=self.max_retries {
                if stats.total_attempts >= budget {
                    warn!(budget, accepted = problems.len(), "Attempt budget exhausted");
                    break 'slots;
                }
                attempts_used = attempt;

                let ctx = AttemptContext {
                    category: request.category,
                    difficulty,
                    research_summary: &research_summary,
                    slot,
                    attempt,
                    next_id: format!("{}_{:03}", request.category.code(), problems.len() + 1),
                };

                self.observer.attempt_started(slot, attempt, difficulty);
                stats.total_attempts += 1;

                let mut stage = AttemptStage::Generating;
                let caught = AssertUnwindSafe(self.run_attempt(&ctx, &mut stage, &mut stats))
                    .catch_unwind()
                    .await;
                let result = match caught {
                    Ok(result) => result,
                    Err(panic) => Err(AttemptFailure::new(
                        stage,
                        RejectionReason::InternalError,
                        panic_message(panic.as_ref()),
                    )),
                };

                match result {
                    Ok((problem, outcome)) => {
                        stats.record_accepted(&problem, &outcome);
                        self.observer.attempt_succeeded(slot, attempt, &problem);
                        problems.push(problem);
                        continue 'slots;
                    }
                    Err(failure) => {
                        stats.record_rejection(failure.reason);
                        self.observer.attempt_failed(slot, attempt, &failure);
                    }
                }
            }

            stats.abandoned_slots += 1;
            self.observer.slot_abandoned(slot, attempts_used);
        }

        stats.finalize(start.elapsed().as_secs_f64());
        self.observer.run_finished(&stats);

        GenerationReport {
            run_id,
            generated_at: Utc::now(),
            category: request.category,
            requested: request.num_problems,
            total_api_calls: stats.api_calls,
            problems,
            stats,
            research_summary,
        }
    }

    /// Research failure is not fatal; generation proceeds without guidelines.
    async fn run_research(&self, category: Category, stats: &mut RunStatistics) -> String {
        stats.record_api_call();
        let caught = AssertUnwindSafe(self.research.research(category))
            .catch_unwind()
            .await;
        match caught {
            Ok(Ok(summary)) => {
                debug!(chars = summary.len(), "Research complete");
                summary
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Research failed, continuing without guidelines");
                String::new()
            }
            Err(panic) => {
                warn!(
                    error = %panic_message(panic.as_ref()),
                    "Research failed, continuing without guidelines"
                );
                String::new()
            }
        }
    }

    async fn run_attempt(
        &self,
        ctx: &AttemptContext<'_>,
        stage: &mut AttemptStage,
        stats: &mut RunStatistics,
    ) -> std::result::Result<(Problem, ValidationOutcome), AttemptFailure> {
        *stage = AttemptStage::Generating;
        stats.record_api_call();
        let raw: RawGeneration = self
            .generator
            .generate(ctx.category, ctx.difficulty, ctx.research_summary, ctx.slot + 1)
            .await
            .map_err(|e| AttemptFailure::new(*stage, RejectionReason::GenerationError, e.to_string()))?;
        stats.total_generated += 1;

        *stage = AttemptStage::RuleChecking;
        let report = rules::check(raw.parameters.as_ref(), ctx.category, &raw.options);
        if !report.is_valid() {
            stats.record_violations(report.kinds());
            let detail = report
                .violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AttemptFailure::new(*stage, RejectionReason::RuleViolation, detail));
        }

        *stage = AttemptStage::ComputingGroundTruth;
        let (ground_truth, calculation) =
            match compute_with_fallback(raw.parameters.as_ref(), ctx.category, &raw.question) {
                Ok(truth) => {
                    debug!(
                        slot = ctx.slot + 1,
                        attempt = ctx.attempt,
                        formula = %truth.formula_type,
                        value = truth.value,
                        generator_value = ?raw.expected_value,
                        "Ground truth computed"
                    );
                    (Some(truth.value), Some(truth.explanation))
                }
                Err(e) => {
                    stats.ground_truth_unavailable += 1;
                    debug!(
                        slot = ctx.slot + 1,
                        attempt = ctx.attempt,
                        reason = %e,
                        generator_value = ?raw.expected_value,
                        "Ground truth unavailable"
                    );
                    (None, None)
                }
            };

        *stage = AttemptStage::SolvingA;
        let solver_a = self.solve(&self.solver_a, &raw, *stage, stats).await?;

        *stage = AttemptStage::SolvingB;
        let solver_b = self.solve(&self.solver_b, &raw, *stage, stats).await?;

        *stage = AttemptStage::Consensus;
        let outcome = self.consensus.decide(
            raw.correct_answer,
            &solver_a,
            &solver_b,
            ground_truth,
            &raw.options,
        );
        if let Some(reason) = outcome.rejection {
            let detail = format!(
                "generator={:?} solver_a={:?}@{:.2} solver_b={:?}@{:.2} ground_truth={:?}",
                raw.correct_answer,
                solver_a.selected_option,
                solver_a.confidence,
                solver_b.selected_option,
                solver_b.confidence,
                ground_truth,
            );
            return Err(AttemptFailure::new(*stage, reason, detail));
        }

        let draft = ProblemDraft {
            category: ctx.category,
            difficulty: ctx.difficulty,
            question: raw.question,
            options: raw.options,
            ground_truth,
            calculation,
            solution_steps: raw.solution_steps,
            solver_a,
            solver_b,
            attempts: ctx.attempt,
        };
        let problem = Problem::from_validated(ctx.next_id.clone(), draft, &outcome, self.tolerance)
            .map_err(|e| AttemptFailure::new(*stage, e.reason(), e.to_string()))?;

        Ok((problem, outcome))
    }

    async fn solve(
        &self,
        solver: &SolverAgent,
        raw: &RawGeneration,
        stage: AttemptStage,
        stats: &mut RunStatistics,
    ) -> std::result::Result<SolverResult, AttemptFailure> {
        stats.record_api_call();
        let result = solver
            .solve(&raw.question, &raw.options)
            .await
            .map_err(|e| AttemptFailure::new(stage, RejectionReason::SolverError, e.to_string()))?;
        debug!(
            approach = %solver.approach(),
            selected = ?result.selected_option,
            answer = result.answer,
            confidence = result.confidence,
            "Solver answered"
        );
        Ok(result)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_string()
    }
}
