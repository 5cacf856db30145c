//! Progress reporting for the generation loop.

use crate::models::{Difficulty, Problem, RunStatistics};
use crate::pipeline::AttemptFailure;
use tracing::{debug, info, warn};

/// Receives attempt lifecycle events from the generation loop.
///
/// `slot` is zero-based; `attempt` counts from 1 within the slot.
pub trait GenerationObserver: Send + Sync {
    fn attempt_started(&self, slot: usize, attempt: u32, difficulty: Difficulty);

    fn attempt_succeeded(&self, slot: usize, attempt: u32, problem: &Problem);

    fn attempt_failed(&self, slot: usize, attempt: u32, failure: &AttemptFailure);

    fn slot_abandoned(&self, slot: usize, attempts: u32);

    fn run_finished(&self, _stats: &RunStatistics) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl GenerationObserver for TracingObserver {
    fn attempt_started(&self, slot: usize, attempt: u32, difficulty: Difficulty) {
        debug!(slot = slot + 1, attempt, difficulty = %difficulty, "Attempt started");
    }

    fn attempt_succeeded(&self, slot: usize, attempt: u32, problem: &Problem) {
        info!(
            slot = slot + 1,
            attempt,
            id = %problem.id,
            tier = %problem.validation_tier,
            score = format!("{:.2}", problem.validation_score),
            "Problem accepted"
        );
    }

    fn attempt_failed(&self, slot: usize, attempt: u32, failure: &AttemptFailure) {
        warn!(
            slot = slot + 1,
            attempt,
            stage = %failure.stage,
            reason = %failure.reason,
            detail = %failure.detail,
            "Attempt rejected"
        );
    }

    fn slot_abandoned(&self, slot: usize, attempts: u32) {
        warn!(slot = slot + 1, attempts, "Slot abandoned after exhausting retries");
    }

    fn run_finished(&self, stats: &RunStatistics) {
        info!(
            valid = stats.total_valid,
            rejected = stats.total_rejected,
            api_calls = stats.api_calls,
            efficiency = format!("{:.2}", stats.api_efficiency),
            "Generation finished"
        );
    }
}
