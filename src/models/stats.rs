//! Run statistics.

use crate::models::{Problem, RejectionReason, ValidationOutcome};
use crate::validation::ViolationKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statistics for one generation request.
///
/// Owned exclusively by the generation loop; reset at the start of every
/// request and updated after every attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Attempts started
    pub total_attempts: usize,

    /// Attempts whose generation call produced usable output
    pub total_generated: usize,

    /// Attempts accepted as problems
    pub total_valid: usize,

    /// Attempts rejected for any reason
    pub total_rejected: usize,

    /// Rejections per reason
    pub rejection_reasons: BTreeMap<RejectionReason, usize>,

    /// Rule violations per category (one attempt may add several)
    pub rule_violations: BTreeMap<ViolationKind, usize>,

    /// Accepted problems where both solvers picked the same option
    pub solver_agreements: usize,

    /// Accepted problems whose answer matched a known ground truth
    pub ground_truth_matches: usize,

    /// Attempts where the calculator could not produce a ground truth
    pub ground_truth_unavailable: usize,

    /// Slots given up after exhausting their retries
    pub abandoned_slots: usize,

    /// External completion calls issued (successful or not)
    pub api_calls: usize,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Accepted problems per external call
    pub api_efficiency: f64,

    /// solver_agreements / accepted problems
    pub solver_agreement_rate: f64,

    /// ground_truth_matches / accepted problems
    pub ground_truth_accuracy: f64,
}

impl RunStatistics {
    pub fn record_api_call(&mut self) {
        self.api_calls += 1;
    }

    pub fn record_rejection(&mut self, reason: RejectionReason) {
        self.total_rejected += 1;
        *self.rejection_reasons.entry(reason).or_insert(0) += 1;
    }

    pub fn record_violations<'a>(&mut self, kinds: impl IntoIterator<Item = &'a ViolationKind>) {
        for kind in kinds {
            *self.rule_violations.entry(*kind).or_insert(0) += 1;
        }
    }

    pub fn record_accepted(&mut self, problem: &Problem, outcome: &ValidationOutcome) {
        self.total_valid += 1;
        if outcome.solvers_agree {
            self.solver_agreements += 1;
        }
        if problem.ground_truth.is_some() {
            self.ground_truth_matches += 1;
        }
    }

    /// Count of rejections for one reason.
    pub fn rejections(&self, reason: RejectionReason) -> usize {
        self.rejection_reasons.get(&reason).copied().unwrap_or(0)
    }

    /// Calculate derived stats.
    pub fn finalize(&mut self, runtime_secs: f64) {
        self.runtime_secs = runtime_secs;
        if self.api_calls > 0 {
            self.api_efficiency = self.total_valid as f64 / self.api_calls as f64;
        }
        let accepted = self.total_valid.max(1) as f64;
        self.solver_agreement_rate = self.solver_agreements as f64 / accepted;
        self.ground_truth_accuracy = self.ground_truth_matches as f64 / accepted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_histogram() {
        let mut stats = RunStatistics::default();
        stats.record_rejection(RejectionReason::RuleViolation);
        stats.record_rejection(RejectionReason::RuleViolation);
        stats.record_rejection(RejectionReason::SolverDisagreement);

        assert_eq!(stats.total_rejected, 3);
        assert_eq!(stats.rejections(RejectionReason::RuleViolation), 2);
        assert_eq!(stats.rejections(RejectionReason::LowConfidence), 0);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["rejection_reasons"]["rule_violation"], 2);
    }

    #[test]
    fn test_finalize_derives_efficiency() {
        let mut stats = RunStatistics {
            total_valid: 3,
            api_calls: 9,
            solver_agreements: 3,
            ground_truth_matches: 2,
            ..Default::default()
        };
        stats.finalize(1.5);
        assert!((stats.api_efficiency - 1.0 / 3.0).abs() < 1e-12);
        assert!((stats.solver_agreement_rate - 1.0).abs() < 1e-12);
        assert!((stats.ground_truth_accuracy - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_finalize_without_calls() {
        let mut stats = RunStatistics::default();
        stats.finalize(0.0);
        assert_eq!(stats.api_efficiency, 0.0);
        assert_eq!(stats.solver_agreement_rate, 0.0);
    }
}
