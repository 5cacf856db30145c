//! Solver consensus.
//!
//! Combines the generator's claimed label, two solver opinions and an
//! optional ground truth into one [`ValidationOutcome`].
//!
//! Two rule sets are available (see [`ConsensusMode`]):
//! - `tiered`: triple agreement → solver consensus → ground-truth only →
//!   reject, first match wins
//! - `confidence_weighted`: per-solver `confidence × accuracy` scores
//!   against the ground truth

use crate::models::{
    ConsensusMode, McqOptions, OptionLabel, RejectionReason, SolverResult, ValidationConfig,
    ValidationOutcome, ValidationTier,
};
use crate::validation::validate_answer;

/// Keeps relative errors finite when the ground truth is zero.
pub const RELATIVE_EPSILON: f64 = 0.001;

#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    config: ValidationConfig,
}

impl ConsensusEngine {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn mode(&self) -> ConsensusMode {
        self.config.mode
    }

    /// Decide one attempt with the configured rule set.
    ///
    /// Confidence-weighted scoring needs a ground truth; without one the
    /// tiered rules decide.
    pub fn decide(
        &self,
        generator_answer: Option<OptionLabel>,
        solver_a: &SolverResult,
        solver_b: &SolverResult,
        ground_truth: Option<f64>,
        options: &McqOptions,
    ) -> ValidationOutcome {
        match (self.config.mode, ground_truth) {
            (ConsensusMode::ConfidenceWeighted, Some(gt)) => {
                self.decide_weighted(generator_answer, solver_a, solver_b, gt)
            }
            _ => self.decide_tiered(generator_answer, solver_a, solver_b, ground_truth, options),
        }
    }

    /// Label tiers, evaluated in strict priority order.
    pub fn decide_tiered(
        &self,
        generator_answer: Option<OptionLabel>,
        solver_a: &SolverResult,
        solver_b: &SolverResult,
        ground_truth: Option<f64>,
        options: &McqOptions,
    ) -> ValidationOutcome {
        let tolerance = self.config.tolerance;
        let option_matches = |label: OptionLabel, gt: f64| {
            options
                .numeric_value(label)
                .is_some_and(|v| validate_answer(v, gt, tolerance))
        };
        let matches_gt = |label: Option<OptionLabel>| match (label, ground_truth) {
            (Some(label), Some(gt)) => option_matches(label, gt),
            _ => false,
        };

        let shared = match (solver_a.selected_option, solver_b.selected_option) {
            (Some(a), Some(b)) if a == b => Some(a),
            _ => None,
        };
        let solvers_agree = shared.is_some();
        let mean_confidence = (solver_a.confidence + solver_b.confidence) / 2.0;

        // Tier 1: generator == A == B, and the ground truth (if known) agrees
        if let Some(label) = shared.filter(|l| Some(*l) == generator_answer) {
            if ground_truth.is_none() || matches_gt(Some(label)) {
                return ValidationOutcome::accept(
                    ValidationTier::TripleAgreement,
                    mean_confidence,
                    label,
                    true,
                    ground_truth.is_some(),
                );
            }
        }

        // Tier 2: confident solver agreement, regardless of the generator
        if let Some(label) = shared {
            let threshold = self.config.consensus_confidence;
            if solver_a.confidence > threshold && solver_b.confidence > threshold {
                return ValidationOutcome::accept(
                    ValidationTier::SolverConsensus,
                    mean_confidence,
                    label,
                    true,
                    matches_gt(Some(label)),
                );
            }
        }

        // Tier 3: the generator's label matches the ground truth
        if let Some(label) = generator_answer.filter(|l| matches_gt(Some(*l))) {
            return ValidationOutcome::accept(
                ValidationTier::GroundTruthOnly,
                self.config.ground_truth_only_score,
                label,
                solvers_agree,
                true,
            );
        }

        let reason = if !solvers_agree {
            RejectionReason::SolverDisagreement
        } else if ground_truth.is_some() {
            RejectionReason::GroundTruthMismatch
        } else {
            RejectionReason::LowConfidence
        };
        ValidationOutcome::reject(reason, solvers_agree, false)
    }

    /// Confidence × accuracy scoring against a known ground truth.
    pub fn decide_weighted(
        &self,
        generator_answer: Option<OptionLabel>,
        solver_a: &SolverResult,
        solver_b: &SolverResult,
        ground_truth: f64,
    ) -> ValidationOutcome {
        let scale = ground_truth.abs() + RELATIVE_EPSILON;
        let score = |s: &SolverResult| {
            let error = (s.answer - ground_truth).abs() / scale;
            s.confidence * (1.0 - error).max(0.0)
        };
        let mean_score = (score(solver_a) + score(solver_b)) / 2.0;

        let tolerance = self.config.tolerance;
        let a_matches = validate_answer(solver_a.answer, ground_truth, tolerance);
        let b_matches = validate_answer(solver_b.answer, ground_truth, tolerance);
        let any_matches = a_matches || b_matches;
        let solvers_agree =
            (solver_a.answer - solver_b.answer).abs() / scale < self.config.solver_agreement_tolerance;

        if !solvers_agree {
            return ValidationOutcome::reject(RejectionReason::SolverDisagreement, false, any_matches);
        }
        if !any_matches {
            return ValidationOutcome::reject(RejectionReason::GroundTruthMismatch, true, false);
        }
        if mean_score <= self.config.weighted_threshold {
            return ValidationOutcome::reject(RejectionReason::LowConfidence, true, true);
        }

        let shared = match (solver_a.selected_option, solver_b.selected_option) {
            (Some(a), Some(b)) if a == b => Some(a),
            _ => None,
        };
        let Some(label) = shared.or(generator_answer) else {
            return ValidationOutcome::reject(RejectionReason::SolverDisagreement, true, true);
        };
        let tier = if shared.is_some() && generator_answer == shared {
            ValidationTier::TripleAgreement
        } else {
            ValidationTier::GroundTruthOnly
        };
        ValidationOutcome::accept(tier, mean_score, label, true, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SolverApproach;
    use crate::models::OptionLabel::{A, B, C, D};

    fn options() -> McqOptions {
        McqOptions::new("4.8 days", "6 days", "7.5 days", "9 days")
    }

    fn solver(label: Option<OptionLabel>, answer: f64, confidence: f64) -> SolverResult {
        SolverResult {
            answer,
            confidence,
            reasoning: String::new(),
            approach: SolverApproach::Algebraic,
            selected_option: label,
        }
    }

    fn tiered() -> ConsensusEngine {
        ConsensusEngine::new(ValidationConfig::default())
    }

    fn weighted() -> ConsensusEngine {
        ConsensusEngine::new(ValidationConfig {
            mode: ConsensusMode::ConfidenceWeighted,
            ..Default::default()
        })
    }

    #[test]
    fn test_triple_agreement_with_matching_ground_truth() {
        let a = solver(Some(B), 6.0, 0.9);
        let b = solver(Some(B), 6.0, 0.9);
        let outcome = tiered().decide(Some(B), &a, &b, Some(6.0 * 1.02), &options());

        assert!(outcome.is_valid);
        assert_eq!(outcome.tier, ValidationTier::TripleAgreement);
        assert_eq!(outcome.accepted_label, Some(B));
        assert!((outcome.score - 0.9).abs() < 1e-12);
        assert!(outcome.matches_ground_truth);
    }

    #[test]
    fn test_triple_agreement_without_ground_truth() {
        let a = solver(Some(B), 6.0, 0.6);
        let b = solver(Some(B), 6.0, 0.5);
        let outcome = tiered().decide(Some(B), &a, &b, None, &options());
        assert_eq!(outcome.tier, ValidationTier::TripleAgreement);
        assert!(!outcome.matches_ground_truth);
    }

    #[test]
    fn test_mismatched_ground_truth_never_accepts_tier_one() {
        let a = solver(Some(B), 6.0, 0.9);
        let b = solver(Some(B), 6.0, 0.9);
        let outcome = tiered().decide(Some(B), &a, &b, Some(9.0), &options());

        // Falls through to confident solver agreement
        assert_eq!(outcome.tier, ValidationTier::SolverConsensus);
        assert!(!outcome.matches_ground_truth);

        // And with low confidence, to rejection
        let a = solver(Some(B), 6.0, 0.6);
        let b = solver(Some(B), 6.0, 0.6);
        let outcome = tiered().decide(Some(B), &a, &b, Some(9.0), &options());
        assert!(!outcome.is_valid);
        assert_eq!(outcome.rejection, Some(RejectionReason::GroundTruthMismatch));
    }

    #[test]
    fn test_solver_consensus_ignores_generator() {
        let a = solver(Some(C), 7.5, 0.8);
        let b = solver(Some(C), 7.5, 0.75);
        let outcome = tiered().decide(Some(A), &a, &b, None, &options());
        assert_eq!(outcome.tier, ValidationTier::SolverConsensus);
        assert_eq!(outcome.accepted_label, Some(C));
    }

    #[test]
    fn test_consensus_threshold_is_exclusive() {
        let a = solver(Some(C), 7.5, 0.70);
        let b = solver(Some(C), 7.5, 0.95);
        let outcome = tiered().decide(Some(A), &a, &b, None, &options());
        assert_eq!(outcome.rejection, Some(RejectionReason::LowConfidence));
    }

    #[test]
    fn test_ground_truth_only() {
        let a = solver(Some(A), 4.8, 0.9);
        let b = solver(Some(D), 9.0, 0.9);
        let outcome = tiered().decide(Some(B), &a, &b, Some(6.0), &options());
        assert_eq!(outcome.tier, ValidationTier::GroundTruthOnly);
        assert_eq!(outcome.accepted_label, Some(B));
        assert!((outcome.score - 0.85).abs() < 1e-12);
        assert!(!outcome.solvers_agree);
    }

    #[test]
    fn test_rejection_priority() {
        let opts = options();
        let engine = tiered();

        let outcome = engine.decide(Some(B), &solver(Some(A), 4.8, 0.9), &solver(Some(C), 7.5, 0.9), Some(6.5), &opts);
        assert_eq!(outcome.rejection, Some(RejectionReason::SolverDisagreement));

        let outcome = engine.decide(Some(B), &solver(Some(C), 7.5, 0.5), &solver(Some(C), 7.5, 0.5), Some(6.5), &opts);
        assert_eq!(outcome.rejection, Some(RejectionReason::GroundTruthMismatch));

        let outcome = engine.decide(Some(B), &solver(Some(C), 7.5, 0.5), &solver(Some(C), 7.5, 0.5), None, &opts);
        assert_eq!(outcome.rejection, Some(RejectionReason::LowConfidence));
    }

    #[test]
    fn test_invalid_labels_are_non_matches() {
        let a = solver(None, 6.0, 0.99);
        let b = solver(None, 6.0, 0.99);
        let outcome = tiered().decide(None, &a, &b, None, &options());
        assert!(!outcome.is_valid);
        assert_eq!(outcome.rejection, Some(RejectionReason::SolverDisagreement));
    }

    #[test]
    fn test_weighted_accepts_accurate_confident_solvers() {
        let a = solver(Some(B), 6.0, 0.9);
        let b = solver(Some(B), 6.1, 0.9);
        let outcome = weighted().decide(Some(B), &a, &b, Some(6.0), &options());
        assert!(outcome.is_valid);
        assert_eq!(outcome.tier, ValidationTier::TripleAgreement);
        assert!(outcome.score > 0.75);
    }

    #[test]
    fn test_weighted_rejects_low_confidence_exact_solvers() {
        // Numerically exact but unsure: the label tiers accept this,
        // confidence weighting does not.
        let a = solver(Some(A), 6.0, 0.5);
        let b = solver(Some(C), 6.0, 0.5);
        let opts = options();

        let tiered = tiered().decide(Some(B), &a, &b, Some(6.0), &opts);
        assert_eq!(tiered.tier, ValidationTier::GroundTruthOnly);

        let outcome = weighted().decide(Some(B), &a, &b, Some(6.0), &opts);
        assert_eq!(outcome.rejection, Some(RejectionReason::LowConfidence));
    }

    #[test]
    fn test_weighted_rejection_priority() {
        let engine = weighted();
        let opts = options();

        let outcome = engine.decide(Some(B), &solver(Some(B), 6.0, 0.9), &solver(Some(C), 9.0, 0.9), Some(6.0), &opts);
        assert_eq!(outcome.rejection, Some(RejectionReason::SolverDisagreement));

        let outcome = engine.decide(Some(B), &solver(Some(C), 7.5, 0.9), &solver(Some(C), 7.5, 0.9), Some(6.0), &opts);
        assert_eq!(outcome.rejection, Some(RejectionReason::GroundTruthMismatch));
    }

    #[test]
    fn test_weighted_label_falls_back_to_generator() {
        let a = solver(Some(A), 6.0, 0.95);
        let b = solver(Some(B), 6.0, 0.95);
        let outcome = weighted().decide(Some(B), &a, &b, Some(6.0), &options());
        assert!(outcome.is_valid);
        assert_eq!(outcome.accepted_label, Some(B));
        assert_eq!(outcome.tier, ValidationTier::GroundTruthOnly);
    }

    #[test]
    fn test_weighted_without_ground_truth_uses_tiers() {
        let a = solver(Some(C), 7.5, 0.9);
        let b = solver(Some(C), 7.5, 0.9);
        let outcome = weighted().decide(Some(A), &a, &b, None, &options());
        assert_eq!(outcome.tier, ValidationTier::SolverConsensus);
    }
}
