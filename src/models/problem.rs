//! Problem, option and solver types.
//!
//! A [`Problem`] only exists once an attempt has passed consensus; the
//! attempt-scoped pieces (`SolverResult`, `ValidationOutcome`) are defined
//! alongside it because a `Problem` carries copies of them.

use crate::validation::{extract_numeric_value, validate_answer};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Label of a multiple-choice option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OptionLabel {
    A,
    B,
    C,
    D,
}

static LABEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:the\s+)?(?:correct\s+)?(?:answer|option|choice)(?:\s+is)?\s*[:.\-]?\s*)?(?:option\s*)?[\(\[]?([a-d])\b",
    )
    .expect("label pattern is valid")
});

impl OptionLabel {
    pub const ALL: [OptionLabel; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// Reduce stray solver/generator text ("Option B", "b)", "B. 4.8 days",
    /// "Answer: B", "The correct option is C") to a bare label. Anything
    /// else is `None`.
    pub fn normalize(raw: &str) -> Option<Self> {
        let captures = LABEL_PATTERN.captures(raw)?;
        match captures.get(1)?.as_str().to_ascii_uppercase().as_str() {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

impl fmt::Display for OptionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly four labeled choices, each a short value-with-unit string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McqOptions {
    #[serde(rename = "A")]
    pub a: String,
    #[serde(rename = "B")]
    pub b: String,
    #[serde(rename = "C")]
    pub c: String,
    #[serde(rename = "D")]
    pub d: String,
}

impl McqOptions {
    pub fn new(
        a: impl Into<String>,
        b: impl Into<String>,
        c: impl Into<String>,
        d: impl Into<String>,
    ) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            c: c.into(),
            d: d.into(),
        }
    }

    /// Display text of the option at `label`.
    pub fn get(&self, label: OptionLabel) -> &str {
        match label {
            OptionLabel::A => &self.a,
            OptionLabel::B => &self.b,
            OptionLabel::C => &self.c,
            OptionLabel::D => &self.d,
        }
    }

    /// Numeric value extracted from the option at `label`.
    pub fn numeric_value(&self, label: OptionLabel) -> Option<f64> {
        extract_numeric_value(self.get(label))
    }

    /// Whether the option at `label` is within `tolerance` of `value`.
    pub fn matches(&self, label: OptionLabel, value: f64, tolerance: f64) -> bool {
        self.numeric_value(label)
            .is_some_and(|v| validate_answer(v, value, tolerance))
    }

    /// Labels whose option is within `tolerance` of `value`, in A–D order.
    pub fn labels_matching(&self, value: f64, tolerance: f64) -> Vec<OptionLabel> {
        OptionLabel::ALL
            .into_iter()
            .filter(|l| self.matches(*l, value, tolerance))
            .collect()
    }

    /// Labels paired with their display text, in A–D order.
    pub fn iter(&self) -> impl Iterator<Item = (OptionLabel, &str)> {
        OptionLabel::ALL.into_iter().map(move |l| (l, self.get(l)))
    }
}

/// How a solver approached the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverApproach {
    Algebraic,
    Logical,
}

impl fmt::Display for SolverApproach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Algebraic => write!(f, "algebraic"),
            Self::Logical => write!(f, "logical"),
        }
    }
}

/// One independent solver opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverResult {
    /// Numeric answer the solver computed
    pub answer: f64,

    /// Self-reported confidence (0.0 - 1.0)
    pub confidence: f64,

    /// Free-text reasoning
    pub reasoning: String,

    /// Approach tag
    pub approach: SolverApproach,

    /// Selected option; `None` when the solver's label could not be normalized
    pub selected_option: Option<OptionLabel>,
}

/// Problem category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Time, Speed & Distance")]
    TimeSpeedDistance,
    #[serde(rename = "Work & Time")]
    WorkTime,
    #[serde(rename = "Pipes & Cisterns")]
    PipesCisterns,
    #[serde(rename = "Profit & Loss")]
    ProfitLoss,
    #[serde(rename = "Age Problems")]
    AgeProblems,
    #[serde(rename = "Mixture & Alligation")]
    MixtureAlligation,
}

impl Category {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::TimeSpeedDistance => "Time, Speed & Distance",
            Self::WorkTime => "Work & Time",
            Self::PipesCisterns => "Pipes & Cisterns",
            Self::ProfitLoss => "Profit & Loss",
            Self::AgeProblems => "Age Problems",
            Self::MixtureAlligation => "Mixture & Alligation",
        }
    }

    /// Three-letter prefix used in problem ids.
    pub fn code(self) -> &'static str {
        match self {
            Self::TimeSpeedDistance => "TSD",
            Self::WorkTime => "WRK",
            Self::PipesCisterns => "PIP",
            Self::ProfitLoss => "PRL",
            Self::AgeProblems => "AGE",
            Self::MixtureAlligation => "MIX",
        }
    }

    /// Work and pipe problems share the rate/duration plausibility rules.
    pub fn is_rate_based(self) -> bool {
        matches!(self, Self::WorkTime | Self::PipesCisterns)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let category = match key.as_str() {
            "tsd" | "speed" | "time-speed-distance" | "time, speed & distance" => {
                Self::TimeSpeedDistance
            }
            "work" | "work-time" | "work & time" => Self::WorkTime,
            "pipes" | "pipe" | "pipes-cisterns" | "pipes & cisterns" => Self::PipesCisterns,
            "profit" | "loss" | "profit-loss" | "profit & loss" => Self::ProfitLoss,
            "age" | "ages" | "age-problems" | "age problems" => Self::AgeProblems,
            "mixture" | "mixture-alligation" | "mixture & alligation" => Self::MixtureAlligation,
            _ => return Err(format!("unknown category '{s}'")),
        };
        Ok(category)
    }
}

/// Problem difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Difficulty for the `slot`-th problem of a run (EASY, MEDIUM, HARD, ...).
    pub fn for_slot(slot: usize) -> Self {
        match slot % 3 {
            0 => Self::Easy,
            1 => Self::Medium,
            _ => Self::Hard,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Easy => write!(f, "EASY"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Hard => write!(f, "HARD"),
        }
    }
}

/// Named consensus rule that decided an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationTier {
    TripleAgreement,
    SolverConsensus,
    GroundTruthOnly,
    Rejected,
}

impl fmt::Display for ValidationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TripleAgreement => write!(f, "triple_agreement"),
            Self::SolverConsensus => write!(f, "solver_consensus"),
            Self::GroundTruthOnly => write!(f, "ground_truth_only"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Validation status of a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Valid,
    Invalid,
}

/// Why an attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Generation call failed or omitted mandatory fields
    GenerationError,
    /// Plausibility rules found at least one violation
    RuleViolation,
    /// A solver call failed
    SolverError,
    /// The two solvers picked different options
    SolverDisagreement,
    /// Ground truth known but not matched
    GroundTruthMismatch,
    /// Nothing else applied
    LowConfidence,
    /// Unexpected failure inside the attempt
    InternalError,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerationError => "generation_error",
            Self::RuleViolation => "rule_violation",
            Self::SolverError => "solver_error",
            Self::SolverDisagreement => "solver_disagreement",
            Self::GroundTruthMismatch => "ground_truth_mismatch",
            Self::LowConfidence => "low_confidence",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision of the consensus engine for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub tier: ValidationTier,
    /// Score in [0, 1]
    pub score: f64,
    /// Set iff `is_valid` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionReason>,
    /// Option the accepted problem will mark as correct
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_label: Option<OptionLabel>,
    /// Both solvers selected the same option
    pub solvers_agree: bool,
    /// Ground truth known and matched
    pub matches_ground_truth: bool,
}

impl ValidationOutcome {
    pub fn accept(
        tier: ValidationTier,
        score: f64,
        label: OptionLabel,
        solvers_agree: bool,
        matches_ground_truth: bool,
    ) -> Self {
        Self {
            is_valid: true,
            tier,
            score: score.clamp(0.0, 1.0),
            rejection: None,
            accepted_label: Some(label),
            solvers_agree,
            matches_ground_truth,
        }
    }

    pub fn reject(reason: RejectionReason, solvers_agree: bool, matches_ground_truth: bool) -> Self {
        Self {
            is_valid: false,
            tier: ValidationTier::Rejected,
            score: 0.0,
            rejection: Some(reason),
            accepted_label: None,
            solvers_agree,
            matches_ground_truth,
        }
    }

    pub fn status(&self) -> ValidationStatus {
        if self.is_valid {
            ValidationStatus::Valid
        } else {
            ValidationStatus::Invalid
        }
    }
}

/// Everything an attempt produced, before it becomes a [`Problem`].
#[derive(Debug, Clone)]
pub struct ProblemDraft {
    pub category: Category,
    pub difficulty: Difficulty,
    pub question: String,
    pub options: McqOptions,
    pub ground_truth: Option<f64>,
    pub calculation: Option<String>,
    /// Worked solution as written by the generator
    pub solution_steps: Option<String>,
    pub solver_a: SolverResult,
    pub solver_b: SolverResult,
    pub attempts: u32,
}

/// Broken problem invariant, detected at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantError {
    #[error("consensus did not accept the attempt")]
    NotAccepted,

    #[error("options {0} and {1} extract to the same numeric value")]
    IndistinctOptions(OptionLabel, OptionLabel),

    #[error("option {label} ({text:?}) is not within tolerance of ground truth {ground_truth:.4}")]
    GroundTruthMismatch {
        label: OptionLabel,
        text: String,
        ground_truth: f64,
    },
}

impl InvariantError {
    pub fn reason(&self) -> RejectionReason {
        match self {
            Self::NotAccepted => RejectionReason::LowConfidence,
            Self::IndistinctOptions(..) => RejectionReason::RuleViolation,
            Self::GroundTruthMismatch { .. } => RejectionReason::GroundTruthMismatch,
        }
    }
}

/// A validated multiple-choice problem. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub category: Category,
    pub difficulty: Difficulty,
    pub question: String,
    pub options: McqOptions,
    pub correct_answer: OptionLabel,
    pub ground_truth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_steps: Option<String>,
    pub solver_a_result: Option<SolverResult>,
    pub solver_b_result: Option<SolverResult>,
    pub validation_status: ValidationStatus,
    pub validation_tier: ValidationTier,
    pub validation_score: f64,
    pub attempts: u32,
}

impl Problem {
    /// Build a problem from an accepted attempt.
    ///
    /// Enforces: the outcome accepted a label, the four options extract to
    /// pairwise distinct values, and the accepted option is within
    /// `tolerance` of the ground truth whenever the ground truth is known.
    pub fn from_validated(
        id: String,
        draft: ProblemDraft,
        outcome: &ValidationOutcome,
        tolerance: f64,
    ) -> Result<Self, InvariantError> {
        let label = match (outcome.is_valid, outcome.accepted_label) {
            (true, Some(label)) => label,
            _ => return Err(InvariantError::NotAccepted),
        };

        let values: Vec<(OptionLabel, Option<f64>)> = OptionLabel::ALL
            .into_iter()
            .map(|l| (l, draft.options.numeric_value(l)))
            .collect();
        for (i, (left, lv)) in values.iter().enumerate() {
            for (right, rv) in &values[i + 1..] {
                if let (Some(lv), Some(rv)) = (lv, rv) {
                    if lv == rv {
                        return Err(InvariantError::IndistinctOptions(*left, *right));
                    }
                }
            }
        }

        if let Some(ground_truth) = draft.ground_truth {
            if !draft.options.matches(label, ground_truth, tolerance) {
                return Err(InvariantError::GroundTruthMismatch {
                    label,
                    text: draft.options.get(label).to_string(),
                    ground_truth,
                });
            }
        }

        Ok(Self {
            id,
            category: draft.category,
            difficulty: draft.difficulty,
            question: draft.question,
            options: draft.options,
            correct_answer: label,
            ground_truth: draft.ground_truth,
            calculation: draft.calculation,
            solution_steps: draft.solution_steps,
            solver_a_result: Some(draft.solver_a),
            solver_b_result: Some(draft.solver_b),
            validation_status: outcome.status(),
            validation_tier: outcome.tier,
            validation_score: outcome.score,
            attempts: draft.attempts,
        })
    }
}
