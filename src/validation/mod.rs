//! Validation pipeline stages.
//!
//! - `ground_truth`: closed-form formulas evaluated from declared parameters
//! - `expression`: equation parser and root finder for the `equation` formula
//! - `rules`: plausibility rules over parameters and option text
//! - `consensus`: accept/reject decision over solver opinions

pub mod consensus;
pub mod expression;
pub mod ground_truth;
pub mod rules;

pub use consensus::ConsensusEngine;
pub use ground_truth::{
    CalculationError, DEFAULT_TOLERANCE, FormulaParameters, FormulaType, GroundTruth,
    GroundTruthSource, compute, compute_from_text, compute_with_fallback, extract_numeric_value,
    validate_answer,
};
pub use rules::{RuleReport, Violation, ViolationKind};
