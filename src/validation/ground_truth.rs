//! Ground-truth calculator.
//!
//! Evaluates a closed family of word-problem formulas directly from the
//! generator's declared parameters, without any model call. Dispatch is a
//! total match over [`FormulaType`]; an unknown tag never reaches a formula.
//!
//! Failures are values, not panics: every fault resolves to a
//! [`CalculationError`] whose message explains why no ground truth exists.

use crate::models::Category;
use crate::validation::expression::Equation;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Default relative tolerance for answer comparison.
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Closed set of formulas the generator is instructed to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaType {
    MeetingTime,
    Overtaking,
    AverageSpeed,
    WorkCombined,
    PipeCombined,
    ProfitPercent,
    LossPercent,
    AgeRatioPast,
    AgeRatioFuture,
    Equation,
}

/// A named numeric parameter and the alternative names generators use for it.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

const fn param(name: &'static str, aliases: &'static [&'static str]) -> ParamSpec {
    ParamSpec { name, aliases }
}

const DISTANCE: ParamSpec = param("distance", &[]);
const SPEED_A: ParamSpec = param("speed_a", &["speed_1"]);
const SPEED_B: ParamSpec = param("speed_b", &["speed_2"]);
const DAYS_A: ParamSpec = param("days_a", &["time_a"]);
const DAYS_B: ParamSpec = param("days_b", &["time_b"]);
const FILL_A: ParamSpec = param("fill_time_a", &["time_a"]);
const FILL_B: ParamSpec = param("fill_time_b", &["time_b"]);
const COST: ParamSpec = param("cost_price", &["cost"]);
const SELLING: ParamSpec = param("selling_price", &["selling"]);
const AGE_A: ParamSpec = param("age_a", &["present_a"]);
const AGE_B: ParamSpec = param("age_b", &["present_b"]);
const YEARS: ParamSpec = param("years", &["offset"]);

impl FormulaType {
    pub const ALL: [FormulaType; 10] = [
        Self::MeetingTime,
        Self::Overtaking,
        Self::AverageSpeed,
        Self::WorkCombined,
        Self::PipeCombined,
        Self::ProfitPercent,
        Self::LossPercent,
        Self::AgeRatioPast,
        Self::AgeRatioFuture,
        Self::Equation,
    ];

    /// Parse a generator-supplied tag. Matching is exact after trimming and
    /// lowercasing; there is no substring guessing.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.tag() == tag)
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::MeetingTime => "meeting_time",
            Self::Overtaking => "overtaking",
            Self::AverageSpeed => "average_speed",
            Self::WorkCombined => "work_combined",
            Self::PipeCombined => "pipe_combined",
            Self::ProfitPercent => "profit_percent",
            Self::LossPercent => "loss_percent",
            Self::AgeRatioPast => "age_ratio_past",
            Self::AgeRatioFuture => "age_ratio_future",
            Self::Equation => "equation",
        }
    }

    /// Numeric parameters the formula needs, in positional order.
    pub fn required_params(self) -> &'static [ParamSpec] {
        match self {
            Self::MeetingTime | Self::Overtaking => &[DISTANCE, SPEED_A, SPEED_B],
            Self::AverageSpeed => &[SPEED_A, SPEED_B],
            Self::WorkCombined => &[DAYS_A, DAYS_B],
            Self::PipeCombined => &[FILL_A, FILL_B],
            Self::ProfitPercent | Self::LossPercent => &[COST, SELLING],
            Self::AgeRatioPast | Self::AgeRatioFuture => &[AGE_A, AGE_B, YEARS],
            Self::Equation => &[],
        }
    }
}

impl fmt::Display for FormulaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Structured parameters declared by the generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormulaParameters {
    /// Parsed formula tag; `None` when absent or not in the closed set
    pub formula_type: Option<FormulaType>,

    /// Tag as the generator wrote it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_tag: Option<String>,

    /// Numeric parameters by name
    #[serde(default)]
    pub values: BTreeMap<String, f64>,

    /// String parameters by name (`equation`, `variable`)
    #[serde(default)]
    pub text: BTreeMap<String, String>,
}

impl FormulaParameters {
    pub fn new(formula_type: FormulaType) -> Self {
        Self {
            formula_type: Some(formula_type),
            raw_tag: Some(formula_type.tag().to_string()),
            ..Default::default()
        }
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn with_text(mut self, name: &str, value: &str) -> Self {
        self.text.insert(name.to_string(), value.to_string());
        self
    }

    /// Read the generator's `parameters` object.
    ///
    /// Numbers and numeric strings become values; other strings are kept as
    /// text. Returns `None` when `value` is not a non-empty object.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object().filter(|o| !o.is_empty())?;
        let mut params = Self::default();

        for (key, entry) in object {
            let key = key.trim().to_ascii_lowercase();
            if key == "formula_type" || key == "type" {
                if let Some(tag) = entry.as_str() {
                    params.formula_type = FormulaType::from_tag(tag);
                    params.raw_tag = Some(tag.to_string());
                }
                continue;
            }
            match entry {
                Value::Number(n) => {
                    if let Some(v) = n.as_f64() {
                        params.values.insert(key, v);
                    }
                }
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(v) => {
                        params.values.insert(key, v);
                    }
                    Err(_) => {
                        params.text.insert(key, s.clone());
                    }
                },
                _ => {}
            }
        }

        // An `equation` entry without a tag still selects the escape hatch.
        if params.formula_type.is_none() && params.raw_tag.is_none() && params.text.contains_key("equation") {
            params.formula_type = Some(FormulaType::Equation);
        }

        Some(params)
    }

    fn lookup(&self, spec: &ParamSpec) -> Option<f64> {
        std::iter::once(spec.name)
            .chain(spec.aliases.iter().copied())
            .find_map(|name| self.values.get(name).copied())
    }

    /// Required parameter; absence is a failure, never an implicit zero.
    fn require(&self, spec: &ParamSpec) -> Result<f64, CalculationError> {
        self.lookup(spec).ok_or(CalculationError::Underspecified)
    }

    /// Required parameter that must also be non-zero.
    fn require_nonzero(&self, spec: &ParamSpec) -> Result<f64, CalculationError> {
        self.require(spec)
            .and_then(|v| if v == 0.0 { Err(CalculationError::Underspecified) } else { Ok(v) })
    }
}

/// Where the ground truth's inputs came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundTruthSource {
    Parameters,
    QuestionText,
}

/// A successfully computed ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub value: f64,
    pub explanation: String,
    pub formula_type: FormulaType,
    pub source: GroundTruthSource,
}

/// Why no ground truth could be computed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalculationError {
    #[error("unknown or underspecified formula_type")]
    Underspecified,

    #[error("combined speed is zero")]
    ZeroCombinedSpeed,

    #[error("slower party cannot overtake: speed_a {speed_a} <= speed_b {speed_b}")]
    ImpossibleOvertaking { speed_a: f64, speed_b: f64 },

    #[error("zero rate time")]
    ZeroRateTime,

    #[error("cost price is zero")]
    ZeroCost,

    #[error("{formula} does not match the sign of selling - cost ({difference})")]
    SignMismatch {
        formula: FormulaType,
        difference: f64,
    },

    #[error("age ratio divisor resolves to zero")]
    ZeroDivisor,

    #[error("equation error: {0}")]
    Equation(String),

    #[error("no real solution for {0}")]
    NoSolution(String),

    #[error("question text has {found} numbers, {formula} needs {needed}")]
    NotEnoughNumbers {
        formula: FormulaType,
        found: usize,
        needed: usize,
    },

    #[error("result is not a finite number")]
    NonFinite,
}

fn solved(
    formula_type: FormulaType,
    value: f64,
    explanation: String,
) -> Result<GroundTruth, CalculationError> {
    if !value.is_finite() {
        return Err(CalculationError::NonFinite);
    }
    Ok(GroundTruth {
        value,
        explanation,
        formula_type,
        source: GroundTruthSource::Parameters,
    })
}

/// Compute the ground truth for structured parameters.
pub fn compute(params: &FormulaParameters) -> Result<GroundTruth, CalculationError> {
    let formula = params.formula_type.ok_or(CalculationError::Underspecified)?;

    match formula {
        FormulaType::MeetingTime => {
            let d = params.require_nonzero(&DISTANCE)?;
            let a = params.require(&SPEED_A)?;
            let b = params.require(&SPEED_B)?;
            if a + b == 0.0 {
                return Err(CalculationError::ZeroCombinedSpeed);
            }
            let t = d / (a + b);
            solved(formula, t, format!("Meeting time = {d} / ({a} + {b}) = {t:.3}"))
        }
        FormulaType::Overtaking => {
            let d = params.require_nonzero(&DISTANCE)?;
            let a = params.require_nonzero(&SPEED_A)?;
            let b = params.require_nonzero(&SPEED_B)?;
            if a <= b {
                return Err(CalculationError::ImpossibleOvertaking {
                    speed_a: a,
                    speed_b: b,
                });
            }
            let t = d / (a - b);
            solved(formula, t, format!("Overtaking time = {d} / ({a} - {b}) = {t:.3}"))
        }
        FormulaType::AverageSpeed => {
            let a = params.require(&SPEED_A)?;
            let b = params.require(&SPEED_B)?;
            if a + b == 0.0 {
                return Err(CalculationError::ZeroCombinedSpeed);
            }
            let v = 2.0 * a * b / (a + b);
            solved(formula, v, format!("Average speed = 2 × {a} × {b} / ({a} + {b}) = {v:.3}"))
        }
        FormulaType::WorkCombined | FormulaType::PipeCombined => {
            let (first, second) = if formula == FormulaType::WorkCombined {
                (&DAYS_A, &DAYS_B)
            } else {
                (&FILL_A, &FILL_B)
            };
            let a = params.require(first)?;
            let b = params.require(second)?;
            if a == 0.0 || b == 0.0 {
                return Err(CalculationError::ZeroRateTime);
            }
            let t = 1.0 / (1.0 / a + 1.0 / b);
            solved(formula, t, format!("Combined time = 1 / (1/{a} + 1/{b}) = {t:.3}"))
        }
        FormulaType::ProfitPercent | FormulaType::LossPercent => {
            let cost = params.require(&COST)?;
            let selling = params.require(&SELLING)?;
            if cost == 0.0 {
                return Err(CalculationError::ZeroCost);
            }
            let difference = selling - cost;
            let sign_ok = match formula {
                FormulaType::ProfitPercent => difference >= 0.0,
                _ => difference <= 0.0,
            };
            if !sign_ok {
                return Err(CalculationError::SignMismatch { formula, difference });
            }
            let pct = difference.abs() / cost * 100.0;
            let word = if formula == FormulaType::ProfitPercent { "Profit" } else { "Loss" };
            solved(formula, pct, format!("{word} % = |{selling} - {cost}| / {cost} × 100 = {pct:.3}"))
        }
        FormulaType::AgeRatioPast | FormulaType::AgeRatioFuture => {
            let a = params.require(&AGE_A)?;
            let b = params.require(&AGE_B)?;
            let years = params.require_nonzero(&YEARS)?;
            let (offset, op) = if formula == FormulaType::AgeRatioPast {
                (-years, '-')
            } else {
                (years, '+')
            };
            let divisor = b + offset;
            if divisor == 0.0 {
                return Err(CalculationError::ZeroDivisor);
            }
            let ratio = (a + offset) / divisor;
            solved(
                formula,
                ratio,
                format!("Age ratio = ({a} {op} {years}) / ({b} {op} {years}) = {ratio:.3}"),
            )
        }
        FormulaType::Equation => solve_equation(params),
    }
}

fn solve_equation(params: &FormulaParameters) -> Result<GroundTruth, CalculationError> {
    let source = params
        .text
        .get("equation")
        .ok_or(CalculationError::Underspecified)?;
    let variable = params
        .text
        .get("variable")
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "x".to_string());

    let equation = Equation::parse(source).map_err(|e| CalculationError::Equation(e.to_string()))?;
    let root = equation
        .solve(&variable, &params.values)
        .map_err(|e| CalculationError::Equation(e.to_string()))?
        .ok_or_else(|| CalculationError::NoSolution(variable.clone()))?;

    solved(
        FormulaType::Equation,
        root,
        format!("Solved {source} for {variable} = {root:.3}"),
    )
}

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?").expect("number pattern is valid")
});

/// Decimal numbers in `text`, left to right.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    NUMBER_PATTERN
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse().ok())
        .collect()
}

/// Formula used when the generator declared no parameters for `category`.
fn fallback_formula(category: Category, numbers: &[f64]) -> Option<FormulaType> {
    match category {
        Category::TimeSpeedDistance => Some(FormulaType::MeetingTime),
        Category::WorkTime => Some(FormulaType::WorkCombined),
        Category::PipesCisterns => Some(FormulaType::PipeCombined),
        Category::ProfitLoss => match numbers {
            [cost, selling, ..] if selling < cost => Some(FormulaType::LossPercent),
            _ => Some(FormulaType::ProfitPercent),
        },
        Category::AgeProblems => Some(FormulaType::AgeRatioPast),
        Category::MixtureAlligation => None,
    }
}

/// Best-effort ground truth from the numbers in the question text.
pub fn compute_from_text(category: Category, question: &str) -> Result<GroundTruth, CalculationError> {
    let numbers = extract_numbers(question);
    let formula = fallback_formula(category, &numbers).ok_or(CalculationError::Underspecified)?;
    let specs = formula.required_params();
    if numbers.len() < specs.len() {
        return Err(CalculationError::NotEnoughNumbers {
            formula,
            found: numbers.len(),
            needed: specs.len(),
        });
    }

    let params = specs
        .iter()
        .zip(&numbers)
        .fold(FormulaParameters::new(formula), |p, (spec, value)| p.with(spec.name, *value));

    compute(&params).map(|mut truth| {
        truth.source = GroundTruthSource::QuestionText;
        truth
    })
}

/// Structured parameters when present, otherwise the question-text fallback.
pub fn compute_with_fallback(
    params: Option<&FormulaParameters>,
    category: Category,
    question: &str,
) -> Result<GroundTruth, CalculationError> {
    match params {
        Some(params) => compute(params),
        None => compute_from_text(category, question),
    }
}

/// Whether `calculated` is within relative `tolerance` of `ground_truth`.
///
/// A zero ground truth falls back to an absolute band of `tolerance`.
pub fn validate_answer(calculated: f64, ground_truth: f64, tolerance: f64) -> bool {
    if ground_truth == 0.0 {
        return calculated.abs() < tolerance;
    }
    (calculated - ground_truth).abs() <= tolerance * ground_truth.abs()
}

/// Numeric value of an option string ("2.5 hours", "$50", "-3 °C").
///
/// Keeps only digits, '.' and '-' and parses what is left.
pub fn extract_numeric_value(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
