//! Plausibility rules.
//!
//! Stateless checks over the generator's declared parameters and option
//! text. Every rule runs; violations are collected, never short-circuited.

use crate::models::{Category, McqOptions};
use crate::validation::{FormulaParameters, extract_numeric_value};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_SPEED_KMH: f64 = 500.0;
pub const MAX_TIME: f64 = 100.0;
pub const MAX_DISTANCE_KM: f64 = 10_000.0;
pub const MAX_WORK_DAYS: f64 = 365.0;

/// Minimum gap between any two sorted option values.
pub const MIN_OPTION_GAP: f64 = 0.01;

/// Violation category, used as the statistics bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    NegativeSpeed,
    UnrealisticSpeed,
    NegativeTime,
    UnrealisticTime,
    NegativeDistance,
    UnrealisticDistance,
    InvalidWorkParameter,
    UnrealisticWorkDuration,
    DuplicateOptions,
    OptionsTooClose,
}

/// One failed rule with a human-readable detail line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleReport {
    pub violations: Vec<Violation>,
}

impl RuleReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ViolationKind> {
        self.violations.iter().map(|v| &v.kind)
    }

    fn push(&mut self, kind: ViolationKind, message: String) {
        self.violations.push(Violation { kind, message });
    }
}

/// Run every plausibility rule.
pub fn check(
    params: Option<&FormulaParameters>,
    category: Category,
    options: &McqOptions,
) -> RuleReport {
    let mut report = RuleReport::default();

    if let Some(params) = params {
        for (key, &value) in &params.values {
            check_parameter(&mut report, key, value, category);
        }
    }
    check_options(&mut report, options);

    report
}

fn check_parameter(report: &mut RuleReport, key: &str, value: f64, category: Category) {
    let name = key.to_ascii_lowercase();

    if name.contains("speed") {
        if value < 0.0 {
            report.push(ViolationKind::NegativeSpeed, format!("Negative speed: {key} = {value}"));
        }
        if value > MAX_SPEED_KMH {
            report.push(
                ViolationKind::UnrealisticSpeed,
                format!("Unrealistic speed: {key} = {value} km/h"),
            );
        }
    }

    if ["time", "hour", "minute"].iter().any(|w| name.contains(w)) {
        if value < 0.0 {
            report.push(ViolationKind::NegativeTime, format!("Negative time: {key} = {value}"));
        }
        if value > MAX_TIME {
            report.push(ViolationKind::UnrealisticTime, format!("Unrealistic time: {key} = {value}"));
        }
    }

    if name.contains("distance") {
        if value < 0.0 {
            report.push(
                ViolationKind::NegativeDistance,
                format!("Negative distance: {key} = {value}"),
            );
        }
        if value > MAX_DISTANCE_KM {
            report.push(
                ViolationKind::UnrealisticDistance,
                format!("Unrealistic distance: {key} = {value} km"),
            );
        }
    }

    if category.is_rate_based() && (name.contains("days") || name.contains("rate")) {
        if value <= 0.0 {
            report.push(
                ViolationKind::InvalidWorkParameter,
                format!("Invalid work parameter: {key} = {value}"),
            );
        }
        if value > MAX_WORK_DAYS {
            report.push(
                ViolationKind::UnrealisticWorkDuration,
                format!("Unrealistic work duration: {key} = {value} days"),
            );
        }
    }
}

fn check_options(report: &mut RuleReport, options: &McqOptions) {
    // Options without any numeric content are skipped, not flagged.
    let mut values: Vec<f64> = options
        .iter()
        .filter_map(|(_, text)| extract_numeric_value(text))
        .collect();
    values.sort_by(f64::total_cmp);

    if values.windows(2).any(|w| w[0] == w[1]) {
        report.push(
            ViolationKind::DuplicateOptions,
            "Duplicate option values detected".to_string(),
        );
    }
    if values.windows(2).any(|w| (w[1] - w[0]).abs() < MIN_OPTION_GAP) {
        report.push(
            ViolationKind::OptionsTooClose,
            "Options too close together".to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FormulaType;
    use proptest::prelude::*;

    fn spaced() -> McqOptions {
        McqOptions::new("2.0 hours", "2.57 hours", "3.0 hours", "3.5 hours")
    }

    fn kinds(report: &RuleReport) -> Vec<ViolationKind> {
        report.kinds().copied().collect()
    }

    #[test]
    fn test_clean_problem_passes() {
        let params = FormulaParameters::new(FormulaType::MeetingTime)
            .with("distance", 360.0)
            .with("speed_a", 60.0)
            .with("speed_b", 80.0);
        let report = check(Some(&params), Category::TimeSpeedDistance, &spaced());
        assert!(report.is_valid(), "{:?}", report.violations);
    }

    #[test]
    fn test_all_violations_are_collected() {
        let params = FormulaParameters::new(FormulaType::MeetingTime)
            .with("distance", 20_000.0)
            .with("speed_a", -10.0)
            .with("speed_b", 800.0);
        let options = McqOptions::new("5 h", "5 h", "6 h", "7 h");
        let report = check(Some(&params), Category::TimeSpeedDistance, &options);

        assert_eq!(
            kinds(&report),
            vec![
                ViolationKind::UnrealisticDistance,
                ViolationKind::NegativeSpeed,
                ViolationKind::UnrealisticSpeed,
                ViolationKind::DuplicateOptions,
                ViolationKind::OptionsTooClose,
            ]
        );
        assert_eq!(report.violations[2].message, "Unrealistic speed: speed_b = 800 km/h");
    }

    #[test]
    fn test_time_limits() {
        let params = FormulaParameters::new(FormulaType::PipeCombined)
            .with("fill_time_a", 120.0)
            .with("fill_time_b", -2.0);
        let report = check(Some(&params), Category::PipesCisterns, &spaced());
        assert_eq!(
            kinds(&report),
            vec![ViolationKind::UnrealisticTime, ViolationKind::NegativeTime]
        );
    }

    #[test]
    fn test_work_rules_only_for_rate_categories() {
        let params = FormulaParameters::new(FormulaType::WorkCombined)
            .with("days_a", 0.0)
            .with("days_b", 400.0);

        let report = check(Some(&params), Category::WorkTime, &spaced());
        assert_eq!(
            kinds(&report),
            vec![
                ViolationKind::InvalidWorkParameter,
                ViolationKind::UnrealisticWorkDuration
            ]
        );

        let report = check(Some(&params), Category::AgeProblems, &spaced());
        assert!(report.is_valid());
    }

    #[test]
    fn test_missing_parameters_only_checks_options() {
        let report = check(None, Category::WorkTime, &spaced());
        assert!(report.is_valid());
    }

    #[test]
    fn test_close_but_distinct_options() {
        let options = McqOptions::new("2.571", "2.575", "3.0", "4.0");
        let report = check(None, Category::TimeSpeedDistance, &options);
        assert_eq!(kinds(&report), vec![ViolationKind::OptionsTooClose]);
    }

    #[test]
    fn test_unparsable_options_are_skipped() {
        let options = McqOptions::new("2 h", "3 h", "Cannot be determined", "4 h");
        assert!(check(None, Category::TimeSpeedDistance, &options).is_valid());
    }

    proptest! {
        #[test]
        fn duplicate_option_values_always_rejected(
            base in 0u32..10_000,
            others in prop::collection::vec(0u32..10_000, 2),
            dup_at in 1usize..4,
        ) {
            let mut texts = vec![base.to_string(), others[0].to_string(), others[1].to_string()];
            texts.insert(dup_at, format!("{base} units"));
            let options = McqOptions::new(
                texts[0].clone(),
                texts[1].clone(),
                texts[2].clone(),
                texts[3].clone(),
            );
            let report = check(None, Category::ProfitLoss, &options);
            prop_assert!(report.kinds().any(|k| *k == ViolationKind::DuplicateOptions));
        }

        #[test]
        fn well_separated_options_accepted(start in 0.0f64..1000.0, gap in 0.5f64..50.0) {
            let options = McqOptions::new(
                format!("{start:.2} km"),
                format!("{:.2} km", start + gap),
                format!("{:.2} km", start + 2.0 * gap),
                format!("{:.2} km", start + 3.0 * gap),
            );
            prop_assert!(check(None, Category::TimeSpeedDistance, &options).is_valid());
        }
    }
}
