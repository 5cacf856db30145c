//! Generation report and output files.

use crate::models::{Category, Problem, QuantvalError, Result, RunStatistics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Everything a caller receives for one generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub category: Category,
    /// Problems requested
    pub requested: usize,
    /// Accepted problems, in acceptance order
    pub problems: Vec<Problem>,
    pub stats: RunStatistics,
    /// External completion calls, research included
    pub total_api_calls: usize,
    /// Research guidelines used for generation (empty when skipped or failed)
    #[serde(default)]
    pub research_summary: String,
}

impl GenerationReport {
    /// Requested slots that produced no problem.
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.problems.len())
    }

    /// Write accepted problems as JSON lines.
    pub fn write_problems_jsonl(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| QuantvalError::io("creating problems file", e))?;
        let mut writer = BufWriter::new(file);

        for problem in &self.problems {
            let json = serde_json::to_string(problem)
                .map_err(|e| QuantvalError::Internal(format!("Failed to serialize problem: {e}")))?;
            writeln!(writer, "{json}").map_err(|e| QuantvalError::io("writing problems file", e))?;
        }

        writer
            .flush()
            .map_err(|e| QuantvalError::io("flushing problems file", e))?;
        info!(count = self.problems.len(), path = %path.display(), "Wrote problems");
        Ok(())
    }

    /// Write the full report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| QuantvalError::Internal(format!("Failed to serialize report: {e}")))?;
        std::fs::write(path, json).map_err(|e| QuantvalError::io("writing report file", e))?;
        info!(path = %path.display(), "Wrote report");
        Ok(())
    }
}

/// Load problems from a JSONL file.
pub fn load_problems(path: &Path) -> Result<Vec<Problem>> {
    let file = File::open(path).map_err(|e| QuantvalError::io("opening problems file", e))?;
    let reader = BufReader::new(file);
    let mut problems = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| QuantvalError::io("reading problems file", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let problem: Problem = serde_json::from_str(&line)
            .map_err(|e| QuantvalError::ParseError(format!("Line {}: {}", line_num + 1, e)))?;
        problems.push(problem);
    }

    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Difficulty, McqOptions, OptionLabel, ProblemDraft, SolverApproach, SolverResult,
        ValidationOutcome, ValidationTier,
    };

    fn problem(id: &str) -> Problem {
        let solver = SolverResult {
            answer: 6.0,
            confidence: 0.9,
            reasoning: String::new(),
            approach: SolverApproach::Algebraic,
            selected_option: Some(OptionLabel::B),
        };
        let draft = ProblemDraft {
            category: Category::WorkTime,
            difficulty: Difficulty::Easy,
            question: "A takes 10 days, B takes 15 days...".to_string(),
            options: McqOptions::new("5 days", "6 days", "7 days", "8 days"),
            ground_truth: Some(6.0),
            calculation: Some("Combined time = 1 / (1/10 + 1/15) = 6.000".to_string()),
            solution_steps: None,
            solver_a: solver.clone(),
            solver_b: solver,
            attempts: 1,
        };
        let outcome =
            ValidationOutcome::accept(ValidationTier::TripleAgreement, 0.9, OptionLabel::B, true, true);
        Problem::from_validated(id.to_string(), draft, &outcome, 0.05).unwrap()
    }

    fn report() -> GenerationReport {
        GenerationReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            category: Category::WorkTime,
            requested: 3,
            problems: vec![problem("WRK_001"), problem("WRK_002")],
            stats: RunStatistics::default(),
            total_api_calls: 7,
            research_summary: String::new(),
        }
    }

    #[test]
    fn test_jsonl_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("problems.jsonl");

        let report = report();
        report.write_problems_jsonl(&path).unwrap();

        let loaded = load_problems(&path).unwrap();
        assert_eq!(loaded, report.problems);
        assert_eq!(report.shortfall(), 1);
    }

    #[test]
    fn test_report_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report().write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["total_api_calls"], 7);
        assert_eq!(value["category"], "Work & Time");
        assert_eq!(value["problems"][0]["correct_answer"], "B");
        assert_eq!(value["problems"][1]["validation_tier"], "triple_agreement");
    }

    #[test]
    fn test_load_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "\n{not json}\n").unwrap();
        let err = load_problems(&path).unwrap_err();
        assert!(err.to_string().contains("Line 2"));
    }
}
