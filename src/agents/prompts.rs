//! Prompt text for the research, generator and solver agents.

use crate::models::{Category, Difficulty, McqOptions, SolverApproach};
use crate::validation::FormulaType;

pub const RESEARCH_SYSTEM: &str = "You are a Quantitative Aptitude Research Expert.

Your role: analyze a word-problem category and provide design guidelines:
1. Core formulas and relationships
2. Common problem patterns (at least 5 variations)
3. Realistic value ranges for every parameter
4. Hallucination traps to avoid: unit conversion errors, arithmetic slips in
   multi-step problems, impossible scenarios (negative time, speeds above
   500 km/h), story contradictions
5. MCQ design: how to compute the correct answer and build 3 plausible
   distractors from common mistakes

Always output valid, structured JSON with sections: formulas, patterns,
ranges, traps, mcq_rules.";

pub const GENERATOR_SYSTEM: &str = "You are a Quantitative Word Problem Generator.

CRITICAL: include a \"parameters\" object with ALL numerical values needed for
the calculation and a \"formula_type\" drawn from the allowed list. The answer
will be recomputed from these parameters; a problem whose parameters do not
reproduce its correct option is discarded.

Always output valid JSON.";

pub const SOLVER_A_SYSTEM: &str = "You are Solver A - Mathematical Analysis Specialist.

Process:
1. Extract the given values
2. Identify the unknown and set up the equation(s)
3. Solve step by step algebraically
4. Match the calculated value to the CLOSEST option

\"selected_option\" MUST be exactly one of \"A\", \"B\", \"C\" or \"D\".
Be precise with arithmetic. Output valid JSON.";

pub const SOLVER_B_SYSTEM: &str = "You are Solver B - Logical Reasoning Specialist.

Process:
1. Understand the scenario intuitively
2. Check units and dimensions
3. Reason to the answer and verify it makes real-world sense
4. Match the calculated value to the CLOSEST option

\"selected_option\" MUST be exactly one of \"A\", \"B\", \"C\" or \"D\".
Output valid JSON.";

/// Worked example shown to the generator for `category`.
pub fn category_example(category: Category) -> &'static str {
    match category {
        Category::WorkTime => {
            r#"{
  "question": "Worker A can complete a job in 12 days. Worker B can complete the same job in 8 days. Working together, how many days will they take?",
  "parameters": { "days_a": 12, "days_b": 8, "formula_type": "work_combined" },
  "options": { "A": "4.0 days", "B": "4.8 days", "C": "5.0 days", "D": "6.0 days" },
  "correct_answer": "B",
  "solution_steps": "Combined rate = 1/12 + 1/8 = 5/24 per day. Time = 24/5 = 4.8 days",
  "expected_value": 4.8
}"#
        }
        Category::PipesCisterns => {
            r#"{
  "question": "Pipe A can fill a tank in 10 hours and pipe B in 15 hours. How long will both pipes together take to fill it?",
  "parameters": { "fill_time_a": 10, "fill_time_b": 15, "formula_type": "pipe_combined" },
  "options": { "A": "5.0 hours", "B": "6.0 hours", "C": "6.5 hours", "D": "7.5 hours" },
  "correct_answer": "B",
  "solution_steps": "Combined rate = 1/10 + 1/15 = 1/6 per hour. Time = 6 hours",
  "expected_value": 6.0
}"#
        }
        Category::ProfitLoss => {
            r#"{
  "question": "A shopkeeper buys a lamp for 400 rupees and sells it for 500 rupees. What is the profit percentage?",
  "parameters": { "cost_price": 400, "selling_price": 500, "formula_type": "profit_percent" },
  "options": { "A": "20%", "B": "25%", "C": "30%", "D": "40%" },
  "correct_answer": "B",
  "solution_steps": "Profit = 100. Profit % = 100 / 400 × 100 = 25%",
  "expected_value": 25.0
}"#
        }
        Category::AgeProblems => {
            r#"{
  "question": "A father is 40 years old and his son is 20. What was the ratio of their ages 5 years ago?",
  "parameters": { "age_a": 40, "age_b": 20, "years": 5, "formula_type": "age_ratio_past" },
  "options": { "A": "2.00", "B": "2.33", "C": "2.50", "D": "3.00" },
  "correct_answer": "B",
  "solution_steps": "(40 - 5) / (20 - 5) = 35 / 15 = 2.33",
  "expected_value": 2.33
}"#
        }
        Category::MixtureAlligation => {
            r#"{
  "question": "How many litres of water must be added to 30 litres of milk so the mixture is 75% milk?",
  "parameters": { "equation": "30 / (30 + x) = 0.75", "variable": "x", "formula_type": "equation" },
  "options": { "A": "5 litres", "B": "8 litres", "C": "10 litres", "D": "12 litres" },
  "correct_answer": "C",
  "solution_steps": "30 / (30 + x) = 0.75 gives 30 + x = 40, so x = 10 litres",
  "expected_value": 10.0
}"#
        }
        Category::TimeSpeedDistance => {
            r#"{
  "question": "Two trains start 360 km apart and travel toward each other at 60 km/h and 80 km/h. After how many hours do they meet?",
  "parameters": { "distance": 360, "speed_a": 60, "speed_b": 80, "formula_type": "meeting_time" },
  "options": { "A": "2.0 hours", "B": "2.57 hours", "C": "3.0 hours", "D": "4.5 hours" },
  "correct_answer": "B",
  "solution_steps": "Combined speed = 140 km/h. Time = 360 / 140 = 2.57 hours",
  "expected_value": 2.57
}"#
        }
    }
}

/// Allowed `formula_type` tags with their parameter names.
pub fn formula_catalog() -> String {
    FormulaType::ALL
        .iter()
        .map(|formula| {
            let params: Vec<&str> = formula.required_params().iter().map(|p| p.name).collect();
            if params.is_empty() {
                format!("- {formula}: equation (string, e.g. \"3*x + 5 = 20\"), variable (string)")
            } else {
                format!("- {formula}: {}", params.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn research_prompt(category: Category) -> String {
    format!(
        "Research the category: \"{category}\".\n\n\
         Provide comprehensive guidelines for creating problems in this category.\n\
         Output JSON with keys: formulas, patterns, ranges, traps, mcq_rules."
    )
}

pub fn generator_prompt(
    category: Category,
    difficulty: Difficulty,
    research_summary: &str,
    problem_number: usize,
) -> String {
    let guidelines: String = research_summary.chars().take(500).collect();
    format!(
        "Generate problem #{problem_number}: a {difficulty} difficulty {category} word problem.\n\n\
         RESEARCH GUIDELINES:\n{guidelines}\n\n\
         STRICT FORMAT REQUIREMENTS:\n\
         1. \"parameters\" MUST contain every numerical value and a \"formula_type\".\n\
         2. \"options\" MUST be exactly 4 choices keyed A, B, C, D, each a value with unit, all numerically distinct.\n\
         3. \"correct_answer\" MUST be one of \"A\", \"B\", \"C\", \"D\".\n\
         4. Keep values realistic: speeds at most 200 km/h, times at most 100 hours, work durations at most 365 days.\n\n\
         ALLOWED formula_type VALUES AND PARAMETER NAMES:\n{catalog}\n\n\
         EXAMPLE:\n{example}\n\n\
         Output JSON with fields: question, parameters, options, correct_answer, solution_steps, expected_value.",
        catalog = formula_catalog(),
        example = category_example(category),
    )
}

pub fn solver_prompt(
    approach: SolverApproach,
    question: &str,
    options: &McqOptions,
) -> String {
    let listed: String = options
        .iter()
        .map(|(label, text)| format!("{label}) {text}\n"))
        .collect();
    format!(
        "Solve this problem using a {approach} approach:\n\n\
         QUESTION:\n{question}\n\n\
         OPTIONS:\n{listed}\n\
         Output JSON (EXACT format):\n\
         {{\n  \"approach\": \"{approach}\",\n  \"reasoning\": \"step by step\",\n  \
         \"calculated_value\": 4.8,\n  \"selected_option\": \"B\",\n  \"confidence\": 0.9\n}}\n\n\
         \"selected_option\" must be ONLY the letter, not \"Option B\" or \"B. 4.8 days\"."
    )
}
