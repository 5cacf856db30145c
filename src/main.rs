//! quantval CLI - validated quantitative MCQ generation.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use quantval::agents::RawGeneration;
use quantval::models::{ConsensusMode, Difficulty, Problem};
use quantval::pipeline::{AttemptFailure, GenerationObserver, load_problems};
use quantval::validation::{compute_with_fallback, rules};
use quantval::{
    Category, Config, FormulaParameters, GenerationLoop, GenerationRequest, LlmClient,
    RunStatistics,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "quantval")]
#[command(version)]
#[command(about = "Generate quantitative MCQs validated by ground truth and solver consensus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "quantval.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate validated problems
    Generate {
        /// Number of problems (1-20)
        #[arg(short, long, default_value = "5")]
        num_problems: usize,

        /// Problem category
        #[arg(short = 't', long)]
        category: Category,

        /// JSONL file receiving accepted problems
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON file receiving the full report
        #[arg(long)]
        report: Option<PathBuf>,

        /// Consensus mode override (tiered | confidence_weighted)
        #[arg(long)]
        mode: Option<ConsensusMode>,
    },

    /// Compute a ground truth offline from formula parameters
    Calc {
        /// Parameters as JSON, e.g. '{"formula_type":"work_combined","days_a":10,"days_b":15}'
        #[arg(short, long)]
        params: Option<String>,

        /// Category for question-text fallback
        #[arg(short = 't', long)]
        category: Option<Category>,

        /// Question text for fallback extraction
        #[arg(short, long)]
        question: Option<String>,
    },

    /// Run plausibility rules and ground truth on a drafted problem (JSON)
    Check {
        /// Path to the problem JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Problem category
        #[arg(short = 't', long)]
        category: Category,
    },

    /// Re-check problems from a generated JSONL file
    Audit {
        /// Path to the problems JSONL file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

/// Drives a progress bar, one tick per finished slot.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl GenerationObserver for ProgressObserver {
    fn attempt_started(&self, slot: usize, attempt: u32, difficulty: Difficulty) {
        self.bar
            .set_message(format!("problem {} ({difficulty}), attempt {attempt}", slot + 1));
    }

    fn attempt_succeeded(&self, _slot: usize, _attempt: u32, problem: &Problem) {
        self.bar
            .println(format!("  accepted {} [{}]", problem.id, problem.validation_tier));
        self.bar.inc(1);
    }

    fn attempt_failed(&self, slot: usize, attempt: u32, failure: &AttemptFailure) {
        self.bar.println(format!(
            "  problem {} attempt {attempt} rejected: {} at {}",
            slot + 1,
            failure.reason,
            failure.stage
        ));
    }

    fn slot_abandoned(&self, slot: usize, attempts: u32) {
        self.bar
            .println(format!("  problem {} abandoned after {attempts} attempts", slot + 1));
        self.bar.inc(1);
    }

    fn run_finished(&self, _stats: &RunStatistics) {
        self.bar.finish_and_clear();
    }
}

fn print_example_config() {
    let example = r#"# quantval configuration file

[llm]
# API key (can also use the env var named by api_key_env)
# api_key = "gsk-..."
api_key_env = "GROQ_API_KEY"
base_url = "https://api.groq.com/openai/v1"
model = "llama-3.3-70b-versatile"
temperature = 0.3
max_tokens = 2000
timeout_secs = 120
http_retries = 3

[generation]
max_retries = 3
# attempt_budget = 30   # default: num_problems × max_retries
research = true
# Per-role temperatures; each falls back to llm.temperature (or TEMPERATURE)
# generator_temperature = 0.4
# solver_temperature = 0.2
# research_temperature = 0.2

[validation]
mode = "tiered"         # or "confidence_weighted"
tolerance = 0.05
consensus_confidence = 0.70
ground_truth_only_score = 0.85
weighted_threshold = 0.75
solver_agreement_tolerance = 0.10

[output]
# problems_path = "output/problems.jsonl"
# report_path = "output/report.json"
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn print_summary(report: &quantval::GenerationReport) {
    let stats = &report.stats;
    println!("\n=== Generation Complete ===");
    println!("Category:    {}", report.category);
    println!("Requested:   {}", report.requested);
    println!("Accepted:    {}", stats.total_valid);
    println!("Rejected:    {}", stats.total_rejected);
    println!("Attempts:    {}", stats.total_attempts);
    println!("API calls:   {}", report.total_api_calls);
    println!("Efficiency:  {:.2} problems/call", stats.api_efficiency);
    println!("Agreement:   {:.1}%", stats.solver_agreement_rate * 100.0);
    println!("GT accuracy: {:.1}%", stats.ground_truth_accuracy * 100.0);
    println!("Runtime:     {:.1}s", stats.runtime_secs);
    if !stats.rejection_reasons.is_empty() {
        println!("Rejections:");
        for (reason, count) in &stats.rejection_reasons {
            println!("  {:<22} {count}", reason.as_str());
        }
    }
    if report.shortfall() > 0 {
        println!("Shortfall:   {}", report.shortfall());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Model: {} at {}", config.llm.model, config.llm.base_url);
            info!("  Retries per problem: {}", config.generation.max_retries);
            info!("  Consensus mode: {:?}", config.validation.mode);
            info!("  Tolerance: {:.1}%", config.validation.tolerance * 100.0);
        }

        Commands::Generate {
            num_problems,
            category,
            output,
            report,
            mode,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(mode) = mode {
                config.validation.mode = mode;
            }
            let request = GenerationRequest::new(num_problems, category)?;

            let api_key = config
                .resolve_api_key()
                .context("Failed to resolve API key")?;
            let client = Arc::new(LlmClient::from_config(&config.llm, Some(api_key))?);

            let observer = Arc::new(ProgressObserver::new(num_problems));
            let engine = GenerationLoop::new(client.clone(), &config).with_observer(observer);
            let result = engine.run(&request).await;

            let problems_path = output.or(config.output.problems_path.clone());
            if let Some(path) = &problems_path {
                result
                    .write_problems_jsonl(path)
                    .with_context(|| format!("Failed to write problems to {path:?}"))?;
            } else {
                for problem in &result.problems {
                    println!("{}", serde_json::to_string(problem)?);
                }
            }
            if let Some(path) = report.or(config.output.report_path.clone()) {
                result
                    .write_json(&path)
                    .with_context(|| format!("Failed to write report to {path:?}"))?;
            }

            print_summary(&result);
            let (prompt_tokens, completion_tokens) = client.total_tokens();
            info!(prompt_tokens, completion_tokens, "Token usage");
            if result.shortfall() > 0 {
                warn!(shortfall = result.shortfall(), "Fewer problems than requested");
            }
        }

        Commands::Calc {
            params,
            category,
            question,
        } => {
            let params = params
                .map(|raw| {
                    let value: serde_json::Value =
                        serde_json::from_str(&raw).context("--params is not valid JSON")?;
                    FormulaParameters::from_json(&value)
                        .context("--params must be a JSON object")
                })
                .transpose()?;
            if params.is_none() && (category.is_none() || question.is_none()) {
                bail!("provide --params, or --category with --question");
            }
            let category = category.unwrap_or(Category::WorkTime);
            let question = question.unwrap_or_default();

            match compute_with_fallback(params.as_ref(), category, &question) {
                Ok(truth) => {
                    println!("Formula:  {}", truth.formula_type);
                    println!("Value:    {}", truth.value);
                    println!("Steps:    {}", truth.explanation);
                    println!("Source:   {:?}", truth.source);
                }
                Err(e) => bail!("ground truth unavailable: {e}"),
            }
        }

        Commands::Check { file, category } => {
            let config = load_config(&cli.config)?;
            let tolerance = config.validation.tolerance;
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {file:?}"))?;
            let value: serde_json::Value =
                serde_json::from_str(&content).with_context(|| format!("{file:?} is not JSON"))?;
            let draft = RawGeneration::from_value(&value)
                .with_context(|| format!("{file:?} is not a problem draft"))?;

            let report = rules::check(draft.parameters.as_ref(), category, &draft.options);
            if report.is_valid() {
                println!("Rules:        passed");
            } else {
                println!("Rules:        {} violation(s)", report.violations.len());
                for violation in &report.violations {
                    println!("  - {violation}");
                }
            }

            match compute_with_fallback(draft.parameters.as_ref(), category, &draft.question) {
                Ok(truth) => {
                    println!("Ground truth: {} ({})", truth.value, truth.explanation);
                    let matching: Vec<String> = draft
                        .options
                        .labels_matching(truth.value, tolerance)
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    println!("Matching:     {}", matching.join(", "));
                    if let Some(claimed) = draft.correct_answer {
                        println!("Claimed:      {claimed}");
                    }
                }
                Err(e) => println!("Ground truth: unavailable ({e})"),
            }

            if !report.is_valid() {
                bail!("rule check failed");
            }
        }

        Commands::Audit { file } => {
            let config = load_config(&cli.config)?;
            let tolerance = config.validation.tolerance;
            let problems = load_problems(&file)
                .with_context(|| format!("Failed to load problems from {file:?}"))?;

            let mut flagged = 0;
            for problem in &problems {
                let mut issues: Vec<String> = rules::check(None, problem.category, &problem.options)
                    .violations
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                if let Some(ground_truth) = problem.ground_truth {
                    if !problem.options.matches(problem.correct_answer, ground_truth, tolerance) {
                        issues.push(format!(
                            "answer {} does not match ground truth {ground_truth}",
                            problem.correct_answer
                        ));
                    }
                }

                if issues.is_empty() {
                    println!("{}  ok  [{}]", problem.id, problem.validation_tier);
                } else {
                    flagged += 1;
                    println!("{}  FLAGGED", problem.id);
                    for issue in issues {
                        println!("  - {issue}");
                    }
                }
            }

            println!("\n{} problems, {flagged} flagged", problems.len());
            if flagged > 0 {
                bail!("{flagged} problem(s) failed the audit");
            }
        }
    }

    Ok(())
}
