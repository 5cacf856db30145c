//! Configuration models for quantval.
//!
//! Everything tunable lives here. Values come from an optional TOML file,
//! then a fixed set of process environment overrides is applied once at
//! startup; the resulting `Config` is immutable for the run.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Top-level configuration for quantval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion endpoint configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Generation loop settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Consensus and tolerance settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// OpenAI-compatible completion endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key (can also be set via the env var named by `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the chat completions API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature for every call without a per-role override
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// HTTP-level retries (independent of problem retries)
    #[serde(default = "default_http_retries")]
    pub http_retries: u32,
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_timeout() -> u64 {
    120
}

fn default_http_retries() -> u32 {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout(),
            http_retries: default_http_retries(),
        }
    }
}

/// Generation loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Attempts per problem slot before the slot is abandoned
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Global attempt budget for a run (default: num_problems × max_retries)
    #[serde(default)]
    pub attempt_budget: Option<usize>,

    /// Run the one-time research call before generating
    #[serde(default = "default_true")]
    pub research: bool,

    /// Temperature for the generator call (default: `llm.temperature`)
    #[serde(default)]
    pub generator_temperature: Option<f64>,

    /// Temperature for both solver calls (default: `llm.temperature`)
    #[serde(default)]
    pub solver_temperature: Option<f64>,

    /// Temperature for the research call (default: `llm.temperature`)
    #[serde(default)]
    pub research_temperature: Option<f64>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            attempt_budget: None,
            research: true,
            generator_temperature: None,
            solver_temperature: None,
            research_temperature: None,
        }
    }
}

impl GenerationConfig {
    /// Effective global attempt budget for a run of `num_problems`.
    pub fn attempt_budget_for(&self, num_problems: usize) -> usize {
        self.attempt_budget
            .unwrap_or(num_problems * self.max_retries as usize)
            .max(1)
    }
}

/// Which consensus rule set decides acceptance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMode {
    /// Label tiers: triple agreement, solver consensus, ground-truth only
    #[default]
    Tiered,
    /// Numeric confidence × accuracy score against the ground truth
    ConfidenceWeighted,
}

impl std::str::FromStr for ConsensusMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "tiered" => Ok(Self::Tiered),
            "confidence_weighted" | "weighted" => Ok(Self::ConfidenceWeighted),
            other => Err(format!("unknown consensus mode '{other}'")),
        }
    }
}

/// Consensus thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Consensus rule set
    #[serde(default)]
    pub mode: ConsensusMode,

    /// Relative tolerance against the ground truth
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Minimum (exclusive) confidence of each solver for solver consensus
    #[serde(default = "default_consensus_confidence")]
    pub consensus_confidence: f64,

    /// Fixed score assigned to ground-truth-only acceptances
    #[serde(default = "default_ground_truth_only_score")]
    pub ground_truth_only_score: f64,

    /// Minimum (exclusive) mean weighted score in confidence-weighted mode
    #[serde(default = "default_weighted_threshold")]
    pub weighted_threshold: f64,

    /// Relative tolerance between the two solvers in confidence-weighted mode
    #[serde(default = "default_solver_agreement_tolerance")]
    pub solver_agreement_tolerance: f64,
}

fn default_tolerance() -> f64 {
    0.05
}

fn default_consensus_confidence() -> f64 {
    0.70
}

fn default_ground_truth_only_score() -> f64 {
    0.85
}

fn default_weighted_threshold() -> f64 {
    0.75
}

fn default_solver_agreement_tolerance() -> f64 {
    0.10
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ConsensusMode::default(),
            tolerance: default_tolerance(),
            consensus_confidence: default_consensus_confidence(),
            ground_truth_only_score: default_ground_truth_only_score(),
            weighted_threshold: default_weighted_threshold(),
            solver_agreement_tolerance: default_solver_agreement_tolerance(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSONL file receiving accepted problems
    #[serde(default)]
    pub problems_path: Option<PathBuf>,

    /// JSON file receiving the full generation report
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load from `path` if it exists, otherwise start from defaults, then
    /// apply process environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MODEL_NAME`, `MAX_RETRIES`, `TEMPERATURE` and `MAX_TOKENS`.
    ///
    /// The lookup is injected so tests do not touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("MODEL_NAME") {
            self.llm.model = model;
        }
        if let Some(raw) = lookup("MAX_RETRIES") {
            self.generation.max_retries = parse_override("MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("TEMPERATURE") {
            self.llm.temperature = parse_override("TEMPERATURE", &raw)?;
        }
        if let Some(raw) = lookup("MAX_TOKENS") {
            self.llm.max_tokens = parse_override("MAX_TOKENS", &raw)?;
        }
        Ok(())
    }

    /// Reject settings the generation loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "generation.max_retries must be at least 1".to_string(),
            ));
        }
        let unit = [
            ("validation.tolerance", self.validation.tolerance),
            (
                "validation.consensus_confidence",
                self.validation.consensus_confidence,
            ),
            (
                "validation.ground_truth_only_score",
                self.validation.ground_truth_only_score,
            ),
            (
                "validation.weighted_threshold",
                self.validation.weighted_threshold,
            ),
        ];
        let temperatures = [
            ("llm.temperature", Some(self.llm.temperature)),
            ("generation.generator_temperature", self.generation.generator_temperature),
            ("generation.solver_temperature", self.generation.solver_temperature),
            ("generation.research_temperature", self.generation.research_temperature),
        ];
        for (name, value) in temperatures {
            if let Some(value) = value {
                if !(0.0..=2.0).contains(&value) {
                    return Err(ConfigError::Invalid(format!(
                        "{name} must be within [0, 2], got {value}"
                    )));
                }
            }
        }
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Sampling temperature for the generator call.
    pub fn generator_temperature(&self) -> f64 {
        self.generation
            .generator_temperature
            .unwrap_or(self.llm.temperature)
    }

    /// Sampling temperature for both solver calls.
    pub fn solver_temperature(&self) -> f64 {
        self.generation
            .solver_temperature
            .unwrap_or(self.llm.temperature)
    }

    /// Sampling temperature for the research call.
    pub fn research_temperature(&self) -> f64 {
        self.generation
            .research_temperature
            .unwrap_or(self.llm.temperature)
    }

    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.llm.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.llm.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.llm.api_key_env.clone(),
        })
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidOverride {
        name: name.to_string(),
        value: raw.to_string(),
    })
}

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or llm.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid value for {name}: '{value}'")]
    InvalidOverride { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.generation.max_retries, 3);
        assert_eq!(config.llm.max_tokens, 2000);
        assert_eq!(config.validation.mode, ConsensusMode::Tiered);
        assert!((config.validation.tolerance - 0.05).abs() < 1e-12);
        assert!((config.validation.consensus_confidence - 0.70).abs() < 1e-12);
        assert_eq!(config.generation.attempt_budget_for(4), 12);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
[llm]
model = "mixtral-8x7b"

[validation]
mode = "confidence_weighted"
"#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "mixtral-8x7b");
        assert_eq!(config.llm.api_key_env, "GROQ_API_KEY");
        assert_eq!(config.validation.mode, ConsensusMode::ConfidenceWeighted);
        assert!(config.generation.research);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MODEL_NAME", "llama-3.1-8b-instant"),
            ("MAX_RETRIES", "5"),
            ("TEMPERATURE", "0.1"),
            ("MAX_TOKENS", "512"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.llm.model, "llama-3.1-8b-instant");
        assert_eq!(config.generation.max_retries, 5);
        assert!((config.llm.temperature - 0.1).abs() < 1e-12);
        assert_eq!(config.llm.max_tokens, 512);
    }

    #[test]
    fn test_role_temperatures_fall_back_to_default() {
        let mut config = Config::default();
        config
            .apply_env_overrides(|name| (name == "TEMPERATURE").then(|| "0.9".to_string()))
            .unwrap();
        assert!((config.generator_temperature() - 0.9).abs() < 1e-12);
        assert!((config.solver_temperature() - 0.9).abs() < 1e-12);
        assert!((config.research_temperature() - 0.9).abs() < 1e-12);

        config.generation.solver_temperature = Some(0.2);
        assert!((config.solver_temperature() - 0.2).abs() < 1e-12);
        assert!((config.generator_temperature() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_temperature_rejected() {
        let mut config = Config::default();
        config.generation.generator_temperature = Some(3.5);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_override_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(|name| (name == "MAX_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = Config::default();
        config.generation.max_retries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[generation]\nmax_retries = 4\nresearch = false").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.generation.max_retries, 4);
        assert!(!config.generation.research);
    }

    #[test]
    fn test_consensus_mode_from_str() {
        assert_eq!("tiered".parse::<ConsensusMode>(), Ok(ConsensusMode::Tiered));
        assert_eq!(
            "confidence-weighted".parse::<ConsensusMode>(),
            Ok(ConsensusMode::ConfidenceWeighted)
        );
        assert!("majority".parse::<ConsensusMode>().is_err());
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let mut config = Config::default();
        config.llm.api_key = Some("gsk-test".to_string());
        assert_eq!(config.resolve_api_key().unwrap(), "gsk-test");
    }
}
