use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};
use crate::evaluation::ModelConfig;

/// Runs scripted conversations against skills and judges them.
#[derive(Parser, Debug, Clone)]
#[command(name = "skill-harness")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Directory searched recursively for rubric.yaml + SKILL.md pairs
    #[arg(long = "skills-dir", default_value = "skills", global = true)]
    pub skills_dir: PathBuf,

    /// Root of the persisted trace corpus
    #[arg(long = "traces-dir", default_value = "traces", global = true)]
    pub traces_dir: PathBuf,

    /// Harness config (API endpoint, models under test, judge models)
    #[arg(short = 'c', long = "config", default_value = "test_config.yaml", global = true)]
    pub config: PathBuf,

    /// Dotenv file loaded before resolving the API key
    #[arg(long = "env-file", default_value = ".env", global = true)]
    pub env_file: PathBuf,

    /// Also write logs to this file
    #[arg(short = 'l', long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Debug-level logging for the harness
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run every discovered scenario and judge the conversations
    Run {
        /// Re-run scenarios even if a trace already exists
        #[arg(long)]
        rerun: bool,

        /// Only run the model at this index of models_under_test
        #[arg(short = 'm', long = "model-index")]
        model_index: Option<usize>,

        /// Only run cases whose skill name or scenario id contains this
        #[arg(short, long)]
        filter: Option<String>,

        /// Skip the no-skill baseline runs
        #[arg(long = "no-baseline")]
        no_baseline: bool,

        /// Score below which a skilled scenario fails
        #[arg(long = "minimum-score", default_value_t = MINIMUM_SCORE)]
        minimum_score: f64,

        /// Scenario cases run concurrently
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,

        /// In-flight judge calls per trace evaluation
        #[arg(long = "eval-workers", default_value_t = MAX_EVAL_WORKERS)]
        eval_workers: usize,
    },

    /// List discovered skills and their scenarios
    List,

    /// Rebuild the trace index from the trace files on disk
    RebuildIndex,
}

// Model defaults
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

// Endpoint defaults
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const REQUEST_TIMEOUT_SECS: u64 = 60;
pub const MAX_RETRIES: u32 = 1;

// Evaluation constants
pub const MAX_EVAL_WORKERS: usize = 10;
pub const MINIMUM_SCORE: f64 = 50.0;
pub const JUDGE_PREVIEW_CHARS: usize = 200;

/// Process exit status for a run that can't say pass or fail.
pub const EXIT_INCONCLUSIVE: i32 = 2;

// Null baseline
pub const NULL_VERSION: &str = "_null";
pub const NULL_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

// Trace corpus
pub const INDEX_FILE: &str = "index.json";
pub const RUBRIC_FILE: &str = "rubric.yaml";
pub const SKILL_FILE: &str = "SKILL.md";
pub const DEFAULT_SKILL_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl ApiConfig {
    /// Read the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(HarnessError::MissingCredentials(self.api_key_env.clone())),
        }
    }
}

/// Contents of the harness config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub models_under_test: Vec<ModelConfig>,
    #[serde(default)]
    pub judge_models: Vec<ModelConfig>,
}

impl HarnessConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Models selected by an optional `--model-index`.
    ///
    /// An out-of-range index selects nothing.
    pub fn select_models(&self, model_index: Option<usize>) -> Vec<ModelConfig> {
        match model_index {
            Some(idx) => self.models_under_test.get(idx).cloned().into_iter().collect(),
            None => self.models_under_test.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
api:
  base_url: http://localhost:4000/v1
models_under_test:
  - id: small
    model: vendor/small-model
  - id: large
    model: vendor/large-model
    temperature: 0.0
    max_tokens: 512
judge_models:
  - id: judge
    model: vendor/judge
    temperature: 0.0
"#;

    #[test]
    fn test_parse_config_with_defaults() {
        let config = HarnessConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:4000/v1");
        assert_eq!(config.api.api_key_env, DEFAULT_API_KEY_ENV);
        assert_eq!(config.models_under_test.len(), 2);

        let small = &config.models_under_test[0];
        assert_eq!(small.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(small.max_tokens, DEFAULT_MAX_TOKENS);

        let large = &config.models_under_test[1];
        assert_eq!(large.temperature, 0.0);
        assert_eq!(large.max_tokens, 512);
        assert_eq!(config.judge_models[0].id, "judge");
    }

    #[test]
    fn test_select_models() {
        let config = HarnessConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.select_models(None).len(), 2);
        assert_eq!(config.select_models(Some(1))[0].id, "large");
        assert!(config.select_models(Some(5)).is_empty());
    }

    #[test]
    fn test_missing_api_key() {
        let api = ApiConfig {
            base_url: default_base_url(),
            api_key_env: "SKILL_HARNESS_TEST_UNSET_KEY".to_string(),
        };
        assert!(matches!(
            api.resolve_api_key(),
            Err(HarnessError::MissingCredentials(name)) if name == "SKILL_HARNESS_TEST_UNSET_KEY"
        ));
    }

    #[test]
    fn test_cli_defaults() {
        let args = CliArgs::parse_from(["skill-harness", "run", "--rerun", "-m", "0"]);
        assert_eq!(args.skills_dir, PathBuf::from("skills"));
        assert_eq!(args.traces_dir, PathBuf::from("traces"));
        match args.command {
            Command::Run {
                rerun,
                model_index,
                minimum_score,
                eval_workers,
                jobs,
                ..
            } => {
                assert!(rerun);
                assert_eq!(model_index, Some(0));
                assert_eq!(minimum_score, MINIMUM_SCORE);
                assert_eq!(eval_workers, MAX_EVAL_WORKERS);
                assert_eq!(jobs, 1);
            }
            other => panic!("Expected Run, got {:?}", other),
        }
    }
}
