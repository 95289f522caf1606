//! Configuration models for askbatch.
//!
//! Everything the run needs is resolved here once and handed to the
//! pipeline and invoker; nothing reads the environment after startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for askbatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion endpoint configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Retry policy for a single question
    #[serde(default)]
    pub retry: RetryConfig,

    /// Question list
    #[serde(default)]
    pub input: InputConfig,

    /// Result and checkpoint files
    #[serde(default)]
    pub output: OutputConfig,
}

/// How the completion content is turned into an answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    /// Content is the answer verbatim
    #[default]
    Plain,
    /// Content is a JSON object with an `answer` field
    Json,
}

/// OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// API key (can also be set via the `api_key_env` variable)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL; `/chat/completions` is appended
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model id sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature (endpoint default when absent)
    #[serde(default)]
    pub temperature: Option<f64>,

    /// System message prepended to every question
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Answer parsing mode
    #[serde(default)]
    pub answer_format: AnswerFormat,
}

fn default_api_key_env() -> String {
    "ASKBATCH_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
            temperature: None,
            system_prompt: None,
            answer_format: AnswerFormat::default(),
        }
    }
}

/// Retry policy for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum service calls per question
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay after a transient failure
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,

    /// Multiply the transient delay by the attempt number
    #[serde(default)]
    pub linear_backoff: bool,

    /// Delay after a rate limit response
    #[serde(default = "default_rate_limit_cooldown")]
    pub rate_limit_cooldown_secs: f64,

    /// Ceiling on the total time one question may spend waiting
    #[serde(default = "default_max_total_wait")]
    pub max_total_wait_secs: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    2.0
}

fn default_rate_limit_cooldown() -> f64 {
    10.0
}

fn default_max_total_wait() -> f64 {
    60.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            linear_backoff: false,
            rate_limit_cooldown_secs: default_rate_limit_cooldown(),
            max_total_wait_secs: default_max_total_wait(),
        }
    }
}

impl RetryConfig {
    /// Delay before the next attempt after a failure of the given kind.
    ///
    /// `attempt` is 1-based: the number of calls made so far.
    pub fn delay_for(&self, kind: super::FailureKind, attempt: u32) -> Duration {
        let secs = match kind {
            super::FailureKind::RateLimit => self.rate_limit_cooldown_secs,
            _ if self.linear_backoff => self.retry_delay_secs * f64::from(attempt.max(1)),
            _ => self.retry_delay_secs,
        };
        seconds(secs)
    }

    pub fn max_total_wait(&self) -> Duration {
        seconds(self.max_total_wait_secs)
    }
}

/// Record format of the question list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// First field of each CSV row
    #[default]
    Csv,
    /// Each whole line
    Lines,
}

/// Question list configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Path to the question list
    #[serde(default = "default_input_path")]
    pub path: PathBuf,

    /// Record format
    #[serde(default)]
    pub format: SourceFormat,

    /// Leading header/comment lines to ignore
    #[serde(default = "default_skip_lines")]
    pub skip_lines: usize,
}

fn default_input_path() -> PathBuf {
    PathBuf::from("questions.csv")
}

fn default_skip_lines() -> usize {
    1
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: default_input_path(),
            format: SourceFormat::default(),
            skip_lines: default_skip_lines(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Result collection (JSON array)
    #[serde(default = "default_results_path")]
    pub results: PathBuf,

    /// Checkpoint file
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint: PathBuf,

    /// Pause after each processed question
    #[serde(default = "default_inter_question_delay")]
    pub inter_question_delay_secs: f64,

    /// Draw a progress bar
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

fn default_results_path() -> PathBuf {
    PathBuf::from("results.json")
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("process_checkpoint.json")
}

fn default_inter_question_delay() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results: default_results_path(),
            checkpoint: default_checkpoint_path(),
            inter_question_delay_secs: default_inter_question_delay(),
            show_progress: true,
        }
    }
}

impl OutputConfig {
    pub fn inter_question_delay(&self) -> Duration {
        seconds(self.inter_question_delay_secs)
    }
}

/// Seconds as a `Duration`, saturating where `validate()` was skipped.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.service.api_key {
            let key = expand_env_vars(key);
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }

        std::env::var(&self.service.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey {
                env_var: self.service.api_key_env.clone(),
            })
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("service.base_url is empty".to_string()));
        }
        if self.service.model.trim().is_empty() {
            return Err(ConfigError::Invalid("service.model is empty".to_string()));
        }
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_retries must be at least 1".to_string(),
            ));
        }

        let durations = [
            ("retry.retry_delay_secs", self.retry.retry_delay_secs),
            ("retry.rate_limit_cooldown_secs", self.retry.rate_limit_cooldown_secs),
            ("retry.max_total_wait_secs", self.retry.max_total_wait_secs),
            ("output.inter_question_delay_secs", self.output.inter_question_delay_secs),
        ];
        for (name, value) in durations {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number of seconds, got {value}"
                )));
            }
        }

        // Linear backoff multiplies the delay by the attempt number.
        if self.retry.linear_backoff {
            let longest = self.retry.retry_delay_secs * f64::from(self.retry.max_retries);
            if Duration::try_from_secs_f64(longest).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "retry.retry_delay_secs x max_retries is out of range, got {longest}"
                )));
            }
        }

        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    re.replace_all(s, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
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

    #[error("Missing API key: set {env_var} env var or service.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
