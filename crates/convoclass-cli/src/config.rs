//! Run configuration
//!
//! Layered in order of precedence, lowest first:
//! 1. built-in defaults
//! 2. the YAML file given by `--config` (optional)
//! 3. `CONVOCLASS__*` environment variables, `__` separating nested keys
//!    (e.g. `CONVOCLASS__BACKEND__MODEL`)
//! 4. command-line flags

use convoclass_batch::RunOptions;
use convoclass_classifiers::{OpenAiBackendConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "CONVOCLASS";

/// Batch run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Classifier definitions file
    pub classifiers_config: PathBuf,

    /// Classifier set to run when no `--set` is given
    pub classifier_set: Option<String>,

    pub backend: BackendConfig,

    /// Admission gate capacity
    pub max_concurrent: usize,

    pub retry: RetryConfig,

    /// Input records per checkpointed chunk
    pub chunk_size: usize,

    /// Conversations evaluated concurrently within a chunk
    pub batch_size: usize,

    pub checkpoint_dir: PathBuf,

    /// Per-conversation deadline; unset means no deadline
    pub conversation_timeout_secs: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            classifiers_config: PathBuf::from("classifiers.yaml"),
            classifier_set: None,
            backend: BackendConfig::default(),
            max_concurrent: 50,
            retry: RetryConfig::default(),
            chunk_size: 1000,
            batch_size: 50,
            checkpoint_dir: PathBuf::from("checkpoints"),
            conversation_timeout_secs: None,
        }
    }
}

/// Classification service connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Chat completions base URL
    pub base_url: String,

    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: 60,
        }
    }
}

impl BackendConfig {
    /// Resolve into backend settings, reading the API key from the environment
    pub fn resolve(&self) -> OpenAiBackendConfig {
        OpenAiBackendConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|key| !key.is_empty()),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Retry settings for transient service failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub classifier_set: Option<String>,
    pub checkpoint_dir: Option<PathBuf>,
    pub chunk_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_concurrent: Option<usize>,
}

impl RunConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        Self::load_with_prefix(config_path, ENV_PREFIX)
    }

    fn load_with_prefix(config_path: &Path, prefix: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(config_path).required(false))
            .add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", config_path.display(), e))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        config.validate()?;

        Ok(config)
    }

    /// Apply CLI overrides
    pub fn apply(&mut self, overrides: Overrides) -> anyhow::Result<()> {
        if let Some(set) = overrides.classifier_set {
            self.classifier_set = Some(set);
        }
        if let Some(dir) = overrides.checkpoint_dir {
            self.checkpoint_dir = dir;
        }
        if let Some(chunk_size) = overrides.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(max_concurrent) = overrides.max_concurrent {
            self.max_concurrent = max_concurrent;
        }

        self.validate()
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("max_concurrent", self.max_concurrent),
            ("chunk_size", self.chunk_size),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be at least 1", name);
            }
        }
        if self.retry.backoff_multiplier < 1.0 {
            anyhow::bail!("retry.backoff_multiplier must be at least 1.0");
        }
        Ok(())
    }

    /// Classifier set to run, required for `run` and `classify`
    pub fn require_set(&self) -> anyhow::Result<&str> {
        self.classifier_set.as_deref().ok_or_else(|| {
            anyhow::anyhow!("No classifier set selected; pass --set or set classifier_set")
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            chunk_size: self.chunk_size,
            batch_size: self.batch_size,
            conversation_timeout: self.conversation_timeout_secs.map(Duration::from_secs),
        }
    }
}
