//! Configuration loader and validator for the approval sweeper.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub store: Store,
    #[serde(default)]
    pub workflow: Workflow,
    #[serde(default)]
    pub pricing: Option<Pricing>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub bind_addr: String,
    /// Run the sweep in-process every N seconds; 0 leaves triggering to an external scheduler.
    #[serde(default)]
    pub sweep_interval_seconds: u64,
}

/// Backing store selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum Store {
    Rest { url: String, service_key: String },
    Sqlite { database_url: String },
}

/// Auto-approval workflow knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Workflow {
    pub review_task_title: String,
    pub task_window_days: u32,
    pub activity_type: String,
    pub activity_author: String,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            review_task_title: "Review Content Post".into(),
            task_window_days: 2,
            activity_type: "content_approved".into(),
            activity_author: "System".into(),
        }
    }
}

/// Chat-completion API used by the pricing assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pricing {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

impl Config {
    /// Overlay secrets from the environment: `STORE_URL`, `STORE_SERVICE_KEY`,
    /// `DATABASE_URL` and `PRICING_API_KEY` win over the file when set.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        match &mut self.store {
            Store::Rest { url, service_key } => {
                if let Some(v) = lookup("STORE_URL") {
                    *url = v;
                }
                if let Some(v) = lookup("STORE_SERVICE_KEY") {
                    *service_key = v;
                }
            }
            Store::Sqlite { database_url } => {
                if let Some(v) = lookup("DATABASE_URL") {
                    *database_url = v;
                }
            }
        }
        if let Some(pricing) = self.pricing.as_mut() {
            if let Some(v) = lookup("PRICING_API_KEY") {
                pricing.api_key = v;
            }
        }
    }
}

/// Load configuration from a YAML file, overlay env secrets and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty"));
    }

    match &cfg.store {
        Store::Rest { url, service_key } => {
            if url.trim().is_empty() {
                return Err(ConfigError::Invalid("store.url must be non-empty"));
            }
            if reqwest::Url::parse(url).is_err() {
                return Err(ConfigError::Invalid("store.url must be an absolute URL"));
            }
            if service_key.trim().is_empty() {
                return Err(ConfigError::Invalid("store.service_key must be non-empty"));
            }
        }
        Store::Sqlite { database_url } => {
            if !database_url.starts_with("sqlite:") {
                return Err(ConfigError::Invalid(
                    "store.database_url must start with sqlite:",
                ));
            }
        }
    }

    if cfg.workflow.review_task_title.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "workflow.review_task_title must be non-empty",
        ));
    }
    if cfg.workflow.task_window_days == 0 {
        return Err(ConfigError::Invalid("workflow.task_window_days must be > 0"));
    }
    if cfg.workflow.activity_type.trim().is_empty() {
        return Err(ConfigError::Invalid("workflow.activity_type must be non-empty"));
    }

    if let Some(pricing) = &cfg.pricing {
        if pricing.api_url.trim().is_empty() {
            return Err(ConfigError::Invalid("pricing.api_url must be non-empty"));
        }
        if pricing.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("pricing.api_key must be non-empty"));
        }
        if pricing.model.trim().is_empty() {
            return Err(ConfigError::Invalid("pricing.model must be non-empty"));
        }
    }

    Ok(())
}

/// Returns the example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  bind_addr: "0.0.0.0:8080"
  # 0 = wait for an external scheduler to call /auto-approve
  sweep_interval_seconds: 0

store:
  backend: rest
  url: "https://YOUR_PROJECT.example.co"
  service_key: "YOUR_SERVICE_ROLE_KEY"

workflow:
  review_task_title: "Review Content Post"
  task_window_days: 2
  activity_type: "content_approved"
  activity_author: "System"

pricing:
  api_url: "https://api.openai.com/v1/chat/completions"
  api_key: "YOUR_COMPLETION_API_KEY"
  model: "gpt-4o-mini"
"#
}
