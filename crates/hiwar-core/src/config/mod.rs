use crate::error::{HiwarError, Result};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiwarConfig {
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset.
    #[serde(default)]
    pub env_var: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            env_var: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_persistence_backend")]
    pub backend: String,
    /// Custom path for the session slot. Defaults to
    /// `~/.config/hiwar/sessions.db` (sqlite) or `.../sessions.json` (json).
    #[serde(default)]
    pub path: Option<String>,
    /// Quiet period before a scheduled write runs. Coalesces rapid mutations.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Sessions kept when a write fails for lack of storage capacity.
    #[serde(default = "default_max_retained_sessions")]
    pub max_retained_sessions: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_persistence_backend(),
            path: None,
            debounce_ms: default_debounce_ms(),
            max_retained_sessions: default_max_retained_sessions(),
        }
    }
}

/// Valid persistence backend names.
pub const VALID_PERSISTENCE_BACKENDS: &[&str] = &["sqlite", "json"];

// -- Defaults --

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> usize {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_persistence_backend() -> String {
    "sqlite".to_string()
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_max_retained_sessions() -> usize {
    10
}
fn default_true() -> bool {
    true
}

impl HiwarConfig {
    /// Load configuration with three-layer TOML merge:
    /// 1. ~/.config/hiwar/config.toml (global)
    /// 2. .hiwar/config.toml (project)
    /// 3. .hiwar/config.local.toml (local, gitignored)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        // Layer 1: Global config
        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                builder = builder.add_source(File::from(global_path).required(false));
            }
        }

        // Layer 2: Project config
        if let Some(dir) = project_dir {
            let project_config = dir.join(".hiwar").join("config.toml");
            if project_config.exists() {
                builder = builder.add_source(File::from(project_config).required(false));
            }

            // Layer 3: Local config (gitignored)
            let local_config = dir.join(".hiwar").join("config.local.toml");
            if local_config.exists() {
                builder = builder.add_source(File::from(local_config).required(false));
            }
        }

        let config = builder
            .build()
            .map_err(|e| HiwarError::Config(e.to_string()))?;

        let mut cfg: Self = config
            .try_deserialize()
            .map_err(|e| HiwarError::Config(e.to_string()))?;

        cfg.validate();
        Ok(cfg)
    }

    /// Validate config values, clamping out-of-range values and logging
    /// warnings. This is lenient — it fixes values rather than rejecting
    /// the config.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !VALID_PERSISTENCE_BACKENDS.contains(&self.persistence.backend.as_str()) {
            warnings.push(format!(
                "unknown persistence backend '{}', valid: {}",
                self.persistence.backend,
                VALID_PERSISTENCE_BACKENDS.join(", ")
            ));
        }

        if self.completion.endpoint.trim().is_empty() {
            warnings.push("completion.endpoint is empty, restoring default".to_string());
            self.completion.endpoint = default_endpoint();
        }

        if self.completion.max_tokens == 0 {
            warnings.push("completion.max_tokens = 0, setting to 256".to_string());
            self.completion.max_tokens = 256;
        }

        // Sampling temperature must be in [0.0, 2.0]
        let temp = self.completion.temperature;
        if !(0.0..=2.0).contains(&temp) {
            warnings.push(format!(
                "completion.temperature = {temp} out of range [0.0, 2.0], clamping"
            ));
            self.completion.temperature = temp.clamp(0.0, 2.0);
        }

        if self.persistence.max_retained_sessions == 0 {
            warnings.push("persistence.max_retained_sessions = 0, setting to 1".to_string());
            self.persistence.max_retained_sessions = 1;
        }

        // Log warnings via tracing (if subscriber is set up)
        for w in &warnings {
            tracing::warn!("config: {}", w);
        }

        warnings
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("hiwar").join("config.toml"))
}

/// Resolve an API key: check config field first, then environment variable.
pub fn resolve_api_key(config: &CompletionConfig, default_env_var: &str) -> Result<String> {
    if let Some(ref key) = config.api_key {
        if !key.is_empty() {
            return Ok(key.clone());
        }
    }

    let env_var_name = config.env_var.as_deref().unwrap_or(default_env_var);

    std::env::var(env_var_name).map_err(|_| {
        HiwarError::Config(format!(
            "completion endpoint requires an API key (set completion.api_key or {env_var_name})"
        ))
    })
}
