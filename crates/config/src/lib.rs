//! Configuration loading, validation, and management for Aegis.
//!
//! Loads configuration from `~/.aegis/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! The engine never reads configuration ambiently: callers hand the section
//! structs ([`AgentSettings`], [`DelegationPolicy`], [`ContextSettings`]) to
//! the components that need them at construction time.

use aegis_core::TaskPriority;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Maximum number of revision attempts after the first answer.
pub const DEFAULT_MAX_REFLECTION_RETRIES: u32 = 2;

/// Maximum delegation depth when none is configured.
pub const DEFAULT_MAX_DELEGATION_DEPTH: u32 = 3;

/// Context window assumed for models with no explicit size.
pub const DEFAULT_WINDOW_TOKENS: usize = 8000;

/// The root configuration structure.
///
/// Maps directly to `~/.aegis/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Providers tried, in order, after the primary one fails
    #[serde(default)]
    pub fallback_chain: Vec<String>,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Delegation guard settings
    #[serde(default)]
    pub delegation: DelegationPolicy,

    /// Task dispatch settings
    #[serde(default)]
    pub tasks: TaskDispatchConfig,

    /// Context window budgeting
    #[serde(default)]
    pub context: ContextSettings,

    /// Autonomy and tool permission settings
    #[serde(default)]
    pub autonomy: AutonomyConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("fallback_chain", &self.fallback_chain)
            .field("agent", &self.agent)
            .field("delegation", &self.delegation)
            .field("tasks", &self.tasks)
            .field("context", &self.context)
            .field("autonomy", &self.autonomy)
            .field("providers", &self.providers)
            .finish()
    }
}

// ── Agent loop ──

/// Settings for the classify → plan → execute → reflect loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_true")]
    pub planning_enabled: bool,

    #[serde(default = "default_true")]
    pub reflection_enabled: bool,

    /// Revision attempts after the first answer
    #[serde(default = "default_max_reflection_retries")]
    pub max_reflection_retries: u32,

    /// Hard cap on generate → tool → generate rounds within one attempt
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    #[serde(default = "default_persona_timeout")]
    pub planning_timeout_secs: u64,

    #[serde(default = "default_persona_timeout")]
    pub reflection_timeout_secs: u64,
}

fn default_max_reflection_retries() -> u32 {
    DEFAULT_MAX_REFLECTION_RETRIES
}
fn default_max_tool_iterations() -> u32 {
    25
}
fn default_persona_timeout() -> u64 {
    60
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            planning_enabled: true,
            reflection_enabled: true,
            max_reflection_retries: DEFAULT_MAX_REFLECTION_RETRIES,
            max_tool_iterations: default_max_tool_iterations(),
            planning_timeout_secs: default_persona_timeout(),
            reflection_timeout_secs: default_persona_timeout(),
        }
    }
}

// ── Delegation ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationPolicy {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Reject delegation to an agent already present in the parent chain
    #[serde(default = "default_true")]
    pub circular_check: bool,
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DELEGATION_DEPTH
}

impl Default for DelegationPolicy {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DELEGATION_DEPTH,
            circular_check: true,
        }
    }
}

impl DelegationPolicy {
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_circular_check(mut self, enabled: bool) -> Self {
        self.circular_check = enabled;
        self
    }
}

// ── Tasks ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDispatchConfig {
    /// Minimum priority at which a user-assigned task is queued automatically.
    /// Delegated tasks are always queued.
    #[serde(default = "default_auto_dispatch_priority")]
    pub auto_dispatch_priority: TaskPriority,
}

fn default_auto_dispatch_priority() -> TaskPriority {
    TaskPriority::High
}

impl Default for TaskDispatchConfig {
    fn default() -> Self {
        Self {
            auto_dispatch_priority: default_auto_dispatch_priority(),
        }
    }
}

// ── Context window ──

/// Fractions of the context window given to each prompt section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetRatios {
    pub system_prompt: f64,
    pub memories: f64,
    pub summary: f64,
    pub messages: f64,
    pub reserve: f64,
}

impl Default for BudgetRatios {
    fn default() -> Self {
        Self {
            system_prompt: 0.15,
            memories: 0.10,
            summary: 0.10,
            messages: 0.60,
            reserve: 0.05,
        }
    }
}

impl BudgetRatios {
    pub fn sum(&self) -> f64 {
        self.system_prompt + self.memories + self.summary + self.messages + self.reserve
    }

    fn is_valid(&self) -> bool {
        let parts = [
            self.system_prompt,
            self.memories,
            self.summary,
            self.messages,
            self.reserve,
        ];
        parts.iter().all(|r| *r >= 0.0) && (self.sum() - 1.0).abs() < 1e-6
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSettings {
    /// Window size for models not listed in `model_windows`
    #[serde(default = "default_window_tokens")]
    pub default_window_tokens: usize,

    /// Replace bulky tool output with short structured summaries
    #[serde(default = "default_true")]
    pub compress_tool_results: bool,

    /// Summarize history that no longer fits in the window
    #[serde(default = "default_true")]
    pub summarize_dropped: bool,

    #[serde(default)]
    pub ratios: BudgetRatios,

    /// Per-model context window sizes in tokens
    #[serde(default)]
    pub model_windows: HashMap<String, usize>,
}

fn default_window_tokens() -> usize {
    DEFAULT_WINDOW_TOKENS
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            default_window_tokens: DEFAULT_WINDOW_TOKENS,
            compress_tool_results: true,
            summarize_dropped: true,
            ratios: BudgetRatios::default(),
            model_windows: HashMap::new(),
        }
    }
}

impl ContextSettings {
    /// Context window size for `model`.
    pub fn window_for(&self, model: &str) -> usize {
        self.model_windows
            .get(model)
            .copied()
            .unwrap_or(self.default_window_tokens)
    }
}

// ── Autonomy ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Only tools requiring the `read` permission run
    ReadOnly,
    /// Reads and delegation run; anything else needs approval unless allowlisted
    #[default]
    Supervised,
    /// Everything runs except explicitly denied tools
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutonomyConfig {
    #[serde(default)]
    pub level: AutonomyLevel,

    /// Tools that run without approval in supervised mode
    #[serde(default)]
    pub allowed_tools: Vec<String>,

    /// Tools that never run
    #[serde(default)]
    pub denied_tools: Vec<String>,
}

// ── Providers ──

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Context window in tokens for this provider's default model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,

    /// Calls allowed per rolling minute; unlimited when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            default_model: None,
            context_window: None,
            requests_per_minute: None,
            timeout_secs: default_provider_timeout(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("context_window", &self.context_window)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.aegis/config.toml),
    /// then apply `AEGIS_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Recognized: `AEGIS_PROVIDER`, `AEGIS_MODEL`, `AEGIS_PLANNING_ENABLED`,
    /// `AEGIS_REFLECTION_ENABLED`, `AEGIS_MAX_DELEGATION_DEPTH`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(provider) = lookup("AEGIS_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("AEGIS_MODEL") {
            self.default_model = model;
        }
        if let Some(raw) = lookup("AEGIS_PLANNING_ENABLED") {
            self.agent.planning_enabled = parse_env("AEGIS_PLANNING_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("AEGIS_REFLECTION_ENABLED") {
            self.agent.reflection_enabled = parse_env("AEGIS_REFLECTION_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("AEGIS_MAX_DELEGATION_DEPTH") {
            self.delegation.max_depth = parse_env("AEGIS_MAX_DELEGATION_DEPTH", &raw)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".aegis")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !self.context.ratios.is_valid() {
            return Err(ConfigError::ValidationError(format!(
                "context.ratios must be non-negative and sum to 1.0 (got {:.3})",
                self.context.ratios.sum()
            )));
        }

        if self.delegation.max_depth == 0 {
            return Err(ConfigError::ValidationError(
                "delegation.max_depth must be at least 1".into(),
            ));
        }

        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Context window for `model`: explicit per-model size, then the
    /// default provider's configured window, then the global default.
    pub fn window_for(&self, model: &str) -> usize {
        if let Some(tokens) = self.context.model_windows.get(model) {
            return *tokens;
        }
        self.providers
            .get(&self.default_provider)
            .and_then(|p| p.context_window)
            .unwrap_or(self.context.default_window_tokens)
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            fallback_chain: Vec::new(),
            agent: AgentSettings::default(),
            delegation: DelegationPolicy::default(),
            tasks: TaskDispatchConfig::default(),
            context: ContextSettings::default(),
            autonomy: AutonomyConfig::default(),
            providers: HashMap::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: raw.to_string(),
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for aegis_core::Error {
    fn from(err: ConfigError) -> Self {
        aegis_core::Error::Config {
            message: err.to_string(),
        }
    }
}
