//! Configuration types for the chat agent

use serde::{Deserialize, Serialize};

/// Provider configuration. The provider itself is chosen from the model name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Model name/identifier
    #[serde(default = "default_model")]
    pub model: String,
    /// API key given directly (takes precedence over `api_key_env`)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable containing the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Custom base URL (for proxied endpoints)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Max output tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            max_tokens: None,
        }
    }
}

/// Agent loop behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// System prompt sent with every round
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Extra instructions from the user, appended to the system prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_instruction: Option<String>,
    /// Maximum provider requests for one submitted prompt
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Timeout for one submitted prompt in seconds (0 disables)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant with access to the user's notes. \
     Use the available functions to look things up before answering."
        .to_string()
}

fn default_max_rounds() -> u32 {
    10
}

fn default_timeout() -> u64 {
    120
}

impl AgentConfig {
    /// System prompt and user instruction, joined
    pub fn instructions(&self) -> String {
        [Some(self.system_prompt.as_str()), self.user_instruction.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            user_instruction: None,
            max_rounds: default_max_rounds(),
            timeout_seconds: default_timeout(),
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Provider requests allowed in flight at once across sessions
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_max_concurrent_requests() -> usize {
    4
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

/// Conversation storage configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Storage backend type
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory for file storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Conversation storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Store in memory only (lost on restart)
    #[default]
    InMemory,
    /// Store as JSON files
    File,
}

/// Conversation naming configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamingConfig {
    /// Generate a title after the first exchange
    #[serde(default = "default_naming_enabled")]
    pub enabled: bool,
    /// Model used for naming
    #[serde(default = "default_naming_model")]
    pub model: String,
}

fn default_naming_enabled() -> bool {
    true
}

fn default_naming_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            enabled: default_naming_enabled(),
            model: default_naming_model(),
        }
    }
}

/// Local notes directory the built-in functions operate on
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VaultConfig {
    /// Root directory of the vault
    #[serde(default = "default_vault_path")]
    pub path: String,
    /// Maximum entries returned by a listing or search
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_vault_path() -> String {
    ".".to_string()
}

fn default_max_results() -> usize {
    50
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: default_vault_path(),
            max_results: default_max_results(),
        }
    }
}
