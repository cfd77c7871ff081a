use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod validator;

use crate::agents::config::{AgentConfig, LimitsConfig, NamingConfig, ProviderConfig, StorageConfig, VaultConfig};
use crate::cli::Cli;

/// Application settings.
///
/// Sources, lowest precedence first: the config file, `PARLEY_*`
/// environment variables (`PARLEY_AGENT__MAX_ROUNDS=5`), CLI flags.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            agent: AgentConfig::default(),
            limits: LimitsConfig::default(),
            storage: StorageConfig::default(),
            naming: NamingConfig::default(),
            vault: VaultConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_path("parley.toml")
    }

    /// Create settings from CLI arguments (includes config file and CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let mut settings = Self::load(&cli.config)?;

        // Apply CLI overrides (CLI > env vars > config file)
        settings.apply_cli_overrides(cli);

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let settings = Self::load(path.as_ref())?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("PARLEY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(s.try_deserialize()?)
    }

    /// Apply CLI argument overrides to settings
    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(model) = &cli.model {
            self.provider.model = model.clone();
        }
        if let Some(storage) = cli.storage {
            self.storage.backend = storage.into();
        }
        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(path.clone());
        }
        if let Some(vault) = &cli.vault {
            self.vault.path = vault.clone();
        }
        if let Some(max_rounds) = cli.max_rounds {
            self.agent.max_rounds = max_rounds;
        }
        if cli.no_naming {
            self.naming.enabled = false;
        }
        if let Some(log_level) = &cli.log_level {
            self.log_level = log_level.clone();
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        validator::ConfigValidator::validate(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })
    }
}
