use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::agents::config::{AgentConfig, LimitsConfig, NamingConfig, ProviderConfig, StorageBackend, StorageConfig};
use crate::agents::llm::ProviderKind;
use crate::config::Settings;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_provider(&settings.provider) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_agent(&settings.agent) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_limits(&settings.limits) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_storage(&settings.storage) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_naming(&settings.naming) {
            errors.extend(e);
        }

        if EnvFilter::try_new(&settings.log_level).is_err() {
            errors.push(ValidationError::InvalidValue {
                field: "log_level".to_string(),
                reason: format!("'{}' is not a valid log filter", settings.log_level),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_provider(provider: &ProviderConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if provider.model.trim().is_empty() {
            errors.push(ValidationError::MissingField("provider.model".to_string()));
        } else if let Err(e) = ProviderKind::from_model(&provider.model) {
            errors.push(ValidationError::InvalidValue {
                field: "provider.model".to_string(),
                reason: e.to_string(),
            });
        }

        if provider.max_tokens == Some(0) {
            errors.push(ValidationError::InvalidValue {
                field: "provider.max_tokens".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if let Some(base_url) = &provider.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                errors.push(ValidationError::InvalidValue {
                    field: "provider.base_url".to_string(),
                    reason: "Must start with http:// or https://".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_agent(agent: &AgentConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if agent.max_rounds == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "agent.max_rounds".to_string(),
                reason: "At least one round is required".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_limits(limits: &LimitsConfig) -> Result<(), Vec<ValidationError>> {
        if limits.max_concurrent_requests == 0 {
            return Err(vec![ValidationError::InvalidValue {
                field: "limits.max_concurrent_requests".to_string(),
                reason: "Must be greater than 0".to_string(),
            }]);
        }
        Ok(())
    }

    fn validate_storage(storage: &StorageConfig) -> Result<(), Vec<ValidationError>> {
        if storage.backend == StorageBackend::File
            && storage.path.as_deref().map_or(false, |p| p.trim().is_empty())
        {
            return Err(vec![ValidationError::MissingField("storage.path".to_string())]);
        }
        Ok(())
    }

    fn validate_naming(naming: &NamingConfig) -> Result<(), Vec<ValidationError>> {
        if naming.enabled && naming.model.trim().is_empty() {
            return Err(vec![ValidationError::MissingField("naming.model".to_string())]);
        }
        Ok(())
    }
}
