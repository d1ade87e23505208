//! Completion backend selection.

use llm::local::OllamaClient;
use llm::remote::OpenAiClient;
use llm::{LocalLlmConfig, ProviderUtils, RemoteLlmConfig};
use std::sync::Arc;
use std::time::Duration;
use studyflow_core::CompletionService;

use crate::config::{LlmSettings, Provider};
use crate::error::Result;

/// A configured backend, as a completion port and as provider utilities.
#[derive(Clone)]
pub struct Backend {
    pub completion: Arc<dyn CompletionService>,
    pub utils: Arc<dyn ProviderUtils>,
}

/// Build the client named by `settings.provider`.
pub fn build_backend(settings: &LlmSettings) -> Result<Backend> {
    let timeout = Duration::from_secs(settings.timeout_secs);
    match settings.provider {
        Provider::Ollama => {
            let mut config = LocalLlmConfig::new(settings.base_url(), &settings.model).with_timeout(timeout);
            if let Some(temperature) = settings.temperature {
                config = config.with_temperature(temperature);
            }
            let client = Arc::new(OllamaClient::new(config)?);
            Ok(Backend {
                completion: client.clone(),
                utils: client,
            })
        }
        Provider::Openai => {
            let mut config = RemoteLlmConfig::from_env(&settings.api_key_env, settings.base_url(), &settings.model)?
                .with_timeout(timeout);
            if let Some(organization) = &settings.organization {
                config = config.with_organization(organization);
            }
            if let Some(temperature) = settings.temperature {
                config = config.with_temperature(temperature);
            }
            let client = Arc::new(OpenAiClient::new(config)?);
            Ok(Backend {
                completion: client.clone(),
                utils: client,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StudyflowError;

    #[test]
    fn test_ollama_backend_needs_no_key() {
        let backend = build_backend(&LlmSettings::default()).unwrap();
        assert_eq!(backend.utils.provider(), "ollama");
        assert_eq!(backend.utils.current_model(), "llama3.2-vision");
    }

    #[test]
    fn test_openai_backend_requires_key() {
        let settings = LlmSettings {
            provider: Provider::Openai,
            model: "gpt-4o".to_string(),
            api_key_env: "STUDYFLOW_TEST_MISSING_KEY".to_string(),
            ..LlmSettings::default()
        };
        match build_backend(&settings) {
            Err(StudyflowError::Llm(err)) => assert!(err.is_auth_error()),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a missing key error"),
        }
    }
}
