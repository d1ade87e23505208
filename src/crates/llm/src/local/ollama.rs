//! Ollama client.
//!
//! Talks to `/api/chat` without streaming. A request schema is passed as
//! Ollama's `format` (structured outputs); images are sent inline as
//! base64, so vision models such as `llama3.2-vision` can transcribe
//! uploads.
//!
//! # Example
//!
//! ```rust,no_run
//! use llm::config::LocalLlmConfig;
//! use llm::local::OllamaClient;
//! use studyflow_core::{CompletionRequest, CompletionService, PromptMessage};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new(LocalLlmConfig::new("http://localhost:11434", "llama3.2"))?;
//!
//! let request = CompletionRequest::new("explain", vec![PromptMessage::user("Hello!")]);
//! let response = client.generate(request).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::LocalLlmConfig;
use crate::error::{LlmError, Result};
use crate::images;
use crate::provider_utils::{ModelInfo, ProviderUtils};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use studyflow_core::{
    CompletionError, CompletionRequest, CompletionResponse, CompletionService, PromptMessage, Role,
};
use tracing::debug;

/// Ollama client for local inference.
#[derive(Clone)]
pub struct OllamaClient {
    config: LocalLlmConfig,
    client: Client,
}

impl OllamaClient {
    pub fn new(config: LocalLlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Check if the Ollama server is running.
    pub async fn check_health(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn convert_message(&self, msg: &PromptMessage) -> Result<OllamaMessage> {
        let mut inline = Vec::with_capacity(msg.images.len());
        for image in &msg.images {
            inline.push(images::inline_base64(&self.client, image).await?);
        }

        Ok(OllamaMessage {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            }
            .to_string(),
            content: msg.content.clone(),
            images: inline,
        })
    }

    async fn build_request(&self, request: &CompletionRequest) -> Result<OllamaRequest> {
        let mut messages = Vec::with_capacity(request.messages.len());
        for msg in &request.messages {
            messages.push(self.convert_message(msg).await?);
        }

        Ok(OllamaRequest {
            model: self.config.model.clone(),
            messages,
            stream: false,
            format: request.schema.clone(),
            options: self.config.temperature.map(|temperature| OllamaOptions { temperature }),
        })
    }

    fn convert_response(&self, request: &CompletionRequest, resp: OllamaResponse) -> Result<CompletionResponse> {
        if !resp.done {
            return Err(LlmError::InvalidResponse("response was cut short".to_string()));
        }

        debug!(
            purpose = %request.purpose,
            model = %resp.model,
            prompt_tokens = resp.prompt_eval_count.unwrap_or(0),
            completion_tokens = resp.eval_count.unwrap_or(0),
            "Ollama completion"
        );

        let text = resp.message.content;
        let structured = if request.schema.is_some() {
            serde_json::from_str::<Value>(&text).ok()
        } else {
            None
        };
        Ok(CompletionResponse { text, structured })
    }

    async fn send(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/api/chat", self.config.base_url);
        let body = self.build_request(request).await?;

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::ServiceUnavailable(format!(
                        "Ollama is not reachable at {}: {}",
                        self.config.base_url, e
                    ))
                } else {
                    LlmError::from_transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("Ollama", status, error_text));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        self.convert_response(request, parsed)
    }
}

#[async_trait]
impl CompletionService for OllamaClient {
    async fn generate(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, CompletionError> {
        self.send(&request).await.map_err(CompletionError::from)
    }
}

#[async_trait]
impl ProviderUtils for OllamaClient {
    fn provider(&self) -> &'static str {
        "ollama"
    }

    async fn ping(&self) -> Result<bool> {
        self.check_health().await
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.config.base_url);

        let response = self.client.get(&url).send().await.map_err(LlmError::from_transport)?;
        if !response.status().is_success() {
            return Err(LlmError::ProviderError(
                "Failed to fetch models from Ollama".to_string(),
            ));
        }

        #[derive(Deserialize)]
        struct OllamaModelsResponse {
            models: Vec<OllamaModelInfo>,
        }

        #[derive(Deserialize)]
        struct OllamaModelInfo {
            name: String,
            #[serde(default)]
            size: Option<u64>,
        }

        let models_response: OllamaModelsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(models_response
            .models
            .into_iter()
            .map(|m| match m.size {
                Some(size) => {
                    ModelInfo::new(m.name).with_detail(format!("{:.1} GB", size as f64 / 1e9))
                }
                None => ModelInfo::new(m.name),
            })
            .collect())
    }

    fn current_model(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    model: String,
    message: OllamaMessage,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<usize>,
    eval_count: Option<usize>,
}
