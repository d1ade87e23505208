//! OpenAI-compatible chat completions client.
//!
//! Works against api.openai.com and any server speaking the same
//! `/chat/completions` dialect. Schemas are sent as a `json_schema`
//! response format; images become `image_url` content parts.
//!
//! # Example
//!
//! ```rust,no_run
//! use llm::config::RemoteLlmConfig;
//! use llm::remote::OpenAiClient;
//! use studyflow_core::{CompletionRequest, CompletionService, PromptMessage};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RemoteLlmConfig::from_env("OPENAI_API_KEY", "https://api.openai.com/v1", "gpt-4o")?;
//! let client = OpenAiClient::new(config)?;
//!
//! let request = CompletionRequest::new("explain", vec![PromptMessage::user("Explain osmosis")]);
//! let response = client.generate(request).await?;
//! println!("{}", response.text);
//! # Ok(())
//! # }
//! ```

use crate::config::RemoteLlmConfig;
use crate::error::{LlmError, Result};
use crate::images;
use crate::provider_utils::{ModelInfo, ProviderUtils};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use studyflow_core::{
    CompletionError, CompletionRequest, CompletionResponse, CompletionService, PromptMessage, Role,
};
use tracing::debug;

/// OpenAI API client.
#[derive(Clone)]
pub struct OpenAiClient {
    config: RemoteLlmConfig,
    client: Client,
}

impl OpenAiClient {
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    async fn convert_message(&self, msg: &PromptMessage) -> Result<OpenAiMessage> {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        let content = if msg.images.is_empty() {
            OpenAiContent::Text(msg.content.clone())
        } else {
            let mut parts = vec![OpenAiPart::Text {
                text: msg.content.clone(),
            }];
            for image in &msg.images {
                let url = images::resolve(image).await?.to_url();
                parts.push(OpenAiPart::ImageUrl {
                    image_url: OpenAiImageUrl { url },
                });
            }
            OpenAiContent::Parts(parts)
        };

        Ok(OpenAiMessage {
            role: role.to_string(),
            content,
        })
    }

    async fn build_request(&self, request: &CompletionRequest) -> Result<OpenAiRequest> {
        let mut messages = Vec::with_capacity(request.messages.len());
        for msg in &request.messages {
            messages.push(self.convert_message(msg).await?);
        }

        let response_format = request.schema.as_ref().map(|schema| {
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name(&request.purpose),
                    "schema": schema,
                    "strict": false,
                }
            })
        });

        Ok(OpenAiRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            response_format,
            stream: false,
        })
    }

    fn convert_response(&self, request: &CompletionRequest, resp: OpenAiResponse) -> Result<CompletionResponse> {
        if let Some(usage) = &resp.usage {
            debug!(
                purpose = %request.purpose,
                model = %resp.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "OpenAI completion"
            );
        }

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        if let Some(refusal) = choice.message.refusal {
            return Err(LlmError::InvalidResponse(format!("model refused: {}", refusal)));
        }
        let text = choice.message.content.unwrap_or_default();

        let structured = if request.schema.is_some() {
            serde_json::from_str::<Value>(&text).ok()
        } else {
            None
        };
        Ok(CompletionResponse { text, structured })
    }

    async fn send(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = self.build_request(request).await?;

        let mut req = self
            .client
            .post(&url)
            .json(&body)
            .header("Authorization", format!("Bearer {}", self.config.api_key));
        if let Some(org) = &self.config.organization {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req.send().await.map_err(LlmError::from_transport)?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("OpenAI", status, error_text));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        self.convert_response(request, parsed)
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn generate(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, CompletionError> {
        self.send(&request).await.map_err(CompletionError::from)
    }
}

#[async_trait]
impl ProviderUtils for OpenAiClient {
    fn provider(&self) -> &'static str {
        "openai"
    }

    async fn ping(&self) -> Result<bool> {
        match self.fetch_models().await {
            Ok(_) => Ok(true),
            Err(err) if err.is_auth_error() => Err(err),
            Err(_) => Ok(false),
        }
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .send()
            .await
            .map_err(LlmError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("OpenAI", status, error_text));
        }

        #[derive(Deserialize)]
        struct ModelList {
            data: Vec<ModelEntry>,
        }

        #[derive(Deserialize)]
        struct ModelEntry {
            id: String,
            #[serde(default)]
            owned_by: Option<String>,
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(list
            .data
            .into_iter()
            .map(|m| match m.owned_by {
                Some(owner) => ModelInfo::new(m.id).with_detail(owner),
                None => ModelInfo::new(m.id),
            })
            .collect())
    }

    fn current_model(&self) -> &str {
        &self.config.model
    }
}

/// Schema names must match `^[a-zA-Z0-9_-]{1,64}$`.
fn schema_name(purpose: &str) -> String {
    let name: String = purpose
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if name.is_empty() {
        "response".to_string()
    } else {
        name
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: OpenAiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAiImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyflow_core::ImageRef;

    fn client() -> OpenAiClient {
        let config = RemoteLlmConfig::new("test-key", "https://api.openai.com/v1", "gpt-4o")
            .with_temperature(0.3);
        OpenAiClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_plain_request_body() {
        let request = CompletionRequest::new(
            "explain.proposal",
            vec![PromptMessage::system("Be brief."), PromptMessage::user("Explain osmosis")],
        );
        let body = serde_json::to_value(client().build_request(&request).await.unwrap()).unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Explain osmosis");
        assert!(body.get("response_format").is_none());
        assert_eq!(body["stream"], false);
    }

    #[tokio::test]
    async fn test_schema_and_images_are_forwarded() {
        let schema = json!({"type": "object", "properties": {"decision": {"type": "string"}}});
        let request = CompletionRequest::new(
            "propose_questions.revision",
            vec![PromptMessage::user("What is this?")
                .with_images(vec![ImageRef::new("data:image/png;base64,AAAA")])],
        )
        .with_schema(schema.clone());
        let body = serde_json::to_value(client().build_request(&request).await.unwrap()).unwrap();

        let format = &body["response_format"];
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "propose_questions_revision");
        assert_eq!(format["json_schema"]["schema"], schema);

        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_structured_response_is_decoded() {
        let request = CompletionRequest::new("edit", vec![]).with_schema(json!({"type": "object"}));
        let resp: OpenAiResponse = serde_json::from_value(json!({
            "model": "gpt-4o",
            "choices": [{"message": {"content": "{\"decision\":\"finalize\"}"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4}
        }))
        .unwrap();

        let response = client().convert_response(&request, resp).unwrap();
        assert_eq!(response.structured, Some(json!({"decision": "finalize"})));
    }

    #[test]
    fn test_empty_choices_is_invalid() {
        let request = CompletionRequest::new("explain", vec![]);
        let resp: OpenAiResponse = serde_json::from_value(json!({"model": "gpt-4o", "choices": []})).unwrap();

        let err = client().convert_response(&request, resp).unwrap_err();
        assert!(matches!(
            CompletionError::from(err),
            CompletionError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_schema_name_is_sanitized() {
        assert_eq!(schema_name("edit_document.revision"), "edit_document_revision");
        assert_eq!(schema_name(""), "response");
        assert_eq!(schema_name(&"x".repeat(100)).len(), 64);
    }

    #[test]
    fn test_current_model() {
        assert_eq!(client().current_model(), "gpt-4o");
        assert_eq!(client().provider(), "openai");
    }
}
