use super::{provider_error_message, CompletionFuture, CompletionRequest, CompletionService, ResponseFormat};
use crate::errors::{AppError, AppResult};
use crate::models::Provider;
use serde::{Deserialize, Serialize};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<JsonObjectFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct JsonObjectFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for any OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: Option<String>,
        model: String,
        api_key: String,
        temperature: f32,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            api_key,
            temperature,
        }
    }

    async fn chat(&self, request: &CompletionRequest) -> AppResult<String> {
        let url = format!("{}/v1/chat/completions", self.endpoint);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_content,
                },
            ],
            temperature: self.temperature,
            response_format: match request.format {
                ResponseFormat::Json => Some(JsonObjectFormat { kind: "json_object" }),
                ResponseFormat::Text => None,
            },
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Completion(format!(
                "openai returned {}: {}",
                status.as_u16(),
                provider_error_message(&text)
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|error| AppError::Completion(format!("Unreadable openai response: {}", error)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::Completion("openai returned no text".to_string()))
    }
}

impl CompletionService for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
        Box::pin(self.chat(request))
    }
}
