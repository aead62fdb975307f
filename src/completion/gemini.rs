use super::{provider_error_message, CompletionFuture, CompletionRequest, CompletionService, ResponseFormat};
use crate::errors::{AppError, AppResult};
use crate::models::Provider;
use serde::{Deserialize, Serialize};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl GeminiClient {
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

    async fn generate(&self, request: &CompletionRequest) -> AppResult<String> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model);
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &request.system_prompt,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &request.user_content,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                response_mime_type: match request.format {
                    ResponseFormat::Json => "application/json",
                    ResponseFormat::Text => "text/plain",
                },
            },
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Completion(format!(
                "gemini returned {}: {}",
                status.as_u16(),
                provider_error_message(&text)
            )));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|error| AppError::Completion(format!("Unreadable gemini response: {}", error)))?;
        let joined = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if joined.trim().is_empty() {
            return Err(AppError::Completion("gemini returned no text".to_string()));
        }
        Ok(joined)
    }
}

impl CompletionService for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
        Box::pin(self.generate(request))
    }
}
