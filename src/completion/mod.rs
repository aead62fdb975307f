pub mod gemini;
pub mod openai;

use crate::config::CompletionConfig;
use crate::errors::{AppError, AppResult};
use crate::models::Provider;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_content: String,
    pub format: ResponseFormat,
}

pub type CompletionFuture<'a> = Pin<Box<dyn Future<Output = AppResult<String>> + Send + 'a>>;

/// Prompt in, text out. Implementations never retry on their own.
pub trait CompletionService: Send + Sync {
    fn provider(&self) -> Provider;
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a>;
}

pub fn build_completion(config: &CompletionConfig) -> AppResult<Arc<dyn CompletionService>> {
    let api_key = config.api_key().ok_or_else(|| {
        AppError::Config(format!(
            "Set {} to the {} API key",
            config.api_key_env,
            config.provider.as_str()
        ))
    })?;
    let http = http_client(config.timeout_seconds)?;

    let service: Arc<dyn CompletionService> = match config.provider {
        Provider::Gemini => Arc::new(gemini::GeminiClient::new(
            http,
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            config.temperature,
        )),
        Provider::OpenAi => Arc::new(openai::OpenAiClient::new(
            http,
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            config.temperature,
        )),
    };
    Ok(service)
}

pub(crate) fn http_client(timeout_seconds: u64) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .user_agent(concat!("eeg-insight/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|error| AppError::Config(format!("Failed to build HTTP client: {}", error)))
}

/// Pulls `error.message` out of a provider error body, falling back to the raw text.
pub(crate) fn provider_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(|message| message.as_str())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| body.trim().chars().take(500).collect())
}

#[cfg(test)]
mod tests {
    use super::{build_completion, provider_error_message};
    use crate::config::CompletionConfig;

    #[test]
    fn extracts_nested_error_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(provider_error_message(body), "API key not valid");
        assert_eq!(provider_error_message("upstream timeout"), "upstream timeout");
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = CompletionConfig {
            api_key_env: "EEG_INSIGHT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..CompletionConfig::default()
        };
        let error = build_completion(&config).err().expect("missing key");
        assert!(error.to_string().starts_with("CONFIG_INVALID"));
    }
}
