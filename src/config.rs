use crate::errors::{AppError, AppResult};
use crate::models::{Provider, TableSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "EEG_INSIGHT_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "eeg-insight.yaml";
const REQUIRED_TABLES: [&str; 2] = ["features", "subjects"];
const MIN_TIMEOUT_SECONDS: u64 = 1;
const MAX_TIMEOUT_SECONDS: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub tables: Vec<TableSource>,
    pub completion: CompletionConfig,
    pub query: QueryConfig,
    pub query_log: QueryLogConfig,
    pub log_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tables: vec![
                TableSource {
                    name: "features".to_string(),
                    uri: "data/eeg_features.parquet".to_string(),
                },
                TableSource {
                    name: "subjects".to_string(),
                    uri: "data/eeg_subjects.parquet".to_string(),
                },
            ],
            completion: CompletionConfig::default(),
            query: QueryConfig::default(),
            query_log: QueryLogConfig::default(),
            log_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    pub provider: Provider,
    pub model: String,
    pub endpoint: Option<String>,
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            model: "gemini-2.0-flash".to_string(),
            endpoint: None,
            api_key_env: "EEG_INSIGHT_API_KEY".to_string(),
            timeout_seconds: 60,
            temperature: 0.1,
        }
    }
}

impl CompletionConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub row_limit: usize,
    pub narration_sample_rows: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            row_limit: 5_000,
            narration_sample_rows: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryLogSink {
    None,
    File,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryLogConfig {
    pub sink: QueryLogSink,
    pub path: PathBuf,
    pub endpoint: Option<String>,
    pub stats_secret_env: String,
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            sink: QueryLogSink::File,
            path: PathBuf::from("logs/queries.jsonl"),
            endpoint: None,
            stats_secret_env: "EEG_INSIGHT_STATS_SECRET".to_string(),
        }
    }
}

impl QueryLogConfig {
    pub fn stats_secret(&self) -> Option<String> {
        std::env::var(&self.stats_secret_env)
            .ok()
            .filter(|value| !value.is_empty())
    }
}

impl AppConfig {
    /// Explicit path, then `EEG_INSIGHT_CONFIG`, then `./eeg-insight.yaml`, then defaults.
    pub fn load(explicit: Option<&Path>) -> AppResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return Self::from_file(Path::new(path.trim()));
            }
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(&local);
        }
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), error))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        for required in REQUIRED_TABLES {
            if !self.tables.iter().any(|table| table.name == required) {
                return Err(AppError::Config(format!(
                    "Table '{}' must be configured",
                    required
                )));
            }
        }
        if self.tables.iter().any(|table| table.uri.trim().is_empty()) {
            return Err(AppError::Config("Table source URIs cannot be empty".to_string()));
        }
        if self.query.row_limit == 0 {
            return Err(AppError::Config("query.row_limit must be at least 1".to_string()));
        }
        if self.query.narration_sample_rows == 0 {
            return Err(AppError::Config(
                "query.narration_sample_rows must be at least 1".to_string(),
            ));
        }
        let timeout = self.completion.timeout_seconds;
        if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout) {
            return Err(AppError::Config(format!(
                "completion.timeout_seconds {} is out of allowed range ({}..={})",
                timeout, MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS
            )));
        }
        if self.query_log.sink == QueryLogSink::Http && self.query_log.endpoint.is_none() {
            return Err(AppError::Config(
                "query_log.endpoint is required for the http sink".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, QueryLogSink};
    use crate::models::Provider;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.query.narration_sample_rows, 20);
        assert_eq!(config.tables.len(), 2);
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_sections() {
        let config = AppConfig::from_yaml(
            "completion:\n  provider: openai\n  model: gpt-4o-mini\nquery:\n  row_limit: 250\n",
        )
        .expect("parse");
        assert_eq!(config.completion.provider, Provider::OpenAi);
        assert_eq!(config.completion.model, "gpt-4o-mini");
        assert_eq!(config.completion.timeout_seconds, 60);
        assert_eq!(config.query.row_limit, 250);
        assert_eq!(config.query.narration_sample_rows, 20);
        assert_eq!(config.query_log.sink, QueryLogSink::File);
    }

    #[test]
    fn rejects_missing_required_table() {
        let result = AppConfig::from_yaml(
            "tables:\n  - name: features\n    uri: data/eeg_features.parquet\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn http_sink_requires_endpoint() {
        let result = AppConfig::from_yaml("query_log:\n  sink: http\n");
        assert!(result.is_err());
    }

    #[test]
    fn reads_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("eeg.yaml");
        std::fs::write(&path, "log_dir: /tmp/eeg-logs\nquery_log:\n  sink: none\n").expect("write");
        let config = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(config.query_log.sink, QueryLogSink::None);
        assert_eq!(config.log_dir, std::path::PathBuf::from("/tmp/eeg-logs"));
    }
}
