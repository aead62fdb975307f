use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        }
    }
}

/// One result row keyed by column name, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub truncated: bool,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_columns(&self, names: &[&str]) -> bool {
        names
            .iter()
            .all(|name| self.columns.iter().any(|column| column == name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisualizationMode {
    Table,
    Scalp3d,
    Topomap,
    Cluster,
}

impl VisualizationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Scalp3d => "scalp3d",
            Self::Topomap => "topomap",
            Self::Cluster => "cluster",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "table" => Some(Self::Table),
            "scalp3d" | "scalp" | "3d" => Some(Self::Scalp3d),
            "topomap" | "topo" => Some(Self::Topomap),
            "cluster" | "clusters" => Some(Self::Cluster),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub sql: Option<String>,
    pub thought: String,
    #[serde(default)]
    pub visualization: Option<VisualizationMode>,
}

impl QueryPlan {
    pub fn conceptual(thought: impl Into<String>) -> Self {
        Self {
            sql: None,
            thought: thought.into(),
            visualization: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub sql: Option<String>,
    pub result: Option<QueryResult>,
    pub narrative: Option<String>,
    pub visualization: Option<VisualizationMode>,
    pub timestamp: DateTime<Utc>,
}

/// Per-turn orchestration phases, in the order a turn can visit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TurnPhase {
    Idle,
    Planning,
    NoQueryNeeded,
    Executing,
    Narrating,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub mode: VisualizationMode,
    pub selected_row: Option<usize>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            mode: VisualizationMode::Table,
            selected_row: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSource {
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: u64,
}
