pub mod plan;
pub mod prompts;

use crate::completion::{CompletionRequest, ResponseFormat};
use crate::models::QueryResult;

pub use plan::{parse_plan, PlanOutcome};

pub fn plan_request(question: &str) -> CompletionRequest {
    CompletionRequest {
        system_prompt: prompts::planning_prompt().to_string(),
        user_content: question.trim().to_string(),
        format: ResponseFormat::Json,
    }
}

/// Question plus the first `sample_rows` rows of the result as JSON.
pub fn narration_request(question: &str, result: &QueryResult, sample_rows: usize) -> CompletionRequest {
    let shown = result.rows.len().min(sample_rows);
    let sample = &result.rows[..shown];
    let rows_json = serde_json::to_string_pretty(sample).unwrap_or_else(|_| "[]".to_string());
    let mut user_content = format!(
        "Question: {}\n\nColumns: {}\n\nRows ({} of {}{}):\n{}",
        question.trim(),
        result.columns.join(", "),
        shown,
        result.rows.len(),
        if result.truncated { ", result truncated" } else { "" },
        rows_json
    );
    if shown < result.rows.len() {
        user_content.push_str("\n\nOnly the first rows are shown.");
    }
    CompletionRequest {
        system_prompt: prompts::INTERPRETATION_PROMPT.to_string(),
        user_content,
        format: ResponseFormat::Text,
    }
}
