use crate::models::{QueryPlan, VisualizationMode};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n?(.*?)```").expect("valid code fence regex")
});

static PLAN_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::json!({
        "type": "object",
        "properties": {
            "sql": { "type": ["string", "null"] },
            "thought": { "type": "string" },
            "visualization": { "type": ["string", "null"] }
        },
        "required": ["sql", "thought"]
    })
});

#[derive(Debug, Clone)]
pub struct PlanValidationResult {
    pub value: Option<Value>,
    pub error: Option<String>,
    pub errors: Vec<String>,
}

/// Result of reading a plan-stage response. `Malformed` still carries a
/// conceptual plan whose thought is the raw response text.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Parsed(QueryPlan),
    Malformed { plan: QueryPlan, reason: String },
}

impl PlanOutcome {
    pub fn plan(&self) -> &QueryPlan {
        match self {
            Self::Parsed(plan) => plan,
            Self::Malformed { plan, .. } => plan,
        }
    }

    pub fn into_plan(self) -> QueryPlan {
        match self {
            Self::Parsed(plan) => plan,
            Self::Malformed { plan, .. } => plan,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

pub fn parse_plan(raw: &str) -> PlanOutcome {
    let malformed = |reason: String| PlanOutcome::Malformed {
        plan: QueryPlan::conceptual(raw.trim()),
        reason,
    };

    let validation = validate_plan_value(resolve_plan_value(raw));
    if let Some(error) = validation.error {
        let reason = if validation.errors.is_empty() {
            error
        } else {
            format!("{} {}", error, validation.errors.join("; "))
        };
        return malformed(reason);
    }
    let Some(value) = validation.value else {
        return malformed("Plan response is missing".to_string());
    };

    let sql = value
        .get("sql")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|sql| !sql.is_empty())
        .map(ToString::to_string);
    let thought = value
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let visualization = value
        .get("visualization")
        .and_then(Value::as_str)
        .and_then(VisualizationMode::parse);

    PlanOutcome::Parsed(QueryPlan {
        sql,
        thought,
        visualization,
    })
}

/// Tries the whole response, then a fenced block, then the outermost braces.
pub fn resolve_plan_value(raw: &str) -> Option<Value> {
    if let Some(value) = parse_json_object(raw) {
        return Some(value);
    }
    if let Some(value) = FENCE_RE
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .find_map(|block| parse_json_object(block.as_str()))
    {
        return Some(value);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_json_object(&raw[start..=end])
}

fn parse_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(Value::is_object)
}

pub fn validate_plan_value(value: Option<Value>) -> PlanValidationResult {
    let Some(value) = value else {
        return PlanValidationResult {
            value: None,
            error: Some("Plan response is missing or invalid JSON.".to_string()),
            errors: vec![],
        };
    };

    let compiled = match jsonschema::JSONSchema::compile(&PLAN_SCHEMA) {
        Ok(compiled) => compiled,
        Err(error) => {
            return PlanValidationResult {
                value: Some(value),
                error: Some(format!("Failed to compile plan schema: {}", error)),
                errors: vec![],
            }
        }
    };

    let errors: Vec<String> = compiled
        .validate(&value)
        .err()
        .map(|errors| {
            errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{}: {}", path, error)
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if errors.is_empty() {
        PlanValidationResult {
            value: Some(value),
            error: None,
            errors,
        }
    } else {
        PlanValidationResult {
            value: Some(value),
            error: Some("Plan response did not match the expected shape.".to_string()),
            errors,
        }
    }
}
