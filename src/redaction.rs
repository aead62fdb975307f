use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// `(pattern, replacement)`. Named assignments keep their key.
static SECRET_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r#"(?i)\b(api[_-]?key|token|secret|password)\s*[:=]\s*["']?[A-Za-z0-9_\-\.]{6,}["']?"#)
                .expect("valid regex"),
            "$1=[REDACTED]",
        ),
        (
            Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9_\-\.=]{8,}").expect("valid regex"),
            "Bearer [REDACTED]",
        ),
        (Regex::new(r"\bsk-[A-Za-z0-9_\-]{20,}").expect("valid regex"), "[REDACTED_KEY]"),
        (Regex::new(r"\bAIza[0-9A-Za-z_\-]{35}").expect("valid regex"), "[REDACTED_KEY]"),
        (Regex::new(r"\bAKIA[0-9A-Z]{16}\b").expect("valid regex"), "[REDACTED_KEY]"),
        (Regex::new(r"\b[A-Fa-f0-9]{32,}\b").expect("valid regex"), "[REDACTED_HEX]"),
        (
            Regex::new(r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b").expect("valid regex"),
            "[REDACTED_EMAIL]",
        ),
    ]
});

static LONG_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9_\-]{49,}\b").expect("valid regex"));

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

/// Scrubs secret-looking tokens from text bound for the query log.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    aggressive: bool,
}

impl Redactor {
    /// `aggressive` also masks any unbroken token longer than 48 characters.
    pub fn new(aggressive: bool) -> Self {
        Self { aggressive }
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if input.is_empty() {
            return RedactionResult {
                content: String::new(),
                redaction_count: 0,
            };
        }

        let mut result = input.to_string();
        let mut redaction_count = 0usize;

        for (pattern, replacement) in SECRET_PATTERNS.iter() {
            let matches = pattern.find_iter(&result).count();
            if matches == 0 {
                continue;
            }
            redaction_count += matches;
            result = pattern.replace_all(&result, *replacement).into_owned();
        }

        if self.aggressive {
            let matches = LONG_TOKEN.find_iter(&result).count();
            if matches > 0 {
                redaction_count += matches;
                result = LONG_TOKEN
                    .replace_all(&result, "[REDACTED_LONG_TOKEN]")
                    .into_owned();
            }
        }

        RedactionResult {
            content: result,
            redaction_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Redactor;

    #[test]
    fn redacts_named_secret() {
        let redactor = Redactor::new(true);
        let result = redactor.redact("alpha by channel, api_key=abcd1234abcd1234");
        assert_eq!(result.content, "alpha by channel, api_key=[REDACTED]");
        assert_eq!(result.redaction_count, 1);
    }

    #[test]
    fn redacts_keys_emails_and_bearer_tokens() {
        let redactor = Redactor::new(false);
        let result = redactor.redact(
            "mail me at ana@example.org, key sk-abcdefghijklmnopqrstuvwx and Authorization: Bearer eyJhbGciOi.J9",
        );
        assert!(result.content.contains("[REDACTED_EMAIL]"));
        assert!(result.content.contains("[REDACTED_KEY]"));
        assert!(result.content.contains("Bearer [REDACTED]"));
        assert!(!result.content.contains("sk-abc"));
        assert_eq!(result.redaction_count, 3);
    }

    #[test]
    fn leaves_ordinary_questions_alone() {
        let redactor = Redactor::new(true);
        let question = "Which channel has the highest alpha_power for subject s01?";
        let result = redactor.redact(question);
        assert_eq!(result.content, question);
        assert_eq!(result.redaction_count, 0);
    }

    #[test]
    fn redacts_long_token_in_place() {
        let redactor = Redactor::new(true);
        let result = redactor.redact("prefix AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA  suffix");
        assert_eq!(result.content, "prefix [REDACTED_LONG_TOKEN]  suffix");
    }
}
