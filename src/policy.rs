use crate::errors::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

const MAX_STATEMENT_CHARS: usize = 20_000;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("valid word regex"));

/// Read-only gate in front of the engine: one `SELECT`/`WITH` statement, no
/// data-definition or data-modification keywords, no engine catalog access.
#[derive(Debug, Clone)]
pub struct QueryPolicy {
    leading_keywords: BTreeSet<String>,
    forbidden_keywords: BTreeSet<String>,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPolicy {
    pub fn new() -> Self {
        let leading_keywords = ["SELECT", "WITH"]
            .into_iter()
            .map(ToString::to_string)
            .collect();

        let forbidden_keywords = [
            "INSERT",
            "UPDATE",
            "DELETE",
            "UPSERT",
            "MERGE",
            "CREATE",
            "DROP",
            "ALTER",
            "TRUNCATE",
            "ATTACH",
            "DETACH",
            "PRAGMA",
            "VACUUM",
            "REINDEX",
            "ANALYZE",
            "GRANT",
            "REVOKE",
            "COPY",
            "INSTALL",
            "LOAD",
            "EXPORT",
            "IMPORT",
            "SAVEPOINT",
            "RELEASE",
            "ROLLBACK",
            "COMMIT",
            "BEGIN",
        ]
        .into_iter()
        .map(ToString::to_string)
        .collect();

        Self {
            leading_keywords,
            forbidden_keywords,
        }
    }

    /// Returns the statement as written, minus surrounding whitespace, trailing
    /// comments and one trailing `;`.
    pub fn validate(&self, sql: &str) -> AppResult<String> {
        if sql.len() > MAX_STATEMENT_CHARS {
            return Err(AppError::Policy(format!(
                "Statement exceeds {} characters",
                MAX_STATEMENT_CHARS
            )));
        }

        let scan = scan_statement(sql)?;
        let mut skeleton = scan.skeleton.trim_end();
        if let Some(stripped) = skeleton.strip_suffix(';') {
            skeleton = stripped;
        }
        if skeleton.trim().is_empty() {
            return Err(AppError::Policy("Statement is empty".to_string()));
        }
        if skeleton.contains(';') {
            return Err(AppError::Policy(
                "Only a single statement can be executed".to_string(),
            ));
        }

        let mut statement = sql[..scan.significant_end].trim();
        if let Some(stripped) = statement.strip_suffix(';') {
            statement = stripped.trim_end();
        }

        let mut words = WORD_RE.find_iter(skeleton).map(|word| word.as_str().to_ascii_uppercase());
        let leading = words.next().unwrap_or_default();
        if !self.leading_keywords.contains(&leading) {
            return Err(AppError::Policy(format!(
                "Only SELECT queries are allowed (statement starts with '{}')",
                leading
            )));
        }

        for word in words {
            if self.forbidden_keywords.contains(&word) {
                return Err(AppError::Policy(format!(
                    "Keyword '{}' is not allowed in read-only queries",
                    word
                )));
            }
            if word.starts_with("SQLITE_") {
                return Err(AppError::Policy(
                    "Engine catalog tables are not queryable".to_string(),
                ));
            }
        }

        Ok(statement.to_string())
    }
}

struct ScannedStatement {
    /// Comments blanked, string literals collapsed to `''`.
    skeleton: String,
    /// Byte offset just past the last character outside a comment.
    significant_end: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    Literal,
    Identifier,
    LineComment,
    BlockComment,
}

/// One left-to-right pass; comment markers inside quotes are plain text and
/// quotes inside comments are ignored.
fn scan_statement(sql: &str) -> AppResult<ScannedStatement> {
    let mut skeleton = String::with_capacity(sql.len());
    let mut significant_end = 0;
    let mut state = ScanState::Code;
    let mut chars = sql.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        let next = chars.peek().map(|(_, next)| *next);
        match state {
            ScanState::Code => match (ch, next) {
                ('-', Some('-')) => {
                    chars.next();
                    state = ScanState::LineComment;
                    skeleton.push(' ');
                }
                ('/', Some('*')) => {
                    chars.next();
                    state = ScanState::BlockComment;
                    skeleton.push(' ');
                }
                ('\'', _) => {
                    state = ScanState::Literal;
                    skeleton.push_str("''");
                    significant_end = index + 1;
                }
                ('"', _) => {
                    state = ScanState::Identifier;
                    skeleton.push(' ');
                    significant_end = index + 1;
                }
                _ => {
                    skeleton.push(ch);
                    if !ch.is_whitespace() {
                        significant_end = index + ch.len_utf8();
                    }
                }
            },
            ScanState::Literal => {
                significant_end = index + ch.len_utf8();
                if ch == '\'' {
                    if next == Some('\'') {
                        chars.next();
                        significant_end += 1;
                    } else {
                        state = ScanState::Code;
                    }
                }
            }
            ScanState::Identifier => {
                significant_end = index + ch.len_utf8();
                if ch == '"' {
                    if next == Some('"') {
                        chars.next();
                        significant_end += 1;
                        skeleton.push('"');
                    } else {
                        state = ScanState::Code;
                        skeleton.push(' ');
                    }
                } else {
                    skeleton.push(ch);
                }
            }
            ScanState::LineComment => {
                if ch == '\n' {
                    state = ScanState::Code;
                    skeleton.push('\n');
                }
            }
            ScanState::BlockComment => {
                if ch == '*' && next == Some('/') {
                    chars.next();
                    state = ScanState::Code;
                }
            }
        }
    }

    match state {
        ScanState::Literal | ScanState::Identifier => Err(AppError::Policy(
            "Statement has an unterminated quote".to_string(),
        )),
        _ => Ok(ScannedStatement {
            skeleton,
            significant_end,
        }),
    }
}
