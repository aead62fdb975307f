mod ingest;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::errors::{AppError, AppResult};
use crate::models::{QueryResult, Row, TableDescription, TableSource};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use ingest::DecodedTable;

/// Largest integer magnitude an f64 represents exactly (2^53 - 1).
pub const MAX_EXACT_INTEGER: i64 = 9_007_199_254_740_991;

const SOURCE_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

const REQUIRED_COLUMNS: [(&str, &[&str]); 2] = [
    ("features", &["subject", "channel"]),
    ("subjects", &["subject"]),
];

static TABLE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid table name regex"));

/// In-process analytical engine holding the two static feature tables.
///
/// The connection is written once during [`TabularStore::load`] and is read-only
/// (`PRAGMA query_only`) for the rest of the session.
#[derive(Debug)]
pub struct TabularStore {
    conn: Arc<Mutex<Option<Connection>>>,
    row_limit: usize,
}

impl TabularStore {
    pub async fn load(tables: &[TableSource], row_limit: usize) -> AppResult<Self> {
        Self::load_with_fetch_timeout(tables, row_limit, SOURCE_FETCH_TIMEOUT).await
    }

    pub(crate) async fn load_with_fetch_timeout(
        tables: &[TableSource],
        row_limit: usize,
        fetch_timeout: Duration,
    ) -> AppResult<Self> {
        for (required, _) in REQUIRED_COLUMNS {
            if !tables.iter().any(|table| table.name == required) {
                return Err(AppError::Bootstrap(format!(
                    "Required table '{}' has no source",
                    required
                )));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .user_agent(concat!("eeg-insight/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| AppError::Bootstrap(format!("Failed to build HTTP client: {}", error)))?;
        let mut decoded = Vec::with_capacity(tables.len());
        for table in tables {
            if !TABLE_NAME_RE.is_match(&table.name) {
                return Err(AppError::Bootstrap(format!(
                    "Invalid table name '{}'",
                    table.name
                )));
            }
            let started = std::time::Instant::now();
            let batch_set = fetch_and_decode(&client, &table.uri).await.map_err(|error| {
                AppError::Bootstrap(format!("Failed to load table '{}' from {}: {}", table.name, table.uri, error))
            })?;
            tracing::info!(
                table = %table.name,
                uri = %table.uri,
                rows = batch_set.row_count(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "decoded parquet source"
            );
            decoded.push((table.name.clone(), batch_set));
        }

        let conn = tokio::task::spawn_blocking(move || materialize(decoded))
            .await
            .map_err(|error| AppError::Bootstrap(error.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            row_limit: row_limit.max(1),
        })
    }

    /// Runs one statement on the engine's worker thread. Engine errors are returned
    /// with the engine's message untouched.
    pub async fn execute(&self, sql: &str) -> AppResult<QueryResult> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let row_limit = self.row_limit;
        tokio::task::spawn_blocking(move || run_query(&conn, &sql, row_limit)).await?
    }

    pub fn describe(&self) -> AppResult<Vec<TableDescription>> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| AppError::Internal("engine mutex poisoned".to_string()))?;
        let Some(conn) = guard.as_ref() else {
            return Err(AppError::Query("Engine connection is closed".to_string()));
        };

        let mut names_stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = names_stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let quoted = quote_ident(&name);
            let mut info = conn.prepare(&format!("PRAGMA table_info({})", quoted))?;
            let columns = info
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>, _>>()?;
            let row_count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", quoted), [], |row| row.get(0))?;
            tables.push(TableDescription {
                name,
                columns,
                row_count: row_count.max(0) as u64,
            });
        }
        Ok(tables)
    }

    pub fn is_open(&self) -> bool {
        self.conn
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Releases the engine. Safe to call more than once.
    pub fn close(&self) {
        let taken = match self.conn.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(conn) = taken {
            if let Err((_, error)) = conn.close() {
                tracing::warn!(error = %error, "engine connection did not close cleanly");
            } else {
                tracing::debug!("engine connection closed");
            }
        }
    }
}

impl Drop for TabularStore {
    fn drop(&mut self) {
        self.close();
    }
}

async fn fetch_and_decode(client: &reqwest::Client, uri: &str) -> AppResult<DecodedTable> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        let response = client
            .get(uri)
            .send()
            .await
            .map_err(|error| AppError::Bootstrap(error.to_string()))?
            .error_for_status()
            .map_err(|error| AppError::Bootstrap(error.to_string()))?;
        let payload = response
            .bytes()
            .await
            .map_err(|error| AppError::Bootstrap(error.to_string()))?;
        tokio::task::spawn_blocking(move || ingest::decode_parquet(payload))
            .await
            .map_err(|error| AppError::Bootstrap(error.to_string()))?
    } else {
        let path = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&path)
                .map_err(|error| AppError::Bootstrap(format!("{}: {}", path.display(), error)))?;
            ingest::decode_parquet(file)
        })
        .await
        .map_err(|error| AppError::Bootstrap(error.to_string()))?
    }
}

fn materialize(tables: Vec<(String, DecodedTable)>) -> AppResult<Connection> {
    let mut conn = Connection::open_in_memory().map_err(|error| AppError::Bootstrap(error.to_string()))?;

    for (name, table) in tables {
        if let Some((_, required)) = REQUIRED_COLUMNS.iter().find(|(table_name, _)| *table_name == name) {
            for column in required.iter() {
                if !table.has_column(column) {
                    return Err(AppError::Bootstrap(format!(
                        "Table '{}' is missing required column '{}'",
                        name, column
                    )));
                }
            }
        }
        ingest::create_and_fill(&mut conn, &name, &table)
            .map_err(|error| AppError::Bootstrap(format!("Failed to materialize '{}': {}", name, error)))?;
    }

    conn.execute_batch("PRAGMA query_only = ON;")
        .map_err(|error| AppError::Bootstrap(error.to_string()))?;
    Ok(conn)
}

fn run_query(conn: &Mutex<Option<Connection>>, sql: &str, row_limit: usize) -> AppResult<QueryResult> {
    let guard = conn
        .lock()
        .map_err(|_| AppError::Internal("engine mutex poisoned".to_string()))?;
    let Some(conn) = guard.as_ref() else {
        return Err(AppError::Query("Engine connection is closed".to_string()));
    };

    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(AppError::Policy("Only read-only statements can be executed".to_string()));
    }
    let columns = stmt
        .column_names()
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    let mut rows = stmt.query([])?;
    let mut collected = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if collected.len() >= row_limit {
            truncated = true;
            break;
        }
        let mut record = Row::new();
        for (index, column) in columns.iter().enumerate() {
            record.insert(column.clone(), json_value(row.get_ref(index)?));
        }
        collected.push(record);
    }

    Ok(QueryResult {
        columns,
        rows: collected,
        truncated,
    })
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(value) => narrow_integer(value),
        ValueRef::Real(value) => serde_json::Number::from_f64(value)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(
            bytes.iter().map(|byte| format!("{:02x}", byte)).collect(),
        ),
    }
}

/// Integers become floats only when the conversion is exact; anything wider
/// stays as decimal text.
pub fn narrow_integer(value: i64) -> serde_json::Value {
    if (-MAX_EXACT_INTEGER..=MAX_EXACT_INTEGER).contains(&value) {
        serde_json::Value::from(value as f64)
    } else {
        serde_json::Value::String(value.to_string())
    }
}
