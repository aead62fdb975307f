use crate::completion::{self, CompletionService};
use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::query_log::{self, QueryLogger, RequestMeta};
use crate::store::TabularStore;
use std::sync::Arc;
use std::time::Duration;

const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// One analysis session: a loaded engine plus the orchestrator that talks to it.
///
/// The engine is released on [`Session::close`] or when the session is dropped,
/// whichever comes first.
pub struct Session {
    id: String,
    store: Arc<TabularStore>,
    orchestrator: Orchestrator,
    logger: Arc<dyn QueryLogger>,
}

impl Session {
    /// Builds the completion client and log sink from `config`, then bootstraps.
    pub async fn open(config: &AppConfig) -> AppResult<Self> {
        let completion = completion::build_completion(&config.completion)?;
        let logger = query_log::build_logger(&config.query_log)?;
        Self::bootstrap(config, completion, logger).await
    }

    pub async fn bootstrap(
        config: &AppConfig,
        completion: Arc<dyn CompletionService>,
        logger: Arc<dyn QueryLogger>,
    ) -> AppResult<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let started = std::time::Instant::now();
        let store = Arc::new(TabularStore::load(&config.tables, config.query.row_limit).await?);
        tracing::info!(
            session_id = %id,
            provider = completion.provider().as_str(),
            tables = config.tables.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "session ready"
        );

        let orchestrator = Orchestrator::new(
            store.clone(),
            completion,
            logger.clone(),
            OrchestratorSettings {
                narration_sample_rows: config.query.narration_sample_rows,
                request_meta: RequestMeta::local(),
            },
        );
        Ok(Self {
            id,
            store,
            orchestrator,
            logger,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn store(&self) -> &Arc<TabularStore> {
        &self.store
    }

    pub fn is_open(&self) -> bool {
        self.store.is_open()
    }

    /// Lets pending query-log writes finish, then releases the engine.
    pub async fn shutdown(&self) {
        self.logger.flush(LOG_DRAIN_TIMEOUT).await;
        self.close();
    }

    pub fn close(&self) {
        if self.store.is_open() {
            tracing::info!(session_id = %self.id, "closing session");
        }
        self.store.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
