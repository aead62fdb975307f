//! Per-turn agent flow: plan, execute, narrate.
//!
//! One turn runs at a time. The conversation and view locks are never held
//! across an await point.

use crate::agent::{self, PlanOutcome};
use crate::cluster::{self, ClusterSummary, Viewport};
use crate::completion::{CompletionRequest, CompletionService};
use crate::conversation::{assistant_turn, new_turn, Conversation};
use crate::errors::{AppError, AppResult};
use crate::models::{ConversationTurn, QueryResult, Role, TurnPhase, ViewState, VisualizationMode};
use crate::policy::QueryPolicy;
use crate::query_log::{LogStage, QueryLogEntry, QueryLogger, RequestMeta};
use crate::redaction::Redactor;
use crate::render::{self, RenderedView, CLUSTER_CANVAS};
use crate::resolver::{self, ChannelMap};
use crate::store::TabularStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub narration_sample_rows: usize,
    pub request_meta: RequestMeta,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            narration_sample_rows: 20,
            request_meta: RequestMeta::local(),
        }
    }
}

/// Everything a caller needs to display one finished turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub user_turn: ConversationTurn,
    pub turn: ConversationTurn,
    /// Phases visited, ending in `Idle`.
    pub phases: Vec<TurnPhase>,
    pub plan_malformed: bool,
    pub channel_map: ChannelMap,
    pub clusters: Vec<ClusterSummary>,
    pub view: ViewState,
}

struct FlightGuard {
    in_flight: Arc<AtomicBool>,
    phase: Arc<Mutex<TurnPhase>>,
}

impl FlightGuard {
    fn acquire(in_flight: &Arc<AtomicBool>, phase: &Arc<Mutex<TurnPhase>>) -> AppResult<Self> {
        if in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AppError::Busy(
                "A question is still being answered; wait for it to finish".to_string(),
            ));
        }
        Ok(Self {
            in_flight: in_flight.clone(),
            phase: phase.clone(),
        })
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        match self.phase.lock() {
            Ok(mut phase) => *phase = TurnPhase::Idle,
            Err(poisoned) => *poisoned.into_inner() = TurnPhase::Idle,
        }
        self.in_flight.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<TabularStore>,
    completion: Arc<dyn CompletionService>,
    logger: Arc<dyn QueryLogger>,
    policy: QueryPolicy,
    redactor: Redactor,
    conversation: Arc<Mutex<Conversation>>,
    view: Arc<Mutex<ViewState>>,
    /// Cluster scatter camera; `None` until the first pan, zoom or pick.
    viewport: Arc<Mutex<Option<Viewport>>>,
    phase: Arc<Mutex<TurnPhase>>,
    in_flight: Arc<AtomicBool>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<TabularStore>,
        completion: Arc<dyn CompletionService>,
        logger: Arc<dyn QueryLogger>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            completion,
            logger,
            policy: QueryPolicy::new(),
            redactor: Redactor::new(true),
            conversation: Arc::new(Mutex::new(Conversation::new())),
            view: Arc::new(Mutex::new(ViewState::default())),
            viewport: Arc::new(Mutex::new(None)),
            phase: Arc::new(Mutex::new(TurnPhase::Idle)),
            in_flight: Arc::new(AtomicBool::new(false)),
            settings: OrchestratorSettings {
                narration_sample_rows: settings.narration_sample_rows.max(1),
                ..settings
            },
        }
    }

    pub fn store(&self) -> &Arc<TabularStore> {
        &self.store
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(TurnPhase::Idle)
    }

    pub fn history(&self) -> AppResult<Vec<ConversationTurn>> {
        Ok(self.conversation()?.turns().to_vec())
    }

    pub fn latest_result(&self) -> AppResult<Option<QueryResult>> {
        Ok(self
            .conversation()?
            .latest_result()
            .and_then(|turn| turn.result.clone()))
    }

    pub fn view(&self) -> AppResult<ViewState> {
        Ok(self.view_state()?.clone())
    }

    pub fn set_mode(&self, mode: VisualizationMode) -> AppResult<ViewState> {
        let mut view = self.view_state()?;
        view.mode = mode;
        Ok(view.clone())
    }

    /// Pins spatial views to one row of the latest result.
    pub fn select_row(&self, index: usize) -> AppResult<ViewState> {
        let rows = self
            .latest_result()?
            .map(|result| result.rows.len())
            .ok_or_else(|| AppError::Invalid("There is no result to select from".to_string()))?;
        if index >= rows {
            return Err(AppError::Invalid(format!(
                "Row {} is out of range (result has {} rows)",
                index, rows
            )));
        }
        let mut view = self.view_state()?;
        view.selected_row = Some(index);
        Ok(view.clone())
    }

    pub fn clear_selection(&self) -> AppResult<ViewState> {
        let mut view = self.view_state()?;
        view.selected_row = None;
        Ok(view.clone())
    }

    /// Channel map for the latest result under the current selection.
    pub fn channel_map(&self) -> AppResult<ChannelMap> {
        let selected = self.view_state()?.selected_row;
        Ok(self
            .latest_result()?
            .map(|result| resolver::resolve_for_view(&result.rows, selected))
            .unwrap_or_default())
    }

    /// Current cluster camera, fitted to the latest result when none is held.
    pub fn cluster_viewport(&self) -> AppResult<Option<Viewport>> {
        let points = match self.latest_result()? {
            Some(result) => cluster::project(&result.rows),
            None => return Ok(None),
        };
        if points.is_empty() {
            return Ok(None);
        }
        let mut held = self.viewport_state()?;
        let viewport = held.get_or_insert_with(|| Viewport::fit(&points, CLUSTER_CANVAS.0, CLUSTER_CANVAS.1));
        Ok(Some(*viewport))
    }

    pub fn pan_view(&self, dx: f64, dy: f64) -> AppResult<Viewport> {
        self.update_viewport(|viewport| viewport.pan(dx, dy))
    }

    pub fn zoom_view(&self, factor: f64, anchor_px: f64, anchor_py: f64) -> AppResult<Viewport> {
        self.update_viewport(|viewport| viewport.zoom_at(factor, anchor_px, anchor_py))
    }

    /// Selects the cluster point nearest a pixel position. A miss leaves the
    /// selection untouched and returns `None`.
    pub fn select_point(&self, px: f64, py: f64, radius_px: f64) -> AppResult<Option<ViewState>> {
        let Some(viewport) = self.cluster_viewport()? else {
            return Err(AppError::Invalid("The latest result has no cluster points".to_string()));
        };
        let points = self
            .latest_result()?
            .map(|result| cluster::project(&result.rows))
            .unwrap_or_default();
        match viewport.pick(&points, px, py, radius_px) {
            Some(row) => self.select_row(row).map(Some),
            None => Ok(None),
        }
    }

    /// Renders the latest result under the current view and cluster camera.
    pub fn render(&self, table_rows: usize) -> AppResult<Option<RenderedView>> {
        let Some(result) = self.latest_result()? else {
            return Ok(None);
        };
        let view = self.view()?;
        let viewport = self.cluster_viewport()?;
        render::render_view(&result, &view, table_rows, viewport.as_ref()).map(Some)
    }

    pub async fn submit(&self, question: &str) -> AppResult<TurnReport> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Invalid("Question cannot be empty".to_string()));
        }
        let _flight = FlightGuard::acquire(&self.in_flight, &self.phase)?;
        let started = Instant::now();

        let user_turn = self.append(new_turn(Role::User, question))?;
        let mut phases = Vec::new();
        self.enter(&mut phases, TurnPhase::Planning);

        let raw_plan = match self.complete_logged(question, LogStage::Plan, &agent::plan_request(question)).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(turn_id = %user_turn.id, error = %error, "planning call failed");
                self.enter(&mut phases, TurnPhase::Error);
                let turn = self.append(new_turn(
                    Role::System,
                    format!("Could not plan a query for this question: {}", error),
                ))?;
                return self.finish(user_turn, turn, phases, false);
            }
        };

        let outcome = agent::parse_plan(&raw_plan);
        let plan_malformed = outcome.is_malformed();
        if let PlanOutcome::Malformed { reason, .. } = &outcome {
            tracing::warn!(turn_id = %user_turn.id, reason = %reason, "plan response malformed; answering without a query");
        }
        let plan = outcome.into_plan();

        let Some(sql) = plan.sql.clone() else {
            self.enter(&mut phases, TurnPhase::NoQueryNeeded);
            let turn = self.append(assistant_turn(plan.thought, None, None, None))?;
            self.enter(&mut phases, TurnPhase::Done);
            return self.finish(user_turn, turn, phases, plan_malformed);
        };

        self.enter(&mut phases, TurnPhase::Executing);
        let execution = match self.policy.validate(&sql) {
            Ok(statement) => self.store.execute(&statement).await,
            Err(error) => Err(error),
        };

        let result = match execution {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(turn_id = %user_turn.id, error = %error, "generated query failed");
                let content = if plan.thought.is_empty() {
                    error.to_string()
                } else {
                    format!("{}\n\n{}", plan.thought, error)
                };
                let turn = self.append(assistant_turn(content, Some(sql), None, plan.visualization))?;
                self.enter(&mut phases, TurnPhase::Done);
                return self.finish(user_turn, turn, phases, plan_malformed);
            }
        };
        tracing::info!(
            turn_id = %user_turn.id,
            rows = result.rows.len(),
            truncated = result.truncated,
            "query executed"
        );

        let narrative = if result.is_empty() {
            None
        } else {
            self.enter(&mut phases, TurnPhase::Narrating);
            let request = agent::narration_request(question, &result, self.settings.narration_sample_rows);
            match self.complete_logged(question, LogStage::Narrate, &request).await {
                Ok(text) => Some(text.trim().to_string()),
                Err(error) => {
                    tracing::warn!(turn_id = %user_turn.id, error = %error, "narration failed; keeping tabular result");
                    None
                }
            }
        };

        let mut turn = assistant_turn(plan.thought, Some(sql), Some(result), plan.visualization);
        turn.narrative = narrative;
        let turn = self.append(turn)?;
        self.enter(&mut phases, TurnPhase::Done);
        tracing::info!(
            turn_id = %user_turn.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn completed"
        );
        self.finish(user_turn, turn, phases, plan_malformed)
    }

    /// Resets the selection; turns without a result keep the current mode.
    fn finish(
        &self,
        user_turn: ConversationTurn,
        turn: ConversationTurn,
        mut phases: Vec<TurnPhase>,
        plan_malformed: bool,
    ) -> AppResult<TurnReport> {
        let (channel_map, clusters) = match &turn.result {
            Some(result) => (resolver::resolve(&result.rows), cluster::summarize(&result.rows)),
            None => (ChannelMap::default(), Vec::new()),
        };

        let view = {
            let mut view = self.view_state()?;
            view.selected_row = None;
            if let Some(result) = &turn.result {
                view.mode = match turn.visualization {
                    Some(mode) => mode,
                    None => render::choose_view(result, &channel_map),
                };
            }
            view.clone()
        };

        *self.viewport_state()? = None;
        phases.push(TurnPhase::Idle);
        Ok(TurnReport {
            user_turn,
            turn,
            phases,
            plan_malformed,
            channel_map,
            clusters,
            view,
        })
    }

    async fn complete_logged(&self, question: &str, stage: LogStage, request: &CompletionRequest) -> AppResult<String> {
        let started = Instant::now();
        let outcome = self.completion.complete(request).await;
        tracing::debug!(
            stage = stage.as_str(),
            provider = self.completion.provider().as_str(),
            ok = outcome.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion call finished"
        );

        let logged = match &outcome {
            Ok(text) => Ok(self.redactor.redact(text).content),
            Err(error) => Err(self.redactor.redact(&error.to_string()).content),
        };
        self.logger.record(QueryLogEntry::new(
            self.redactor.redact(question).content,
            stage,
            logged,
            self.settings.request_meta.clone(),
        ));
        outcome
    }

    fn enter(&self, phases: &mut Vec<TurnPhase>, next: TurnPhase) {
        phases.push(next);
        match self.phase.lock() {
            Ok(mut phase) => *phase = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    fn append(&self, turn: ConversationTurn) -> AppResult<ConversationTurn> {
        Ok(self.conversation()?.push(turn).clone())
    }

    fn conversation(&self) -> AppResult<MutexGuard<'_, Conversation>> {
        self.conversation
            .lock()
            .map_err(|_| AppError::Internal("conversation mutex poisoned".to_string()))
    }

    fn update_viewport(&self, change: impl FnOnce(&mut Viewport)) -> AppResult<Viewport> {
        if self.cluster_viewport()?.is_none() {
            return Err(AppError::Invalid("The latest result has no cluster points".to_string()));
        }
        let mut held = self.viewport_state()?;
        match held.as_mut() {
            Some(viewport) => {
                change(viewport);
                Ok(*viewport)
            }
            None => Err(AppError::Internal("cluster viewport missing".to_string())),
        }
    }

    fn viewport_state(&self) -> AppResult<MutexGuard<'_, Option<Viewport>>> {
        self.viewport
            .lock()
            .map_err(|_| AppError::Internal("viewport mutex poisoned".to_string()))
    }

    fn view_state(&self) -> AppResult<MutexGuard<'_, ViewState>> {
        self.view
            .lock()
            .map_err(|_| AppError::Internal("view state mutex poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Orchestrator, OrchestratorSettings};
    use crate::cluster;
    use crate::completion::{CompletionFuture, CompletionRequest, CompletionService, ResponseFormat};
    use crate::errors::AppError;
    use crate::models::{Provider, Role, TurnPhase, VisualizationMode};
    use crate::query_log::{LogStage, QueryLogEntry, QueryLogger};
    use crate::store::{fixtures, TabularStore};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct ScriptedCompletion {
        responses: Mutex<VecDeque<Result<String, String>>>,
        requests: Mutex<Vec<CompletionRequest>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedCompletion {
        fn new(responses: Vec<Result<&str, &str>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|response| response.map(ToString::to_string).map_err(ToString::to_string))
                        .collect(),
                ),
                ..Self::default()
            }
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().expect("requests").clone()
        }
    }

    impl CompletionService for ScriptedCompletion {
        fn provider(&self) -> Provider {
            Provider::Gemini
        }

        fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
            Box::pin(async move {
                self.requests.lock().expect("requests").push(request.clone());
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                let next = self
                    .responses
                    .lock()
                    .expect("responses")
                    .pop_front()
                    .unwrap_or_else(|| Err("script exhausted".to_string()));
                next.map_err(AppError::Completion)
            })
        }
    }

    #[derive(Default)]
    struct RecordingLogger {
        entries: Mutex<Vec<QueryLogEntry>>,
    }

    impl QueryLogger for RecordingLogger {
        fn record(&self, entry: QueryLogEntry) {
            self.entries.lock().expect("entries").push(entry);
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        completion: Arc<ScriptedCompletion>,
        logger: Arc<RecordingLogger>,
        _dir: tempfile::TempDir,
    }

    async fn harness(completion: ScriptedCompletion) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let sources = fixtures::write_fixture_tables(dir.path());
        let store = TabularStore::load(&sources, 1_000).await.expect("store");
        let completion = Arc::new(completion);
        let logger = Arc::new(RecordingLogger::default());
        let orchestrator = Orchestrator::new(
            Arc::new(store),
            completion.clone(),
            logger.clone(),
            OrchestratorSettings::default(),
        );
        Harness {
            orchestrator,
            completion,
            logger,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn conceptual_plans_skip_execution_and_narration() {
        let h = harness(ScriptedCompletion::new(vec![Ok(r#"{"sql": null, "thought": "conceptual"}"#)])).await;
        let report = h.orchestrator.submit("What is alpha power?").await.expect("turn");

        assert_eq!(report.turn.role, Role::Assistant);
        assert_eq!(report.turn.content, "conceptual");
        assert_eq!(report.turn.sql, None);
        assert_eq!(report.turn.result, None);
        assert_eq!(
            report.phases,
            vec![TurnPhase::Planning, TurnPhase::NoQueryNeeded, TurnPhase::Done, TurnPhase::Idle]
        );
        assert_eq!(h.completion.requests().len(), 1);
        assert_eq!(h.orchestrator.history().expect("history").len(), 2);
    }

    #[tokio::test]
    async fn execution_errors_are_appended_to_the_thought() {
        let h = harness(ScriptedCompletion::new(vec![Ok(
            r#"{"sql": "SELECT FROM features", "thought": "Average alpha by channel."}"#,
        )]))
        .await;
        let report = h.orchestrator.submit("alpha by channel").await.expect("turn");

        assert!(
            report.turn.content.starts_with("Average alpha by channel.\n\n"),
            "{}",
            report.turn.content
        );
        assert!(report.turn.content.contains("syntax error"), "{}", report.turn.content);
        assert_eq!(report.turn.sql.as_deref(), Some("SELECT FROM features"));
        assert_eq!(report.turn.narrative, None);
        assert!(!report.phases.contains(&TurnPhase::Narrating));
        assert_eq!(h.completion.requests().len(), 1);
    }

    #[tokio::test]
    async fn rejected_statements_never_reach_the_engine() {
        let h = harness(ScriptedCompletion::new(vec![Ok(
            r#"{"sql": "DROP TABLE features", "thought": "Cleaning up."}"#,
        )]))
        .await;
        let report = h.orchestrator.submit("drop it").await.expect("turn");
        assert!(report.turn.content.contains("QUERY_REJECTED"));
        let still_there = h
            .orchestrator
            .store()
            .execute("SELECT COUNT(*) AS n FROM features")
            .await
            .expect("count");
        assert_eq!(still_there.rows[0]["n"], serde_json::json!(fixtures::FEATURE_ROW_COUNT as f64));
    }

    #[tokio::test]
    async fn successful_turns_are_narrated_and_visualized() {
        let h = harness(ScriptedCompletion::new(vec![
            Ok("```json\n{\"sql\": \"SELECT channel, AVG(alpha_power) AS avg_alpha FROM features GROUP BY channel\", \"thought\": \"Average alpha per channel.\"}\n```"),
            Ok("Alpha is strongest over Pz."),
        ]))
        .await;
        let report = h.orchestrator.submit("Where is alpha strongest?").await.expect("turn");

        let result = report.turn.result.as_ref().expect("result");
        assert_eq!(result.rows.len(), 19);
        assert_eq!(report.turn.narrative.as_deref(), Some("Alpha is strongest over Pz."));
        assert_eq!(report.channel_map.len(), 19);
        assert_eq!(report.view.mode, VisualizationMode::Topomap);
        assert_eq!(
            report.phases,
            vec![
                TurnPhase::Planning,
                TurnPhase::Executing,
                TurnPhase::Narrating,
                TurnPhase::Done,
                TurnPhase::Idle
            ]
        );

        let requests = h.completion.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].format, ResponseFormat::Text);
        assert!(requests[1].user_content.contains("Where is alpha strongest?"));

        let entries = h.logger.entries.lock().expect("entries");
        let stages = entries.iter().map(|entry| entry.stage).collect::<Vec<_>>();
        assert_eq!(stages, vec![LogStage::Plan, LogStage::Narrate]);
    }

    #[tokio::test]
    async fn empty_results_skip_narration() {
        let h = harness(ScriptedCompletion::new(vec![Ok(
            r#"{"sql": "SELECT * FROM features WHERE channel = 'Oz'", "thought": "Oz is not in the montage."}"#,
        )]))
        .await;
        let report = h.orchestrator.submit("alpha at Oz").await.expect("turn");
        assert!(report.turn.result.as_ref().expect("result").is_empty());
        assert_eq!(report.turn.narrative, None);
        assert_eq!(h.completion.requests().len(), 1);
        assert_eq!(report.view.mode, VisualizationMode::Table);
    }

    #[tokio::test]
    async fn narration_failure_keeps_the_result() {
        let h = harness(ScriptedCompletion::new(vec![
            Ok(r#"{"sql": "SELECT subject, avg_alpha FROM subjects", "thought": "Per subject."}"#),
            Err("deadline exceeded"),
        ]))
        .await;
        let report = h.orchestrator.submit("alpha per subject").await.expect("turn");
        assert_eq!(report.turn.result.as_ref().expect("result").rows.len(), 2);
        assert_eq!(report.turn.narrative, None);
        assert_eq!(report.phases.last(), Some(&TurnPhase::Idle));

        let entries = h.logger.entries.lock().expect("entries");
        assert!(entries[1].error.as_deref().unwrap_or_default().contains("deadline exceeded"));
    }

    #[tokio::test]
    async fn planning_failure_appends_a_system_turn() {
        let h = harness(ScriptedCompletion::new(vec![Err("connection refused")])).await;
        let report = h.orchestrator.submit("anything").await.expect("turn");
        assert_eq!(report.turn.role, Role::System);
        assert!(report.turn.content.contains("connection refused"));
        assert_eq!(report.phases, vec![TurnPhase::Planning, TurnPhase::Error, TurnPhase::Idle]);
        assert_eq!(h.orchestrator.phase(), TurnPhase::Idle);
        assert!(!h.orchestrator.is_busy());
    }

    #[tokio::test]
    async fn malformed_plans_surface_the_raw_text() {
        let h = harness(ScriptedCompletion::new(vec![Ok("Sorry, I can only talk about EEG.")])).await;
        let report = h.orchestrator.submit("tell me a joke").await.expect("turn");
        assert!(report.plan_malformed);
        assert_eq!(report.turn.content, "Sorry, I can only talk about EEG.");
        assert_eq!(report.turn.sql, None);
        assert!(report.phases.contains(&TurnPhase::NoQueryNeeded));
    }

    #[tokio::test]
    async fn turns_are_appended_in_submission_order() {
        let h = harness(ScriptedCompletion::new(vec![
            Ok(r#"{"sql": null, "thought": "one"}"#),
            Err("down"),
            Ok(r#"{"sql": null, "thought": "three"}"#),
        ]))
        .await;
        for question in ["q1", "q2", "q3"] {
            h.orchestrator.submit(question).await.expect("turn");
        }
        let history = h.orchestrator.history().expect("history");
        let users = history
            .iter()
            .filter(|turn| turn.role == Role::User)
            .map(|turn| turn.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(users, vec!["q1", "q2", "q3"]);
        assert_eq!(history[0].content, "q1");
        assert_eq!(history[1].content, "one");
        assert_eq!(history[3].role, Role::System);
        assert_eq!(history[5].content, "three");
    }

    #[tokio::test]
    async fn submissions_while_in_flight_are_rejected() {
        let gate = Arc::new(Notify::new());
        let completion = ScriptedCompletion {
            gate: Some(gate.clone()),
            ..ScriptedCompletion::new(vec![Ok(r#"{"sql": null, "thought": "done"}"#)])
        };
        let h = harness(completion).await;

        let running = h.orchestrator.clone();
        let first = tokio::spawn(async move { running.submit("first").await });
        while h.completion.requests().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(h.orchestrator.is_busy());
        assert_eq!(h.orchestrator.phase(), TurnPhase::Planning);
        let error = h.orchestrator.submit("second").await.expect_err("busy");
        assert!(matches!(error, AppError::Busy(_)));

        gate.notify_one();
        first.await.expect("join").expect("first turn");
        assert!(!h.orchestrator.is_busy());
        assert_eq!(h.orchestrator.history().expect("history").len(), 2);
        assert!(matches!(h.orchestrator.submit("  ").await, Err(AppError::Invalid(_))));
    }

    #[tokio::test]
    async fn selection_is_validated_and_reset_by_new_turns() {
        let h = harness(ScriptedCompletion::new(vec![
            Ok(r#"{"sql": "SELECT channel, pca_x, pca_y, cluster_id, alpha_power, beta_power FROM features WHERE subject = 's00' AND window_idx = 0", "thought": "Window 0."}"#),
            Ok("Three clusters."),
            Ok(r#"{"sql": null, "thought": "bye"}"#),
        ]))
        .await;
        let report = h.orchestrator.submit("clusters for window 0").await.expect("turn");
        assert_eq!(report.view.mode, VisualizationMode::Cluster);
        assert!(!report.clusters.is_empty());

        assert!(h.orchestrator.select_row(500).is_err());
        let view = h.orchestrator.select_row(3).expect("select");
        assert_eq!(view.selected_row, Some(3));
        let pinned = h.orchestrator.channel_map().expect("map");
        assert_eq!(pinned.len(), 1);

        h.orchestrator.set_mode(VisualizationMode::Scalp3d).expect("mode");
        h.orchestrator.submit("bye").await.expect("turn");
        let view = h.orchestrator.view().expect("view");
        assert_eq!(view.selected_row, None);
    }

    #[tokio::test]
    async fn picking_a_cluster_point_pins_the_channel_map() {
        let h = harness(ScriptedCompletion::new(vec![
            Ok(r#"{"sql": "SELECT channel, pca_x, pca_y, cluster_id, alpha_power, beta_power FROM features WHERE subject = 's00' AND window_idx = 0", "thought": "Window 0."}"#),
            Ok("One cluster."),
        ]))
        .await;
        h.orchestrator.submit("clusters for window 0").await.expect("turn");
        assert_eq!(h.orchestrator.channel_map().expect("map").len(), 19);

        let result = h.orchestrator.latest_result().expect("result").expect("some result");
        let target = cluster::project(&result.rows)
            .into_iter()
            .find(|point| point.row == 3)
            .expect("row 3 point");
        let viewport = h.orchestrator.cluster_viewport().expect("viewport").expect("fitted");
        let [px, py] = viewport.to_screen(target.x, target.y);

        let view = h
            .orchestrator
            .select_point(px, py, 4.0)
            .expect("pick")
            .expect("hit");
        assert_eq!(view.selected_row, Some(3));
        assert_eq!(h.orchestrator.channel_map().expect("map").len(), 1);

        assert!(h.orchestrator.select_point(-500.0, -500.0, 4.0).expect("miss").is_none());
        assert_eq!(h.orchestrator.view().expect("view").selected_row, Some(3));

        h.orchestrator.clear_selection().expect("clear");
        h.orchestrator.pan_view(40.0, -25.0).expect("pan");
        assert!(h.orchestrator.select_point(px, py, 4.0).expect("stale").is_none());
        let view = h
            .orchestrator
            .select_point(px + 40.0, py - 25.0, 4.0)
            .expect("pick after pan")
            .expect("hit after pan");
        assert_eq!(view.selected_row, Some(3));

        let zoomed = h.orchestrator.zoom_view(2.0, px + 40.0, py - 25.0).expect("zoom");
        let [zx, zy] = zoomed.to_screen(target.x, target.y);
        assert!((zx - (px + 40.0)).abs() < 1e-6 && (zy - (py - 25.0)).abs() < 1e-6);
        let rendered = h.orchestrator.render(10).expect("render").expect("view");
        assert_eq!(rendered.mode, VisualizationMode::Cluster);
    }

    #[tokio::test]
    async fn viewport_needs_cluster_points() {
        let h = harness(ScriptedCompletion::new(vec![
            Ok(r#"{"sql": "SELECT channel, alpha_power FROM features WHERE subject = 's00' AND window_idx = 0", "thought": "Alpha."}"#),
            Ok("Alpha."),
        ]))
        .await;
        assert!(h.orchestrator.cluster_viewport().expect("viewport").is_none());
        h.orchestrator.submit("alpha").await.expect("turn");
        assert!(h.orchestrator.cluster_viewport().expect("viewport").is_none());
        assert!(matches!(h.orchestrator.pan_view(1.0, 1.0), Err(AppError::Invalid(_))));
        assert!(matches!(h.orchestrator.select_point(0.0, 0.0, 4.0), Err(AppError::Invalid(_))));
    }
}
