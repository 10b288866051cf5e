use crate::{
    api::{
        AnalyzeRequest, Backend, ChatRequest, HttpBackend, PreviewRequest, PreviewResponse,
        RecommendationsRequest, RecommendationsResponse,
    },
    config::AppConfig,
    consolidate::{consolidate_result, ConsolidatedReport},
    document::{FixGuideStep, LiveDocument},
    error::ApiError,
    export::{export_timestamp_rfc3339, write_export, ReportExport},
    filter::{self, FilterState, VisibilityReport},
    game::GameId,
    log::SessionLog,
    modlist::is_plugin_name,
    report::{AnalysisResult, Severity},
    sequencer::{Debouncer, RequestSequencer, RequestToken},
    session::{now_millis, ChangeOrigin, ContextEvent, SavedListMeta, SessionContext, SessionContextStore},
    storage::{FileStorage, StorageHandle, StorageHub},
};
use anyhow::{bail, Context, Result};
use arboard::Clipboard;
use serde::{Deserialize, Serialize};
use std::{
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use time::OffsetDateTime;

const TOAST_SHORT: Duration = Duration::from_secs(2);
const TOAST_LONG: Duration = Duration::from_secs(5);
const CHAT_PAGE_CONTEXT: &str = "analyzer";
pub const GUIDE_KEY: &str = "loadcheck:guide";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub message: String,
    pub level: ToastLevel,
    pub expires_at: Instant,
}

enum WorkerMessage {
    Preview {
        token: RequestToken,
        result: Result<PreviewResponse, ApiError>,
    },
    Recommendations {
        token: RequestToken,
        result: Result<RecommendationsResponse, ApiError>,
    },
}

/// Assistant replies appended to the fix guide, tied to the analysis they extend.
#[derive(Debug, Default, Serialize, Deserialize)]
struct GuideNotes {
    analysis_time: i64,
    #[serde(default)]
    replies: Vec<FixGuideStep>,
}

/// Consolidated cards plus the visibility computed for them in the same pass.
#[derive(Debug, Clone)]
pub struct ReportView {
    pub report: ConsolidatedReport,
    pub visibility: VisibilityReport,
}

/// All mutable state of one window onto the session.
pub struct App {
    pub config: AppConfig,
    backend: Arc<dyn Backend>,
    session: SessionContextStore,
    session_events: Receiver<ContextEvent>,
    document: LiveDocument,
    guide_store: Option<StorageHandle>,
    query: String,
    preview: Option<PreviewResponse>,
    recommendations: RecommendationsResponse,
    preview_sequencer: RequestSequencer,
    recommendations_sequencer: RequestSequencer,
    preview_debounce: Debouncer<String>,
    recommendations_debounce: Debouncer<String>,
    worker_tx: Sender<WorkerMessage>,
    worker_rx: Receiver<WorkerMessage>,
    in_flight: usize,
    pub toast: Option<Toast>,
    pub status: String,
    pub log: SessionLog,
}

impl App {
    pub fn initialize() -> Result<Self> {
        let config = AppConfig::load_or_create()?;
        let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(&config.backend_url));
        let hub = StorageHub::new(FileStorage::new(config.store_dir()));
        Ok(Self::with_parts(config, backend, Some(&hub)))
    }

    pub fn with_parts(
        config: AppConfig,
        backend: Arc<dyn Backend>,
        hub: Option<&StorageHub>,
    ) -> Self {
        let log_path = if config.data_dir.as_os_str().is_empty() {
            None
        } else {
            Some(config.log_path())
        };
        let mut log = SessionLog::new(log_path);

        let handle = match hub.map(StorageHub::connect) {
            Some(Ok(handle)) => Some(handle),
            Some(Err(err)) => {
                log.warn(format!("Session storage unavailable: {err}"));
                None
            }
            None => None,
        };
        let guide_store = match (&handle, hub) {
            (Some(_), Some(hub)) => hub.connect().ok(),
            _ => None,
        };
        let mut session =
            SessionContextStore::open(handle, config.active_game, &config.masterlist_branch);
        if let Some(warning) = session.take_restore_warning() {
            log.warn(warning);
        }
        let session_events = session.subscribe();

        let (worker_tx, worker_rx) = mpsc::channel();
        let mut app = Self {
            preview_debounce: Debouncer::new(Duration::from_millis(config.preview_debounce_ms)),
            recommendations_debounce: Debouncer::new(Duration::from_millis(
                config.recommendations_debounce_ms,
            )),
            config,
            backend,
            session,
            session_events,
            document: LiveDocument::new(),
            guide_store,
            query: String::new(),
            preview: None,
            recommendations: RecommendationsResponse::default(),
            preview_sequencer: RequestSequencer::new(),
            recommendations_sequencer: RequestSequencer::new(),
            worker_tx,
            worker_rx,
            in_flight: 0,
            toast: None,
            status: String::new(),
            log,
        };
        app.rebuild_document();
        app
    }

    pub fn context(&self) -> &SessionContext {
        self.session.context()
    }

    pub fn document(&self) -> &LiveDocument {
        &self.document
    }

    pub fn preview(&self) -> Option<&PreviewResponse> {
        self.preview.as_ref()
    }

    pub fn recommendations(&self) -> &RecommendationsResponse {
        &self.recommendations
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_toast(&mut self, message: &str, level: ToastLevel, duration: Duration) {
        self.toast = Some(Toast {
            message: message.to_string(),
            level,
            expires_at: Instant::now() + duration,
        });
    }

    pub fn dismiss_toast(&mut self) {
        self.toast = None;
    }

    /// Replaces the mod list and schedules the debounced preview and recommendation calls.
    pub fn edit_mod_list(&mut self, text: &str, now: Instant) {
        self.session.set_mod_list_text(text);
        if text.trim().is_empty() {
            self.preview_debounce.cancel();
            self.recommendations_debounce.cancel();
            self.preview = None;
            return;
        }
        self.preview_debounce.push(text.to_string(), now);
        self.recommendations_debounce.push(text.to_string(), now);
    }

    /// One turn of the event loop: merge other tabs' changes, fire quiet debouncers and apply
    /// finished worker results.
    pub fn tick(&mut self, now: Instant) {
        self.session.poll_remote();
        self.handle_session_events();
        self.poll_guide_notes();

        if let Some(text) = self.preview_debounce.poll(now) {
            self.spawn_preview(text);
        }
        if let Some(text) = self.recommendations_debounce.poll(now) {
            self.spawn_recommendations(text);
        }

        loop {
            match self.worker_rx.try_recv() {
                Ok(message) => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    self.apply_worker_message(message);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if self
            .toast
            .as_ref()
            .is_some_and(|toast| now >= toast.expires_at)
        {
            self.toast = None;
        }
    }

    /// True while a debounced call is scheduled or a worker has not reported back.
    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
            || self.preview_debounce.is_pending()
            || self.recommendations_debounce.is_pending()
    }

    fn spawn_preview(&mut self, text: String) {
        self.in_flight += 1;
        let token = self.preview_sequencer.begin();
        let request = PreviewRequest {
            game: self.context().selected_game.as_str().to_string(),
            mod_list: text,
        };
        let backend = Arc::clone(&self.backend);
        let tx = self.worker_tx.clone();
        thread::spawn(move || {
            let result = run_worker("preview", || backend.preview(&request));
            let _ = tx.send(WorkerMessage::Preview { token, result });
        });
    }

    fn spawn_recommendations(&mut self, text: String) {
        self.in_flight += 1;
        let token = self.recommendations_sequencer.begin();
        let request = RecommendationsRequest {
            game: self.context().selected_game.as_str().to_string(),
            mod_list: self.context().mod_list_parsed().to_vec(),
            mod_list_text: text,
            specs: self.config.specs.clone(),
            limit: self.config.recommendation_limit,
        };
        let backend = Arc::clone(&self.backend);
        let tx = self.worker_tx.clone();
        thread::spawn(move || {
            let result = run_worker("recommendations", || backend.recommendations(&request));
            let _ = tx.send(WorkerMessage::Recommendations { token, result });
        });
    }

    fn apply_worker_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Preview { token, result } => {
                let Some(result) = self.preview_sequencer.accept(token, result) else {
                    return;
                };
                match result {
                    Ok(preview) => self.preview = Some(preview),
                    Err(err) => {
                        self.log.warn(format!("Mod list preview failed: {err}"));
                        self.set_toast("Preview unavailable", ToastLevel::Warn, TOAST_SHORT);
                        self.preview = Some(PreviewResponse::default());
                    }
                }
            }
            WorkerMessage::Recommendations { token, result } => {
                let Some(result) = self.recommendations_sequencer.accept(token, result) else {
                    return;
                };
                match result {
                    Ok(recommendations) => self.recommendations = recommendations,
                    Err(err) => {
                        self.log.warn(format!("Recommendations failed: {err}"));
                        self.set_toast(
                            "Recommendations unavailable",
                            ToastLevel::Warn,
                            TOAST_SHORT,
                        );
                        self.recommendations = RecommendationsResponse::default();
                    }
                }
            }
        }
    }

    fn handle_session_events(&mut self) {
        let mut rebuild = false;
        while let Ok(event) = self.session_events.try_recv() {
            match event {
                ContextEvent::Changed {
                    origin: ChangeOrigin::Remote,
                    scope,
                } => {
                    if scope.analysis {
                        rebuild = true;
                    }
                    if scope.any() {
                        self.status = "Session updated from another window".to_string();
                    }
                }
                ContextEvent::Changed { .. } => {}
                ContextEvent::PersistFailed(err) => {
                    self.log.warn(format!("Session not saved: {err}"));
                    self.set_toast(
                        "Couldn't save session; changes stay in this window",
                        ToastLevel::Warn,
                        TOAST_LONG,
                    );
                }
            }
        }
        if rebuild {
            self.rebuild_document();
        }
    }

    fn rebuild_document(&mut self) {
        let game = self.context().selected_game;
        let Some(result) = &self.session.context().last_analysis else {
            self.document.clear();
            return;
        };
        self.document
            .build(result, game, OffsetDateTime::now_utc().date());
        self.replay_replies();
    }

    /// Re-appends stored assistant replies when they belong to the current analysis.
    fn replay_replies(&mut self) {
        let Some(notes) = self.read_guide_notes() else {
            return;
        };
        if notes.analysis_time != self.context().last_analysis_time {
            return;
        }
        for step in notes.replies {
            if let FixGuideStep::Ai { content, question } = step {
                self.document.append_ai(question.as_deref(), &content);
            }
        }
    }

    fn read_guide_notes(&self) -> Option<GuideNotes> {
        let raw = self.guide_store.as_ref()?.read(GUIDE_KEY).ok().flatten()?;
        serde_json::from_str(&raw).ok()
    }

    fn save_guide_notes(&mut self) {
        let Some(handle) = &self.guide_store else {
            return;
        };
        let notes = GuideNotes {
            analysis_time: self.session.context().last_analysis_time,
            replies: self
                .document
                .steps()
                .iter()
                .filter(|step| matches!(step, FixGuideStep::Ai { .. }))
                .cloned()
                .collect(),
        };
        let result = serde_json::to_string(&notes)
            .map_err(|err| err.to_string())
            .and_then(|raw| handle.write(GUIDE_KEY, &raw).map_err(|err| err.to_string()));
        if let Err(err) = result {
            self.log.warn(format!("Fix guide replies not saved: {err}"));
        }
    }

    /// Another window extended the guide: rebuild so its replies show up here too.
    fn poll_guide_notes(&mut self) {
        let mut changed = false;
        if let Some(handle) = &self.guide_store {
            while let Some(event) = handle.try_next_event() {
                changed |= event.key == GUIDE_KEY;
            }
        }
        if changed {
            self.rebuild_document();
        }
    }

    /// Sends the current mod list to the analyzer. A failure leaves the previous result in
    /// place and returns `false`.
    pub fn run_analysis(&mut self) -> bool {
        if self.session.context().mod_list_parsed().is_empty() {
            self.set_toast("Add some mods before analyzing", ToastLevel::Warn, TOAST_SHORT);
            return false;
        }
        let context = self.session.context();
        if !context
            .mod_list_parsed()
            .iter()
            .any(|name| is_plugin_name(name))
        {
            self.log
                .warn("Mod list has no .esp/.esm/.esl entries; results may be sparse");
        }

        let game_version = context.game_version.trim();
        let request = AnalyzeRequest {
            mod_list: context.mod_list_text().to_string(),
            game: context.selected_game.as_str().to_string(),
            masterlist_version: Some(context.masterlist_branch.clone())
                .filter(|branch| !branch.trim().is_empty()),
            game_version: if game_version.is_empty() {
                None
            } else {
                Some(game_version.to_string())
            },
            specs: self.config.specs.clone(),
        };
        let game = context.selected_game;
        let count = context.mod_list_parsed().len();
        self.log.info(format!(
            "Analyzing {count} mods for {}",
            game.display_name()
        ));

        match self.backend.analyze(&request) {
            Ok(result) => {
                self.status = format!(
                    "Analysis complete: {} errors, {} warnings, {} info",
                    result.conflicts.errors.len(),
                    result.conflicts.warnings.len(),
                    result.conflicts.info.len()
                );
                self.log.info(self.status.clone());
                self.session.set_analysis(result);
                self.handle_session_events();
                self.rebuild_document();
                true
            }
            Err(err) => {
                self.log.error(format!("Analysis failed: {err}"));
                self.status = "Analysis failed".to_string();
                self.set_toast(
                    &format!("Analysis failed: {err}"),
                    ToastLevel::Error,
                    TOAST_LONG,
                );
                false
            }
        }
    }

    /// Asks the assistant about the current report; the reply extends the fix guide.
    pub fn ask_assistant(&mut self, question: &str) -> Option<String> {
        let question = question.trim();
        if question.is_empty() {
            return None;
        }
        let context = self.session.context();
        let game = context.selected_game;
        let report_context = context
            .last_analysis
            .as_ref()
            .map(|result| result.render_text(game.display_name()))
            .unwrap_or_else(|| "No analysis has been run yet.".to_string());
        let request = ChatRequest {
            message: question.to_string(),
            context: report_context,
            page_context: CHAT_PAGE_CONTEXT.to_string(),
            game: game.as_str().to_string(),
            mod_list: context.mod_list_text().to_string(),
        };

        match self.backend.chat(&request) {
            Ok(response) => {
                let reply = response.reply.trim().to_string();
                if reply.is_empty() {
                    self.set_toast("The assistant had no answer", ToastLevel::Warn, TOAST_SHORT);
                    return None;
                }
                if self.document.append_ai(Some(question), &reply) {
                    self.save_guide_notes();
                } else {
                    self.log.info("Assistant reply not added: no fix guide yet");
                }
                Some(reply)
            }
            Err(err) => {
                self.log.error(format!("Assistant request failed: {err}"));
                self.set_toast("Assistant unavailable", ToastLevel::Error, TOAST_LONG);
                None
            }
        }
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
    }

    /// Applies a search and remembers it in the recent-search list.
    pub fn commit_search(&mut self, query: &str) {
        self.set_query(query);
        self.session.add_recent_search(query);
    }

    pub fn toggle_severity(&mut self, severity: Severity) {
        self.session.toggle_severity(severity);
    }

    pub fn set_severity_visible(&mut self, severity: Severity, visible: bool) {
        let mut filter = self.context().filter_state;
        filter.set(severity, visible);
        self.session.set_filter_state(filter);
    }

    pub fn set_game(&mut self, game: GameId) {
        self.session.set_game(game);
    }

    pub fn set_game_version(&mut self, version: &str) {
        self.session.set_game_version(version);
    }

    pub fn set_masterlist_branch(&mut self, branch: &str) {
        self.session.set_masterlist_branch(branch);
    }

    /// Grouped cards with current filter and query applied, or `None` before any analysis.
    pub fn view(&self) -> Option<ReportView> {
        self.view_with(self.context().filter_state)
    }

    /// Same as [`App::view`] with a one-off filter that is not stored in the session.
    pub fn view_with(&self, filter_state: FilterState) -> Option<ReportView> {
        let result = self.context().last_analysis.as_ref()?;
        let report = consolidate_result(result);
        let visibility =
            filter::evaluate(&report, result.impact_entries(), filter_state, &self.query);
        Some(ReportView { report, visibility })
    }

    pub fn clear_mod_list(&mut self) {
        self.session.clear_mod_list();
        self.handle_session_events();
        self.document.clear();
        self.preview = None;
        self.recommendations = RecommendationsResponse::default();
        self.preview_debounce.cancel();
        self.recommendations_debounce.cancel();
        // in-flight responses belong to the list that was just cleared
        self.preview_sequencer.begin();
        self.recommendations_sequencer.begin();
        self.status = "Mod list cleared".to_string();
    }

    pub fn set_resolved(&mut self, id: &str, resolved: bool) -> bool {
        self.document.set_resolved(id, resolved)
    }

    pub fn save_current_list(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("saved list needs a name");
        }
        let context = self.context();
        if context.mod_list_parsed().is_empty() {
            bail!("mod list is empty");
        }
        let meta = SavedListMeta {
            name: name.to_string(),
            game: context.selected_game,
            mod_count: context.mod_list_parsed().len(),
            saved_at: now_millis(),
        };
        self.session.record_saved_list(meta);
        self.handle_session_events();
        self.log.info(format!("Saved list \"{name}\""));
        Ok(())
    }

    pub fn forget_saved_list(&mut self, name: &str) -> bool {
        let removed = self.session.remove_saved_list(name.trim());
        if removed {
            self.handle_session_events();
            self.log.info(format!("Removed saved list \"{}\"", name.trim()));
        }
        removed
    }

    pub fn export_guide_html(&mut self) -> Result<PathBuf> {
        let now = OffsetDateTime::now_utc();
        let title = format!(
            "{} fix guide",
            self.context().selected_game.display_name()
        );
        let html = self
            .document
            .export_html(&title, &export_timestamp_rfc3339(now));
        let path = write_export(&self.config.export_dir(), "fix-guide", "html", &html, now)?;
        self.log.info(format!("Exported fix guide to {}", path.display()));
        Ok(path)
    }

    pub fn export_guide_json(&mut self) -> Result<PathBuf> {
        let now = OffsetDateTime::now_utc();
        let raw = self
            .document
            .export_json()
            .context("serialize fix guide")?;
        let path = write_export(&self.config.export_dir(), "fix-guide", "json", &raw, now)?;
        self.log.info(format!("Exported fix guide steps to {}", path.display()));
        Ok(path)
    }

    pub fn export_report_json(&mut self) -> Result<PathBuf> {
        let context = self.session.context();
        let result: &AnalysisResult = context
            .last_analysis
            .as_ref()
            .context("no analysis to export")?;
        let raw = ReportExport::new(result, context.selected_game.display_name()).to_json()?;
        let now = OffsetDateTime::now_utc();
        let path = write_export(&self.config.export_dir(), "report", "json", &raw, now)?;
        self.log.info(format!("Exported report to {}", path.display()));
        Ok(path)
    }

    pub fn report_text(&self) -> Option<String> {
        let context = self.context();
        context
            .last_analysis
            .as_ref()
            .map(|result| result.render_text(context.selected_game.display_name()))
    }

    pub fn copy_report_to_clipboard(&mut self) -> bool {
        let Some(text) = self.report_text() else {
            self.set_toast("Nothing to copy yet", ToastLevel::Warn, TOAST_SHORT);
            return false;
        };
        let copied = Clipboard::new()
            .and_then(|mut clipboard| clipboard.set_text(text))
            .is_ok();
        if copied {
            self.status = "Report copied to clipboard".to_string();
            self.set_toast("Report copied to clipboard", ToastLevel::Info, TOAST_SHORT);
        } else {
            self.set_toast("Clipboard unavailable", ToastLevel::Warn, TOAST_SHORT);
        }
        copied
    }
}

/// Runs a backend call on a worker thread; a panic becomes a transport error so the
/// caller still hears back.
fn run_worker<T>(
    label: &str,
    call: impl FnOnce() -> Result<T, ApiError>,
) -> Result<T, ApiError> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|_| {
        Err(ApiError::Transport(format!(
            "{label} worker stopped unexpectedly"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{ChatResponse, PreviewSummary},
        document::DocumentState,
        report::Issue,
        storage::MemoryStorage,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        analysis: Mutex<Option<AnalysisResult>>,
        chat_reply: Mutex<Option<String>>,
        preview_calls: Mutex<Vec<String>>,
        recommendation_calls: Mutex<Vec<String>>,
    }

    impl Backend for FakeBackend {
        fn analyze(&self, _request: &AnalyzeRequest) -> Result<AnalysisResult, ApiError> {
            self.analysis
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ApiError::Transport("connection refused".to_string()))
        }

        fn preview(&self, request: &PreviewRequest) -> Result<PreviewResponse, ApiError> {
            self.preview_calls.lock().unwrap().push(request.mod_list.clone());
            Ok(PreviewResponse {
                normalized_text: request.mod_list.clone(),
                summary: PreviewSummary {
                    total: request.mod_list.lines().count(),
                    ..PreviewSummary::default()
                },
                ..PreviewResponse::default()
            })
        }

        fn recommendations(
            &self,
            request: &RecommendationsRequest,
        ) -> Result<RecommendationsResponse, ApiError> {
            self.recommendation_calls
                .lock()
                .unwrap()
                .push(request.mod_list_text.clone());
            Err(ApiError::Status {
                status: 503,
                body: "busy".to_string(),
            })
        }

        fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, ApiError> {
            match self.chat_reply.lock().unwrap().clone() {
                Some(reply) => Ok(ChatResponse {
                    reply,
                    ..ChatResponse::default()
                }),
                None => Err(ApiError::Decode("eof".to_string())),
            }
        }
    }

    fn sample_result() -> AnalysisResult {
        let mut result = AnalysisResult {
            mod_count: 3,
            enabled_count: 3,
            ..AnalysisResult::default()
        };
        for name in ["A.esp", "B.esp"] {
            result.conflicts.errors.push(Issue {
                severity: Severity::Error,
                message: format!("{name} needs Patch X"),
                suggested_action: Some("Install Patch X".to_string()),
                affected_mod: Some(name.to_string()),
                ..Issue::default()
            });
        }
        result.conflicts.warnings.push(Issue {
            severity: Severity::Warning,
            message: "Dirty edits".to_string(),
            affected_mod: Some("C.esp".to_string()),
            ..Issue::default()
        });
        result
    }

    fn app_with(backend: Arc<FakeBackend>, hub: Option<&StorageHub>) -> App {
        App::with_parts(AppConfig::default(), backend, hub)
    }

    #[test]
    fn analysis_builds_document_and_replicates_to_other_windows() {
        let backend = Arc::new(FakeBackend::default());
        *backend.analysis.lock().unwrap() = Some(sample_result());
        let hub = StorageHub::new(MemoryStorage::new());
        let mut first = app_with(backend.clone(), Some(&hub));
        let mut second = app_with(backend, Some(&hub));

        first.edit_mod_list("*A.esp\n*B.esp\n*C.esp\n", Instant::now());
        assert!(first.run_analysis());
        assert_eq!(first.document().progress(), (0, 3));

        second.tick(Instant::now());
        assert_eq!(second.context().mod_list_parsed().len(), 3);
        assert_eq!(second.context().last_analysis, Some(sample_result()));
        assert_eq!(second.document().progress(), (0, 3));
        assert_eq!(second.status, "Session updated from another window");
    }

    #[test]
    fn failed_analysis_keeps_previous_result() {
        let backend = Arc::new(FakeBackend::default());
        *backend.analysis.lock().unwrap() = Some(sample_result());
        let mut app = app_with(backend.clone(), None);
        app.edit_mod_list("*A.esp\n", Instant::now());
        assert!(app.run_analysis());

        *backend.analysis.lock().unwrap() = None;
        assert!(!app.run_analysis());
        assert_eq!(app.context().last_analysis, Some(sample_result()));
        assert_eq!(
            app.toast.as_ref().map(|toast| toast.level),
            Some(ToastLevel::Error)
        );
    }

    #[test]
    fn empty_mod_list_is_not_sent() {
        let mut app = app_with(Arc::new(FakeBackend::default()), None);
        assert!(!app.run_analysis());
        assert_eq!(app.toast.as_ref().map(|toast| toast.level), Some(ToastLevel::Warn));
    }

    #[test]
    fn stale_preview_results_are_dropped() {
        let mut app = app_with(Arc::new(FakeBackend::default()), None);
        let older = app.preview_sequencer.begin();
        let newer = app.preview_sequencer.begin();
        let response = |text: &str| PreviewResponse {
            normalized_text: text.to_string(),
            ..PreviewResponse::default()
        };

        app.apply_worker_message(WorkerMessage::Preview {
            token: newer,
            result: Ok(response("newer")),
        });
        app.apply_worker_message(WorkerMessage::Preview {
            token: older,
            result: Ok(response("older")),
        });
        assert_eq!(app.preview().map(|p| p.normalized_text.as_str()), Some("newer"));

        app.apply_worker_message(WorkerMessage::Preview {
            token: older,
            result: Err(ApiError::Transport("late failure".to_string())),
        });
        assert_eq!(app.preview().map(|p| p.normalized_text.as_str()), Some("newer"));
        assert!(app.toast.is_none());
    }

    #[test]
    fn bursts_of_edits_send_one_trailing_request() {
        let backend = Arc::new(FakeBackend::default());
        let mut app = app_with(backend.clone(), None);
        let start = Instant::now();
        app.edit_mod_list("*A.esp", start);
        app.edit_mod_list("*A.esp\n*B.esp", start + Duration::from_millis(50));
        app.edit_mod_list("*A.esp\n*B.esp\n*C.esp", start + Duration::from_millis(100));
        app.tick(start + Duration::from_millis(200));
        assert!(backend.preview_calls.lock().unwrap().is_empty());

        let later = start + Duration::from_millis(1_000);
        for _ in 0..200 {
            app.tick(later);
            if app.preview().is_some() && app.toast.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            *backend.preview_calls.lock().unwrap(),
            vec!["*A.esp\n*B.esp\n*C.esp".to_string()]
        );
        assert_eq!(backend.recommendation_calls.lock().unwrap().len(), 1);
        assert!(!app.is_busy());
        assert_eq!(app.preview().map(|p| p.summary.total), Some(3));
        // recommendations failed: empty shape plus a warning toast
        assert!(app.recommendations().recommendations.is_empty());
        assert_eq!(app.toast.as_ref().map(|toast| toast.level), Some(ToastLevel::Warn));
    }

    #[test]
    fn assistant_replies_extend_the_guide_after_analysis() {
        let backend = Arc::new(FakeBackend::default());
        *backend.chat_reply.lock().unwrap() = Some("Install Patch X from the Nexus.".to_string());
        let mut app = app_with(backend.clone(), None);

        assert_eq!(
            app.ask_assistant("What first?").as_deref(),
            Some("Install Patch X from the Nexus.")
        );
        assert!(app.document().is_empty());

        *backend.analysis.lock().unwrap() = Some(sample_result());
        app.edit_mod_list("*A.esp\n*B.esp\n", Instant::now());
        app.run_analysis();
        let before = app.document().steps().len();
        app.ask_assistant("What first?");
        assert_eq!(app.document().steps().len(), before + 1);

        *backend.chat_reply.lock().unwrap() = None;
        assert_eq!(app.ask_assistant("And then?"), None);
        assert_eq!(app.document().steps().len(), before + 1);
    }

    #[test]
    fn view_applies_toggles_and_query_together() {
        let backend = Arc::new(FakeBackend::default());
        *backend.analysis.lock().unwrap() = Some(sample_result());
        let mut app = app_with(backend, None);
        assert!(app.view().is_none());
        app.edit_mod_list("*A.esp\n*B.esp\n*C.esp\n", Instant::now());
        app.run_analysis();

        let view = app.view().unwrap();
        assert_eq!(view.report.node_count(), 2);
        assert_eq!((view.visibility.visible, view.visibility.eligible), (2, 2));

        app.commit_search("dirty");
        app.toggle_severity(Severity::Warning);
        let view = app.view().unwrap();
        assert_eq!(view.visibility.eligible, 1);
        assert_eq!(view.visibility.visible, 0);
        assert_eq!(
            view.visibility.no_results_line().as_deref(),
            Some("No results for 'dirty'")
        );
        assert_eq!(app.context().recent_searches, vec!["dirty"]);

        app.set_severity_visible(Severity::Warning, true);
        let view = app.view().unwrap();
        assert_eq!(view.visibility.showing_line().as_deref(), Some("Showing 1 of 2"));
    }

    #[test]
    fn clearing_drops_analysis_guide_and_pending_work() {
        let backend = Arc::new(FakeBackend::default());
        *backend.analysis.lock().unwrap() = Some(sample_result());
        let mut app = app_with(backend, None);
        let now = Instant::now();
        app.edit_mod_list("*A.esp\n", now);
        app.run_analysis();
        let in_flight = app.preview_sequencer.begin();

        app.clear_mod_list();
        assert!(app.context().last_analysis.is_none());
        assert!(app.document().is_empty());
        app.apply_worker_message(WorkerMessage::Preview {
            token: in_flight,
            result: Ok(PreviewResponse::default()),
        });
        assert!(app.preview().is_none());
        assert!(app.save_current_list("Empty").is_err());
    }

    #[test]
    fn resolved_marks_and_saved_lists() {
        let backend = Arc::new(FakeBackend::default());
        *backend.analysis.lock().unwrap() = Some(sample_result());
        let mut app = app_with(backend, None);
        app.edit_mod_list("*A.esp\n*B.esp\n", Instant::now());
        app.run_analysis();
        assert!(app.set_resolved("err-1", true));
        assert!(!app.set_resolved("err-7", true));
        assert_eq!(app.document().progress(), (1, 3));

        app.save_current_list("Main").unwrap();
        assert_eq!(app.context().saved_lists[0].mod_count, 2);
        assert!(app.save_current_list("  ").is_err());
        assert!(!app.forget_saved_list("Other"));
        assert!(app.forget_saved_list("Main"));
        assert!(app.context().saved_lists.is_empty());
    }

    #[test]
    fn exports_write_into_the_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        *backend.analysis.lock().unwrap() = Some(sample_result());
        let config = AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        let mut app = App::with_parts(config, backend, None);
        assert!(app.export_report_json().is_err());

        app.edit_mod_list("*A.esp\n", Instant::now());
        app.run_analysis();
        let html = app.export_guide_html().unwrap();
        let json = app.export_report_json().unwrap();
        let steps = app.export_guide_json().unwrap();
        assert!(html.starts_with(dir.path().join("exports")));
        assert!(std::fs::read_to_string(html).unwrap().contains("Skyrim Special Edition fix guide"));
        assert!(std::fs::read_to_string(json).unwrap().contains("\"report_text\""));
        assert!(std::fs::read_to_string(steps).unwrap().contains("\"err-0\""));
        assert!(dir.path().join("loadcheck.log").exists());
    }

    #[test]
    fn persist_failures_surface_as_a_toast() {
        struct ReadOnly;
        impl crate::storage::Storage for ReadOnly {
            fn read(&self, _key: &str) -> Result<Option<String>, crate::error::StorageError> {
                Ok(None)
            }
            fn write(&mut self, _key: &str, _value: &str) -> Result<(), crate::error::StorageError> {
                Err(crate::error::StorageError::Unavailable)
            }
            fn remove(&mut self, _key: &str) -> Result<(), crate::error::StorageError> {
                Ok(())
            }
        }

        let hub = StorageHub::new(ReadOnly);
        let mut app = app_with(Arc::new(FakeBackend::default()), Some(&hub));
        app.commit_search("skse");
        app.tick(Instant::now());
        assert_eq!(app.toast.as_ref().map(|toast| toast.level), Some(ToastLevel::Warn));
        assert_eq!(app.context().recent_searches, vec!["skse"]);
    }

    fn ai_questions(app: &App) -> Vec<Option<String>> {
        app.document()
            .steps()
            .iter()
            .filter_map(|step| match step {
                FixGuideStep::Ai { question, .. } => Some(question.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn assistant_replies_carry_over_to_the_next_process() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        *backend.analysis.lock().unwrap() = Some(sample_result());
        *backend.chat_reply.lock().unwrap() = Some("Install Patch X first.".to_string());
        {
            let hub = StorageHub::new(FileStorage::new(dir.path()));
            let mut first = app_with(backend.clone(), Some(&hub));
            first.edit_mod_list("*A.esp\n*B.esp\n*C.esp\n", Instant::now());
            assert!(first.run_analysis());
            first.ask_assistant("What first?");
            assert_eq!(first.document().state(), DocumentState::Extended);
        }

        let hub = StorageHub::new(FileStorage::new(dir.path()));
        let mut second = app_with(backend.clone(), Some(&hub));
        assert_eq!(second.document().state(), DocumentState::Extended);
        assert_eq!(ai_questions(&second), vec![Some("What first?".to_string())]);

        // a fresh analysis starts a fresh guide
        assert!(second.run_analysis());
        assert_eq!(second.document().state(), DocumentState::Built);
        drop(second);
        let hub = StorageHub::new(FileStorage::new(dir.path()));
        let third = app_with(backend, Some(&hub));
        assert_eq!(third.document().state(), DocumentState::Built);
        assert!(ai_questions(&third).is_empty());
    }

    #[test]
    fn replies_from_another_window_extend_this_guide() {
        let backend = Arc::new(FakeBackend::default());
        *backend.analysis.lock().unwrap() = Some(sample_result());
        *backend.chat_reply.lock().unwrap() = Some("Sort with LOOT.".to_string());
        let hub = StorageHub::new(MemoryStorage::new());
        let mut first = app_with(backend.clone(), Some(&hub));
        let mut second = app_with(backend, Some(&hub));

        first.edit_mod_list("*A.esp\n", Instant::now());
        first.run_analysis();
        second.tick(Instant::now());
        assert_eq!(second.document().state(), DocumentState::Built);

        first.ask_assistant("How do I sort?");
        second.tick(Instant::now());
        assert_eq!(ai_questions(&second), vec![Some("How do I sort?".to_string())]);
    }

    #[test]
    fn hidden_severities_persist_for_the_next_process() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        *backend.analysis.lock().unwrap() = Some(sample_result());
        {
            let hub = StorageHub::new(FileStorage::new(dir.path()));
            let mut first = app_with(backend.clone(), Some(&hub));
            first.edit_mod_list("*A.esp\n*B.esp\n*C.esp\n", Instant::now());
            first.run_analysis();
            first.set_severity_visible(Severity::Warning, false);
            first.toggle_severity(Severity::Info);
        }

        let hub = StorageHub::new(FileStorage::new(dir.path()));
        let second = app_with(backend, Some(&hub));
        let filter_state = second.context().filter_state;
        assert!(filter_state.show_errors);
        assert!(!filter_state.show_warnings);
        assert!(!filter_state.show_info);
        let view = second.view().unwrap();
        assert!(!view.visibility.section_visible(Severity::Warning));
        assert_eq!((view.visibility.visible, view.visibility.eligible), (1, 1));
    }

    #[test]
    fn panicking_worker_still_reports_back() {
        struct Crashing;
        impl Backend for Crashing {
            fn analyze(&self, _request: &AnalyzeRequest) -> Result<AnalysisResult, ApiError> {
                Err(ApiError::Transport("offline".to_string()))
            }
            fn preview(&self, _request: &PreviewRequest) -> Result<PreviewResponse, ApiError> {
                panic!("preview decoder blew up");
            }
            fn recommendations(
                &self,
                _request: &RecommendationsRequest,
            ) -> Result<RecommendationsResponse, ApiError> {
                panic!("recommendations decoder blew up");
            }
            fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, ApiError> {
                Err(ApiError::Transport("offline".to_string()))
            }
        }

        let mut app = App::with_parts(AppConfig::default(), Arc::new(Crashing), None);
        let start = Instant::now();
        app.edit_mod_list("*A.esp", start);
        let later = start + Duration::from_secs(5);
        for _ in 0..400 {
            app.tick(later);
            if !app.is_busy() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!app.is_busy());
        assert_eq!(app.preview(), Some(&PreviewResponse::default()));
        assert_eq!(app.toast.as_ref().map(|toast| toast.level), Some(ToastLevel::Warn));
    }
}
