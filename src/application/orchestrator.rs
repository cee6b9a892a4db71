use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::application::change::ChangeDetector;
use crate::application::input::{InputDependencies, InputRouter, KeyEvent, RouteOutcome};
use crate::application::refresh::{RefreshReceiver, refresh_channel};
use crate::application::registry::{DiscoveryReport, SessionRegistry};
use crate::application::scheduler::{
    CaptureDependencies, CaptureScheduler, FocusEvent, FocusHandle,
};
use crate::domain::{
    CaptureSnapshot, Session, SessionCorrelation, SessionId, SessionStatus, session_name_for_id,
};
use crate::error::SessionError;
use crate::infrastructure::config::DeckhandConfig;
use crate::infrastructure::event_log::{Event, EventLogger};
use crate::infrastructure::persistence::SessionStore;
use crate::infrastructure::tmux::Multiplexer;

const ENTER_KEY: &str = "Enter";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateRequest {
    pub display_name: String,
    pub work_dir: PathBuf,
    pub command: Option<String>,
    pub correlation: SessionCorrelation,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

impl CreateRequest {
    pub fn new(display_name: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            display_name: display_name.into(),
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_correlation(mut self, correlation: SessionCorrelation) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = Some(cols);
        self.rows = Some(rows);
        self
    }
}

pub struct OrchestratorDependencies {
    pub multiplexer: Arc<dyn Multiplexer>,
    pub store: Arc<dyn SessionStore>,
    pub logger: Arc<dyn EventLogger>,
}

/// Top-level facade over the session layer. Owns the registry, the capture scheduler and
/// the input router, and is the only component that reconciles the registry after a
/// session is reported gone.
pub struct SessionOrchestrator {
    multiplexer: Arc<dyn Multiplexer>,
    registry: Arc<SessionRegistry>,
    detector: Arc<Mutex<ChangeDetector>>,
    scheduler: CaptureScheduler,
    router: InputRouter,
    config: DeckhandConfig,
    logger: Arc<dyn EventLogger>,
    refresh_requests: Mutex<Option<RefreshReceiver>>,
    fallback_dir: PathBuf,
}

impl SessionOrchestrator {
    pub fn new(
        dependencies: OrchestratorDependencies,
        config: DeckhandConfig,
        fallback_dir: PathBuf,
    ) -> Self {
        let OrchestratorDependencies {
            multiplexer,
            store,
            logger,
        } = dependencies;
        let registry = Arc::new(SessionRegistry::new(store, Arc::clone(&logger)));
        let detector = Arc::new(Mutex::new(ChangeDetector::new()));
        let focus = FocusHandle::default();
        let (refresh, refresh_requests) = refresh_channel();

        let scheduler = CaptureScheduler::new(
            CaptureDependencies {
                multiplexer: Arc::clone(&multiplexer),
                registry: Arc::clone(&registry),
                detector: Arc::clone(&detector),
                focus: focus.clone(),
                refresh: refresh.clone(),
                logger: Arc::clone(&logger),
            },
            config.capture.clone(),
        );
        let router = InputRouter::new(
            InputDependencies {
                multiplexer: Arc::clone(&multiplexer),
                registry: Arc::clone(&registry),
                focus,
                refresh,
                logger: Arc::clone(&logger),
            },
            config.input.double_escape_window(),
        );

        Self {
            multiplexer,
            registry,
            detector,
            scheduler,
            router,
            config,
            logger,
            refresh_requests: Mutex::new(Some(refresh_requests)),
            fallback_dir,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &CaptureScheduler {
        &self.scheduler
    }

    pub fn router(&self) -> &InputRouter {
        &self.router
    }

    pub fn focus(&self) -> &FocusHandle {
        self.scheduler.focus()
    }

    /// Startup recovery: adopts every live managed session.
    pub async fn start(&self) -> DiscoveryReport {
        self.refresh().await
    }

    pub async fn refresh(&self) -> DiscoveryReport {
        let report = self
            .registry
            .discover(self.multiplexer.as_ref(), &self.fallback_dir)
            .await;

        self.detector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain_sessions(|session_id| self.registry.contains(session_id));

        if let Some(selected) = self.focus().current().selected
            && !self.registry.contains(&selected)
        {
            self.scheduler.clear_live(&selected);
            self.focus().apply(FocusEvent::SelectionChanged(None));
        }
        report
    }

    pub async fn create(&self, request: CreateRequest) -> Result<Session, SessionError> {
        if !self.multiplexer.probe_available().await {
            self.logger.log(
                Event::new("session", "create_failed")
                    .with_data("display_name", request.display_name.clone())
                    .with_data("error", SessionError::MultiplexerUnavailable.to_string()),
            );
            return Err(SessionError::MultiplexerUnavailable);
        }

        let session_id = SessionId::generate();
        let session_name = session_name_for_id(&session_id);
        let cols = request.cols.unwrap_or(self.config.session.default_cols);
        let rows = request.rows.unwrap_or(self.config.session.default_rows);

        if let Err(error) = self
            .multiplexer
            .create_session(&session_name, &request.work_dir, cols, rows)
            .await
        {
            self.logger.log(
                Event::new("session", "create_failed")
                    .with_data("session", session_name.clone())
                    .with_data("error", error.to_string()),
            );
            return Err(error);
        }

        let pane = self.multiplexer.resolve_pane_handle(&session_name).await;
        let command = request
            .command
            .filter(|command| !command.trim().is_empty());

        if let Some(command) = command.as_deref() {
            let typed = match self.multiplexer.send_keys(&pane, command, true).await {
                Ok(()) => self.multiplexer.send_keys(&pane, ENTER_KEY, false).await,
                Err(error) => Err(error),
            };
            if let Err(error) = typed {
                self.multiplexer.kill_session(&session_name).await;
                let error = SessionError::Creation {
                    session_name: session_name.clone(),
                    message: format!("initial command could not be started: {error}"),
                };
                self.logger.log(
                    Event::new("session", "create_failed")
                        .with_data("session", session_name)
                        .with_data("error", error.to_string()),
                );
                return Err(error);
            }
        }

        let session = Session::new(
            session_id,
            pane,
            request.display_name,
            request.work_dir,
            command,
        )
        .with_correlation(request.correlation);
        self.registry.upsert(session.clone());

        self.logger.log(
            Event::new("session", "created")
                .with_data("session", session.session_name.clone())
                .with_data("display_name", session.display_name.clone())
                .with_data("work_dir", session.work_dir.to_string_lossy().to_string())
                .with_data("cols", cols)
                .with_data("rows", rows),
        );
        Ok(session)
    }

    pub async fn destroy(&self, session_id: &SessionId) -> Result<Session, SessionError> {
        let Some(session) = self.registry.get(session_id) else {
            return Err(SessionError::NotFound(session_id.clone()));
        };

        self.multiplexer.kill_session(&session.session_name).await;
        self.registry.remove(session_id);
        self.detector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .forget(session_id);
        self.scheduler.clear_live(session_id);
        if self.focus().current().selected.as_ref() == Some(session_id) {
            self.focus().apply(FocusEvent::SelectionChanged(None));
        }

        self.logger.log(
            Event::new("session", "destroyed").with_data("session", session.session_name.clone()),
        );
        Ok(session)
    }

    pub fn list(&self) -> Vec<Session> {
        self.registry.list()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.registry.get(session_id)
    }

    pub async fn send_input(&self, session_id: &SessionId, event: KeyEvent) -> RouteOutcome {
        self.router.forward(session_id, event).await
    }

    pub async fn send_text(&self, session_id: &SessionId, text: &str) -> RouteOutcome {
        self.router.forward_text(session_id, text).await
    }

    /// Reads the session's screen now. Unchanged content is reported through
    /// `CaptureSnapshot::changed`; only an unreachable session is an error.
    pub async fn capture_output(
        &self,
        session_id: &SessionId,
    ) -> Result<CaptureSnapshot, SessionError> {
        self.scheduler.capture_session(session_id).await
    }

    pub async fn resize(
        &self,
        session_id: &SessionId,
        cols: u16,
        rows: u16,
    ) -> Result<(), SessionError> {
        let Some(session) = self.registry.get(session_id) else {
            return Err(SessionError::NotFound(session_id.clone()));
        };
        self.multiplexer
            .resize_window(&session.session_name, cols, rows)
            .await;
        Ok(())
    }

    pub fn update_status(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> Result<(), SessionError> {
        if !self.registry.set_status(session_id, status) {
            return Err(SessionError::NotFound(session_id.clone()));
        }
        self.logger.log(
            Event::new("session", "status_changed")
                .with_data("session", session_id.to_string())
                .with_data("status", status.label()),
        );
        Ok(())
    }

    fn drain_refresh_requests(&self) -> usize {
        let mut receiver = self
            .refresh_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(receiver) = receiver.as_mut() else {
            return 0;
        };
        let mut drained = 0usize;
        while let Ok(request) = receiver.try_recv() {
            self.logger.log(
                Event::new("session", "refresh_requested")
                    .with_data("session", request.session_id.to_string())
                    .with_data("reason", request.reason.label()),
            );
            drained = drained.saturating_add(1);
        }
        drained
    }

    /// Handles any queued "session gone" reports with a single refresh. Returns `None` when
    /// nothing was queued.
    pub async fn process_refresh_requests(&self) -> Option<DiscoveryReport> {
        if self.drain_refresh_requests() == 0 {
            return None;
        }
        Some(self.refresh().await)
    }

    /// Moves refresh handling onto a background task. Reports that arrive together are
    /// coalesced into one refresh. Returns `None` if a listener was already started.
    pub fn spawn_refresh_listener(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut receiver = self
            .refresh_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        let orchestrator = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            while let Some(first) = receiver.recv().await {
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                let mut requests = vec![first];
                while let Ok(request) = receiver.try_recv() {
                    requests.push(request);
                }
                for request in &requests {
                    orchestrator.logger.log(
                        Event::new("session", "refresh_requested")
                            .with_data("session", request.session_id.to_string())
                            .with_data("reason", request.reason.label()),
                    );
                }
                orchestrator.refresh().await;
            }
        }))
    }
}
