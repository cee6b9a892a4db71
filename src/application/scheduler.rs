use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::application::change::ChangeDetector;
use crate::application::refresh::{RefreshReason, RefreshRequest, RefreshSender};
use crate::application::registry::SessionRegistry;
use crate::application::sanitize::sanitize;
use crate::domain::{CaptureSnapshot, SessionId};
use crate::error::SessionError;
use crate::infrastructure::config::CaptureConfig;
use crate::infrastructure::event_log::{Event, EventLogger};
use crate::infrastructure::tmux::Multiplexer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Slow,
    Medium,
    Fast,
}

impl Cadence {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Slow => "slow",
            Self::Medium => "medium",
            Self::Fast => "fast",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FocusState {
    pub selected: Option<SessionId>,
    pub output_focused: bool,
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusEvent {
    SelectionChanged(Option<SessionId>),
    OutputFocusChanged(bool),
    InteractiveChanged(bool),
}

impl FocusState {
    /// Returns whether the state changed. Moving the selection to another session leaves
    /// passthrough mode, since passthrough is bound to the session it was entered on.
    pub fn apply(&mut self, event: FocusEvent) -> bool {
        let before = self.clone();
        match event {
            FocusEvent::SelectionChanged(selected) => {
                if selected != self.selected {
                    self.interactive = false;
                }
                self.selected = selected;
            }
            FocusEvent::OutputFocusChanged(focused) => self.output_focused = focused,
            FocusEvent::InteractiveChanged(interactive) => self.interactive = interactive,
        }
        *self != before
    }

    pub fn cadence(&self) -> Cadence {
        if self.interactive {
            return Cadence::Fast;
        }
        if self.selected.is_none() || !self.output_focused {
            return Cadence::Slow;
        }
        Cadence::Medium
    }
}

pub fn poll_interval(config: &CaptureConfig, state: &FocusState) -> Duration {
    let millis = match state.cadence() {
        Cadence::Fast => config.fast_ms,
        Cadence::Medium => config.medium_ms,
        Cadence::Slow if state.selected.is_none() => config.idle_ms,
        Cadence::Slow => config.slow_ms,
    };
    Duration::from_millis(millis.max(1))
}

/// Shared view of which session is selected and which UI mode is active. The capture
/// loop and the input router both read and update it.
#[derive(Clone)]
pub struct FocusHandle {
    sender: Arc<watch::Sender<FocusState>>,
}

impl Default for FocusHandle {
    fn default() -> Self {
        let (sender, _) = watch::channel(FocusState::default());
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl FocusHandle {
    pub fn current(&self) -> FocusState {
        self.sender.borrow().clone()
    }

    pub fn apply(&self, event: FocusEvent) -> bool {
        self.sender.send_if_modified(|state| state.apply(event))
    }

    pub fn subscribe(&self) -> watch::Receiver<FocusState> {
        self.sender.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveCapture {
    pub session_id: SessionId,
    pub snapshot: CaptureSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped,
    Idle,
    Captured { changed: bool },
    Failed,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct SchedulerShared {
    multiplexer: Arc<dyn Multiplexer>,
    registry: Arc<SessionRegistry>,
    detector: Arc<Mutex<ChangeDetector>>,
    focus: FocusHandle,
    config: CaptureConfig,
    refresh: RefreshSender,
    logger: Arc<dyn EventLogger>,
    in_flight: AtomicBool,
    live: watch::Sender<Option<LiveCapture>>,
}

/// Polls the selected session's pane on one timer whose interval follows the focus state.
/// A tick that finds the previous capture still running is dropped, not queued.
#[derive(Clone)]
pub struct CaptureScheduler {
    shared: Arc<SchedulerShared>,
}

pub struct CaptureDependencies {
    pub multiplexer: Arc<dyn Multiplexer>,
    pub registry: Arc<SessionRegistry>,
    pub detector: Arc<Mutex<ChangeDetector>>,
    pub focus: FocusHandle,
    pub refresh: RefreshSender,
    pub logger: Arc<dyn EventLogger>,
}

impl CaptureScheduler {
    pub fn new(dependencies: CaptureDependencies, config: CaptureConfig) -> Self {
        let (live, _) = watch::channel(None);
        Self {
            shared: Arc::new(SchedulerShared {
                multiplexer: dependencies.multiplexer,
                registry: dependencies.registry,
                detector: dependencies.detector,
                focus: dependencies.focus,
                config,
                refresh: dependencies.refresh,
                logger: dependencies.logger,
                in_flight: AtomicBool::new(false),
                live,
            }),
        }
    }

    pub fn focus(&self) -> &FocusHandle {
        &self.shared.focus
    }

    pub fn current_interval(&self) -> Duration {
        poll_interval(&self.shared.config, &self.shared.focus.current())
    }

    pub fn live_capture(&self) -> Option<LiveCapture> {
        self.shared.live.borrow().clone()
    }

    pub fn subscribe_live(&self) -> watch::Receiver<Option<LiveCapture>> {
        self.shared.live.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn capture_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub async fn tick(&self) -> TickOutcome {
        let shared = &self.shared;
        if shared.in_flight.swap(true, Ordering::AcqRel) {
            shared
                .logger
                .log(Event::new("scheduler", "tick_skipped"));
            return TickOutcome::Skipped;
        }
        let _guard = InFlightGuard(&shared.in_flight);

        let Some(session_id) = shared.focus.current().selected else {
            return TickOutcome::Idle;
        };

        match self.capture_session(&session_id).await {
            Ok(snapshot) => {
                let changed = snapshot.changed;
                self.publish(session_id, snapshot);
                TickOutcome::Captured { changed }
            }
            Err(_) => TickOutcome::Failed,
        }
    }

    /// Captures, sanitizes and change-checks one session. A session that cannot be reached
    /// clears the live view and asks for a registry refresh before the error is returned.
    pub async fn capture_session(
        &self,
        session_id: &SessionId,
    ) -> Result<CaptureSnapshot, SessionError> {
        let shared = &self.shared;
        let Some(session) = shared.registry.get(session_id) else {
            let error = SessionError::Capture {
                target: session_id.to_string(),
                message: "session is not registered".to_string(),
            };
            self.clear_live(session_id);
            return Err(error);
        };

        match shared.multiplexer.capture_pane(&session.pane).await {
            Ok(raw) => {
                let content = sanitize(&raw.content);
                let changed = shared
                    .detector
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .has_changed(session_id, &content);
                Ok(CaptureSnapshot {
                    content,
                    cursor: raw.cursor,
                    changed,
                })
            }
            Err(error) => {
                shared.logger.log(
                    Event::new("scheduler", "capture_failed")
                        .with_data("session", session.session_name.clone())
                        .with_data("error", error.to_string()),
                );
                self.clear_live(session_id);
                let _ = shared.refresh.send(RefreshRequest {
                    session_id: session_id.clone(),
                    reason: RefreshReason::CaptureFailed,
                });
                Err(error)
            }
        }
    }

    fn publish(&self, session_id: SessionId, snapshot: CaptureSnapshot) {
        self.shared.live.send_if_modified(|slot| {
            let repaint = match slot {
                Some(previous) => {
                    previous.session_id != session_id
                        || snapshot.changed
                        || previous.snapshot.cursor != snapshot.cursor
                }
                None => true,
            };
            *slot = Some(LiveCapture {
                session_id,
                snapshot,
            });
            repaint
        });
    }

    pub(crate) fn clear_live(&self, session_id: &SessionId) {
        self.shared.live.send_if_modified(|slot| {
            let showing_session = slot
                .as_ref()
                .is_some_and(|live| &live.session_id == session_id);
            if showing_session {
                *slot = None;
            }
            showing_session
        });
    }

    pub fn spawn(&self) -> SchedulerTask {
        let (stop, stopped) = oneshot::channel();
        let scheduler = self.clone();
        let handle = tokio::spawn(async move { scheduler.run(stopped).await });
        SchedulerTask {
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    async fn run(self, mut stopped: oneshot::Receiver<()>) {
        let mut focus_changes = self.shared.focus.subscribe();
        let mut interval = self.current_interval();

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                changed = focus_changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = self.current_interval();
                    if next != interval {
                        self.shared.logger.log(
                            Event::new("scheduler", "cadence_changed")
                                .with_data("cadence", self.shared.focus.current().cadence().label())
                                .with_data("interval_ms", u64::try_from(next.as_millis()).unwrap_or(u64::MAX)),
                        );
                        interval = next;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.tick().await;
                    });
                }
            }
        }
    }
}

pub struct SchedulerTask {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerTask {
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SchedulerTask {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
