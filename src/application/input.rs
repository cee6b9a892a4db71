use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::application::refresh::{RefreshReason, RefreshRequest, RefreshSender};
use crate::application::registry::SessionRegistry;
use crate::application::scheduler::{FocusEvent, FocusHandle};
use crate::domain::SessionId;
use crate::infrastructure::event_log::{Event, EventLogger};
use crate::infrastructure::tmux::Multiplexer;

const ESCAPE_KEY: &str = "Escape";

/// A logical key press from the UI. `name` is either a key name such as `return` or `up`,
/// or the single character that was typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub name: String,
    pub ctrl: bool,
    pub meta: bool,
}

impl KeyEvent {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ctrl: false,
            meta: false,
        }
    }

    pub fn character(character: char) -> Self {
        Self::named(character.to_string())
    }

    pub fn ctrl(name: impl Into<String>) -> Self {
        Self {
            ctrl: true,
            ..Self::named(name)
        }
    }

    pub fn meta(name: impl Into<String>) -> Self {
        Self {
            meta: true,
            ..Self::named(name)
        }
    }

    fn is_escape(&self) -> bool {
        !self.ctrl && !self.meta && named_key(&self.name) == Some(ESCAPE_KEY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Named(String),
    Literal(String),
}

impl KeyAction {
    fn payload(&self) -> (&str, bool) {
        match self {
            Self::Named(key) => (key, false),
            Self::Literal(text) => (text, true),
        }
    }
}

fn named_key(name: &str) -> Option<&'static str> {
    let key = match name.to_ascii_lowercase().as_str() {
        "return" | "enter" => "Enter",
        "escape" | "esc" => ESCAPE_KEY,
        "tab" => "Tab",
        "backtab" => "BTab",
        "backspace" => "BSpace",
        "delete" => "DC",
        "up" => "Up",
        "down" => "Down",
        "left" => "Left",
        "right" => "Right",
        "space" => "Space",
        "home" => "Home",
        "end" => "End",
        "pageup" => "PPage",
        "pagedown" => "NPage",
        _ => return None,
    };
    Some(key)
}

fn single_printable(name: &str) -> Option<char> {
    let mut chars = name.chars();
    let character = chars.next()?;
    if chars.next().is_some() || character.is_control() {
        return None;
    }
    Some(character)
}

pub fn translate_key(event: &KeyEvent) -> KeyAction {
    if event.ctrl {
        let key = named_key(&event.name).map_or_else(
            || event.name.to_ascii_lowercase(),
            |named| named.to_string(),
        );
        return KeyAction::Named(format!("C-{key}"));
    }

    if let Some(named) = named_key(&event.name) {
        return KeyAction::Named(named.to_string());
    }

    if !event.meta
        && let Some(character) = single_printable(&event.name)
    {
        return KeyAction::Literal(character.to_string());
    }

    KeyAction::Literal(event.name.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Forwarded,
    EscapePending,
    PassthroughExited,
    SessionGone,
}

/// `claimed` is set by whichever side acts on the held Escape first: the window timer
/// sending it, or a later key press resolving it early.
struct PendingEscape {
    session_id: SessionId,
    claimed: Arc<AtomicBool>,
    timer: JoinHandle<()>,
}

impl PendingEscape {
    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }
}

struct RouterShared {
    multiplexer: Arc<dyn Multiplexer>,
    registry: Arc<SessionRegistry>,
    focus: FocusHandle,
    refresh: RefreshSender,
    logger: Arc<dyn EventLogger>,
}

impl RouterShared {
    async fn send(&self, session_id: &SessionId, action: &KeyAction) -> RouteOutcome {
        let Some(session) = self.registry.get(session_id) else {
            self.session_gone(session_id, "session is not registered".to_string());
            return RouteOutcome::SessionGone;
        };

        let (payload, literal) = action.payload();
        match self
            .multiplexer
            .send_keys(&session.pane, payload, literal)
            .await
        {
            Ok(()) => RouteOutcome::Forwarded,
            Err(error) => {
                self.session_gone(session_id, error.to_string());
                RouteOutcome::SessionGone
            }
        }
    }

    fn session_gone(&self, session_id: &SessionId, error: String) {
        self.logger.log(
            Event::new("input", "forward_failed")
                .with_data("session", session_id.to_string())
                .with_data("error", error),
        );
        self.focus.apply(FocusEvent::InteractiveChanged(false));
        let _ = self.refresh.send(RefreshRequest {
            session_id: session_id.clone(),
            reason: RefreshReason::InputFailed,
        });
    }
}

pub struct InputDependencies {
    pub multiplexer: Arc<dyn Multiplexer>,
    pub registry: Arc<SessionRegistry>,
    pub focus: FocusHandle,
    pub refresh: RefreshSender,
    pub logger: Arc<dyn EventLogger>,
}

/// Forwards key events to a session's pane. In passthrough mode a lone Escape is held for
/// the double-escape window: a second Escape inside the window leaves passthrough without
/// reaching the session, otherwise the held Escape is sent when the window closes.
pub struct InputRouter {
    shared: Arc<RouterShared>,
    double_escape_window: Duration,
    pending_escape: Mutex<Option<PendingEscape>>,
}

impl InputRouter {
    pub fn new(dependencies: InputDependencies, double_escape_window: Duration) -> Self {
        Self {
            shared: Arc::new(RouterShared {
                multiplexer: dependencies.multiplexer,
                registry: dependencies.registry,
                focus: dependencies.focus,
                refresh: dependencies.refresh,
                logger: dependencies.logger,
            }),
            double_escape_window,
            pending_escape: Mutex::new(None),
        }
    }

    pub fn passthrough(&self) -> bool {
        self.shared.focus.current().interactive
    }

    pub fn set_passthrough(&self, active: bool) {
        if !active {
            self.cancel_pending_escape();
        }
        self.shared
            .focus
            .apply(FocusEvent::InteractiveChanged(active));
    }

    fn take_pending_escape(&self) -> Option<PendingEscape> {
        self.pending_escape
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn cancel_pending_escape(&self) {
        if let Some(pending) = self.take_pending_escape() {
            pending.timer.abort();
        }
    }

    pub async fn forward(&self, session_id: &SessionId, event: KeyEvent) -> RouteOutcome {
        let action = translate_key(&event);

        if event.is_escape() && self.passthrough() {
            return self.handle_passthrough_escape(session_id);
        }

        if let Some(outcome) = self.flush_pending_escape().await
            && outcome == RouteOutcome::SessionGone
        {
            return outcome;
        }

        self.shared.send(session_id, &action).await
    }

    pub async fn forward_text(&self, session_id: &SessionId, text: &str) -> RouteOutcome {
        if text.is_empty() {
            return RouteOutcome::Forwarded;
        }
        if let Some(outcome) = self.flush_pending_escape().await
            && outcome == RouteOutcome::SessionGone
        {
            return outcome;
        }

        self.shared
            .send(session_id, &KeyAction::Literal(text.to_string()))
            .await
    }

    fn handle_passthrough_escape(&self, session_id: &SessionId) -> RouteOutcome {
        let mut pending = self
            .pending_escape
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = pending.take() {
            if previous.session_id == *session_id && previous.claim() {
                previous.timer.abort();
                drop(pending);
                self.shared
                    .focus
                    .apply(FocusEvent::InteractiveChanged(false));
                self.shared.logger.log(
                    Event::new("input", "passthrough_exited")
                        .with_data("session", session_id.to_string()),
                );
                return RouteOutcome::PassthroughExited;
            }
        }

        let claimed = Arc::new(AtomicBool::new(false));
        let timer = {
            let shared = Arc::clone(&self.shared);
            let claimed = Arc::clone(&claimed);
            let session_id = session_id.clone();
            let window = self.double_escape_window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                if claimed.swap(true, Ordering::AcqRel) {
                    return;
                }
                shared
                    .send(&session_id, &KeyAction::Named(ESCAPE_KEY.to_string()))
                    .await;
            })
        };
        *pending = Some(PendingEscape {
            session_id: session_id.clone(),
            claimed,
            timer,
        });
        RouteOutcome::EscapePending
    }

    /// Sends a held Escape right away so it reaches the session ahead of the key that
    /// followed it.
    async fn flush_pending_escape(&self) -> Option<RouteOutcome> {
        let pending = self.take_pending_escape()?;
        if !pending.claim() {
            return None;
        }
        pending.timer.abort();
        Some(
            self.shared
                .send(
                    &pending.session_id,
                    &KeyAction::Named(ESCAPE_KEY.to_string()),
                )
                .await,
        )
    }
}

impl Drop for InputRouter {
    fn drop(&mut self) {
        self.cancel_pending_escape();
    }
}
