use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{CursorPosition, PaneHandle, PersistedSession};
use crate::error::{PersistError, SessionError};
use crate::infrastructure::persistence::{SessionStore, StoreLoad};
use crate::infrastructure::tmux::{Multiplexer, RawCapture};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentKeys {
    pub pane: String,
    pub payload: String,
    pub literal: bool,
}

#[derive(Debug, Clone)]
struct FakeSession {
    work_dir: PathBuf,
    content: String,
    cursor: CursorPosition,
}

pub(crate) struct FakeMultiplexer {
    available: bool,
    sessions: Mutex<BTreeMap<String, FakeSession>>,
    sent: Mutex<Vec<SentKeys>>,
    capture_delay: Duration,
    captures: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeMultiplexer {
    pub fn new() -> Self {
        Self {
            available: true,
            sessions: Mutex::new(BTreeMap::new()),
            sent: Mutex::new(Vec::new()),
            capture_delay: Duration::ZERO,
            captures: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn spawn_external(&self, session_name: &str, work_dir: &str) {
        self.sessions.lock().expect("sessions lock").insert(
            session_name.to_string(),
            FakeSession {
                work_dir: PathBuf::from(work_dir),
                content: String::new(),
                cursor: CursorPosition::default(),
            },
        );
    }

    pub fn vanish(&self, session_name: &str) {
        self.sessions
            .lock()
            .expect("sessions lock")
            .remove(session_name);
    }

    pub fn set_content(&self, session_name: &str, content: &str, cursor: CursorPosition) {
        if let Some(session) = self
            .sessions
            .lock()
            .expect("sessions lock")
            .get_mut(session_name)
        {
            session.content = content.to_string();
            session.cursor = cursor;
        }
    }

    pub fn work_dir(&self, session_name: &str) -> Option<PathBuf> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get(session_name)
            .map(|session| session.work_dir.clone())
    }

    pub fn sent(&self) -> Vec<SentKeys> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn session_for_pane(pane: &PaneHandle) -> &str {
        pane.as_str().trim_start_matches('%')
    }

    fn has_session(&self, session_name: &str) -> bool {
        self.sessions
            .lock()
            .expect("sessions lock")
            .contains_key(session_name)
    }
}

#[async_trait]
impl Multiplexer for FakeMultiplexer {
    async fn probe_available(&self) -> bool {
        self.available
    }

    async fn create_session(
        &self,
        session_name: &str,
        work_dir: &Path,
        _cols: u16,
        _rows: u16,
    ) -> Result<(), SessionError> {
        if !self.available {
            return Err(SessionError::MultiplexerUnavailable);
        }
        if self.has_session(session_name) {
            return Err(SessionError::Creation {
                session_name: session_name.to_string(),
                message: format!("duplicate session: {session_name}"),
            });
        }
        self.spawn_external(session_name, &work_dir.to_string_lossy());
        Ok(())
    }

    async fn resolve_pane_handle(&self, session_name: &str) -> PaneHandle {
        if self.has_session(session_name) {
            return PaneHandle::new(format!("%{session_name}"));
        }
        PaneHandle::fallback_for_session(session_name)
    }

    async fn send_keys(
        &self,
        pane: &PaneHandle,
        payload: &str,
        literal: bool,
    ) -> Result<(), SessionError> {
        if !self.has_session(Self::session_for_pane(pane)) {
            return Err(SessionError::Input {
                target: pane.as_str().to_string(),
                message: format!("can't find pane: {pane}"),
            });
        }
        self.sent.lock().expect("sent lock").push(SentKeys {
            pane: pane.as_str().to_string(),
            payload: payload.to_string(),
            literal,
        });
        Ok(())
    }

    async fn capture_pane(&self, pane: &PaneHandle) -> Result<RawCapture, SessionError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        if !self.capture_delay.is_zero() {
            tokio::time::sleep(self.capture_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let sessions = self.sessions.lock().expect("sessions lock");
        let Some(session) = sessions.get(Self::session_for_pane(pane)) else {
            return Err(SessionError::Capture {
                target: pane.as_str().to_string(),
                message: format!("can't find pane: {pane}"),
            });
        };
        Ok(RawCapture {
            content: session.content.clone(),
            cursor: session.cursor,
        })
    }

    async fn resize_window(&self, _session_name: &str, _cols: u16, _rows: u16) {}

    async fn kill_session(&self, session_name: &str) {
        self.vanish(session_name);
    }

    async fn list_managed_sessions(&self, name_prefix: &str) -> Vec<String> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .keys()
            .filter(|name| name.starts_with(name_prefix) && name.len() > name_prefix.len())
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub(crate) struct MemorySessionStore {
    rows: Mutex<Option<Vec<PersistedSession>>>,
    corrupt: bool,
    fail_saves: bool,
    saves: AtomicUsize,
}

impl MemorySessionStore {
    pub fn with_rows(rows: Vec<PersistedSession>) -> Self {
        Self {
            rows: Mutex::new(Some(rows)),
            ..Self::default()
        }
    }

    pub fn corrupt() -> Self {
        Self {
            corrupt: true,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<PersistedSession> {
        self.rows
            .lock()
            .expect("rows lock")
            .clone()
            .unwrap_or_default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> StoreLoad {
        if self.corrupt {
            return StoreLoad::Corrupt("session store parse failed: expected value".to_string());
        }
        match self.rows.lock().expect("rows lock").clone() {
            Some(rows) => StoreLoad::Loaded(rows),
            None => StoreLoad::Missing,
        }
    }

    async fn save(&self, sessions: &[PersistedSession]) -> Result<(), PersistError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            return Err(PersistError::Io {
                path: "memory".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        *self.rows.lock().expect("rows lock") = Some(sessions.to_vec());
        Ok(())
    }
}
