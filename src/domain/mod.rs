use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const SESSION_NAME_PREFIX: &str = "deckhand-";

static LAST_SESSION_ID_NANOS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Derives a new identifier from the wall clock in nanoseconds, bumped past the last
    /// issued value so two calls in the same nanosecond never collide.
    pub fn generate() -> Self {
        let now = now_nanos();
        let mut previous = LAST_SESSION_ID_NANOS.load(Ordering::Relaxed);
        loop {
            let next = now.max(previous.saturating_add(1));
            match LAST_SESSION_ID_NANOS.compare_exchange_weak(
                previous,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(next.to_string()),
                Err(observed) => previous = observed,
            }
        }
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

fn now_nanos() -> u64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

fn now_millis() -> u64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn session_name_for_id(id: &SessionId) -> String {
    format!("{SESSION_NAME_PREFIX}{id}")
}

pub fn session_id_from_name(session_name: &str) -> Option<SessionId> {
    let suffix = session_name.strip_prefix(SESSION_NAME_PREFIX)?;
    if suffix.is_empty() {
        return None;
    }
    Some(SessionId::new(suffix))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaneHandle(String);

impl PaneHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn fallback_for_session(session_name: &str) -> Self {
        Self(format!("{session_name}:0.0"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaneHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Running,
    Done,
    Failed,
}

impl SessionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionCorrelation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_item_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub session_name: String,
    pub pane: PaneHandle,
    pub display_name: String,
    pub work_dir: PathBuf,
    pub command: Option<String>,
    pub status: SessionStatus,
    pub created_at_ms: u64,
    pub correlation: SessionCorrelation,
}

impl Session {
    pub fn new(
        id: SessionId,
        pane: PaneHandle,
        display_name: String,
        work_dir: PathBuf,
        command: Option<String>,
    ) -> Self {
        let session_name = session_name_for_id(&id);
        Self {
            id,
            session_name,
            pane,
            display_name,
            work_dir,
            command,
            status: SessionStatus::Running,
            created_at_ms: now_millis(),
            correlation: SessionCorrelation::default(),
        }
    }

    pub fn with_correlation(mut self, correlation: SessionCorrelation) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            session_name: self.session_name.clone(),
            display_name: self.display_name.clone(),
            work_dir: self.work_dir.clone(),
            command: self.command.clone(),
            created_at_ms: self.created_at_ms,
            correlation: self.correlation.clone(),
        }
    }

    /// Rebuilds a session for a live multiplexer session. Live sessions are always running,
    /// whatever status was last observed.
    pub fn from_persisted(id: SessionId, pane: PaneHandle, persisted: &PersistedSession) -> Self {
        Self {
            session_name: session_name_for_id(&id),
            id,
            pane,
            display_name: persisted.display_name.clone(),
            work_dir: persisted.work_dir.clone(),
            command: persisted.command.clone(),
            status: SessionStatus::Running,
            created_at_ms: persisted.created_at_ms,
            correlation: persisted.correlation.clone(),
        }
    }

    pub fn synthesized(id: SessionId, pane: PaneHandle, fallback_dir: PathBuf) -> Self {
        let session_name = session_name_for_id(&id);
        Self {
            display_name: session_name.clone(),
            session_name,
            id,
            pane,
            work_dir: fallback_dir,
            command: None,
            status: SessionStatus::Running,
            created_at_ms: now_millis(),
            correlation: SessionCorrelation::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_name: String,
    pub display_name: String,
    pub work_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub created_at_ms: u64,
    #[serde(flatten)]
    pub correlation: SessionCorrelation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorPosition {
    pub col: u16,
    pub row: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSnapshot {
    pub content: String,
    pub cursor: CursorPosition,
    pub changed: bool,
}
