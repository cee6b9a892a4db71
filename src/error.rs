use thiserror::Error;

use crate::domain::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("tmux is not installed or not on PATH; install tmux to start sessions")]
    MultiplexerUnavailable,
    #[error("session creation failed for '{session_name}': {message}")]
    Creation {
        session_name: String,
        message: String,
    },
    #[error("input to '{target}' failed: {message}")]
    Input { target: String, message: String },
    #[error("capture of '{target}' failed: {message}")]
    Capture { target: String, message: String },
    #[error("resize of '{target}' failed: {message}")]
    Resize { target: String, message: String },
    #[error("unknown session '{0}'")]
    NotFound(SessionId),
}

impl SessionError {
    /// Input and capture failures are how a vanished session shows up; both the capture
    /// scheduler and the input router react to these by requesting a registry refresh.
    pub fn is_session_gone(&self) -> bool {
        matches!(
            self,
            Self::Input { .. } | Self::Capture { .. } | Self::NotFound(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("session store io failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("session store encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}
