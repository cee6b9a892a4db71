use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{CursorPosition, PaneHandle};
use crate::error::SessionError;
use crate::infrastructure::event_log::{Event, EventLogger, NullEventLogger};
use crate::infrastructure::process::{CommandOutput, CommandRunner, ProcessCommandRunner};

pub const DEFAULT_TMUX_BINARY: &str = "tmux";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCapture {
    pub content: String,
    pub cursor: CursorPosition,
}

/// Session lifecycle and I/O against an external terminal multiplexer. Each call runs one
/// external command and waits for it; nothing here retries.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    async fn probe_available(&self) -> bool;

    async fn create_session(
        &self,
        session_name: &str,
        work_dir: &Path,
        cols: u16,
        rows: u16,
    ) -> Result<(), SessionError>;

    async fn resolve_pane_handle(&self, session_name: &str) -> PaneHandle;

    async fn send_keys(
        &self,
        pane: &PaneHandle,
        payload: &str,
        literal: bool,
    ) -> Result<(), SessionError>;

    async fn capture_pane(&self, pane: &PaneHandle) -> Result<RawCapture, SessionError>;

    async fn resize_window(&self, session_name: &str, cols: u16, rows: u16);

    async fn kill_session(&self, session_name: &str);

    async fn list_managed_sessions(&self, name_prefix: &str) -> Vec<String>;
}

pub struct TmuxMultiplexer {
    binary: String,
    runner: Arc<dyn CommandRunner>,
    logger: Arc<dyn EventLogger>,
}

impl Default for TmuxMultiplexer {
    fn default() -> Self {
        Self::new(
            DEFAULT_TMUX_BINARY,
            Arc::new(ProcessCommandRunner),
            Arc::new(NullEventLogger),
        )
    }
}

impl TmuxMultiplexer {
    pub fn new(
        binary: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
        logger: Arc<dyn EventLogger>,
    ) -> Self {
        Self {
            binary: binary.into(),
            runner,
            logger,
        }
    }

    async fn run(&self, args: Vec<String>) -> std::io::Result<CommandOutput> {
        self.runner.run(&self.binary, &args).await
    }

    pub(crate) fn new_session_args(
        session_name: &str,
        work_dir: &Path,
        cols: u16,
        rows: u16,
    ) -> Vec<String> {
        vec![
            "new-session".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            session_name.to_string(),
            "-c".to_string(),
            work_dir.to_string_lossy().to_string(),
            "-x".to_string(),
            cols.to_string(),
            "-y".to_string(),
            rows.to_string(),
        ]
    }

    pub(crate) fn send_keys_args(pane: &PaneHandle, payload: &str, literal: bool) -> Vec<String> {
        let mut args = vec!["send-keys".to_string()];
        if literal {
            args.push("-l".to_string());
        }
        args.push("-t".to_string());
        args.push(pane.as_str().to_string());
        args.push("--".to_string());
        args.push(payload.to_string());
        args
    }

    pub(crate) fn capture_pane_args(pane: &PaneHandle) -> Vec<String> {
        vec![
            "capture-pane".to_string(),
            "-p".to_string(),
            "-e".to_string(),
            "-t".to_string(),
            pane.as_str().to_string(),
        ]
    }

    pub(crate) fn cursor_query_args(pane: &PaneHandle) -> Vec<String> {
        vec![
            "display-message".to_string(),
            "-p".to_string(),
            "-t".to_string(),
            pane.as_str().to_string(),
            "#{cursor_x},#{cursor_y}".to_string(),
        ]
    }

    fn creation_error(session_name: &str, message: String) -> SessionError {
        SessionError::Creation {
            session_name: session_name.to_string(),
            message,
        }
    }

    fn capture_error(pane: &PaneHandle, message: String) -> SessionError {
        SessionError::Capture {
            target: pane.as_str().to_string(),
            message,
        }
    }
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    async fn probe_available(&self) -> bool {
        matches!(self.run(vec!["-V".to_string()]).await, Ok(output) if output.success())
    }

    async fn create_session(
        &self,
        session_name: &str,
        work_dir: &Path,
        cols: u16,
        rows: u16,
    ) -> Result<(), SessionError> {
        let args = Self::new_session_args(session_name, work_dir, cols, rows);
        let output = match self.run(args).await {
            Ok(output) => output,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::MultiplexerUnavailable);
            }
            Err(error) => return Err(Self::creation_error(session_name, error.to_string())),
        };

        if !output.success() {
            return Err(Self::creation_error(
                session_name,
                output.stderr_or_status(),
            ));
        }
        Ok(())
    }

    async fn resolve_pane_handle(&self, session_name: &str) -> PaneHandle {
        let args = vec![
            "list-panes".to_string(),
            "-t".to_string(),
            session_name.to_string(),
            "-F".to_string(),
            "#{pane_id}".to_string(),
        ];
        let first_pane = match self.run(args).await {
            Ok(output) if output.success() => parse_first_pane(&output.stdout),
            _ => None,
        };

        first_pane.unwrap_or_else(|| PaneHandle::fallback_for_session(session_name))
    }

    async fn send_keys(
        &self,
        pane: &PaneHandle,
        payload: &str,
        literal: bool,
    ) -> Result<(), SessionError> {
        let output = self
            .run(Self::send_keys_args(pane, payload, literal))
            .await
            .map_err(|error| SessionError::Input {
                target: pane.as_str().to_string(),
                message: error.to_string(),
            })?;

        if !output.success() {
            return Err(SessionError::Input {
                target: pane.as_str().to_string(),
                message: output.stderr_or_status(),
            });
        }
        Ok(())
    }

    async fn capture_pane(&self, pane: &PaneHandle) -> Result<RawCapture, SessionError> {
        let content = self
            .run(Self::capture_pane_args(pane))
            .await
            .map_err(|error| Self::capture_error(pane, error.to_string()))?;
        if !content.success() {
            return Err(Self::capture_error(pane, content.stderr_or_status()));
        }

        let cursor = self
            .run(Self::cursor_query_args(pane))
            .await
            .map_err(|error| Self::capture_error(pane, error.to_string()))?;
        if !cursor.success() {
            return Err(Self::capture_error(pane, cursor.stderr_or_status()));
        }

        Ok(RawCapture {
            content: content.stdout,
            cursor: parse_cursor_position(&cursor.stdout).unwrap_or_default(),
        })
    }

    async fn resize_window(&self, session_name: &str, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            return;
        }

        let args = vec![
            "resize-window".to_string(),
            "-t".to_string(),
            session_name.to_string(),
            "-x".to_string(),
            cols.to_string(),
            "-y".to_string(),
            rows.to_string(),
        ];
        let error = match self.run(args).await {
            Ok(output) if output.success() => return,
            Ok(output) => output.stderr_or_status(),
            Err(error) => error.to_string(),
        };

        let error = SessionError::Resize {
            target: session_name.to_string(),
            message: error,
        };
        self.logger.log(
            Event::new("tmux", "resize_failed")
                .with_data("session", session_name)
                .with_data("error", error.to_string()),
        );
    }

    async fn kill_session(&self, session_name: &str) {
        let args = vec![
            "kill-session".to_string(),
            "-t".to_string(),
            session_name.to_string(),
        ];
        let error = match self.run(args).await {
            Ok(output) if output.success() => return,
            Ok(output) if tmux_error_indicates_missing_session(&output.stderr) => return,
            Ok(output) => output.stderr_or_status(),
            Err(error) => error.to_string(),
        };

        self.logger.log(
            Event::new("tmux", "kill_failed")
                .with_data("session", session_name)
                .with_data("error", error),
        );
    }

    async fn list_managed_sessions(&self, name_prefix: &str) -> Vec<String> {
        let args = vec![
            "list-sessions".to_string(),
            "-F".to_string(),
            "#{session_name}".to_string(),
        ];
        match self.run(args).await {
            Ok(output) if output.success() => filter_managed_sessions(&output.stdout, name_prefix),
            Ok(output) => {
                if !tmux_error_indicates_missing_session(&output.stderr) {
                    self.logger.log(
                        Event::new("tmux", "list_sessions_failed")
                            .with_data("error", output.stderr_or_status()),
                    );
                }
                Vec::new()
            }
            Err(error) => {
                self.logger.log(
                    Event::new("tmux", "list_sessions_failed").with_data("error", error.to_string()),
                );
                Vec::new()
            }
        }
    }
}

fn parse_first_pane(stdout: &str) -> Option<PaneHandle> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PaneHandle::new)
}

pub(crate) fn parse_cursor_position(stdout: &str) -> Option<CursorPosition> {
    let (col, row) = stdout.trim().split_once(',')?;
    Some(CursorPosition {
        col: col.trim().parse().ok()?,
        row: row.trim().parse().ok()?,
    })
}

pub(crate) fn filter_managed_sessions(stdout: &str, name_prefix: &str) -> Vec<String> {
    let mut sessions: Vec<String> = stdout
        .lines()
        .map(str::trim)
        .filter(|name| name.starts_with(name_prefix) && name.len() > name_prefix.len())
        .map(str::to_string)
        .collect();
    sessions.sort();
    sessions.dedup();
    sessions
}

pub fn tmux_error_indicates_missing_session(error: &str) -> bool {
    let lower = error.to_ascii_lowercase();
    lower.contains("can't find pane")
        || lower.contains("can't find session")
        || lower.contains("can't find window")
        || lower.contains("no server running")
        || lower.contains("no sessions")
        || lower.contains("failed to connect to server")
        || lower.contains("session not found")
}

#[cfg(test)]
mod tests;
