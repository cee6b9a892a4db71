use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    Multiplexer, TmuxMultiplexer, filter_managed_sessions, parse_cursor_position,
    tmux_error_indicates_missing_session,
};
use crate::domain::{CursorPosition, PaneHandle};
use crate::error::SessionError;
use crate::infrastructure::event_log::MemoryEventLogger;
use crate::infrastructure::process::{CommandOutput, CommandRunner};

#[derive(Default)]
struct ScriptedRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    responses: Mutex<VecDeque<std::io::Result<CommandOutput>>>,
}

impl ScriptedRunner {
    fn with_responses(responses: Vec<std::io::Result<CommandOutput>>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into_iter().collect()),
        })
    }

    fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((program.to_string(), args.to_vec()));
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Ok(ok("")))
    }
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
    }
}

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(1),
    }
}

fn tmux_with(runner: Arc<ScriptedRunner>) -> (TmuxMultiplexer, Arc<MemoryEventLogger>) {
    let logger = Arc::new(MemoryEventLogger::default());
    (TmuxMultiplexer::new("tmux", runner, logger.clone()), logger)
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn send_keys_args_mark_literal_payloads() {
    let pane = PaneHandle::new("%4");
    assert_eq!(
        TmuxMultiplexer::send_keys_args(&pane, "ls -la", true),
        strings(&["send-keys", "-l", "-t", "%4", "--", "ls -la"])
    );
    assert_eq!(
        TmuxMultiplexer::send_keys_args(&pane, "Enter", false),
        strings(&["send-keys", "-t", "%4", "--", "Enter"])
    );
}

#[test]
fn send_keys_args_end_options_before_dashed_payloads() {
    let pane = PaneHandle::new("%4");
    assert_eq!(
        TmuxMultiplexer::send_keys_args(&pane, "- item", true),
        strings(&["send-keys", "-l", "-t", "%4", "--", "- item"])
    );
    assert_eq!(
        TmuxMultiplexer::send_keys_args(&pane, "--help", true),
        strings(&["send-keys", "-l", "-t", "%4", "--", "--help"])
    );
}

#[test]
fn capture_pane_args_preserve_escape_sequences() {
    assert_eq!(
        TmuxMultiplexer::capture_pane_args(&PaneHandle::new("%2")),
        strings(&["capture-pane", "-p", "-e", "-t", "%2"])
    );
}

#[test]
fn new_session_args_carry_directory_and_size() {
    assert_eq!(
        TmuxMultiplexer::new_session_args("deckhand-1", Path::new("/tmp"), 120, 40),
        strings(&[
            "new-session",
            "-d",
            "-s",
            "deckhand-1",
            "-c",
            "/tmp",
            "-x",
            "120",
            "-y",
            "40"
        ])
    );
}

#[test]
fn cursor_position_parses_comma_pair() {
    assert_eq!(
        parse_cursor_position("12,3\n"),
        Some(CursorPosition { col: 12, row: 3 })
    );
    assert_eq!(parse_cursor_position("garbage"), None);
    assert_eq!(parse_cursor_position("1,x"), None);
}

#[test]
fn managed_session_filter_keeps_only_prefixed_names() {
    let stdout = "work\ndeckhand-2\ndeckhand-1\ndeckhand-\nnotes\ndeckhand-1\n";
    assert_eq!(
        filter_managed_sessions(stdout, "deckhand-"),
        strings(&["deckhand-1", "deckhand-2"])
    );
}

#[test]
fn missing_session_errors_are_recognized() {
    assert!(tmux_error_indicates_missing_session(
        "can't find session: deckhand-1"
    ));
    assert!(tmux_error_indicates_missing_session(
        "no server running on /tmp/tmux-1000/default"
    ));
    assert!(!tmux_error_indicates_missing_session("duplicate session: x"));
}

#[tokio::test]
async fn resolve_pane_handle_takes_first_listed_pane() {
    let runner = ScriptedRunner::with_responses(vec![Ok(ok("%7\n%8\n"))]);
    let (tmux, _) = tmux_with(runner.clone());

    let pane = tmux.resolve_pane_handle("deckhand-1").await;

    assert_eq!(pane, PaneHandle::new("%7"));
    assert_eq!(
        runner.calls()[0].1,
        strings(&["list-panes", "-t", "deckhand-1", "-F", "#{pane_id}"])
    );
}

#[tokio::test]
async fn resolve_pane_handle_falls_back_when_listing_fails() {
    let runner = ScriptedRunner::with_responses(vec![Ok(failed("can't find session"))]);
    let (tmux, _) = tmux_with(runner);

    let pane = tmux.resolve_pane_handle("deckhand-1").await;

    assert_eq!(pane, PaneHandle::new("deckhand-1:0.0"));
}

#[tokio::test]
async fn create_session_reports_missing_binary_as_unavailable() {
    let runner = ScriptedRunner::with_responses(vec![Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "No such file or directory",
    ))]);
    let (tmux, _) = tmux_with(runner);

    let error = tmux
        .create_session("deckhand-1", Path::new("/tmp"), 80, 24)
        .await
        .expect_err("missing binary should fail");

    assert_eq!(error, SessionError::MultiplexerUnavailable);
    assert!(error.to_string().contains("tmux"));
}

#[tokio::test]
async fn create_session_reports_non_zero_exit() {
    let runner =
        ScriptedRunner::with_responses(vec![Ok(failed("duplicate session: deckhand-1"))]);
    let (tmux, _) = tmux_with(runner);

    let error = tmux
        .create_session("deckhand-1", Path::new("/tmp"), 80, 24)
        .await
        .expect_err("non-zero exit should fail");

    assert_eq!(
        error,
        SessionError::Creation {
            session_name: "deckhand-1".to_string(),
            message: "duplicate session: deckhand-1".to_string(),
        }
    );
}

#[tokio::test]
async fn capture_pane_combines_content_and_cursor_query() {
    let runner = ScriptedRunner::with_responses(vec![
        Ok(ok("\u{1b}[32m$\u{1b}[0m ls\n")),
        Ok(ok("4,1\n")),
    ]);
    let (tmux, _) = tmux_with(runner.clone());

    let capture = tmux
        .capture_pane(&PaneHandle::new("%1"))
        .await
        .expect("capture should succeed");

    assert_eq!(capture.content, "\u{1b}[32m$\u{1b}[0m ls\n");
    assert_eq!(capture.cursor, CursorPosition { col: 4, row: 1 });
    let calls = runner.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1[0], "display-message");
}

#[tokio::test]
async fn capture_pane_fails_when_cursor_query_fails() {
    let runner = ScriptedRunner::with_responses(vec![
        Ok(ok("text")),
        Ok(failed("can't find pane: %1")),
    ]);
    let (tmux, _) = tmux_with(runner);

    let error = tmux
        .capture_pane(&PaneHandle::new("%1"))
        .await
        .expect_err("cursor failure should fail the capture");

    assert!(matches!(error, SessionError::Capture { .. }));
}

#[tokio::test]
async fn send_keys_non_zero_exit_is_input_error() {
    let runner = ScriptedRunner::with_responses(vec![Ok(failed("can't find pane: %9"))]);
    let (tmux, _) = tmux_with(runner);

    let error = tmux
        .send_keys(&PaneHandle::new("%9"), "Enter", false)
        .await
        .expect_err("send should fail");

    assert!(matches!(error, SessionError::Input { .. }));
    assert!(error.is_session_gone());
}

#[tokio::test]
async fn resize_failure_is_logged_not_raised() {
    let runner = ScriptedRunner::with_responses(vec![Ok(failed("no current client"))]);
    let (tmux, logger) = tmux_with(runner);

    tmux.resize_window("deckhand-1", 100, 30).await;

    assert_eq!(logger.count("tmux", "resize_failed"), 1);
}

#[tokio::test]
async fn resize_with_zero_dimension_is_skipped() {
    let runner = ScriptedRunner::with_responses(Vec::new());
    let (tmux, _) = tmux_with(runner.clone());

    tmux.resize_window("deckhand-1", 0, 30).await;

    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn kill_of_absent_session_is_silent() {
    let runner =
        ScriptedRunner::with_responses(vec![Ok(failed("can't find session: deckhand-1"))]);
    let (tmux, logger) = tmux_with(runner);

    tmux.kill_session("deckhand-1").await;

    assert!(logger.events().is_empty());
}

#[tokio::test]
async fn list_managed_sessions_treats_no_server_as_empty() {
    let runner = ScriptedRunner::with_responses(vec![Ok(failed(
        "no server running on /tmp/tmux-0/default",
    ))]);
    let (tmux, logger) = tmux_with(runner);

    assert!(tmux.list_managed_sessions("deckhand-").await.is_empty());
    assert!(logger.events().is_empty());
}

#[tokio::test]
async fn probe_reports_missing_binary_as_unavailable() {
    let runner = ScriptedRunner::with_responses(vec![Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "missing",
    ))]);
    let (tmux, _) = tmux_with(runner);

    assert!(!tmux.probe_available().await);
}
