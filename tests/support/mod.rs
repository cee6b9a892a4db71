#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deckhand::application::orchestrator::{OrchestratorDependencies, SessionOrchestrator};
use deckhand::infrastructure::config::DeckhandConfig;
use deckhand::infrastructure::event_log::{EventLogger, MemoryEventLogger};
use deckhand::infrastructure::persistence::JsonFileSessionStore;
use deckhand::infrastructure::process::{CommandOutput, CommandRunner};
use deckhand::infrastructure::tmux::TmuxMultiplexer;

static SCRATCH_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A per-test directory under the system temp dir, removed on drop.
pub struct ScratchDir {
    pub path: PathBuf,
}

impl ScratchDir {
    pub fn new(label: &str) -> Self {
        let sequence = SCRATCH_SEQUENCE.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "deckhand-test-{label}-{}-{sequence}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).expect("scratch dir should be created");
        Self { path }
    }

    pub fn store_path(&self) -> PathBuf {
        self.path.join("sessions.json")
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[derive(Debug, Clone)]
struct SimulatedSession {
    pane_id: String,
    work_dir: String,
    cols: u16,
    rows: u16,
    screen: String,
}

/// Answers tmux command lines from an in-memory server, so the real adapter's argument
/// building and output parsing run without a tmux binary.
#[derive(Default)]
pub struct SimulatedTmux {
    sessions: Mutex<BTreeMap<String, SimulatedSession>>,
    next_pane: AtomicU64,
    calls: Mutex<Vec<Vec<String>>>,
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: stdout.into(),
        stderr: String::new(),
        exit_code: Some(0),
    }
}

fn failed(stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.into(),
        exit_code: Some(1),
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .map(String::as_str)
}

impl SimulatedTmux {
    pub fn spawn_external(&self, session_name: &str, work_dir: &str) {
        let pane = self.next_pane.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().expect("sessions lock").insert(
            session_name.to_string(),
            SimulatedSession {
                pane_id: format!("%{pane}"),
                work_dir: work_dir.to_string(),
                cols: 80,
                rows: 24,
                screen: String::new(),
            },
        );
    }

    pub fn vanish(&self, session_name: &str) {
        self.sessions
            .lock()
            .expect("sessions lock")
            .remove(session_name);
    }

    pub fn session_names(&self) -> Vec<String> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .keys()
            .cloned()
            .collect()
    }

    pub fn work_dir(&self, session_name: &str) -> Option<String> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get(session_name)
            .map(|session| session.work_dir.clone())
    }

    pub fn size(&self, session_name: &str) -> Option<(u16, u16)> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get(session_name)
            .map(|session| (session.cols, session.rows))
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn handle(&self, args: &[String]) -> CommandOutput {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        let Some(command) = args.first() else {
            return failed("usage: tmux");
        };

        match command.as_str() {
            "-V" => ok("tmux 3.4\n"),
            "new-session" => {
                let name = flag_value(args, "-s").unwrap_or_default().to_string();
                if sessions.contains_key(&name) {
                    return failed(format!("duplicate session: {name}"));
                }
                let pane = self.next_pane.fetch_add(1, Ordering::SeqCst);
                sessions.insert(
                    name,
                    SimulatedSession {
                        pane_id: format!("%{pane}"),
                        work_dir: flag_value(args, "-c").unwrap_or_default().to_string(),
                        cols: flag_value(args, "-x")
                            .and_then(|value| value.parse().ok())
                            .unwrap_or(80),
                        rows: flag_value(args, "-y")
                            .and_then(|value| value.parse().ok())
                            .unwrap_or(24),
                        screen: String::new(),
                    },
                );
                ok("")
            }
            "list-panes" => {
                let name = flag_value(args, "-t").unwrap_or_default();
                match sessions.get(name) {
                    Some(session) => ok(format!("{}\n", session.pane_id)),
                    None => failed(format!("can't find session: {name}")),
                }
            }
            "send-keys" => {
                let (options, payload) = match args.iter().position(|arg| arg == "--") {
                    Some(index) => (&args[..index], args.get(index + 1).cloned()),
                    None => (&args[..args.len().saturating_sub(1)], args.last().cloned()),
                };
                let payload = payload.unwrap_or_default();
                if !args.iter().any(|arg| arg == "--") && payload.starts_with('-') {
                    return failed(format!("command send-keys: invalid flag {payload}"));
                }
                let target = flag_value(options, "-t").unwrap_or_default();
                let literal = options.iter().any(|arg| arg == "-l");
                let Some(session) = sessions
                    .values_mut()
                    .find(|session| session.pane_id == target)
                else {
                    return failed(format!("can't find pane: {target}"));
                };
                if literal {
                    session.screen.push_str(&payload);
                } else if payload == "Enter" {
                    session.screen.push('\n');
                }
                ok("")
            }
            "capture-pane" | "display-message" => {
                let target = flag_value(args, "-t").unwrap_or_default();
                let Some(session) = sessions.values().find(|session| session.pane_id == target)
                else {
                    return failed(format!("can't find pane: {target}"));
                };
                if command == "capture-pane" {
                    return ok(format!("{}\n", session.screen));
                }
                let last_line = session.screen.rsplit('\n').next().unwrap_or_default();
                let row = session.screen.matches('\n').count();
                ok(format!("{},{row}\n", last_line.chars().count()))
            }
            "resize-window" => {
                let name = flag_value(args, "-t").unwrap_or_default();
                let Some(session) = sessions.get_mut(name) else {
                    return failed(format!("can't find session: {name}"));
                };
                session.cols = flag_value(args, "-x")
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(session.cols);
                session.rows = flag_value(args, "-y")
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(session.rows);
                ok("")
            }
            "kill-session" => {
                let name = flag_value(args, "-t").unwrap_or_default();
                match sessions.remove(name) {
                    Some(_) => ok(""),
                    None => failed(format!("can't find session: {name}")),
                }
            }
            "list-sessions" => {
                if sessions.is_empty() {
                    return failed("no server running on /tmp/tmux-1000/default");
                }
                let names: Vec<&str> = sessions.keys().map(String::as_str).collect();
                ok(format!("{}\n", names.join("\n")))
            }
            other => failed(format!("unknown command: {other}")),
        }
    }
}

#[async_trait]
impl CommandRunner for SimulatedTmux {
    async fn run(&self, _program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        self.calls.lock().expect("calls lock").push(args.to_vec());
        Ok(self.handle(args))
    }
}

/// Stands in for a host without tmux on PATH.
pub struct MissingBinary;

#[async_trait]
impl CommandRunner for MissingBinary {
    async fn run(&self, program: &str, _args: &[String]) -> std::io::Result<CommandOutput> {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{program}: not found"),
        ))
    }
}

pub fn orchestrator(
    runner: Arc<dyn CommandRunner>,
    store_path: PathBuf,
    logger: Arc<MemoryEventLogger>,
) -> SessionOrchestrator {
    let logger = logger as Arc<dyn EventLogger>;
    SessionOrchestrator::new(
        OrchestratorDependencies {
            multiplexer: Arc::new(TmuxMultiplexer::new("tmux", runner, Arc::clone(&logger))),
            store: Arc::new(JsonFileSessionStore::new(store_path)),
            logger,
        },
        DeckhandConfig::default(),
        PathBuf::from("/tmp"),
    )
}
