use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use deckhand::application::input::{KeyEvent, RouteOutcome};
use deckhand::application::orchestrator::{
    CreateRequest, OrchestratorDependencies, SessionOrchestrator,
};
use deckhand::application::scheduler::FocusEvent;
use deckhand::domain::{Session, SessionId, SessionStatus};
use deckhand::error::SessionError;
use deckhand::infrastructure::config;
use deckhand::infrastructure::event_log::{EventLogger, FileEventLogger, NullEventLogger};
use deckhand::infrastructure::persistence::JsonFileSessionStore;
use deckhand::infrastructure::process::ProcessCommandRunner;
use deckhand::infrastructure::tmux::TmuxMultiplexer;

const USAGE: &str = "usage: deckhand [--event-log <path>] <command>

commands:
  list [--status running|done|failed]
  create <name> [--dir <path>] [--command <cmd>] [--size <cols>x<rows>]
  destroy <session-id>
  capture <session-id>
  send <session-id> <text> [--no-enter]
  key <session-id> <key>            e.g. escape, up, ctrl+c
  resize <session-id> <cols> <rows>
  watch <session-id> [--seconds <n>]";

const DEFAULT_WATCH_SECONDS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    List {
        status: Option<SessionStatus>,
    },
    Create {
        display_name: String,
        work_dir: Option<PathBuf>,
        command: Option<String>,
        size: Option<(u16, u16)>,
    },
    Destroy {
        session_id: SessionId,
    },
    Capture {
        session_id: SessionId,
    },
    Send {
        session_id: SessionId,
        text: String,
        enter: bool,
    },
    Key {
        session_id: SessionId,
        key: KeyEvent,
    },
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    Watch {
        session_id: SessionId,
        seconds: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    event_log_path: Option<PathBuf>,
    command: CliCommand,
}

fn invalid_input(message: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, message.into())
}

fn parse_status(value: &str) -> std::io::Result<SessionStatus> {
    SessionStatus::from_label(value)
        .ok_or_else(|| invalid_input(format!("unknown status '{value}'")))
}

fn parse_dimension(value: &str) -> std::io::Result<u16> {
    match value.parse::<u16>() {
        Ok(dimension) if dimension > 0 => Ok(dimension),
        _ => Err(invalid_input(format!("invalid dimension '{value}'"))),
    }
}

fn parse_size(value: &str) -> std::io::Result<(u16, u16)> {
    let Some((cols, rows)) = value.split_once(['x', 'X']) else {
        return Err(invalid_input(format!("size must look like 120x40, got '{value}'")));
    };
    Ok((parse_dimension(cols)?, parse_dimension(rows)?))
}

fn parse_key(value: &str) -> KeyEvent {
    let lowered = value.to_ascii_lowercase();
    if let Some(rest) = lowered
        .strip_prefix("ctrl+")
        .or_else(|| lowered.strip_prefix("c-"))
        && !rest.is_empty()
    {
        return KeyEvent::ctrl(rest);
    }
    KeyEvent::named(value)
}

fn required(args: &mut impl Iterator<Item = String>, what: &str) -> std::io::Result<String> {
    args.next()
        .ok_or_else(|| invalid_input(format!("missing {what}")))
}

fn parse_cli_args(args: impl IntoIterator<Item = String>) -> std::io::Result<CliArgs> {
    let mut event_log_path = None;
    let mut args = args.into_iter().peekable();

    while let Some(argument) = args.next_if(|argument| argument.starts_with("--")) {
        match argument.as_str() {
            "--event-log" => {
                let Some(path) = args.next() else {
                    return Err(invalid_input("--event-log requires a file path"));
                };
                event_log_path = Some(PathBuf::from(path));
            }
            other => return Err(invalid_input(format!("unknown option '{other}'"))),
        }
    }

    let Some(name) = args.next() else {
        return Err(invalid_input("missing command"));
    };

    let command = match name.as_str() {
        "list" => {
            let mut status = None;
            while let Some(argument) = args.next() {
                match argument.as_str() {
                    "--status" => status = Some(parse_status(&required(&mut args, "status")?)?),
                    other => return Err(invalid_input(format!("unexpected argument '{other}'"))),
                }
            }
            CliCommand::List { status }
        }
        "create" => {
            let display_name = required(&mut args, "session name")?;
            let mut work_dir = None;
            let mut command = None;
            let mut size = None;
            while let Some(argument) = args.next() {
                match argument.as_str() {
                    "--dir" => work_dir = Some(PathBuf::from(required(&mut args, "directory")?)),
                    "--command" => command = Some(required(&mut args, "command")?),
                    "--size" => size = Some(parse_size(&required(&mut args, "size")?)?),
                    other => return Err(invalid_input(format!("unexpected argument '{other}'"))),
                }
            }
            CliCommand::Create {
                display_name,
                work_dir,
                command,
                size,
            }
        }
        "destroy" => CliCommand::Destroy {
            session_id: SessionId::new(required(&mut args, "session id")?),
        },
        "capture" => CliCommand::Capture {
            session_id: SessionId::new(required(&mut args, "session id")?),
        },
        "send" => {
            let session_id = SessionId::new(required(&mut args, "session id")?);
            let text = required(&mut args, "text")?;
            let enter = !args.any(|argument| argument == "--no-enter");
            CliCommand::Send {
                session_id,
                text,
                enter,
            }
        }
        "key" => CliCommand::Key {
            session_id: SessionId::new(required(&mut args, "session id")?),
            key: parse_key(&required(&mut args, "key")?),
        },
        "resize" => CliCommand::Resize {
            session_id: SessionId::new(required(&mut args, "session id")?),
            cols: parse_dimension(&required(&mut args, "columns")?)?,
            rows: parse_dimension(&required(&mut args, "rows")?)?,
        },
        "watch" => {
            let session_id = SessionId::new(required(&mut args, "session id")?);
            let mut seconds = DEFAULT_WATCH_SECONDS;
            while let Some(argument) = args.next() {
                match argument.as_str() {
                    "--seconds" => {
                        let value = required(&mut args, "seconds")?;
                        seconds = value
                            .parse()
                            .map_err(|_| invalid_input(format!("invalid seconds '{value}'")))?;
                    }
                    other => return Err(invalid_input(format!("unexpected argument '{other}'"))),
                }
            }
            CliCommand::Watch {
                session_id,
                seconds,
            }
        }
        other => return Err(invalid_input(format!("unknown command '{other}'"))),
    };

    Ok(CliArgs {
        event_log_path,
        command,
    })
}

fn ensure_event_log_parent_directory(path: &Path) -> std::io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent)
}

fn session_line(session: &Session) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        session.id,
        session.status.label(),
        session.display_name,
        session.work_dir.display()
    )
}

fn session_error(error: SessionError) -> std::io::Error {
    if error.is_session_gone() {
        return std::io::Error::new(std::io::ErrorKind::NotFound, error);
    }
    std::io::Error::other(error)
}

fn route_result(outcome: RouteOutcome) -> std::io::Result<()> {
    match outcome {
        RouteOutcome::SessionGone => Err(std::io::Error::other("session is no longer reachable")),
        RouteOutcome::Forwarded | RouteOutcome::EscapePending | RouteOutcome::PassthroughExited => {
            Ok(())
        }
    }
}

async fn run(orchestrator: &SessionOrchestrator, command: CliCommand) -> std::io::Result<()> {
    match command {
        CliCommand::List { status } => {
            for session in orchestrator
                .list()
                .iter()
                .filter(|session| status.is_none_or(|status| session.status == status))
            {
                println!("{}", session_line(session));
            }
            Ok(())
        }
        CliCommand::Create {
            display_name,
            work_dir,
            command,
            size,
        } => {
            let work_dir = match work_dir {
                Some(work_dir) => work_dir,
                None => std::env::current_dir()?,
            };
            let mut request = CreateRequest::new(display_name, work_dir);
            if let Some(command) = command {
                request = request.with_command(command);
            }
            if let Some((cols, rows)) = size {
                request = request.with_size(cols, rows);
            }
            let session = orchestrator
                .create(request)
                .await
                .map_err(session_error)?;
            println!("{}", session_line(&session));
            Ok(())
        }
        CliCommand::Destroy { session_id } => {
            orchestrator
                .destroy(&session_id)
                .await
                .map_err(session_error)?;
            Ok(())
        }
        CliCommand::Capture { session_id } => {
            let snapshot = orchestrator
                .capture_output(&session_id)
                .await
                .map_err(session_error)?;
            println!("{}", snapshot.content);
            eprintln!("cursor: {},{}", snapshot.cursor.col, snapshot.cursor.row);
            Ok(())
        }
        CliCommand::Send {
            session_id,
            text,
            enter,
        } => {
            route_result(orchestrator.send_text(&session_id, &text).await)?;
            if enter {
                route_result(
                    orchestrator
                        .send_input(&session_id, KeyEvent::named("return"))
                        .await,
                )?;
            }
            Ok(())
        }
        CliCommand::Key { session_id, key } => {
            route_result(orchestrator.send_input(&session_id, key).await)
        }
        CliCommand::Resize {
            session_id,
            cols,
            rows,
        } => orchestrator
            .resize(&session_id, cols, rows)
            .await
            .map_err(session_error),
        CliCommand::Watch {
            session_id,
            seconds,
        } => watch(orchestrator, session_id, Duration::from_secs(seconds)).await,
    }
}

/// Follows one session's screen through the capture scheduler until the time runs out or
/// the session goes away.
async fn watch(
    orchestrator: &SessionOrchestrator,
    session_id: SessionId,
    duration: Duration,
) -> std::io::Result<()> {
    if orchestrator.get(&session_id).is_none() {
        return Err(session_error(SessionError::NotFound(session_id)));
    }

    let focus = orchestrator.focus();
    focus.apply(FocusEvent::SelectionChanged(Some(session_id)));
    focus.apply(FocusEvent::OutputFocusChanged(true));

    let mut live = orchestrator.scheduler().subscribe_live();
    let task = orchestrator.scheduler().spawn();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    let mut stdout = std::io::stdout();
    let outcome = loop {
        tokio::select! {
            _ = &mut deadline => break Ok(()),
            changed = live.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let Some(capture) = live.borrow_and_update().clone() else {
                    break Err(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "session is no longer reachable",
                    ));
                };
                write!(stdout, "\u{1b}[2J\u{1b}[H{}", capture.snapshot.content)?;
                stdout.flush()?;
            }
        }
    };

    task.shutdown().await;
    orchestrator.process_refresh_requests().await;
    outcome
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = match parse_cli_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(error) => {
            eprintln!("{error}\n\n{USAGE}");
            return Err(error);
        }
    };

    let logger: Arc<dyn EventLogger> = match cli.event_log_path.as_ref() {
        Some(path) => {
            ensure_event_log_parent_directory(path)?;
            Arc::new(FileEventLogger::open(path)?)
        }
        None => Arc::new(NullEventLogger),
    };

    let loaded = config::load().map_err(std::io::Error::other)?;
    let store_path = config::session_store_path()
        .ok_or_else(|| std::io::Error::other("cannot resolve session store path"))?;
    let multiplexer = TmuxMultiplexer::new(
        loaded.config.session.tmux_binary.clone(),
        Arc::new(ProcessCommandRunner),
        Arc::clone(&logger),
    );

    let orchestrator = SessionOrchestrator::new(
        OrchestratorDependencies {
            multiplexer: Arc::new(multiplexer),
            store: Arc::new(JsonFileSessionStore::new(store_path)),
            logger,
        },
        loaded.config,
        std::env::current_dir()?,
    );
    orchestrator.start().await;

    let result = run(&orchestrator, cli.command).await;
    if let Err(error) = orchestrator.registry().flush().await {
        eprintln!("deckhand: session metadata not saved: {error}");
    }
    result
}
