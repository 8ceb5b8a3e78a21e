//! Control console shared by the recorder binaries. Console lines map onto
//! coordinator requests; output goes through caller-supplied handlers so a
//! binary can keep stdout clean for its own use.

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};

use snaptrail_common::protocol::{CaptureOptions, CaptureRequest, Reply, Request};

use crate::coordinator::Coordinator;

#[derive(Clone, Copy)]
pub struct OutputHandlers {
    pub out: fn(&str),
    pub err: fn(&str),
}

pub enum FileErrorMode {
    Plain,
    WithLine,
}

pub struct FileOptions {
    pub stop_on_error: bool,
    pub error_mode: FileErrorMode,
}

pub struct ReplOptions<'a> {
    pub banner_lines: &'a [&'a str],
    pub prompt: &'a str,
    pub exit_commands: &'a [&'a str],
    pub handle_ctrl_c: bool,
    pub ctrl_c_message: Option<&'a str>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("Unknown command: {0}. Type 'help' for the command list.")]
    UnknownCommand(String),
}

const HELP: &str = "Commands:\n  \
    toggle       start or stop the recording session\n  \
    status       session state, debug flag and connected pages\n  \
    shot [why]   capture the active tab now\n  \
    save         export the running session without ending it\n  \
    debug        toggle the persisted debug log\n  \
    force-stop   reset every session and page unconditionally\n  \
    help         this list\n  \
    exit         leave the console";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Toggle,
    Status,
    Save,
    Debug,
    ForceStop,
    Shot { reason: Option<String> },
    Peers,
    Help,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, ConsoleError> {
        let head = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        match head.as_str() {
            "toggle" | "t" => Ok(ConsoleCommand::Toggle),
            "status" | "s" => Ok(ConsoleCommand::Status),
            "save" => Ok(ConsoleCommand::Save),
            "debug" => Ok(ConsoleCommand::Debug),
            "force-stop" | "forcestop" => Ok(ConsoleCommand::ForceStop),
            "shot" | "capture" => {
                let reason = line
                    .split_once(char::is_whitespace)
                    .map(|(_, rest)| rest.trim().to_string())
                    .filter(|rest| !rest.is_empty());
                Ok(ConsoleCommand::Shot { reason })
            }
            "peers" | "pages" => Ok(ConsoleCommand::Peers),
            "help" | "?" => Ok(ConsoleCommand::Help),
            other => Err(ConsoleError::UnknownCommand(other.to_string())),
        }
    }
}

/// Renders a coordinator reply for the console.
pub fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::State(state) => format!(
            "Session {} | debug {}",
            if state.session_active { "active" } else { "inactive" },
            if state.debug_mode { "on" } else { "off" },
        ),
        Reply::Ack(ack) if ack.success => {
            let mut parts: Vec<String> = Vec::new();
            if let Some(active) = ack.session_active {
                parts.push(format!(
                    "session {}",
                    if active { "started" } else { "ended" }
                ));
            }
            if let Some(debug) = ack.debug_mode {
                parts.push(format!("debug {}", if debug { "on" } else { "off" }));
            }
            if let Some(filename) = &ack.filename {
                parts.push(format!("saved {}", filename));
            }
            if let Some(message) = &ack.message {
                parts.push(message.clone());
            }
            if parts.is_empty() {
                parts.push("ok".to_string());
            }
            parts.join(" | ")
        }
        Reply::Ack(ack) => format!(
            "Failed: {}",
            ack.error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

/// Executes console commands against a coordinator.
pub struct ControlConsole {
    coordinator: Coordinator,
}

impl ControlConsole {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    pub async fn execute_line(&self, line: &str) -> Result<String, ConsoleError> {
        let command = ConsoleCommand::parse(line)?;
        Ok(self.execute(command).await)
    }

    pub async fn execute(&self, command: ConsoleCommand) -> String {
        match command {
            ConsoleCommand::Toggle => {
                format_reply(&self.coordinator.handle(Request::ToggleSession).await)
            }
            ConsoleCommand::Status => {
                let reply = self.coordinator.handle(Request::GetState).await;
                let peers = self.coordinator.pages().peer_count().await;
                format!("{} | pages {}", format_reply(&reply), peers)
            }
            ConsoleCommand::Save => {
                format_reply(&self.coordinator.handle(Request::SaveSession).await)
            }
            ConsoleCommand::Debug => {
                format_reply(&self.coordinator.handle(Request::ToggleDebugMode).await)
            }
            ConsoleCommand::ForceStop => {
                format_reply(&self.coordinator.handle(Request::ForceStopAllSessions).await)
            }
            ConsoleCommand::Shot { reason } => {
                let request = Request::CaptureScreenshot(CaptureRequest {
                    options: CaptureOptions {
                        reason,
                        ..CaptureOptions::default()
                    },
                });
                format_reply(&self.coordinator.handle(request).await)
            }
            ConsoleCommand::Peers => format!(
                "pages connected: {}",
                self.coordinator.pages().peer_count().await
            ),
            ConsoleCommand::Help => HELP.to_string(),
        }
    }
}

/// Possible outcomes from reading a single console line.
enum ReadLineResult {
    /// A non-empty input line to process.
    Input(String),
    /// Empty line -- skip and re-prompt.
    Skip,
    /// EOF, exit command or interrupt -- terminate the loop.
    Exit,
    /// I/O error while reading.
    Error(io::Error),
}

fn classify_line(
    result: Result<Option<String>, io::Error>,
    exit_commands: &[&str],
) -> ReadLineResult {
    match result {
        Ok(Some(input)) => {
            let trimmed = input.trim().to_string();
            if trimmed.is_empty() {
                ReadLineResult::Skip
            } else if exit_commands.contains(&trimmed.as_str()) {
                ReadLineResult::Exit
            } else {
                ReadLineResult::Input(trimmed)
            }
        }
        Ok(None) => ReadLineResult::Exit,
        Err(e) => ReadLineResult::Error(e),
    }
}

async fn read_line(
    reader: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    options: &ReplOptions<'_>,
    output: OutputHandlers,
) -> ReadLineResult {
    if options.handle_ctrl_c {
        tokio::select! {
            line = reader.next_line() => classify_line(line, options.exit_commands),
            _ = tokio::signal::ctrl_c() => {
                if let Some(message) = options.ctrl_c_message {
                    (output.out)(message);
                }
                ReadLineResult::Exit
            }
        }
    } else {
        classify_line(reader.next_line().await, options.exit_commands)
    }
}

pub async fn run_file(
    console: &ControlConsole,
    output: OutputHandlers,
    path: &str,
    options: FileOptions,
) -> Result<(), Box<dyn Error>> {
    let content = std::fs::read_to_string(path)?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match console.execute_line(trimmed).await {
            Ok(result) => (output.out)(&result),
            Err(err) => {
                match options.error_mode {
                    FileErrorMode::Plain => (output.err)(&format!("Error: {}", err)),
                    FileErrorMode::WithLine => {
                        (output.err)(&format!("Error executing line '{}': {}", trimmed, err))
                    }
                }
                if options.stop_on_error {
                    return Err(io::Error::other(err.to_string()).into());
                }
            }
        }
    }
    Ok(())
}

pub async fn run_repl(
    console: &ControlConsole,
    output: OutputHandlers,
    options: ReplOptions<'_>,
) -> Result<(), Box<dyn Error>> {
    for line in options.banner_lines {
        (output.out)(line);
    }

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = io::stdout();

    loop {
        print!("{}", options.prompt);
        stdout.flush()?;

        match read_line(&mut reader, &options, output).await {
            ReadLineResult::Input(line) => match console.execute_line(&line).await {
                Ok(result) => (output.out)(&result),
                Err(err) => (output.err)(&format!("Error: {}", err)),
            },
            ReadLineResult::Skip => continue,
            ReadLineResult::Exit => break,
            ReadLineResult::Error(e) => return Err(e.into()),
        }
    }
    Ok(())
}
