//! Line-oriented command console driving a [`Session`].

use crate::presenter::TerminalPresenter;
use anyhow::Result;
use facewatch_core::{LoopPhase, Session};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const HELP: &str = "commands: register <name> <image>, remove <name>, list, start, stop, status, help, quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { name: String, image: PathBuf },
    Remove(String),
    List,
    Start,
    Stop,
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "register" => {
            let (name, image) = rest
                .split_once(char::is_whitespace)
                .map(|(n, i)| (n, i.trim()))
                .filter(|(_, i)| !i.is_empty())
                .ok_or_else(|| "usage: register <name> <image>".to_string())?;
            Command::Register {
                name: name.to_string(),
                image: PathBuf::from(image),
            }
        }
        "remove" | "rm" => {
            if rest.is_empty() {
                return Err("usage: remove <name>".to_string());
            }
            Command::Remove(rest.to_string())
        }
        "list" | "ls" => Command::List,
        "start" => Command::Start,
        "stop" => Command::Stop,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command: {other} ({HELP})")),
    };
    Ok(Some(command))
}

/// Read commands from stdin until `quit` or end of input.
pub async fn run(session: &Session, presenter: &TerminalPresenter) -> Result<()> {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => execute(session, presenter, command).await,
            Err(usage) => println!("{usage}"),
        }
    }
    Ok(())
}

/// Run one command. Outcomes are reported through the presenter by the
/// session; errors are only logged here.
pub async fn execute(session: &Session, presenter: &TerminalPresenter, command: Command) {
    match command {
        Command::Register { name, image } => register_file(session, &name, &image).await,
        Command::Remove(name) => {
            if !session.remove(&name) {
                println!("No registered user named {name}");
            }
        }
        Command::List => {
            for sample in session.samples() {
                println!(
                    "{:<20} {:>4} dims  registered {}",
                    sample.label,
                    sample.descriptor.len(),
                    sample.registered_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            if session.labels().is_empty() {
                println!("No registered users.");
            }
        }
        Command::Start => {
            if let Err(e) = session.start_recognition() {
                tracing::debug!(error = %e, "start refused");
            }
        }
        Command::Stop => session.stop_recognition(),
        Command::Status => print_status(session, presenter),
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

/// Register every `NAME=IMAGE` pair, continuing past failures.
pub async fn register_all(session: &Session, pairs: &[(String, PathBuf)]) {
    for (name, image) in pairs {
        register_file(session, name, image).await;
    }
}

async fn register_file(session: &Session, name: &str, image: &std::path::Path) {
    let bytes = match tokio::fs::read(image).await {
        Ok(bytes) => bytes,
        Err(e) => {
            println!("Could not read {}: {e}", image.display());
            return;
        }
    };
    if let Err(e) = session.register_from_image(name, &bytes).await {
        tracing::debug!(name, image = %image.display(), error = %e, "registration failed");
    }
}

fn print_status(session: &Session, presenter: &TerminalPresenter) {
    let phase = session
        .recognition()
        .map_or(LoopPhase::Inactive, |r| r.phase());
    let state = session.recognition_state();
    println!("models loaded: {}", session.is_ready());
    println!("recognition:   {phase:?}");
    match state.last_label {
        Some(label) => println!("last label:    {label}"),
        None => println!("last label:    -"),
    }
    println!("registered:    {}", session.labels().len());
    if let Some(text) = presenter.status() {
        println!("status:        {text}");
    }
}

/// Parse a `NAME=IMAGE` argument.
pub fn parse_registration(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((name, image)) if !name.trim().is_empty() && !image.is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(image)))
        }
        _ => Err(format!("expected NAME=IMAGE, got {arg:?}")),
    }
}
