//! CodeSync CLI Client
//!
//! Joins a room on a CodeSync server and edits its shared text from the
//! terminal.
//!
//! # Usage
//!
//! ```bash
//! # Join a room on the local server
//! codesync abc123
//!
//! # Remote server, custom identity
//! codesync abc123 --host example.com --port 4380 --name ada --color "#f80"
//! ```

mod session;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use parking_lot::Mutex;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use codesync_core::{Debouncer, ParticipantInfo, RoomId, SAVE_DEBOUNCE};
use codesync_protocol::{decode_server, encode_line, ClientMessage};

use crate::session::Session;

/// CodeSync Command Line Interface
#[derive(Parser, Debug)]
#[command(name = "codesync")]
#[command(author, version, about = "CodeSync CLI - collaborative editing from the terminal")]
struct Args {
    /// Room to join
    room: String,

    /// Server hostname
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "CODESYNC_HOST")]
    host: String,

    /// Server TCP port
    #[arg(short, long, default_value = "4380", env = "CODESYNC_PORT")]
    port: u16,

    /// Display name
    #[arg(short, long, env = "CODESYNC_NAME")]
    name: Option<String>,

    /// Color tag shown to other participants
    #[arg(long, default_value = "hsl(210, 70%, 60%)")]
    color: String,

    /// Quiet mode (no banner)
    #[arg(short, long)]
    quiet: bool,
}

type Outgoing = mpsc::UnboundedSender<ClientMessage>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let room_id = RoomId::new(args.room.as_str()).context("Invalid room ID")?;
    let me = ParticipantInfo {
        name: args.name.clone().unwrap_or_else(default_name),
        color: args.color.clone(),
    };

    let addr = format!("{}:{}", args.host, args.port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    let (read_half, mut write_half) = stream.into_split();

    if !args.quiet {
        println!(
            "{}",
            format!(
                r#"
  ╔═╗┌─┐┌┬┐┌─┐╔═╗┬ ┬┌┐┌┌─┐   CLI
  ║  │ │ ││├┤ ╚═╗└┬┘││││     Connected to {}
  ╚═╝└─┘─┴┘└─┘╚═╝ ┴ ┘└┘└─┘   Room {} as {}. Type 'help' for commands
"#,
                addr, room_id, me.name
            )
            .cyan()
        );
    }

    let session = Arc::new(Mutex::new(Session::new(room_id, me)));
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();

    // Writer: one JSON line per message
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let bytes = match encode_line(&message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Failed to encode message");
                    continue;
                }
            };
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    // Reader: fold server messages into the session
    let reader = {
        let session = session.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let message = match decode_server(line.as_bytes()) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!(error = %e, "Unreadable server message");
                                continue;
                            }
                        };
                        let reaction = session.lock().on_message(message, Instant::now());
                        for outgoing in reaction.outgoing {
                            let _ = tx.send(outgoing);
                        }
                        if let Some(notice) = reaction.notice {
                            println!("{} {}", "*".blue(), notice.dimmed());
                        }
                    }
                    Ok(None) => {
                        println!("{}", "Connection closed by server.".red());
                        break;
                    }
                    Err(e) => {
                        eprintln!("{} {}", "Error:".red(), e);
                        break;
                    }
                }
            }
        })
    };

    let debouncer = {
        let session = session.clone();
        let tx = tx.clone();
        Arc::new(Debouncer::spawn(SAVE_DEBOUNCE, move || {
            let _ = tx.send(session.lock().save_request());
            std::future::ready(())
        }))
    };

    let _ = tx.send(session.lock().join_message());

    let repl = {
        let session = session.clone();
        let tx = tx.clone();
        let debouncer = debouncer.clone();
        tokio::task::spawn_blocking(move || run_repl(&session, &tx, &debouncer))
    };
    let outcome = repl.await.context("REPL task failed")?;

    // Flush a pending save before hanging up
    if let Ok(debouncer) = Arc::try_unwrap(debouncer) {
        debouncer.close().await;
    }
    reader.abort();
    let _ = reader.await;
    drop(tx);
    let _ = writer.await;

    outcome
}

fn run_repl(session: &Mutex<Session>, tx: &Outgoing, debouncer: &Debouncer) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_path = home_dir().map(|p| p.join(".codesync_history")).unwrap_or_default();
    let _ = rl.load_history(&history_path);

    loop {
        let prompt = format!("{}> ", session.lock().room_id().as_str().green());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match execute(line, session, tx, debouncer) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("{} {}", "Error:".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}

/// Run one REPL command. Returns false when the user wants to exit.
fn execute(line: &str, session: &Mutex<Session>, tx: &Outgoing, debouncer: &Debouncer) -> Result<bool> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));

    match cmd.to_lowercase().as_str() {
        "type" => {
            let text = rest.replace("\\n", "\n");
            send(tx, session.lock().type_text(&text))?;
            debouncer.trigger();
        }
        "show" => {
            let session = session.lock();
            println!("{}", format!("[{}]", session.language()).dimmed());
            println!("{}", session.text());
        }
        "cursor" => {
            let mut parts = rest.split_whitespace();
            let line_number: u32 = parts.next().context("usage: cursor <line> <col>")?.parse()?;
            let column: u32 = parts.next().context("usage: cursor <line> <col>")?.parse()?;
            send(tx, session.lock().cursor(line_number, column))?;
        }
        "status" => {
            let state: serde_json::Value = serde_json::from_str(rest).context("status takes a JSON value")?;
            send(tx, session.lock().status(state))?;
        }
        "who" => {
            let session = session.lock();
            for p in session.participants() {
                println!("{} {}", p.name.yellow(), format!("({}, {})", p.id, p.color).dimmed());
            }
            for (id, state) in session.awareness() {
                println!("  {} {}", id.to_string().dimmed(), state);
            }
        }
        "cursors" => {
            let mut session = session.lock();
            let cursors = session.visible_cursors(Instant::now());
            if cursors.is_empty() {
                println!("{}", "(none)".dimmed());
            }
            for (_, cursor) in cursors {
                println!(
                    "{} at {}:{}",
                    cursor.participant.name.yellow(),
                    cursor.position.line_number,
                    cursor.position.column
                );
            }
        }
        "save" => send(tx, session.lock().save_request())?,
        "leave" => send(tx, session.lock().leave_message())?,
        "join" => send(tx, session.lock().join_message())?,
        "ping" => send(tx, ClientMessage::Ping)?,
        "help" => print_help(),
        "clear" => print!("\x1B[2J\x1B[1;1H"),
        "quit" | "exit" => return Ok(false),
        other => anyhow::bail!("unknown command '{}', try 'help'", other),
    }

    Ok(true)
}

fn send(tx: &Outgoing, message: ClientMessage) -> Result<()> {
    tx.send(message).map_err(|_| anyhow::anyhow!("connection closed"))
}

fn print_help() {
    println!(
        r#"
{}

{}
  type <text>          Append text to the shared document (\n for newline)
  show                 Print the shared document
  save                 Save the document now

{}
  cursor <line> <col>  Share your cursor position
  status <json>        Share your presence state
  who                  List participants and their presence
  cursors              Show recently seen remote cursors

{}
  leave                Leave the room, stay connected
  join                 Join the room again
  ping                 Check connection
  help                 Show this help
  clear                Clear screen
  quit/exit            Exit CLI
"#,
        "CodeSync Commands".cyan().bold(),
        "Editing".yellow().bold(),
        "Presence".yellow().bold(),
        "Session".yellow().bold(),
    );
}

fn default_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "guest".into())
}

fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(std::path::PathBuf::from)
}
