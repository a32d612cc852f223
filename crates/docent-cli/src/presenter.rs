//! Terminal presentation layer.
//!
//! Purely reactive: renders whatever session the controller publishes and
//! maps typed commands to events. Media URLs are printed, never fetched.

use docent_core::types::HeadlineMedia;
use docent_core::{Artifact, ArtifactKind, Catalog, Event, Session, State};
use std::fmt::Write as _;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// A line of user input, parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Event(Event),
    Help,
    Quit,
}

/// Parse one input line. Unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let cmd = match line.trim().to_ascii_lowercase().as_str() {
        "start" | "go" => Command::Event(Event::Start),
        "scan" | "s" | "capture" | "c" => Command::Event(Event::Capture),
        "close" | "x" => Command::Event(Event::Close),
        "dismiss" | "d" => Command::Event(Event::DismissNotice),
        "back" | "retry" | "b" => Command::Event(Event::Recover),
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        _ => return None,
    };
    Some(cmd)
}

pub const HELP: &str = "commands: start, scan, close, dismiss, back, help, quit";

/// Status light shown in the header.
fn status_glyph(state: &State) -> &'static str {
    match state {
        State::Scanning { .. } => "[~]",
        State::Found { .. } => "[+]",
        _ => "[o]",
    }
}

fn kind_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Object => "Object",
        ArtifactKind::Document => "Document",
        ArtifactKind::Photo => "Photo",
    }
}

/// Render one screen for the given session.
pub fn render(session: &Session, catalog: &Catalog) -> String {
    let museum = catalog.museum();
    let mut out = String::new();

    match session.state() {
        State::Welcome => {
            let _ = writeln!(out, "== {} ==", museum.name);
            let _ = writeln!(out, "{}", museum.tagline.to_uppercase());
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", museum.intro.trim());
            let _ = writeln!(out);
            let _ = writeln!(out, "Scan · Read · Listen");
            let _ = writeln!(out, "> type `start` to begin the tour");
        }
        State::Error { message } => {
            let _ = writeln!(out, "!! Camera access error");
            let _ = writeln!(out, "{message}");
            let _ = writeln!(out, "> type `back` to return to the start screen");
        }
        state => {
            let _ = writeln!(out, "{} {}: point at a historic object", status_glyph(state), museum.name);
            match state {
                State::Idle { notice } => {
                    if let Some(notice) = notice {
                        let _ = writeln!(out, "  ! {notice}  (`dismiss` to hide)");
                    }
                    if session.camera_live() {
                        let _ = writeln!(out, "> type `scan` to capture");
                    } else {
                        let _ = writeln!(out, "  starting camera...");
                    }
                }
                State::Scanning { .. } => {
                    let _ = writeln!(out, "  Analyzing image...");
                }
                State::Found { artifact } => render_detail(&mut out, artifact),
                State::Welcome | State::Error { .. } => {}
            }
        }
    }
    out
}

fn render_detail(out: &mut String, artifact: &Artifact) {
    let _ = writeln!(out);
    match artifact.headline_media() {
        Some(HeadlineMedia::Video { url, poster }) => {
            let _ = writeln!(out, "  [video] {url}");
            if let Some(poster) = poster {
                let _ = writeln!(out, "  [poster] {poster}");
            }
        }
        Some(HeadlineMedia::Image { url }) => {
            let _ = writeln!(out, "  [image] {url}");
        }
        None => {}
    }
    let _ = writeln!(out, "  {} · {}", kind_label(artifact.kind), artifact.year);
    let _ = writeln!(out, "  {}", artifact.name);
    let _ = writeln!(out, "  {}", artifact.description);
    if let Some(audio) = &artifact.audio_url {
        let _ = writeln!(out, "  [narration] {audio}");
    }
    let _ = writeln!(out, "> type `close` to keep exploring");
}

/// Read input lines on a dedicated OS thread.
///
/// The channel closes at end of input or on a read error. The thread is
/// never joined; it exits with the process.
pub fn spawn_line_reader<R>(input: R) -> std::io::Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(8);
    std::thread::Builder::new()
        .name("docent-input".into())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "input read failed");
                        break;
                    }
                }
            }
            tracing::debug!("input closed");
        })?;
    Ok(rx)
}

/// Print every session change until the controller stops.
pub async fn run(mut view: watch::Receiver<Session>, catalog: Arc<Catalog>) {
    loop {
        let screen = render(&view.borrow_and_update(), &catalog);
        println!("{screen}");
        if view.changed().await.is_err() {
            break;
        }
    }
}
