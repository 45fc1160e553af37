//! Startup session selection.

use crate::catalog::{Catalog, SessionSummary};
use crate::config::Config;
use crate::control::console::{Console, PromptReply};
use crate::naming::Session;
use crate::utils::errors::Result;
use std::time::Duration;
use tracing::{info, warn};

/// Decide which session this run works on.
///
/// A configured name wins. Otherwise existing sessions are offered, most
/// recently active first; no answer picks the most recent one.
pub async fn resolve_session(config: &Config, console: &mut Console) -> Result<Session> {
    if let Some(name) = &config.session.name {
        let session = Session::new(name.as_str())?;
        info!("Using configured session '{}'", session);
        return Ok(session);
    }

    let sessions = match Catalog::scan(&config.storage.dir) {
        Ok(catalog) => catalog.sessions(),
        Err(e) => {
            warn!("Cannot scan {}: {}", config.storage.dir.display(), e);
            Vec::new()
        }
    };

    Ok(pick_session(&sessions, console, config.selection_timeout()).await)
}

async fn pick_session(
    sessions: &[SessionSummary],
    console: &mut Console,
    timeout: Duration,
) -> Session {
    if sessions.is_empty() {
        println!("\nNo existing sessions found.");
        println!("Enter a name for the new session (Enter for 'session'):");
        return ask_new_name(console, timeout).await;
    }

    println!("\nExisting sessions:");
    for (i, s) in sessions.iter().enumerate() {
        println!("  {}. {} ({} files)", i + 1, s.name, s.files);
    }
    println!("  {}. New session", sessions.len() + 1);
    println!(
        "Choose an option ({}s to answer, Enter for the most recent):",
        timeout.as_secs()
    );

    let answer = match console.prompt(timeout).await {
        PromptReply::Line(line) => line,
        PromptReply::TimedOut | PromptReply::Closed => String::new(),
    };

    match answer.parse::<usize>() {
        _ if answer.is_empty() => most_recent(sessions),
        Ok(0) => most_recent(sessions),
        Ok(n) if n <= sessions.len() => existing(&sessions[n - 1]),
        Ok(n) if n == sessions.len() + 1 => {
            println!("Enter a name for the new session (Enter for 'session'):");
            ask_new_name(console, timeout).await
        }
        _ => {
            println!("Invalid choice. Enter a name for the new session (Enter for 'session'):");
            ask_new_name(console, timeout).await
        }
    }
}

fn most_recent(sessions: &[SessionSummary]) -> Session {
    let session = existing(&sessions[0]);
    info!("Selected most recent session '{}'", session);
    session
}

fn existing(summary: &SessionSummary) -> Session {
    match Session::new(summary.name.as_str()) {
        Ok(session) => {
            info!("Selected session '{}'", session);
            session
        }
        Err(e) => {
            warn!("{}; using '{}'", e, Session::default());
            Session::default()
        }
    }
}

async fn ask_new_name(console: &mut Console, timeout: Duration) -> Session {
    let name = match console.prompt(timeout).await {
        PromptReply::Line(line) => line,
        PromptReply::TimedOut | PromptReply::Closed => String::new(),
    };
    if name.is_empty() {
        info!("Created new session '{}'", Session::default());
        return Session::default();
    }
    match Session::new(name) {
        Ok(session) => {
            info!("Created new session '{}'", session);
            session
        }
        Err(e) => {
            warn!("{}; using '{}'", e, Session::default());
            Session::default()
        }
    }
}
