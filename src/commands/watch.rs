//! Watch command - feed file events to the refresh policy

use anyhow::Result;
use colored::Colorize;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::{describe_outcome, Context};
use vault_embeddings::core::paths::is_hidden;
use vault_embeddings::{RefreshPolicy, SessionHandle, VaultPaths};

/// A note-level change derived from a raw file event
#[derive(Debug, Clone, PartialEq, Eq)]
enum NoteChange {
    Created(String),
    Modified(String),
    Deleted(String),
    Renamed { from: String, to: String },
}

fn note_path(paths: &VaultPaths, file: &std::path::Path) -> Option<String> {
    let relative = paths.relative_note_path(file)?;
    (relative.ends_with(".md") && !is_hidden(&relative)).then_some(relative)
}

fn event_notes<'a>(paths: &'a VaultPaths, event: &'a Event) -> impl Iterator<Item = String> + 'a {
    event.paths.iter().filter_map(move |p| note_path(paths, p))
}

fn classify(paths: &VaultPaths, event: &Event) -> Vec<NoteChange> {
    let notes = || event_notes(paths, event);

    match &event.kind {
        EventKind::Create(_) => notes().map(NoteChange::Created).collect(),
        EventKind::Remove(_) => notes().map(NoteChange::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let from = event.paths.first().and_then(|p| note_path(paths, p));
            let to = event.paths.get(1).and_then(|p| note_path(paths, p));
            match (from, to) {
                (Some(from), Some(to)) => vec![NoteChange::Renamed { from, to }],
                (Some(from), None) => vec![NoteChange::Deleted(from)],
                (None, Some(to)) => vec![NoteChange::Created(to)],
                (None, None) => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            notes().map(NoteChange::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            notes().map(NoteChange::Created).collect()
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => notes().map(NoteChange::Modified).collect(),
        _ => Vec::new(),
    }
}

async fn apply(session: &SessionHandle, change: NoteChange) {
    debug!(?change, "vault change");
    let (path, result) = match change {
        NoteChange::Created(path) => {
            let result = session.note_created(&path).await;
            (path, result)
        }
        NoteChange::Modified(path) => {
            let result = session.note_modified(&path).await;
            (path, result)
        }
        NoteChange::Deleted(path) => {
            let result = session.note_deleted(&path).await.map(Some);
            (path, result)
        }
        NoteChange::Renamed { from, to } => {
            let result = session.note_renamed(&from, &to).await;
            (to, result)
        }
    };

    match result {
        Ok(Some(outcome)) => println!("{}", describe_outcome(&path, &outcome)),
        Ok(None) => {}
        Err(e) => {
            warn!(path = %path, error = %e, "failed to apply vault change");
            eprintln!("{} {}: {}", "✗".red(), path.cyan(), e);
        }
    }
}

pub async fn run(ctx: &Context) -> Result<()> {
    let session = ctx.open_session()?;
    let paths = session.paths().clone();
    let policy = session.config().refresh_policy;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;
    watcher.watch(&paths.root, RecursiveMode::Recursive)?;

    println!(
        "{} Watching {} (refresh policy: {})",
        "→".dimmed(),
        paths.root.display(),
        policy.to_string().cyan()
    );
    if policy == RefreshPolicy::Manual {
        println!(
            "  {} Only deletions are applied. Set {} to {} or {} in {}.",
            "!".yellow(),
            "refreshPolicy".cyan(),
            "always".cyan(),
            "onNewNote".cyan(),
            paths.config.display()
        );
    }
    println!("  {} Press Ctrl-C to stop", "→".dimmed());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                None => break,
                Some(Err(e)) => warn!(error = %e, "watch error"),
                Some(Ok(event)) => {
                    for change in classify(&paths, &event) {
                        apply(&session, change).await;
                    }
                }
            },
        }
    }

    drop(watcher);
    session.shutdown().await;
    Ok(())
}
