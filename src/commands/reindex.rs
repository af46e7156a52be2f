//! Reindex command - bring every embedding in line with the vault

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use tracing::warn;

use super::Context;

pub async fn run(ctx: &Context, rebuild: bool, json: bool) -> Result<()> {
    let session = Arc::new(ctx.open_session()?);

    let interrupt = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling reindex");
                session.cancel_reindex();
            }
        })
    };

    if !json {
        if rebuild {
            println!("{} Rebuilding embedding index...", "→".dimmed());
        } else {
            println!("{} Updating embedding index...", "→".dimmed());
        }
    }

    let result = if rebuild {
        session.rebuild().await
    } else {
        session.reindex_all().await
    };
    interrupt.abort();
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        let headline = if report.cancelled {
            "! Cancelled".yellow().bold()
        } else {
            "✓ Done".green().bold()
        };
        println!(
            "{}: embedded {} notes in {:.2}s",
            headline,
            report.embedded.to_string().cyan(),
            report.duration.as_secs_f64()
        );
        if report.unchanged > 0 {
            println!("  {} {} notes unchanged", "→".dimmed(), report.unchanged);
        }
        if report.removed > 0 {
            println!("  {} {} embeddings removed", "→".dimmed(), report.removed);
        }
        if report.skipped > 0 {
            println!("  {} {} notes skipped", "!".yellow(), report.skipped);
        }
        if report.failed > 0 {
            println!("  {} {} notes failed", "✗".red(), report.failed);
        }
        for problem in &report.problems {
            println!("    {} {}", problem.path.cyan(), problem.reason.dimmed());
        }
    }

    if let Ok(session) = Arc::try_unwrap(session) {
        session.shutdown().await;
    }
    Ok(())
}
