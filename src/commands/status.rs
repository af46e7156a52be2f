//! Status command - what the embedding index holds

use anyhow::Result;
use colored::*;

use super::Context;

pub async fn run(ctx: &Context, json: bool) -> Result<()> {
    let session = ctx.open_session()?;
    let status = session.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let paths = session.paths();
    println!("{}", "Index Status".bold());
    println!();
    println!(
        "  {} Model: {} ({} dimensions)",
        "→".dimmed(),
        status.model_id.cyan(),
        status.dimensions
    );
    println!(
        "  {} Refresh policy: {}",
        "→".dimmed(),
        status.refresh_policy.to_string().cyan()
    );
    println!(
        "  {} {} notes, {} embeddings",
        "→".dimmed(),
        status.notes.to_string().cyan(),
        status.records.to_string().cyan()
    );

    let up_to_date = status.current.saturating_sub(status.outdated).min(status.notes);
    let coverage = if status.notes > 0 {
        up_to_date as f64 / status.notes as f64 * 100.0
    } else {
        100.0
    };
    let coverage_str = format!("{coverage:.0}%");
    let coverage_colored = if coverage >= 90.0 {
        coverage_str.green()
    } else if coverage >= 50.0 {
        coverage_str.yellow()
    } else {
        coverage_str.red()
    };
    println!("  {} Up to date: {}", "→".dimmed(), coverage_colored);

    if status.outdated > 0 {
        println!(
            "  {} {} embeddings older than their note",
            "!".yellow(),
            status.outdated
        );
    }
    if status.stale > 0 {
        println!(
            "  {} {} embeddings from another model",
            "!".yellow(),
            status.stale
        );
        for (model, count) in &status.per_model {
            if *model != status.model_id {
                println!("      {} {}", model.dimmed(), count);
            }
        }
    }
    println!(
        "  {} Stored in: {}",
        "→".dimmed(),
        match status.store_backend {
            vault_embeddings::StoreBackend::Files => paths.records.display(),
            vault_embeddings::StoreBackend::Sqlite => paths.database.display(),
        }
    );

    if status.current < status.notes || status.outdated > 0 {
        println!();
        println!("Run {} to update.", "vault-embed reindex".cyan());
    }

    Ok(())
}
