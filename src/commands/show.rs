//! Show command - load and display the stored embedding of one note

use anyhow::Result;
use colored::Colorize;

use super::Context;
use vault_embeddings::search::EmbeddingRecord;
use vault_embeddings::LoadedEmbedding;

const PREVIEW_VALUES: usize = 8;

pub async fn run(ctx: &Context, note: &str, full: bool, json: bool) -> Result<()> {
    let session = ctx.open_session()?;
    let loaded = session.load_embedding(note).await?;

    if json {
        let value = match &loaded {
            LoadedEmbedding::Found(record) => serde_json::json!({
                "status": "current",
                "record": record,
            }),
            LoadedEmbedding::Stale(record, why) => serde_json::json!({
                "status": "stale",
                "reason": why.to_string(),
                "record": record,
            }),
            LoadedEmbedding::Missing => serde_json::json!({
                "status": "missing",
                "path": note,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match &loaded {
        LoadedEmbedding::Found(record) => print_record(record, full),
        LoadedEmbedding::Stale(record, why) => {
            println!("{} Stale embedding: {}", "!".yellow().bold(), why);
            print_record(record, full);
        }
        LoadedEmbedding::Missing => {
            println!(
                "{} No embedding stored for {}. Run {} first.",
                "!".yellow().bold(),
                note.cyan(),
                format!("vault-embed embed \"{note}\"").cyan()
            );
        }
    }

    Ok(())
}

fn print_record(record: &EmbeddingRecord, full: bool) {
    println!("{}", record.path.bold());
    println!("  {} Model: {}", "→".dimmed(), record.model_id.cyan());
    println!(
        "  {} Dimensions: {}",
        "→".dimmed(),
        record.vector.len().to_string().cyan()
    );
    println!(
        "  {} Updated: {}",
        "→".dimmed(),
        record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  {} Content hash: {}",
        "→".dimmed(),
        record.content_hash.dimmed()
    );

    let shown = if full {
        record.vector.len()
    } else {
        PREVIEW_VALUES.min(record.vector.len())
    };
    let values: Vec<String> = record.vector[..shown]
        .iter()
        .map(|v| format!("{v:.4}"))
        .collect();
    let ellipsis = if shown < record.vector.len() { ", ..." } else { "" };
    println!("  {} [{}{}]", "→".dimmed(), values.join(", "), ellipsis);
}
