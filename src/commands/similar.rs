//! Similar command - notes closest to a given note

use anyhow::Result;
use colored::Colorize;

use super::Context;

pub async fn run(ctx: &Context, note: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let session = ctx.open_session()?;
    let results = session.find_similar(note, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if let Some(warning) = &results.warning {
        println!("{} {}", "!".yellow().bold(), warning);
    }

    if results.matches.is_empty() {
        println!("{} No similar notes for: {}", "→".dimmed(), note.cyan());
        return Ok(());
    }

    println!(
        "{} {} notes similar to: {}",
        "→".dimmed(),
        results.matches.len(),
        note.cyan()
    );
    println!();

    for (i, m) in results.matches.iter().enumerate() {
        let score_str = format!("{:.2}", m.score);
        let score_colored = if m.score > 0.8 {
            score_str.green()
        } else if m.score > 0.6 {
            score_str.yellow()
        } else {
            score_str.dimmed()
        };

        println!(
            "{}. [{}] {}",
            (i + 1).to_string().bold(),
            score_colored,
            m.path.cyan()
        );
    }

    Ok(())
}
