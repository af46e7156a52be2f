//! Embed command - generate the embedding of one note now

use anyhow::Result;

use super::{describe_outcome, outcome_name, Context};
use vault_embeddings::NoteOutcome;

pub async fn run(ctx: &Context, note: &str, json: bool) -> Result<()> {
    let session = ctx.open_session()?;
    let outcome = session.embed_note(note).await?;

    if json {
        let reason = match &outcome {
            NoteOutcome::Skipped { reason } | NoteOutcome::Failed { reason } => Some(reason),
            _ => None,
        };
        println!(
            "{}",
            serde_json::json!({
                "path": note,
                "outcome": outcome_name(&outcome),
                "reason": reason,
            })
        );
    } else {
        println!("{}", describe_outcome(note, &outcome));
    }

    session.shutdown().await;
    if matches!(outcome, NoteOutcome::Failed { .. } | NoteOutcome::Skipped { .. }) {
        std::process::exit(1);
    }
    Ok(())
}
