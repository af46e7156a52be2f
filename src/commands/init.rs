//! Init command - create the data directory and a default config

use std::fs;

use anyhow::Result;
use colored::*;

use super::Context;
use vault_embeddings::Config;

pub fn run(ctx: &Context, local: bool, force: bool) -> Result<()> {
    let paths = ctx.paths();

    if !paths.root.is_dir() {
        eprintln!(
            "{} Vault not found at: {}",
            "Error:".red().bold(),
            paths.root.display()
        );
        std::process::exit(1);
    }

    for dir in [&paths.data, &paths.records] {
        if dir.exists() {
            println!("{} {} exists", "✓".green(), dir.display());
        } else {
            fs::create_dir_all(dir)?;
            println!("{} Created {}", "✓".green(), dir.display());
        }
    }

    if paths.config.exists() && !force {
        println!(
            "{} {} exists (use {} to overwrite)",
            "→".dimmed(),
            paths.config.display(),
            "--force".cyan()
        );
    } else {
        let config = if local { Config::local() } else { Config::default() };
        config.save(&paths.config)?;
        println!(
            "{} Wrote {} (model: {})",
            "✓".green(),
            paths.config.display(),
            config.model_id.cyan()
        );
    }

    let config = ctx.load_config()?;
    println!();
    match config.validate() {
        Ok(()) => println!(
            "{} Ready. Run {} to build the index.",
            "✓".green().bold(),
            "vault-embed reindex".cyan()
        ),
        Err(e) => println!(
            "{} {}. Edit {} or pass {}.",
            "!".yellow().bold(),
            e,
            paths.config.display(),
            "--api-key".cyan()
        ),
    }

    Ok(())
}
