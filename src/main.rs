mod commands;
#[cfg(feature = "mcp")]
mod mcp;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::Context;

#[derive(Parser)]
#[command(name = "vault-embed")]
#[command(about = "Embedding index and similar-note search for markdown vaults", long_about = None)]
#[command(version)]
struct Cli {
    /// Vault root (default: current directory)
    #[arg(long, global = true, env = "VAULT_PATH")]
    vault: Option<PathBuf>,

    /// Provider credential used when the config has none
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the .embeddings directory and a default config
    Init {
        #[arg(long, help = "Use the local htp-384 model (no API key needed)")]
        local: bool,
        #[arg(long, help = "Overwrite an existing config")]
        force: bool,
    },
    /// Generate and store the embedding of one note
    Embed {
        note: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show the stored embedding of one note
    Show {
        note: String,
        #[arg(long, help = "Print the full vector")]
        full: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Reindex all notes
    Reindex {
        #[arg(long, help = "Clear the index before reindexing")]
        rebuild: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Find notes similar to a note
    #[command(alias = "sim")]
    Similar {
        note: String,
        #[arg(long, short, help = "Limit results (default: configured topK)")]
        limit: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show index status
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Watch the vault and apply the refresh policy to file events
    #[cfg(feature = "watch")]
    Watch,
    /// Start MCP server for Claude integration
    #[cfg(feature = "mcp")]
    Mcp {
        #[arg(long, help = "Show Claude configuration instructions")]
        install: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let vault = match cli.vault {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let ctx = Context::new(vault, cli.api_key);
    let command = cli.command;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        match command {
            Commands::Init { local, force } => commands::init::run(&ctx, local, force),
            Commands::Embed { note, json } => commands::embed::run(&ctx, &note, json).await,
            Commands::Show { note, full, json } => {
                commands::show::run(&ctx, &note, full, json).await
            }
            Commands::Reindex { rebuild, json } => {
                commands::reindex::run(&ctx, rebuild, json).await
            }
            Commands::Similar { note, limit, json } => {
                commands::similar::run(&ctx, &note, limit, json).await
            }
            Commands::Status { json } => commands::status::run(&ctx, json).await,

            #[cfg(feature = "watch")]
            Commands::Watch => commands::watch::run(&ctx).await,

            #[cfg(feature = "mcp")]
            Commands::Mcp { install } => {
                if install {
                    print_mcp_install_instructions(&ctx);
                    Ok(())
                } else {
                    mcp::run_mcp_server(ctx.open_session()?).await
                }
            }
        }
    })
}

#[cfg(feature = "mcp")]
fn print_mcp_install_instructions(ctx: &Context) {
    use colored::Colorize;

    let vault_path = ctx.vault().to_string_lossy().to_string();
    let binary_path = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "vault-embed".to_string());

    println!("{}", "MCP Server Installation Guide".bold().cyan());
    println!();
    println!("Add the following to your Claude configuration:");
    println!();
    println!("{}", "For Claude Desktop (~/.config/claude/claude_desktop_config.json):".dimmed());
    println!(r#"{{
  "mcpServers": {{
    "vault-embeddings": {{
      "command": "{}",
      "args": ["mcp", "--vault", "{}"]
    }}
  }}
}}"#, binary_path, vault_path);
    println!();
    println!("{}", "Available tools:".bold());
    println!("  • {} - Notes similar to a given note", "vault_similar".green());
    println!("  • {} - Embed one note now", "vault_embed_note".green());
    println!("  • {} - Show a note's stored embedding", "vault_show_embedding".green());
    println!("  • {} - Reindex the whole vault", "vault_reindex".green());
    println!("  • {} - Index status summary", "vault_index_status".green());
}
