use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chat_relay::config::Settings;
use chat_relay::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(version, about = "Chat-session proxy for OpenAI-compatible completion services")]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./chat-relay.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP relay
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Development mode: permissive CORS for a separately served front-end
        #[arg(long)]
        dev: bool,
    },
    /// Create and migrate the session database, then exit
    InitDb {
        /// SQLite database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    let _log_guard = logging::init(&settings.logging, cli.verbose, cli.log_json)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
            dev,
        } => {
            cmd::apply_server_overrides(&mut settings, host, port, db_path, dev);
            cmd::cmd_serve(settings).await?;
        }
        Commands::InitDb { db_path } => {
            cmd::apply_server_overrides(&mut settings, None, None, db_path, false);
            cmd::cmd_init_db(&settings)?;
        }
    }

    Ok(())
}
