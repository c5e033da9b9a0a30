//! Database bootstrap command: `chat-relay init-db`.

use anyhow::Result;

use chat_relay::config::Settings;

pub fn cmd_init_db(settings: &Settings) -> Result<()> {
    let db_path = &settings.server.db_path;
    chat_relay::chat::server::open_store(db_path)?;
    println!("Session database initialized at {}", db_path.display());
    Ok(())
}
