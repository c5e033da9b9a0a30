//! Relay server command: `chat-relay serve`.

use anyhow::Result;

use chat_relay::config::Settings;

pub async fn cmd_serve(settings: Settings) -> Result<()> {
    tracing::debug!(?settings, "Resolved settings");
    chat_relay::chat::server::start_server(settings).await
}
