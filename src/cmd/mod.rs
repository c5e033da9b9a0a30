//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `serve`   | `Serve`          |
//! | `init_db` | `InitDb`         |

pub mod init_db;
pub mod serve;

use std::path::PathBuf;

use chat_relay::config::Settings;

pub use init_db::cmd_init_db;
pub use serve::cmd_serve;

/// CLI flags are the last configuration layer.
pub fn apply_server_overrides(
    settings: &mut Settings,
    host: Option<String>,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    if let Some(db_path) = db_path {
        settings.server.db_path = db_path;
    }
    if dev {
        settings.server.dev = true;
    }
}
