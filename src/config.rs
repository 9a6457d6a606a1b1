//! Paths and small persisted records shared by the client and server
//! binaries.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::SessionId;

/// Default server socket, scoped to the invoking user.
pub fn default_socket_path() -> PathBuf {
    let uid = nix::unistd::getuid();
    PathBuf::from(format!("/tmp/texelation-{uid}.sock"))
}

/// Default on-disk snapshot location under the user config directory.
pub fn default_snapshot_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not find config directory")?;
    Ok(config_dir.join("texelation").join("workspace.json"))
}

/// The client's persisted session id, written after a successful connect so
/// `--reconnect` can resume the same server-side session later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTicket {
    pub session_id: SessionId,
}

impl SessionTicket {
    pub fn new(session_id: SessionId) -> Self {
        Self { session_id }
    }

    /// Load the persisted ticket, if any. A malformed file reads as absent.
    pub fn load() -> Option<Self> {
        let path = Self::ticket_path().ok()?;
        let contents = fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::ticket_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize ticket")?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write session ticket: {}", path.display()))?;
        Ok(())
    }

    pub fn clear() {
        if let Ok(path) = Self::ticket_path() {
            let _ = fs::remove_file(path);
        }
    }

    fn ticket_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not find config directory")?;
        Ok(config_dir.join("texelation").join("session.json"))
    }
}

impl Default for SessionTicket {
    fn default() -> Self {
        Self {
            session_id: Uuid::nil(),
        }
    }
}
