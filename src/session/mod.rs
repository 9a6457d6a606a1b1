//! Server-side sessions: the per-client diff queue and the registry that
//! owns them.
//!
//! A session is the unit of replication state the server keeps per client.
//! It outlives any single connection: when the client is gone, diffs keep
//! accumulating (under a retention cap) so a resuming client can replay
//! everything it missed by sequence number.

pub mod queue;
pub mod registry;

pub use queue::{DiffPacket, Session, SessionStats};
pub use registry::SessionRegistry;

use thiserror::Error;

/// Errors from session operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Enqueue or resume attempted against a session that was closed.
    #[error("session is closed")]
    Closed,
    /// Lookup of an id the registry does not know. Handshake code treats
    /// this as an auth-equivalent failure and drops the connection.
    #[error("session not found")]
    NotFound,
}
