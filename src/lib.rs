//! Texelation library crate.
//!
//! A text-mode desktop environment split into a long-lived server and thin
//! replicating clients:
//! - Server: authoritative tiling tree of panes, each hosting an app
//! - Protocol: framed binary messages with per-session diff queues
//! - Client: buffer cache + ratatui renderer reconstructing the view
//!
//! Clients can disconnect and resume by sequence number without the server
//! losing anything.

pub mod apps;
pub mod client;
pub mod config;
pub mod panic_log;
pub mod protocol;
pub mod server;
pub mod session;
