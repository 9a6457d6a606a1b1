//! The thin client: replicates server state into a local cache, renders it
//! with ratatui and forwards input.

pub mod app;
pub mod cache;
pub mod handler;
pub mod ui;

pub use app::ClientApp;
pub use cache::BufferCache;
pub use handler::{ClientState, ServerConnection};
