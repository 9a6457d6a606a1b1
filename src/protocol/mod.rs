//! Wire protocol shared by the Texelation server and client.
//!
//! The protocol is a framed binary stream over a unix socket: a fixed
//! little-endian header carrying the message type, session id and sequence
//! number, followed by a per-type payload and an optional CRC32 trailer.
//! Everything the client renders is replicated through these messages; the
//! server is authoritative.

pub mod cell;
pub mod frame;
pub mod keys;
pub mod messages;
pub mod wire;

pub use cell::{Cell, Color, Style, StyleTable};
pub use frame::{CodecError, Frame, FrameHeader, PROTOCOL_VERSION};
pub use messages::Message;

use uuid::Uuid;

/// Unique identifier for a pane, stable for the pane's lifetime.
pub type PaneId = Uuid;

/// Unique identifier for a session. A nil id in a connect request asks the
/// server to allocate a fresh session.
pub type SessionId = Uuid;

/// The nil session id used by clients connecting without a prior session.
pub fn nil_session() -> SessionId {
    Uuid::nil()
}

/// A rectangle in workspace cell coordinates, shared by the server layout
/// and the client cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}
