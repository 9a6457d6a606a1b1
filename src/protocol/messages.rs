//! Typed message payloads and their binary codecs.
//!
//! Each message has a fixed numeric type carried in the frame header and a
//! payload schema encoded with the primitives in [`super::wire`]. Decoding
//! an unknown type yields `None` so receivers can skip messages from newer
//! peers instead of dropping the connection.

use super::cell::Style;
use super::frame::CodecError;
use super::wire::{self, Reader};
use super::{PaneId, SessionId};

pub const MSG_HELLO: u16 = 1;
pub const MSG_WELCOME: u16 = 2;
pub const MSG_CONNECT_REQUEST: u16 = 3;
pub const MSG_CONNECT_ACCEPT: u16 = 4;
pub const MSG_RESUME_REQUEST: u16 = 5;
pub const MSG_TREE_SNAPSHOT: u16 = 6;
pub const MSG_BUFFER_DELTA: u16 = 7;
pub const MSG_BUFFER_ACK: u16 = 8;
pub const MSG_PING: u16 = 9;
pub const MSG_PONG: u16 = 10;
pub const MSG_KEY_EVENT: u16 = 11;
pub const MSG_MOUSE_EVENT: u16 = 12;
pub const MSG_RESIZE: u16 = 13;
pub const MSG_PASTE: u16 = 14;
pub const MSG_CLIPBOARD_SET: u16 = 15;
pub const MSG_CLIPBOARD_GET: u16 = 16;
pub const MSG_CLIPBOARD_DATA: u16 = 17;
pub const MSG_THEME_UPDATE: u16 = 18;
pub const MSG_THEME_ACK: u16 = 19;
pub const MSG_PANE_FOCUS: u16 = 20;
pub const MSG_PANE_STATE: u16 = 21;
pub const MSG_STATE_UPDATE: u16 = 22;

/// Set on a `BufferDelta` that carries every non-blank row of the pane
/// (the first publish for a pane, or a republish after resume).
pub const DELTA_FLAG_FULL: u8 = 1;

/// `PaneState.flags` bits.
pub const PANE_FLAG_ACTIVE: u16 = 1;
pub const PANE_FLAG_RESIZING: u16 = 2;
pub const PANE_FLAG_SELECTION_DELEGATED: u16 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub client_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    pub server_name: String,
}

/// A nil `session_id` asks the server to allocate a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAccept {
    pub session_id: SessionId,
    pub resume_supported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    pub session_id: SessionId,
    pub last_sequence: u64,
}

/// One pane's transportable state inside a tree snapshot. Rows carry text
/// only; styled content catches up through subsequent deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct PaneSnapshot {
    pub pane_id: PaneId,
    pub revision: u32,
    pub title: String,
    pub rows: Vec<String>,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub app_type: String,
    pub app_config: String,
}

/// Split orientation discriminants on the wire.
pub const SPLIT_NONE: u8 = 0;
pub const SPLIT_VERTICAL: u8 = 1;
pub const SPLIT_HORIZONTAL: u8 = 2;

/// Serialized tree shape. Leaves carry `pane_index >= 0` into the snapshot's
/// pane list; internal nodes carry `-1` plus children and ratios.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNodeSnapshot {
    pub pane_index: i32,
    pub split: u8,
    pub split_ratios: Vec<f32>,
    pub children: Vec<TreeNodeSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeSnapshot {
    pub panes: Vec<PaneSnapshot>,
    pub root: TreeNodeSnapshot,
}

/// A run of equally-styled text within one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSpan {
    pub start_col: u16,
    pub style_index: u16,
    pub text: String,
}

/// Full-row replacement: rows present in a delta overwrite the client's row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDelta {
    pub row: u16,
    pub spans: Vec<CellSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDelta {
    pub pane_id: PaneId,
    pub revision: u32,
    pub flags: u8,
    pub styles: Vec<Style>,
    pub rows: Vec<RowDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAck {
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub timestamp: i64,
}

/// Platform-neutral key event; both endpoints translate to and from their
/// local input library at the edges. See [`super::keys`] for codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key_code: u32,
    pub rune: u32,
    pub modifiers: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub x: i16,
    pub y: i16,
    pub buttons: u32,
    pub modifiers: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paste {
    pub data: Vec<u8>,
}

/// Shared payload shape for ClipboardSet / ClipboardGet / ClipboardData.
/// Get carries an empty `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clipboard {
    pub mime: String,
    pub data: Vec<u8>,
}

/// Shared payload shape for ThemeUpdate / ThemeAck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeValue {
    pub section: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneFocus {
    pub pane_id: PaneId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneState {
    pub pane_id: PaneId,
    pub flags: u16,
    pub z_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub workspace_id: i32,
    pub all_workspaces: Vec<i32>,
    pub in_control_mode: bool,
    pub sub_mode: u32,
    pub active_title: String,
    pub desktop_bg_rgb: u32,
    pub zoomed: bool,
    pub zoomed_pane_id: PaneId,
}

/// Every message the protocol can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(Hello),
    Welcome(Welcome),
    ConnectRequest(ConnectRequest),
    ConnectAccept(ConnectAccept),
    ResumeRequest(ResumeRequest),
    TreeSnapshot(TreeSnapshot),
    BufferDelta(BufferDelta),
    BufferAck(BufferAck),
    Ping(Ping),
    Pong(Pong),
    KeyEvent(KeyEvent),
    MouseEvent(MouseEvent),
    Resize(Resize),
    Paste(Paste),
    ClipboardSet(Clipboard),
    ClipboardGet(Clipboard),
    ClipboardData(Clipboard),
    ThemeUpdate(ThemeValue),
    ThemeAck(ThemeValue),
    PaneFocus(PaneFocus),
    PaneState(PaneState),
    StateUpdate(StateUpdate),
}

impl Message {
    /// Numeric type for the frame header.
    pub fn msg_type(&self) -> u16 {
        match self {
            Message::Hello(_) => MSG_HELLO,
            Message::Welcome(_) => MSG_WELCOME,
            Message::ConnectRequest(_) => MSG_CONNECT_REQUEST,
            Message::ConnectAccept(_) => MSG_CONNECT_ACCEPT,
            Message::ResumeRequest(_) => MSG_RESUME_REQUEST,
            Message::TreeSnapshot(_) => MSG_TREE_SNAPSHOT,
            Message::BufferDelta(_) => MSG_BUFFER_DELTA,
            Message::BufferAck(_) => MSG_BUFFER_ACK,
            Message::Ping(_) => MSG_PING,
            Message::Pong(_) => MSG_PONG,
            Message::KeyEvent(_) => MSG_KEY_EVENT,
            Message::MouseEvent(_) => MSG_MOUSE_EVENT,
            Message::Resize(_) => MSG_RESIZE,
            Message::Paste(_) => MSG_PASTE,
            Message::ClipboardSet(_) => MSG_CLIPBOARD_SET,
            Message::ClipboardGet(_) => MSG_CLIPBOARD_GET,
            Message::ClipboardData(_) => MSG_CLIPBOARD_DATA,
            Message::ThemeUpdate(_) => MSG_THEME_UPDATE,
            Message::ThemeAck(_) => MSG_THEME_ACK,
            Message::PaneFocus(_) => MSG_PANE_FOCUS,
            Message::PaneState(_) => MSG_PANE_STATE,
            Message::StateUpdate(_) => MSG_STATE_UPDATE,
        }
    }

    /// Append this message's payload bytes to `buf`.
    pub fn encode_payload(&self, buf: &mut Vec<u8>) {
        match self {
            Message::Hello(m) => wire::put_string(buf, &m.client_name),
            Message::Welcome(m) => wire::put_string(buf, &m.server_name),
            Message::ConnectRequest(m) => wire::put_id(buf, m.session_id.as_bytes()),
            Message::ConnectAccept(m) => {
                wire::put_id(buf, m.session_id.as_bytes());
                wire::put_u8(buf, u8::from(m.resume_supported));
            }
            Message::ResumeRequest(m) => {
                wire::put_id(buf, m.session_id.as_bytes());
                wire::put_u64(buf, m.last_sequence);
            }
            Message::TreeSnapshot(m) => encode_tree_snapshot(buf, m),
            Message::BufferDelta(m) => encode_buffer_delta(buf, m),
            Message::BufferAck(m) => wire::put_u64(buf, m.sequence),
            Message::Ping(m) => wire::put_i64(buf, m.timestamp),
            Message::Pong(m) => wire::put_i64(buf, m.timestamp),
            Message::KeyEvent(m) => {
                wire::put_u32(buf, m.key_code);
                wire::put_u32(buf, m.rune);
                wire::put_u16(buf, m.modifiers);
            }
            Message::MouseEvent(m) => {
                wire::put_i16(buf, m.x);
                wire::put_i16(buf, m.y);
                wire::put_u32(buf, m.buttons);
                wire::put_u16(buf, m.modifiers);
            }
            Message::Resize(m) => {
                wire::put_u16(buf, m.cols);
                wire::put_u16(buf, m.rows);
            }
            Message::Paste(m) => wire::put_blob(buf, &m.data),
            Message::ClipboardSet(m) | Message::ClipboardGet(m) | Message::ClipboardData(m) => {
                wire::put_string(buf, &m.mime);
                wire::put_blob(buf, &m.data);
            }
            Message::ThemeUpdate(m) | Message::ThemeAck(m) => {
                wire::put_string(buf, &m.section);
                wire::put_string(buf, &m.key);
                wire::put_string(buf, &m.value);
            }
            Message::PaneFocus(m) => wire::put_id(buf, m.pane_id.as_bytes()),
            Message::PaneState(m) => {
                wire::put_id(buf, m.pane_id.as_bytes());
                wire::put_u16(buf, m.flags);
                wire::put_i32(buf, m.z_order);
            }
            Message::StateUpdate(m) => {
                wire::put_i32(buf, m.workspace_id);
                wire::put_u16(buf, m.all_workspaces.len() as u16);
                for w in &m.all_workspaces {
                    wire::put_i32(buf, *w);
                }
                wire::put_u8(buf, u8::from(m.in_control_mode));
                wire::put_u32(buf, m.sub_mode);
                wire::put_string(buf, &m.active_title);
                wire::put_u32(buf, m.desktop_bg_rgb);
                wire::put_u8(buf, u8::from(m.zoomed));
                wire::put_id(buf, m.zoomed_pane_id.as_bytes());
            }
        }
    }

    /// Decode a payload for `msg_type`. Unknown types decode as `None`.
    pub fn decode_payload(msg_type: u16, payload: &[u8]) -> Result<Option<Message>, CodecError> {
        let mut r = Reader::new(payload);
        let message = match msg_type {
            MSG_HELLO => Message::Hello(Hello {
                client_name: r.string()?,
            }),
            MSG_WELCOME => Message::Welcome(Welcome {
                server_name: r.string()?,
            }),
            MSG_CONNECT_REQUEST => Message::ConnectRequest(ConnectRequest {
                session_id: SessionId::from_bytes(r.id()?),
            }),
            MSG_CONNECT_ACCEPT => Message::ConnectAccept(ConnectAccept {
                session_id: SessionId::from_bytes(r.id()?),
                resume_supported: r.u8()? != 0,
            }),
            MSG_RESUME_REQUEST => Message::ResumeRequest(ResumeRequest {
                session_id: SessionId::from_bytes(r.id()?),
                last_sequence: r.u64()?,
            }),
            MSG_TREE_SNAPSHOT => Message::TreeSnapshot(decode_tree_snapshot(&mut r)?),
            MSG_BUFFER_DELTA => Message::BufferDelta(decode_buffer_delta(&mut r)?),
            MSG_BUFFER_ACK => Message::BufferAck(BufferAck {
                sequence: r.u64()?,
            }),
            MSG_PING => Message::Ping(Ping {
                timestamp: r.i64()?,
            }),
            MSG_PONG => Message::Pong(Pong {
                timestamp: r.i64()?,
            }),
            MSG_KEY_EVENT => Message::KeyEvent(KeyEvent {
                key_code: r.u32()?,
                rune: r.u32()?,
                modifiers: r.u16()?,
            }),
            MSG_MOUSE_EVENT => Message::MouseEvent(MouseEvent {
                x: r.i16()?,
                y: r.i16()?,
                buttons: r.u32()?,
                modifiers: r.u16()?,
            }),
            MSG_RESIZE => Message::Resize(Resize {
                cols: r.u16()?,
                rows: r.u16()?,
            }),
            MSG_PASTE => Message::Paste(Paste { data: r.blob()? }),
            MSG_CLIPBOARD_SET => Message::ClipboardSet(decode_clipboard(&mut r)?),
            MSG_CLIPBOARD_GET => Message::ClipboardGet(decode_clipboard(&mut r)?),
            MSG_CLIPBOARD_DATA => Message::ClipboardData(decode_clipboard(&mut r)?),
            MSG_THEME_UPDATE => Message::ThemeUpdate(decode_theme_value(&mut r)?),
            MSG_THEME_ACK => Message::ThemeAck(decode_theme_value(&mut r)?),
            MSG_PANE_FOCUS => Message::PaneFocus(PaneFocus {
                pane_id: PaneId::from_bytes(r.id()?),
            }),
            MSG_PANE_STATE => Message::PaneState(PaneState {
                pane_id: PaneId::from_bytes(r.id()?),
                flags: r.u16()?,
                z_order: r.i32()?,
            }),
            MSG_STATE_UPDATE => {
                let workspace_id = r.i32()?;
                let count = r.u16()? as usize;
                let mut all_workspaces = Vec::with_capacity(count);
                for _ in 0..count {
                    all_workspaces.push(r.i32()?);
                }
                Message::StateUpdate(StateUpdate {
                    workspace_id,
                    all_workspaces,
                    in_control_mode: r.u8()? != 0,
                    sub_mode: r.u32()?,
                    active_title: r.string()?,
                    desktop_bg_rgb: r.u32()?,
                    zoomed: r.u8()? != 0,
                    zoomed_pane_id: PaneId::from_bytes(r.id()?),
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

fn encode_tree_snapshot(buf: &mut Vec<u8>, snap: &TreeSnapshot) {
    wire::put_u16(buf, snap.panes.len() as u16);
    for pane in &snap.panes {
        wire::put_id(buf, pane.pane_id.as_bytes());
        wire::put_u32(buf, pane.revision);
        wire::put_string(buf, &pane.title);
        wire::put_u16(buf, pane.rows.len() as u16);
        for row in &pane.rows {
            wire::put_string(buf, row);
        }
        wire::put_i32(buf, pane.x);
        wire::put_i32(buf, pane.y);
        wire::put_i32(buf, pane.width);
        wire::put_i32(buf, pane.height);
        wire::put_string(buf, &pane.app_type);
        wire::put_string(buf, &pane.app_config);
    }
    encode_tree_node(buf, &snap.root);
}

fn encode_tree_node(buf: &mut Vec<u8>, node: &TreeNodeSnapshot) {
    wire::put_i32(buf, node.pane_index);
    wire::put_u8(buf, node.split);
    wire::put_u16(buf, node.split_ratios.len() as u16);
    for ratio in &node.split_ratios {
        wire::put_f32(buf, *ratio);
    }
    wire::put_u16(buf, node.children.len() as u16);
    for child in &node.children {
        encode_tree_node(buf, child);
    }
}

fn decode_tree_snapshot(r: &mut Reader<'_>) -> Result<TreeSnapshot, CodecError> {
    let pane_count = r.u16()? as usize;
    let mut panes = Vec::with_capacity(pane_count);
    for _ in 0..pane_count {
        let pane_id = PaneId::from_bytes(r.id()?);
        let revision = r.u32()?;
        let title = r.string()?;
        let row_count = r.u16()? as usize;
        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            rows.push(r.string()?);
        }
        panes.push(PaneSnapshot {
            pane_id,
            revision,
            title,
            rows,
            x: r.i32()?,
            y: r.i32()?,
            width: r.i32()?,
            height: r.i32()?,
            app_type: r.string()?,
            app_config: r.string()?,
        });
    }
    let root = decode_tree_node(r)?;
    Ok(TreeSnapshot { panes, root })
}

fn decode_tree_node(r: &mut Reader<'_>) -> Result<TreeNodeSnapshot, CodecError> {
    let pane_index = r.i32()?;
    let split = r.u8()?;
    let ratio_count = r.u16()? as usize;
    let mut split_ratios = Vec::with_capacity(ratio_count);
    for _ in 0..ratio_count {
        split_ratios.push(r.f32()?);
    }
    let child_count = r.u16()? as usize;
    let mut children = Vec::with_capacity(child_count);
    for _ in 0..child_count {
        children.push(decode_tree_node(r)?);
    }
    Ok(TreeNodeSnapshot {
        pane_index,
        split,
        split_ratios,
        children,
    })
}

fn encode_buffer_delta(buf: &mut Vec<u8>, delta: &BufferDelta) {
    wire::put_id(buf, delta.pane_id.as_bytes());
    wire::put_u32(buf, delta.revision);
    wire::put_u8(buf, delta.flags);
    wire::put_u16(buf, delta.styles.len() as u16);
    for style in &delta.styles {
        wire::put_u16(buf, style.attrs);
        wire::put_u8(buf, style.fg.model());
        wire::put_u32(buf, style.fg.value());
        wire::put_u8(buf, style.bg.model());
        wire::put_u32(buf, style.bg.value());
    }
    wire::put_u16(buf, delta.rows.len() as u16);
    for row in &delta.rows {
        wire::put_u16(buf, row.row);
        wire::put_u16(buf, row.spans.len() as u16);
        for span in &row.spans {
            wire::put_u16(buf, span.start_col);
            wire::put_u16(buf, span.style_index);
            wire::put_string(buf, &span.text);
        }
    }
}

fn decode_buffer_delta(r: &mut Reader<'_>) -> Result<BufferDelta, CodecError> {
    use super::cell::Color;

    let pane_id = PaneId::from_bytes(r.id()?);
    let revision = r.u32()?;
    let flags = r.u8()?;
    let style_count = r.u16()? as usize;
    let mut styles = Vec::with_capacity(style_count);
    for _ in 0..style_count {
        let attrs = r.u16()?;
        let fg_model = r.u8()?;
        let fg_value = r.u32()?;
        let bg_model = r.u8()?;
        let bg_value = r.u32()?;
        styles.push(Style {
            attrs,
            fg: Color::from_wire(fg_model, fg_value),
            bg: Color::from_wire(bg_model, bg_value),
        });
    }
    let row_count = r.u16()? as usize;
    let mut rows = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let row = r.u16()?;
        let span_count = r.u16()? as usize;
        let mut spans = Vec::with_capacity(span_count);
        for _ in 0..span_count {
            spans.push(CellSpan {
                start_col: r.u16()?,
                style_index: r.u16()?,
                text: r.string()?,
            });
        }
        rows.push(RowDelta { row, spans });
    }
    Ok(BufferDelta {
        pane_id,
        revision,
        flags,
        styles,
        rows,
    })
}

fn decode_clipboard(r: &mut Reader<'_>) -> Result<Clipboard, CodecError> {
    Ok(Clipboard {
        mime: r.string()?,
        data: r.blob()?,
    })
}

fn decode_theme_value(r: &mut Reader<'_>) -> Result<ThemeValue, CodecError> {
    Ok(ThemeValue {
        section: r.string()?,
        key: r.string()?,
        value: r.string()?,
    })
}
