//! Client application state: input translation, resize debouncing and the
//! local text selection that feeds the clipboard.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{
    KeyCode, KeyEvent as CtKeyEvent, KeyModifiers, MouseButton, MouseEvent as CtMouseEvent,
    MouseEventKind,
};

use crate::protocol::keys;
use crate::protocol::messages::{KeyEvent, MouseEvent};

use super::handler::ServerConnection;

/// Newest-wins debounce window for outgoing resizes.
const RESIZE_DEBOUNCE: Duration = Duration::from_millis(45);

/// Mouse button bits carried in `MouseEvent.buttons`.
pub const BUTTON_LEFT: u32 = 1;
pub const BUTTON_RIGHT: u32 = 2;
pub const BUTTON_MIDDLE: u32 = 4;
pub const BUTTON_SCROLL_UP: u32 = 8;
pub const BUTTON_SCROLL_DOWN: u32 = 16;

pub struct ClientApp {
    connection: Arc<ServerConnection>,
    pending_resize: Option<(u16, u16, Instant)>,
    /// True while a local (non-delegated) selection drag is running.
    selecting: bool,
    pub should_quit: bool,
}

impl ClientApp {
    pub fn new(connection: Arc<ServerConnection>) -> Self {
        Self {
            connection,
            pending_resize: None,
            selecting: false,
            should_quit: false,
        }
    }

    pub fn connection(&self) -> &Arc<ServerConnection> {
        &self.connection
    }

    /// Handle a local key press. Ctrl-q quits the client; everything else
    /// is translated and forwarded to the server.
    pub fn handle_key(&mut self, key: CtKeyEvent) -> Result<()> {
        if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return Ok(());
        }
        if let Some(event) = translate_key(key) {
            self.connection.send_key(event)?;
        }
        Ok(())
    }

    /// Route a mouse event: selection drags stay local unless the pane
    /// under the cursor delegates selection handling to its app; presses
    /// always reach the server so focus follows clicks.
    pub fn handle_mouse(&mut self, mouse: CtMouseEvent) -> Result<()> {
        let x = i32::from(mouse.column);
        // The status row is local UI; panes live above it.
        let y = i32::from(mouse.row);

        let state = self.connection.state();
        let mut state = state.lock().expect("state lock poisoned");
        let delegated = state
            .cache
            .pane_at(x, y)
            .map(|p| (p.id, p.handles_selection, p.rect));

        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some((pane_id, handles_selection, rect)) = delegated {
                    if handles_selection {
                        state.cache.clear_selection();
                        self.selecting = false;
                    } else {
                        let local_x = (x - rect.x).max(0) as u16;
                        let local_y = (y - rect.y).max(0) as u16;
                        state.cache.begin_selection(pane_id, local_x, local_y);
                        self.selecting = true;
                    }
                } else {
                    state.cache.clear_selection();
                    self.selecting = false;
                }
                drop(state);
                self.connection
                    .send_mouse(mouse_message(mouse, BUTTON_LEFT))?;
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                if self.selecting {
                    let rect = state
                        .cache
                        .selection()
                        .and_then(|s| state.cache.pane_by_id(&s.pane_id))
                        .map(|p| p.rect);
                    if let Some(rect) = rect {
                        let local_x = (x - rect.x).clamp(0, rect.width.max(1) - 1) as u16;
                        let local_y = (y - rect.y).clamp(0, rect.height.max(1) - 1) as u16;
                        state.cache.update_selection(local_x, local_y);
                    }
                } else if matches!(delegated, Some((_, true, _))) {
                    drop(state);
                    self.connection
                        .send_mouse(mouse_message(mouse, BUTTON_LEFT))?;
                }
            }
            MouseEventKind::Up(MouseButton::Left) => {
                if self.selecting {
                    self.selecting = false;
                    let text = state.cache.selected_text().unwrap_or_default();
                    state.cache.clear_selection();
                    drop(state);
                    if !text.is_empty() {
                        // The selection becomes the shared clipboard, and
                        // the OS clipboard when one is available.
                        self.connection
                            .clipboard_set("text/plain", text.clone().into_bytes())?;
                        if let Ok(mut os_clipboard) = arboard::Clipboard::new() {
                            let _ = os_clipboard.set_text(text);
                        }
                    }
                } else {
                    drop(state);
                    self.connection.send_mouse(mouse_message(mouse, 0))?;
                }
            }
            MouseEventKind::ScrollUp => {
                drop(state);
                self.connection
                    .send_mouse(mouse_message(mouse, BUTTON_SCROLL_UP))?;
            }
            MouseEventKind::ScrollDown => {
                drop(state);
                self.connection
                    .send_mouse(mouse_message(mouse, BUTTON_SCROLL_DOWN))?;
            }
            MouseEventKind::Down(MouseButton::Right) => {
                drop(state);
                self.connection
                    .send_mouse(mouse_message(mouse, BUTTON_RIGHT))?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Record a terminal resize; only the newest one is sent, after the
    /// debounce window closes.
    pub fn schedule_resize(&mut self, cols: u16, rows: u16) {
        self.pending_resize = Some((cols, rows, Instant::now()));
    }

    /// Flush the pending resize if its debounce has elapsed.
    pub fn tick(&mut self) -> Result<()> {
        if let Some((cols, rows, at)) = self.pending_resize {
            if at.elapsed() >= RESIZE_DEBOUNCE {
                self.pending_resize = None;
                self.connection.send_resize(cols, rows)?;
            }
        }
        Ok(())
    }
}

fn mouse_message(mouse: CtMouseEvent, buttons: u32) -> MouseEvent {
    MouseEvent {
        x: mouse.column as i16,
        y: mouse.row as i16,
        buttons,
        modifiers: translate_modifiers(mouse.modifiers),
    }
}

fn translate_modifiers(modifiers: KeyModifiers) -> u16 {
    let mut out = 0;
    if modifiers.contains(KeyModifiers::SHIFT) {
        out |= keys::MOD_SHIFT;
    }
    if modifiers.contains(KeyModifiers::CONTROL) {
        out |= keys::MOD_CTRL;
    }
    if modifiers.contains(KeyModifiers::ALT) {
        out |= keys::MOD_ALT;
    }
    out
}

/// Translate a crossterm key event into the protocol's neutral form.
pub fn translate_key(key: CtKeyEvent) -> Option<KeyEvent> {
    let modifiers = translate_modifiers(key.modifiers);
    let (key_code, rune) = match key.code {
        KeyCode::Char(c) => (keys::KEY_RUNE, u32::from(c)),
        KeyCode::Enter => (keys::KEY_ENTER, 0),
        KeyCode::Backspace => (keys::KEY_BACKSPACE, 0),
        KeyCode::Tab => (keys::KEY_TAB, 0),
        KeyCode::BackTab => (keys::KEY_BACKTAB, 0),
        KeyCode::Esc => (keys::KEY_ESC, 0),
        KeyCode::Up => (keys::KEY_UP, 0),
        KeyCode::Down => (keys::KEY_DOWN, 0),
        KeyCode::Left => (keys::KEY_LEFT, 0),
        KeyCode::Right => (keys::KEY_RIGHT, 0),
        KeyCode::Home => (keys::KEY_HOME, 0),
        KeyCode::End => (keys::KEY_END, 0),
        KeyCode::PageUp => (keys::KEY_PAGE_UP, 0),
        KeyCode::PageDown => (keys::KEY_PAGE_DOWN, 0),
        KeyCode::Delete => (keys::KEY_DELETE, 0),
        KeyCode::Insert => (keys::KEY_INSERT, 0),
        KeyCode::F(n) => (keys::KEY_FN_BASE + u32::from(n), 0),
        _ => return None,
    };
    Some(KeyEvent {
        key_code,
        rune,
        modifiers,
    })
}
