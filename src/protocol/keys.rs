//! Platform-neutral key codes and modifier bits for `KeyEvent`.
//!
//! The protocol carries these instead of any input library's key type;
//! the client translates from crossterm events and the server translates
//! into whatever the focused application consumes.

/// A printable character; the scalar itself rides in `KeyEvent.rune`.
pub const KEY_RUNE: u32 = 0;
pub const KEY_ENTER: u32 = 1;
pub const KEY_BACKSPACE: u32 = 2;
pub const KEY_TAB: u32 = 3;
pub const KEY_BACKTAB: u32 = 4;
pub const KEY_ESC: u32 = 5;
pub const KEY_UP: u32 = 6;
pub const KEY_DOWN: u32 = 7;
pub const KEY_LEFT: u32 = 8;
pub const KEY_RIGHT: u32 = 9;
pub const KEY_HOME: u32 = 10;
pub const KEY_END: u32 = 11;
pub const KEY_PAGE_UP: u32 = 12;
pub const KEY_PAGE_DOWN: u32 = 13;
pub const KEY_DELETE: u32 = 14;
pub const KEY_INSERT: u32 = 15;

/// Function keys: F1 is `KEY_FN_BASE + 1`, F12 is `KEY_FN_BASE + 12`.
pub const KEY_FN_BASE: u32 = 100;

pub const MOD_SHIFT: u16 = 1;
pub const MOD_CTRL: u16 = 2;
pub const MOD_ALT: u16 = 4;
