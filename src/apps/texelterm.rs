//! texelterm: a pane hosting a real shell through a PTY.
//!
//! The core treats this app like any other: it renders an opaque styled
//! cell grid and consumes key events. VT parsing is delegated to `vt100`;
//! process plumbing to `portable-pty`. Configuration is carried as opaque
//! JSON so fields this build does not understand (such as scrollback
//! format tags) survive snapshot round-trips.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, CommandBuilder, PtyPair, PtySize};
use serde_json::Value;

use crate::protocol::cell::{Cell, Color, Style, ATTR_BOLD, ATTR_ITALIC, ATTR_REVERSE, ATTR_UNDERLINE};
use crate::protocol::keys;
use crate::protocol::messages::KeyEvent;

use super::{App, CellGrid};

pub const APP_TYPE: &str = "texelterm";

/// Scrollback lines retained by the in-memory emulator.
const SCROLLBACK_LINES: usize = 10000;

/// A started terminal: PTY pair, reader thread and emulator state.
struct Running {
    pair: PtyPair,
    writer: Box<dyn Write + Send>,
    output_rx: Receiver<Vec<u8>>,
    _reader_thread: thread::JoinHandle<()>,
    alive: Arc<AtomicBool>,
    parser: vt100::Parser,
    rows: u16,
    cols: u16,
}

pub struct Texelterm {
    config: Value,
    running: Option<Running>,
}

impl Texelterm {
    /// Construct in the prepared state: no PTY, no threads, no size.
    pub fn prepared(config: Value) -> Self {
        Self {
            config,
            running: None,
        }
    }

    fn command(&self) -> String {
        self.config
            .get("command")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()))
    }

    fn args(&self) -> Vec<String> {
        self.config
            .get("args")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl App for Texelterm {
    fn app_type(&self) -> &str {
        APP_TYPE
    }

    fn config(&self) -> Value {
        self.config.clone()
    }

    fn title(&self) -> String {
        let command = self.command();
        command
            .rsplit('/')
            .next()
            .unwrap_or(command.as_str())
            .to_string()
    }

    fn start(&mut self, cols: u16, rows: u16) -> Result<()> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(self.command());
        for arg in self.args() {
            cmd.arg(arg);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let _child = pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn terminal command")?;

        let writer = pair.master.take_writer()?;
        let mut reader = pair.master.try_clone_reader()?;

        let (output_tx, output_rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_clone = Arc::clone(&alive);

        let reader_thread = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break, // EOF
                    Ok(n) => {
                        if output_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            alive_clone.store(false, Ordering::SeqCst);
        });

        self.running = Some(Running {
            pair,
            writer,
            output_rx,
            _reader_thread: reader_thread,
            alive,
            parser: vt100::Parser::new(rows, cols, SCROLLBACK_LINES),
            rows,
            cols,
        });
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };
        running
            .pair
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")?;
        running.parser = vt100::Parser::new(rows, cols, SCROLLBACK_LINES);
        running.rows = rows;
        running.cols = cols;
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        let bytes = key_event_to_bytes(&key);
        if bytes.is_empty() {
            return Ok(());
        }
        if let Some(running) = self.running.as_mut() {
            running.writer.write_all(&bytes)?;
            running.writer.flush()?;
        }
        Ok(())
    }

    fn handle_paste(&mut self, data: &[u8]) -> Result<()> {
        if let Some(running) = self.running.as_mut() {
            running.writer.write_all(data)?;
            running.writer.flush()?;
        }
        Ok(())
    }

    fn tick(&mut self) -> bool {
        let Some(running) = self.running.as_mut() else {
            return false;
        };
        let mut had_output = false;
        while let Ok(data) = running.output_rx.try_recv() {
            running.parser.process(&data);
            had_output = true;
        }
        had_output
    }

    fn render(&mut self) -> CellGrid {
        let Some(running) = self.running.as_ref() else {
            return Vec::new();
        };
        let screen = running.parser.screen();
        let (rows, cols) = screen.size();
        let mut grid = Vec::with_capacity(rows as usize);
        for row in 0..rows {
            let mut cells = Vec::with_capacity(cols as usize);
            for col in 0..cols {
                cells.push(match screen.cell(row, col) {
                    Some(cell) => convert_cell(cell),
                    None => Cell::default(),
                });
            }
            grid.push(cells);
        }
        grid
    }

    fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| r.alive.load(Ordering::SeqCst))
    }
}

fn convert_cell(cell: &vt100::Cell) -> Cell {
    let ch = cell.contents().chars().next().unwrap_or(' ');
    let mut attrs = 0u16;
    if cell.bold() {
        attrs |= ATTR_BOLD;
    }
    if cell.italic() {
        attrs |= ATTR_ITALIC;
    }
    if cell.underline() {
        attrs |= ATTR_UNDERLINE;
    }
    if cell.inverse() {
        attrs |= ATTR_REVERSE;
    }
    Cell::new(
        ch,
        Style {
            attrs,
            fg: convert_color(cell.fgcolor()),
            bg: convert_color(cell.bgcolor()),
        },
    )
}

fn convert_color(color: vt100::Color) -> Color {
    match color {
        vt100::Color::Default => Color::Default,
        vt100::Color::Idx(idx) if idx < 16 => Color::Ansi(idx),
        vt100::Color::Idx(idx) => Color::Indexed(idx),
        vt100::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}

/// Translate a protocol key event into the byte sequence the PTY expects.
pub fn key_event_to_bytes(key: &KeyEvent) -> Vec<u8> {
    if key.key_code == keys::KEY_RUNE {
        let Some(c) = char::from_u32(key.rune) else {
            return vec![];
        };
        if key.modifiers & keys::MOD_CTRL != 0 && c.is_ascii_alphabetic() {
            // Ctrl+A = 0x01, Ctrl+B = 0x02, ...
            let ctrl = (c.to_ascii_lowercase() as u8)
                .wrapping_sub(b'a')
                .wrapping_add(1);
            return vec![ctrl];
        }
        if key.modifiers & keys::MOD_ALT != 0 {
            let mut bytes = vec![0x1b];
            bytes.extend(c.to_string().into_bytes());
            return bytes;
        }
        return c.to_string().into_bytes();
    }
    match key.key_code {
        keys::KEY_ENTER => vec![b'\r'],
        keys::KEY_BACKSPACE => vec![0x7f],
        keys::KEY_TAB => vec![b'\t'],
        keys::KEY_BACKTAB => vec![0x1b, b'[', b'Z'],
        keys::KEY_ESC => vec![0x1b],
        keys::KEY_UP => vec![0x1b, b'[', b'A'],
        keys::KEY_DOWN => vec![0x1b, b'[', b'B'],
        keys::KEY_RIGHT => vec![0x1b, b'[', b'C'],
        keys::KEY_LEFT => vec![0x1b, b'[', b'D'],
        keys::KEY_HOME => vec![0x1b, b'[', b'H'],
        keys::KEY_END => vec![0x1b, b'[', b'F'],
        keys::KEY_PAGE_UP => vec![0x1b, b'[', b'5', b'~'],
        keys::KEY_PAGE_DOWN => vec![0x1b, b'[', b'6', b'~'],
        keys::KEY_DELETE => vec![0x1b, b'[', b'3', b'~'],
        keys::KEY_INSERT => vec![0x1b, b'[', b'2', b'~'],
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prepared_app_reports_config_untouched() {
        let config = json!({"command": "/bin/sh", "scrollback_format": "TXHIST02"});
        let app = Texelterm::prepared(config.clone());
        assert_eq!(app.config(), config);
        assert_eq!(app.title(), "sh");
    }

    #[test]
    fn prepared_app_renders_nothing_and_ignores_resize() {
        let mut app = Texelterm::prepared(json!({}));
        app.resize(80, 24).unwrap();
        assert!(app.render().is_empty());
        assert!(!app.is_running());
    }

    #[test]
    fn printable_runes_become_utf8_bytes() {
        let key = KeyEvent {
            key_code: keys::KEY_RUNE,
            rune: u32::from('é'),
            modifiers: 0,
        };
        assert_eq!(key_event_to_bytes(&key), "é".as_bytes().to_vec());
    }

    #[test]
    fn ctrl_keys_become_control_bytes() {
        let key = KeyEvent {
            key_code: keys::KEY_RUNE,
            rune: u32::from('c'),
            modifiers: keys::MOD_CTRL,
        };
        assert_eq!(key_event_to_bytes(&key), vec![0x03]);
    }

    #[test]
    fn navigation_keys_become_escape_sequences() {
        let key = KeyEvent {
            key_code: keys::KEY_UP,
            rune: 0,
            modifiers: 0,
        };
        assert_eq!(key_event_to_bytes(&key), vec![0x1b, b'[', b'A']);
        let key = KeyEvent {
            key_code: keys::KEY_ENTER,
            rune: 0,
            modifiers: 0,
        };
        assert_eq!(key_event_to_bytes(&key), vec![b'\r']);
    }

    #[test]
    fn color_conversion_distinguishes_ansi_and_indexed() {
        assert_eq!(convert_color(vt100::Color::Idx(3)), Color::Ansi(3));
        assert_eq!(convert_color(vt100::Color::Idx(200)), Color::Indexed(200));
        assert_eq!(
            convert_color(vt100::Color::Rgb(1, 2, 3)),
            Color::Rgb(1, 2, 3)
        );
    }
}
