//! The launcher: a selectable list of applications to open in the pane.

use anyhow::Result;
use serde_json::json;

use crate::protocol::cell::{Cell, Color, Style, ATTR_BOLD, ATTR_REVERSE};
use crate::protocol::keys;
use crate::protocol::messages::KeyEvent;

use super::welcome::{blank_grid, write_centered};
use super::{App, AppAction, CellGrid};

pub const APP_TYPE: &str = "launcher";

struct Entry {
    label: &'static str,
    app_type: &'static str,
}

const ENTRIES: [Entry; 2] = [
    Entry {
        label: "terminal (texelterm)",
        app_type: "texelterm",
    },
    Entry {
        label: "welcome screen",
        app_type: "welcome",
    },
];

pub struct Launcher {
    cols: u16,
    rows: u16,
    selected: usize,
    pending: Option<AppAction>,
}

impl Launcher {
    pub fn new() -> Self {
        Self {
            cols: 0,
            rows: 0,
            selected: 0,
            pending: None,
        }
    }

    fn choose(&mut self) {
        let entry = &ENTRIES[self.selected];
        self.pending = Some(AppAction::Launch {
            app_type: entry.app_type.to_string(),
            config: json!({}),
        });
    }

    fn list_top(&self) -> usize {
        (self.rows as usize).saturating_sub(ENTRIES.len() + 2) / 2
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

impl App for Launcher {
    fn app_type(&self) -> &str {
        APP_TYPE
    }

    fn title(&self) -> String {
        "launcher".to_string()
    }

    fn start(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.cols = cols;
        self.rows = rows;
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.cols = cols;
        self.rows = rows;
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        match key.key_code {
            keys::KEY_UP => self.selected = self.selected.saturating_sub(1),
            keys::KEY_DOWN => self.selected = (self.selected + 1).min(ENTRIES.len() - 1),
            keys::KEY_ENTER => self.choose(),
            keys::KEY_RUNE => match char::from_u32(key.rune) {
                Some('j') => self.selected = (self.selected + 1).min(ENTRIES.len() - 1),
                Some('k') => self.selected = self.selected.saturating_sub(1),
                _ => {}
            },
            _ => {}
        }
        Ok(())
    }

    fn handle_mouse(&mut self, _x: u16, y: u16, buttons: u32) {
        if buttons == 0 {
            return;
        }
        let top = self.list_top() + 2;
        let row = y as usize;
        if row >= top && row < top + ENTRIES.len() {
            self.selected = row - top;
            self.choose();
        }
    }

    fn render(&mut self) -> CellGrid {
        let mut grid = blank_grid(self.cols, self.rows);
        let header = Style {
            attrs: ATTR_BOLD,
            fg: Color::Ansi(6),
            ..Style::default()
        };
        let top = self.list_top();
        write_centered(&mut grid, top as u16, "open an application", header);
        for (i, entry) in ENTRIES.iter().enumerate() {
            let style = if i == self.selected {
                Style {
                    attrs: ATTR_REVERSE,
                    ..Style::default()
                }
            } else {
                Style::default()
            };
            let marker = if i == self.selected { "> " } else { "  " };
            let line = format!("{marker}{}", entry.label);
            write_row(&mut grid, (top + 2 + i) as u16, &line, style);
        }
        grid
    }

    fn take_action(&mut self) -> Option<AppAction> {
        self.pending.take()
    }

    fn handles_selection(&self) -> bool {
        true
    }
}

fn write_row(grid: &mut CellGrid, row: u16, text: &str, style: Style) {
    let row = row as usize;
    if row >= grid.len() {
        return;
    }
    let cols = grid[row].len();
    let chars: Vec<char> = text.chars().collect();
    let start = cols.saturating_sub(chars.len()) / 2;
    for (i, ch) in chars.iter().enumerate() {
        if start + i < cols {
            grid[row][start + i] = Cell::new(*ch, style);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: u32) -> KeyEvent {
        KeyEvent {
            key_code: code,
            rune: 0,
            modifiers: 0,
        }
    }

    #[test]
    fn arrows_move_selection_within_bounds() {
        let mut app = Launcher::new();
        app.start(60, 20).unwrap();
        app.handle_key(key(keys::KEY_UP)).unwrap();
        assert_eq!(app.selected, 0);
        app.handle_key(key(keys::KEY_DOWN)).unwrap();
        assert_eq!(app.selected, 1);
        app.handle_key(key(keys::KEY_DOWN)).unwrap();
        assert_eq!(app.selected, ENTRIES.len() - 1);
    }

    #[test]
    fn enter_raises_a_launch_action() {
        let mut app = Launcher::new();
        app.start(60, 20).unwrap();
        app.handle_key(key(keys::KEY_ENTER)).unwrap();
        match app.take_action() {
            Some(AppAction::Launch { app_type, .. }) => assert_eq!(app_type, "texelterm"),
            other => panic!("expected launch action, got {other:?}"),
        }
        // Action is consumed.
        assert!(app.take_action().is_none());
    }

    #[test]
    fn selected_entry_renders_reversed() {
        let mut app = Launcher::new();
        app.start(60, 20).unwrap();
        let grid = app.render();
        let reversed_rows: Vec<usize> = grid
            .iter()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|c| c.style.has(ATTR_REVERSE)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(reversed_rows.len(), 1);
    }
}
