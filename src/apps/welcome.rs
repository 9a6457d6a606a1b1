//! The default welcome screen shown in a fresh workspace.

use anyhow::Result;
use serde_json::Value;

use crate::protocol::cell::{Cell, Color, Style, ATTR_BOLD, ATTR_DIM};
use crate::protocol::messages::KeyEvent;

use super::{App, CellGrid};

pub const APP_TYPE: &str = "welcome";

const BANNER: &str = "T E X E L A T I O N";
const TAGLINE: &str = "a text-mode desktop";
const HINTS: [&str; 3] = [
    "ctrl-a v  split vertically",
    "ctrl-a s  split horizontally",
    "ctrl-a x  close pane",
];

pub struct Welcome {
    cols: u16,
    rows: u16,
}

impl Welcome {
    pub fn new() -> Self {
        Self { cols: 0, rows: 0 }
    }
}

impl Default for Welcome {
    fn default() -> Self {
        Self::new()
    }
}

impl App for Welcome {
    fn app_type(&self) -> &str {
        APP_TYPE
    }

    fn title(&self) -> String {
        "welcome".to_string()
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

    fn handle_key(&mut self, _key: KeyEvent) -> Result<()> {
        Ok(())
    }

    fn render(&mut self) -> CellGrid {
        let mut grid = blank_grid(self.cols, self.rows);
        let bold = Style {
            attrs: ATTR_BOLD,
            fg: Color::Ansi(6),
            ..Style::default()
        };
        let dim = Style {
            attrs: ATTR_DIM,
            ..Style::default()
        };

        let mid = (self.rows / 2).saturating_sub(3);
        write_centered(&mut grid, mid, BANNER, bold);
        write_centered(&mut grid, mid + 1, TAGLINE, dim);
        for (i, hint) in HINTS.iter().enumerate() {
            write_centered(&mut grid, mid + 3 + i as u16, hint, Style::default());
        }
        grid
    }
}

pub(super) fn blank_grid(cols: u16, rows: u16) -> CellGrid {
    vec![vec![Cell::default(); cols as usize]; rows as usize]
}

pub(super) fn write_centered(grid: &mut CellGrid, row: u16, text: &str, style: Style) {
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

/// Shared helper: a blank grid with lines of plain text centered vertically.
pub fn centered_text_grid(cols: u16, rows: u16, lines: &[String]) -> CellGrid {
    let mut grid = blank_grid(cols, rows);
    let top = (rows as usize).saturating_sub(lines.len()) / 2;
    for (i, line) in lines.iter().enumerate() {
        write_centered(&mut grid, (top + i) as u16, line, Style::default());
    }
    grid
}
