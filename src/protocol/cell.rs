//! Styled cell model shared by pane buffers, deltas and the client cache.

use std::collections::HashMap;

/// Attribute bit flags carried in a [`Style`].
pub const ATTR_BOLD: u16 = 1;
pub const ATTR_UNDERLINE: u16 = 2;
pub const ATTR_REVERSE: u16 = 4;
pub const ATTR_BLINK: u16 = 8;
pub const ATTR_DIM: u16 = 16;
pub const ATTR_ITALIC: u16 = 32;

/// A terminal color in one of the four supported models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Color {
    /// The terminal's default foreground or background.
    #[default]
    Default,
    /// One of the 16 classic ANSI colors (0-15).
    Ansi(u8),
    /// An index into the 256-color palette.
    Indexed(u8),
    /// 24-bit RGB.
    Rgb(u8, u8, u8),
}

impl Color {
    /// Wire model discriminant (0=default, 1=ansi16, 2=ansi256, 3=rgb).
    pub fn model(&self) -> u8 {
        match self {
            Color::Default => 0,
            Color::Ansi(_) => 1,
            Color::Indexed(_) => 2,
            Color::Rgb(..) => 3,
        }
    }

    /// Wire value field for this color.
    pub fn value(&self) -> u32 {
        match *self {
            Color::Default => 0,
            Color::Ansi(n) => u32::from(n),
            Color::Indexed(n) => u32::from(n),
            Color::Rgb(r, g, b) => (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b),
        }
    }

    /// Rebuild a color from its wire model/value pair. Unknown models decode
    /// as the default color rather than failing the whole delta.
    pub fn from_wire(model: u8, value: u32) -> Self {
        match model {
            1 => Color::Ansi((value & 0xf) as u8),
            2 => Color::Indexed((value & 0xff) as u8),
            3 => Color::Rgb(
                ((value >> 16) & 0xff) as u8,
                ((value >> 8) & 0xff) as u8,
                (value & 0xff) as u8,
            ),
            _ => Color::Default,
        }
    }
}

/// Display attributes for a run of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Style {
    pub attrs: u16,
    pub fg: Color,
    pub bg: Color,
}

impl Style {
    pub fn has(&self, attr: u16) -> bool {
        self.attrs & attr != 0
    }
}

/// A single character cell: one Unicode scalar plus its style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub style: Style,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            style: Style::default(),
        }
    }
}

impl Cell {
    pub fn new(ch: char, style: Style) -> Self {
        Self { ch, style }
    }

    /// A blank cell is a space with the default style; blank rows are
    /// omitted from deltas.
    pub fn is_blank(&self) -> bool {
        self.ch == ' ' && self.style == Style::default()
    }
}

/// Deduplicating style table built once per delta. Spans reference styles
/// by index so a delta carries each distinct style exactly once.
#[derive(Debug, Default)]
pub struct StyleTable {
    entries: Vec<Style>,
    index: HashMap<Style, u16>,
}

impl StyleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index for `style`, inserting it on first sight.
    pub fn intern(&mut self, style: Style) -> u16 {
        if let Some(&idx) = self.index.get(&style) {
            return idx;
        }
        let idx = self.entries.len() as u16;
        self.entries.push(style);
        self.index.insert(style, idx);
        idx
    }

    pub fn entries(&self) -> &[Style] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Style> {
        self.entries
    }
}
