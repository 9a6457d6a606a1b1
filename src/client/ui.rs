//! Rendering the replicated workspace with ratatui.
//!
//! The cache's sorted panes are painted cell by cell in render order; the
//! bottom row is the status bar driven by the latest `StateUpdate`.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    widgets::Widget,
};

use crate::protocol::cell as proto;
use crate::protocol::cell::{
    ATTR_BLINK, ATTR_BOLD, ATTR_DIM, ATTR_ITALIC, ATTR_REVERSE, ATTR_UNDERLINE,
};

use super::cache::Selection;
use super::handler::ClientState;

/// Full-screen widget: panes above, status bar on the last row.
pub struct WorkspaceView<'a> {
    state: &'a ClientState,
}

impl<'a> WorkspaceView<'a> {
    pub fn new(state: &'a ClientState) -> Self {
        Self { state }
    }
}

impl Widget for WorkspaceView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 {
            return;
        }
        let pane_area = Rect::new(area.x, area.y, area.width, area.height.saturating_sub(1));
        let status_area = Rect::new(
            area.x,
            area.y + area.height.saturating_sub(1),
            area.width,
            1,
        );

        // Desktop background behind any gaps between panes.
        let bg = self
            .state
            .state
            .as_ref()
            .map(|s| s.desktop_bg_rgb)
            .unwrap_or(0);
        if bg != 0 {
            let style = Style::default().bg(rgb_color(bg));
            for y in pane_area.top()..pane_area.bottom() {
                for x in pane_area.left()..pane_area.right() {
                    if let Some(cell) = buf.cell_mut((x, y)) {
                        cell.set_style(style);
                    }
                }
            }
        }

        let selection = self.state.cache.selection();
        for pane in self.state.cache.sorted_panes() {
            render_pane_cells(pane, pane_area, buf);
            if let Some(selection) = selection {
                if selection.pane_id == pane.id {
                    highlight_selection(pane, &selection, pane_area, buf);
                }
            }
        }

        render_status_bar(self.state, status_area, buf);
    }
}

fn render_pane_cells(pane: &super::cache::CachedPane, area: Rect, buf: &mut Buffer) {
    for (row_index, row) in pane.rows.iter().enumerate() {
        let y = pane.rect.y + row_index as i32;
        if y < 0 || y >= i32::from(area.height) {
            continue;
        }
        for (col_index, cell) in row.iter().enumerate() {
            let x = pane.rect.x + col_index as i32;
            if x < 0 || x >= i32::from(area.width) {
                continue;
            }
            let screen_x = area.x + x as u16;
            let screen_y = area.y + y as u16;
            if let Some(target) = buf.cell_mut((screen_x, screen_y)) {
                let mut text = [0u8; 4];
                target.set_symbol(cell.ch.encode_utf8(&mut text));
                target.set_style(cell_style(&cell.style));
            }
        }
    }
}

fn highlight_selection(
    pane: &super::cache::CachedPane,
    selection: &Selection,
    area: Rect,
    buf: &mut Buffer,
) {
    let (x0, y0, x1, y1) = selection.bounds();
    for y in y0..=y1 {
        for x in x0..=x1 {
            let screen_x = pane.rect.x + i32::from(x);
            let screen_y = pane.rect.y + i32::from(y);
            if screen_x < 0
                || screen_y < 0
                || screen_x >= i32::from(area.width)
                || screen_y >= i32::from(area.height)
            {
                continue;
            }
            if let Some(cell) = buf.cell_mut((area.x + screen_x as u16, area.y + screen_y as u16)) {
                cell.set_style(cell.style().add_modifier(Modifier::REVERSED));
            }
        }
    }
}

fn render_status_bar(state: &ClientState, area: Rect, buf: &mut Buffer) {
    let mut text = String::new();
    match &state.state {
        Some(update) => {
            text.push_str(&format!(" [{}] ", update.workspace_id));
            if update.in_control_mode {
                text.push_str("CTRL ");
            }
            if update.zoomed {
                text.push_str("ZOOM ");
            }
            text.push_str(&update.active_title);
        }
        None => text.push_str(" connecting..."),
    }
    if !state.connected {
        text.push_str("  (disconnected)");
    }

    let style = if state.connected {
        Style::default().bg(Color::DarkGray).fg(Color::White)
    } else {
        Style::default().bg(Color::Red).fg(Color::White)
    };
    for x in area.left()..area.right() {
        if let Some(cell) = buf.cell_mut((x, area.y)) {
            cell.set_symbol(" ");
            cell.set_style(style);
        }
    }
    buf.set_string(area.x, area.y, &text, style);
    let hint = "ctrl-q quit ";
    if area.width as usize > text.len() + hint.len() {
        buf.set_string(
            area.x + area.width - hint.len() as u16,
            area.y,
            hint,
            style,
        );
    }
}

fn cell_style(style: &proto::Style) -> Style {
    let mut out = Style::default()
        .fg(convert_color(style.fg))
        .bg(convert_color(style.bg));
    if style.has(ATTR_BOLD) {
        out = out.add_modifier(Modifier::BOLD);
    }
    if style.has(ATTR_UNDERLINE) {
        out = out.add_modifier(Modifier::UNDERLINED);
    }
    if style.has(ATTR_REVERSE) {
        out = out.add_modifier(Modifier::REVERSED);
    }
    if style.has(ATTR_BLINK) {
        out = out.add_modifier(Modifier::SLOW_BLINK);
    }
    if style.has(ATTR_DIM) {
        out = out.add_modifier(Modifier::DIM);
    }
    if style.has(ATTR_ITALIC) {
        out = out.add_modifier(Modifier::ITALIC);
    }
    out
}

fn convert_color(color: proto::Color) -> Color {
    match color {
        proto::Color::Default => Color::Reset,
        proto::Color::Ansi(0) => Color::Black,
        proto::Color::Ansi(1) => Color::Red,
        proto::Color::Ansi(2) => Color::Green,
        proto::Color::Ansi(3) => Color::Yellow,
        proto::Color::Ansi(4) => Color::Blue,
        proto::Color::Ansi(5) => Color::Magenta,
        proto::Color::Ansi(6) => Color::Cyan,
        proto::Color::Ansi(7) => Color::Gray,
        proto::Color::Ansi(8) => Color::DarkGray,
        proto::Color::Ansi(9) => Color::LightRed,
        proto::Color::Ansi(10) => Color::LightGreen,
        proto::Color::Ansi(11) => Color::LightYellow,
        proto::Color::Ansi(12) => Color::LightBlue,
        proto::Color::Ansi(13) => Color::LightMagenta,
        proto::Color::Ansi(14) => Color::LightCyan,
        proto::Color::Ansi(15) => Color::White,
        proto::Color::Ansi(other) => Color::Indexed(other),
        proto::Color::Indexed(idx) => Color::Indexed(idx),
        proto::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}

fn rgb_color(packed: u32) -> Color {
    Color::Rgb(
        ((packed >> 16) & 0xff) as u8,
        ((packed >> 8) & 0xff) as u8,
        (packed & 0xff) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ansi_colors_map_to_named_ratatui_colors() {
        assert_eq!(convert_color(proto::Color::Ansi(1)), Color::Red);
        assert_eq!(convert_color(proto::Color::Ansi(15)), Color::White);
        assert_eq!(convert_color(proto::Color::Indexed(200)), Color::Indexed(200));
        assert_eq!(
            convert_color(proto::Color::Rgb(1, 2, 3)),
            Color::Rgb(1, 2, 3)
        );
        assert_eq!(convert_color(proto::Color::Default), Color::Reset);
    }

    #[test]
    fn attribute_bits_map_to_modifiers() {
        let style = proto::Style {
            attrs: ATTR_BOLD | ATTR_ITALIC,
            ..proto::Style::default()
        };
        let converted = cell_style(&style);
        assert!(converted.add_modifier.contains(Modifier::BOLD));
        assert!(converted.add_modifier.contains(Modifier::ITALIC));
        assert!(!converted.add_modifier.contains(Modifier::DIM));
    }

    #[test]
    fn packed_rgb_unpacks_in_rgb_order() {
        assert_eq!(rgb_color(0x1a1b26), Color::Rgb(0x1a, 0x1b, 0x26));
    }
}
