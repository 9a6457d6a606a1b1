//! Panes and the authoritative buffer store.
//!
//! Each pane owns its hosting application and a revisioned cell buffer.
//! `snapshot_buffers` re-renders every app and bumps a pane's revision only
//! when the rendered grid actually changed, which is what lets the
//! publisher skip unchanged panes cheaply.

use serde_json::Value;

use crate::apps::{App, CellGrid};
use crate::protocol::cell::Cell;
use crate::protocol::PaneId;

use super::tree::Rect;

/// A fixed-size styled cell grid plus its change counter.
pub struct PaneBuffer {
    grid: CellGrid,
    revision: u32,
}

impl PaneBuffer {
    pub fn new() -> Self {
        Self {
            grid: Vec::new(),
            revision: 0,
        }
    }

    pub fn with_revision(revision: u32) -> Self {
        Self {
            grid: Vec::new(),
            revision,
        }
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    /// Store a freshly rendered grid normalized to `cols x rows`, bumping
    /// the revision if anything changed since the last capture.
    pub fn capture(&mut self, rendered: CellGrid, cols: u16, rows: u16) -> bool {
        let normalized = normalize_grid(rendered, cols, rows);
        if normalized == self.grid {
            return false;
        }
        self.grid = normalized;
        self.revision += 1;
        true
    }

    /// Plain-text rows (trailing blanks trimmed), for tree snapshots and
    /// the on-disk store.
    pub fn rows_as_strings(&self) -> Vec<String> {
        self.grid
            .iter()
            .map(|row| {
                let text: String = row.iter().map(|c| c.ch).collect();
                text.trim_end().to_string()
            })
            .collect()
    }
}

impl Default for PaneBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_grid(mut grid: CellGrid, cols: u16, rows: u16) -> CellGrid {
    let cols = cols as usize;
    let rows = rows as usize;
    grid.truncate(rows);
    for row in &mut grid {
        row.truncate(cols);
        while row.len() < cols {
            row.push(Cell::default());
        }
    }
    while grid.len() < rows {
        grid.push(vec![Cell::default(); cols]);
    }
    grid
}

/// A pane: stable id, geometry, hosting app and captured buffer.
pub struct Pane {
    pub id: PaneId,
    pub title: String,
    pub rect: Rect,
    pub app: Box<dyn App>,
    pub buffer: PaneBuffer,
    pub z_order: i32,
}

/// Everything the publisher and snapshot builder need from one pane,
/// captured under the workspace's ownership so neither holds pane borrows.
#[derive(Clone)]
pub struct PaneCapture {
    pub pane_id: PaneId,
    pub title: String,
    pub rect: Rect,
    pub revision: u32,
    pub grid: CellGrid,
    pub rows: Vec<String>,
    pub app_type: String,
    pub app_config: Value,
}

/// Ordered pane list. The tree references panes by index into this order.
pub struct PaneStore {
    panes: Vec<Pane>,
}

impl PaneStore {
    pub fn new() -> Self {
        Self { panes: Vec::new() }
    }

    /// Append a pane hosting a prepared app. The caller starts the app
    /// after layout has assigned a rectangle.
    pub fn add(&mut self, id: PaneId, app: Box<dyn App>) -> usize {
        let title = app.title();
        self.panes.push(Pane {
            id,
            title,
            rect: Rect::default(),
            app,
            buffer: PaneBuffer::new(),
            z_order: 0,
        });
        self.panes.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Option<Pane> {
        if index < self.panes.len() {
            Some(self.panes.remove(index))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Pane> {
        self.panes.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Pane> {
        self.panes.get_mut(index)
    }

    pub fn index_of(&self, id: PaneId) -> Option<usize> {
        self.panes.iter().position(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pane> {
        self.panes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pane> {
        self.panes.iter_mut()
    }

    /// Drain pending app output. Returns true if any app reported a
    /// possible visual change.
    pub fn tick_apps(&mut self) -> bool {
        let mut changed = false;
        for pane in &mut self.panes {
            if pane.app.tick() {
                changed = true;
            }
        }
        changed
    }

    /// Re-render every app, diff-capture into the buffers, and return the
    /// per-pane captures in index order.
    pub fn snapshot_buffers(&mut self) -> Vec<PaneCapture> {
        let mut captures = Vec::with_capacity(self.panes.len());
        for pane in &mut self.panes {
            let rendered = pane.app.render();
            pane.buffer
                .capture(rendered, pane.rect.width.max(0) as u16, pane.rect.height.max(0) as u16);
            pane.title = pane.app.title();
            captures.push(PaneCapture {
                pane_id: pane.id,
                title: pane.title.clone(),
                rect: pane.rect,
                revision: pane.buffer.revision(),
                grid: pane.buffer.grid().clone(),
                rows: pane.buffer.rows_as_strings(),
                app_type: pane.app.app_type().to_string(),
                app_config: pane.app.config(),
            });
        }
        captures
    }
}

impl Default for PaneStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cell::Style;
    use crate::protocol::messages::KeyEvent;
    use anyhow::Result;
    use uuid::Uuid;

    /// Minimal scripted app for store tests.
    struct FixedApp {
        text: String,
        cols: u16,
        rows: u16,
    }

    impl FixedApp {
        fn new(text: &str) -> Self {
            Self {
                text: text.to_string(),
                cols: 0,
                rows: 0,
            }
        }
    }

    impl App for FixedApp {
        fn app_type(&self) -> &str {
            "fixed"
        }
        fn title(&self) -> String {
            "fixed".into()
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
            let mut grid = vec![vec![Cell::default(); self.cols as usize]; self.rows as usize];
            if let Some(row) = grid.first_mut() {
                for (i, ch) in self.text.chars().enumerate().take(row.len()) {
                    row[i] = Cell::new(ch, Style::default());
                }
            }
            grid
        }
    }

    fn store_with_pane(text: &str) -> (PaneStore, usize) {
        let mut store = PaneStore::new();
        let idx = store.add(Uuid::new_v4(), Box::new(FixedApp::new(text)));
        let pane = store.get_mut(idx).unwrap();
        pane.rect = Rect::new(0, 0, 10, 3);
        pane.app.start(10, 3).unwrap();
        (store, idx)
    }

    #[test]
    fn first_capture_bumps_revision_from_zero() {
        let (mut store, idx) = store_with_pane("hi");
        let captures = store.snapshot_buffers();
        assert_eq!(captures[0].revision, 1);
        assert_eq!(store.get(idx).unwrap().buffer.revision(), 1);
    }

    #[test]
    fn unchanged_render_keeps_the_revision() {
        let (mut store, _) = store_with_pane("hi");
        store.snapshot_buffers();
        let captures = store.snapshot_buffers();
        assert_eq!(captures[0].revision, 1);
    }

    #[test]
    fn changed_render_bumps_the_revision() {
        let (mut store, idx) = store_with_pane("hi");
        store.snapshot_buffers();
        if let Some(pane) = store.get_mut(idx) {
            pane.app = Box::new(FixedApp {
                text: "changed".into(),
                cols: 10,
                rows: 3,
            });
        }
        let captures = store.snapshot_buffers();
        assert_eq!(captures[0].revision, 2);
    }

    #[test]
    fn rows_as_strings_trims_trailing_blanks() {
        let (mut store, _) = store_with_pane("hi");
        let captures = store.snapshot_buffers();
        assert_eq!(captures[0].rows, vec!["hi", "", ""]);
    }

    #[test]
    fn capture_normalizes_undersized_render_to_pane_rect() {
        let mut buffer = PaneBuffer::new();
        buffer.capture(vec![vec![Cell::default(); 2]], 4, 3);
        assert_eq!(buffer.grid().len(), 3);
        assert!(buffer.grid().iter().all(|row| row.len() == 4));
    }

    #[test]
    fn index_of_finds_panes_by_id() {
        let (store, idx) = store_with_pane("x");
        let id = store.get(idx).unwrap().id;
        assert_eq!(store.index_of(id), Some(idx));
        assert_eq!(store.index_of(Uuid::new_v4()), None);
    }
}
