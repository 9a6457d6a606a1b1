//! The client-side buffer cache: reconstructs a renderable view of the
//! workspace from tree snapshots plus row-span deltas.
//!
//! The cache is the only client-side state the renderer reads. It applies
//! whatever the server sends, drops stale deltas by revision and tracks the
//! local text selection.

use std::collections::HashMap;
use std::time::Instant;

use crate::protocol::cell::{Cell, Style};
use crate::protocol::messages::{
    BufferDelta, PaneState, TreeSnapshot, PANE_FLAG_ACTIVE, PANE_FLAG_RESIZING,
    PANE_FLAG_SELECTION_DELEGATED,
};
use crate::protocol::{PaneId, Rect};

/// One replicated pane.
pub struct CachedPane {
    pub id: PaneId,
    pub title: String,
    pub rect: Rect,
    pub revision: u32,
    pub rows: Vec<Vec<Cell>>,
    pub active: bool,
    pub resizing: bool,
    pub z_order: i32,
    pub handles_selection: bool,
    pub app_type: String,
    pub updated_at: Instant,
}

impl CachedPane {
    pub fn row_cells(&self, row: usize) -> Option<&[Cell]> {
        self.rows.get(row).map(Vec::as_slice)
    }
}

/// An in-progress or completed drag selection, in pane-relative cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub pane_id: PaneId,
    pub anchor: (u16, u16),
    pub point: (u16, u16),
}

impl Selection {
    /// Bounding box as `(x0, y0, x1, y1)`, inclusive.
    pub fn bounds(&self) -> (u16, u16, u16, u16) {
        (
            self.anchor.0.min(self.point.0),
            self.anchor.1.min(self.point.1),
            self.anchor.0.max(self.point.0),
            self.anchor.1.max(self.point.1),
        )
    }
}

#[derive(Default)]
pub struct BufferCache {
    panes: HashMap<PaneId, CachedPane>,
    selection: Option<Selection>,
}

impl BufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pane set from a full tree snapshot. Panes absent from
    /// the snapshot are dropped. A pane whose revision matches what we
    /// already hold keeps its styled rows (resized to the new geometry);
    /// otherwise the snapshot's text rows win and styling catches up with
    /// the next delta.
    pub fn apply_snapshot(&mut self, snapshot: &TreeSnapshot) {
        let mut panes = HashMap::with_capacity(snapshot.panes.len());
        for pane in &snapshot.panes {
            let rect = Rect::new(pane.x, pane.y, pane.width, pane.height);
            let prior = self.panes.get(&pane.pane_id);

            let rows = match prior {
                Some(p) if p.revision == pane.revision => resize_rows(p.rows.clone(), rect),
                _ if !pane.rows.is_empty() => rows_from_strings(&pane.rows, rect),
                Some(p) => resize_rows(p.rows.clone(), rect),
                None => blank_rows(rect),
            };

            // Pane flags arrive out of band; carry them across replacement.
            let (active, resizing, z_order, handles_selection) = prior
                .map(|p| (p.active, p.resizing, p.z_order, p.handles_selection))
                .unwrap_or((false, false, 0, false));

            panes.insert(
                pane.pane_id,
                CachedPane {
                    id: pane.pane_id,
                    title: pane.title.clone(),
                    rect,
                    revision: pane.revision,
                    rows,
                    active,
                    resizing,
                    z_order,
                    handles_selection,
                    app_type: pane.app_type.clone(),
                    updated_at: Instant::now(),
                },
            );
        }
        self.panes = panes;

        // A selection in a vanished pane is meaningless.
        if let Some(selection) = self.selection {
            if !self.panes.contains_key(&selection.pane_id) {
                self.selection = None;
            }
        }
    }

    /// Overlay a delta. Stale revisions are dropped; rows present in the
    /// delta replace the cached rows span by span.
    pub fn apply_delta(&mut self, delta: &BufferDelta) -> bool {
        let Some(pane) = self.panes.get_mut(&delta.pane_id) else {
            // Unknown pane: the introducing snapshot has not arrived yet.
            return false;
        };
        if delta.revision < pane.revision {
            return false;
        }

        for row_delta in &delta.rows {
            let row_index = row_delta.row as usize;
            while pane.rows.len() <= row_index {
                pane.rows.push(Vec::new());
            }
            let mut row = pane.rows[row_index].clone();
            for span in &row_delta.spans {
                let style = delta
                    .styles
                    .get(span.style_index as usize)
                    .copied()
                    .unwrap_or_default();
                let mut col = span.start_col as usize;
                for ch in span.text.chars() {
                    while row.len() <= col {
                        row.push(Cell::default());
                    }
                    row[col] = Cell::new(ch, style);
                    col += 1;
                }
            }
            pane.rows[row_index] = row;
        }

        pane.revision = delta.revision;
        pane.updated_at = Instant::now();
        true
    }

    /// Update per-pane flags from a `PaneState` broadcast.
    pub fn set_pane_flags(&mut self, state: &PaneState) {
        if let Some(pane) = self.panes.get_mut(&state.pane_id) {
            pane.active = state.flags & PANE_FLAG_ACTIVE != 0;
            pane.resizing = state.flags & PANE_FLAG_RESIZING != 0;
            pane.handles_selection = state.flags & PANE_FLAG_SELECTION_DELEGATED != 0;
            pane.z_order = state.z_order;
        }
    }

    /// Panes in render order: z-order ascending, then top-to-bottom,
    /// left-to-right, then id as the final tiebreak.
    pub fn sorted_panes(&self) -> Vec<&CachedPane> {
        let mut panes: Vec<&CachedPane> = self.panes.values().collect();
        panes.sort_by(|a, b| {
            a.z_order
                .cmp(&b.z_order)
                .then(a.rect.y.cmp(&b.rect.y))
                .then(a.rect.x.cmp(&b.rect.x))
                .then(a.id.cmp(&b.id))
        });
        panes
    }

    /// The topmost pane covering a workspace coordinate, preferring higher
    /// z-order, then active state.
    pub fn pane_at(&self, x: i32, y: i32) -> Option<&CachedPane> {
        self.panes
            .values()
            .filter(|p| p.rect.contains(x, y))
            .max_by_key(|p| (p.z_order, p.active))
    }

    pub fn pane_by_id(&self, id: &PaneId) -> Option<&CachedPane> {
        self.panes.get(id)
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    // ----- selection -------------------------------------------------------

    pub fn begin_selection(&mut self, pane_id: PaneId, x: u16, y: u16) {
        self.selection = Some(Selection {
            pane_id,
            anchor: (x, y),
            point: (x, y),
        });
    }

    pub fn update_selection(&mut self, x: u16, y: u16) {
        if let Some(selection) = &mut self.selection {
            selection.point = (x, y);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    /// Text inside the selection's bounding box, rows joined by newlines,
    /// trailing blanks trimmed per row.
    pub fn selected_text(&self) -> Option<String> {
        let selection = self.selection?;
        let pane = self.panes.get(&selection.pane_id)?;
        let (x0, y0, x1, y1) = selection.bounds();
        let mut lines = Vec::new();
        for row_index in y0..=y1 {
            let text = match pane.row_cells(row_index as usize) {
                Some(cells) => {
                    let lo = (x0 as usize).min(cells.len());
                    let hi = ((x1 as usize) + 1).min(cells.len());
                    cells[lo..hi].iter().map(|c| c.ch).collect::<String>()
                }
                None => String::new(),
            };
            lines.push(text.trim_end().to_string());
        }
        Some(lines.join("\n"))
    }
}

fn blank_rows(rect: Rect) -> Vec<Vec<Cell>> {
    vec![vec![Cell::default(); rect.width.max(0) as usize]; rect.height.max(0) as usize]
}

fn rows_from_strings(rows: &[String], rect: Rect) -> Vec<Vec<Cell>> {
    let width = rect.width.max(0) as usize;
    let height = rect.height.max(0) as usize;
    let mut out = Vec::with_capacity(height);
    for row_index in 0..height {
        let mut row = Vec::with_capacity(width);
        if let Some(text) = rows.get(row_index) {
            for ch in text.chars().take(width) {
                row.push(Cell::new(ch, Style::default()));
            }
        }
        row.resize(width, Cell::default());
        out.push(row);
    }
    out
}

fn resize_rows(mut rows: Vec<Vec<Cell>>, rect: Rect) -> Vec<Vec<Cell>> {
    let width = rect.width.max(0) as usize;
    let height = rect.height.max(0) as usize;
    rows.truncate(height);
    for row in &mut rows {
        row.truncate(width);
        row.resize(width, Cell::default());
    }
    while rows.len() < height {
        rows.push(vec![Cell::default(); width]);
    }
    rows
}
