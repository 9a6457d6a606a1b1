//! The publisher: turns pane buffer captures into row-span deltas and
//! enqueues them on one session's diff queue.
//!
//! Deltas are full-row replacements: every included row carries spans over
//! its whole width, so applying one is independent of what the client had.
//! Only the per-pane revision check limits what gets sent; per-cell diffing
//! is future work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::protocol::cell::StyleTable;
use crate::protocol::messages::{BufferDelta, CellSpan, RowDelta, DELTA_FLAG_FULL};
use crate::protocol::PaneId;
use crate::session::{Session, SessionError};

use super::pane::PaneCapture;

/// Called after each publish with `(pane_count, duration)`.
pub type PublishObserver = Box<dyn Fn(usize, Duration) + Send>;

/// Per-session delta producer. Tracks the last revision it published for
/// each pane so unchanged panes cost one map lookup.
pub struct Publisher {
    session: Arc<Mutex<Session>>,
    last_revision: HashMap<PaneId, u32>,
    observer: Option<PublishObserver>,
}

impl Publisher {
    pub fn new(session: Arc<Mutex<Session>>) -> Self {
        Self {
            session,
            last_revision: HashMap::new(),
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: PublishObserver) {
        self.observer = Some(observer);
    }

    /// Diff `captures` against the published revisions and enqueue one
    /// delta per changed pane. Returns the number of deltas enqueued.
    /// A closed session drops the diffs silently; the session is about to
    /// be reaped anyway.
    pub fn publish(&mut self, captures: &[PaneCapture]) -> usize {
        let start = Instant::now();
        let mut published = 0;

        for capture in captures {
            let known = self.last_revision.get(&capture.pane_id).copied();
            if known == Some(capture.revision) {
                continue;
            }
            let full = known.is_none();
            let delta = compute_delta(capture, full);
            let result = {
                let mut session = self.session.lock().expect("session lock poisoned");
                session.enqueue_diff(&delta)
            };
            match result {
                Ok(_) => {
                    self.last_revision.insert(capture.pane_id, capture.revision);
                    published += 1;
                }
                Err(SessionError::Closed) => break,
                Err(_) => break,
            }
        }

        // Forget panes that no longer exist.
        self.last_revision
            .retain(|id, _| captures.iter().any(|c| c.pane_id == *id));

        if let Some(observer) = &self.observer {
            observer(published, start.elapsed());
        }
        published
    }

    pub fn session(&self) -> &Arc<Mutex<Session>> {
        &self.session
    }
}

/// Build a row-span delta from a capture. Rows become runs of identically
/// styled cells referencing a per-delta style table. On a full delta (first
/// publish of a pane, where the client baseline is the snapshot of this
/// same content) all-blank rows are omitted; incremental deltas carry every
/// row so cleared lines reach the client.
pub fn compute_delta(capture: &PaneCapture, full: bool) -> BufferDelta {
    let mut table = StyleTable::new();
    let mut rows = Vec::new();

    for (row_index, row) in capture.grid.iter().enumerate() {
        if full && row.iter().all(|c| c.is_blank()) {
            continue;
        }
        let mut spans = Vec::new();
        let mut col = 0usize;
        while col < row.len() {
            let style = row[col].style;
            let start = col;
            let mut text = String::new();
            while col < row.len() && row[col].style == style {
                text.push(row[col].ch);
                col += 1;
            }
            spans.push(CellSpan {
                start_col: start as u16,
                style_index: table.intern(style),
                text,
            });
        }
        rows.push(RowDelta {
            row: row_index as u16,
            spans,
        });
    }

    BufferDelta {
        pane_id: capture.pane_id,
        revision: capture.revision,
        flags: if full { DELTA_FLAG_FULL } else { 0 },
        styles: table.into_entries(),
        rows,
    }
}
