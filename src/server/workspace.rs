//! The workspace: single owner of the pane tree and buffer store.
//!
//! All mutations happen on this thread in response to events posted by
//! connection threads. After every mutation the publisher fans deltas out
//! to every session and control-plane messages go to attached listeners.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;
use uuid::Uuid;

use crate::apps::{self, AppAction};
use crate::protocol::keys;
use crate::protocol::messages::{
    KeyEvent, Message, MouseEvent, PaneFocus, PaneSnapshot, PaneState, StateUpdate, TreeSnapshot,
    PANE_FLAG_ACTIVE, PANE_FLAG_RESIZING, PANE_FLAG_SELECTION_DELEGATED,
};
use crate::protocol::{PaneId, SessionId};
use crate::session::SessionRegistry;

use super::pane::PaneStore;
use super::publisher::Publisher;
use super::snapshot::SnapshotStore;
use super::theme::ThemeStore;
use super::tree::{normalize_ratios, LayoutAnimation, Rect, Split, TreeNode};

/// Rows reserved at the bottom of the viewport for the client status bar.
const STATUS_ROWS: i32 = 1;

/// How often the workspace persists a snapshot to disk.
const PERSIST_INTERVAL: Duration = Duration::from_secs(5);

/// Animation frame cadence (~60 Hz).
const ANIMATION_TICK: Duration = Duration::from_millis(16);

/// Idle event-loop cadence.
const IDLE_TICK: Duration = Duration::from_millis(50);

/// Events posted to the workspace thread by connection threads and the
/// accept loop.
pub enum WorkspaceEvent {
    /// A connection finished its handshake (or resume) for `session_id`;
    /// control-plane messages flow through `listener` until it drops.
    Attach {
        session_id: SessionId,
        listener: Sender<Message>,
    },
    Detach {
        session_id: SessionId,
    },
    Key(KeyEvent),
    Mouse(MouseEvent),
    Resize {
        cols: u16,
        rows: u16,
    },
    Paste(Vec<u8>),
    /// Theme values changed; clients need fresh state.
    ThemeChanged,
    Shutdown,
}

/// Structural commands deferred while a layout animation runs.
enum QueuedCommand {
    Split(Split),
    ClosePane,
}

/// What to do when the running animation completes.
enum AnimationCompletion {
    None,
    RemovePane { pane_index: usize },
}

pub struct Workspace {
    store: PaneStore,
    tree: TreeNode,
    viewport: (u16, u16),
    focused: usize,
    zoomed: Option<PaneId>,
    control_mode: bool,
    registry: Arc<SessionRegistry>,
    theme: Arc<ThemeStore>,
    snapshot_store: Option<SnapshotStore>,
    publishers: HashMap<SessionId, Publisher>,
    listeners: HashMap<SessionId, Sender<Message>>,
    animation: Option<(LayoutAnimation, AnimationCompletion)>,
    queued: VecDeque<QueuedCommand>,
    last_persist: Instant,
    publish_stats: bool,
    quit: bool,
}

impl Workspace {
    pub fn new(
        registry: Arc<SessionRegistry>,
        theme: Arc<ThemeStore>,
        snapshot_store: Option<SnapshotStore>,
    ) -> Self {
        Self {
            store: PaneStore::new(),
            tree: TreeNode::leaf(0),
            viewport: (80, 24),
            focused: 0,
            zoomed: None,
            control_mode: false,
            registry,
            theme,
            snapshot_store,
            publishers: HashMap::new(),
            listeners: HashMap::new(),
            animation: None,
            queued: VecDeque::new(),
            last_persist: Instant::now(),
            publish_stats: false,
            quit: false,
        }
    }

    /// Log per-publish pane counts and timings through the publish
    /// observer. Enabled by the server's profiling flag.
    pub fn enable_publish_stats(&mut self) {
        self.publish_stats = true;
    }

    /// Populate the initial workspace: restore the on-disk snapshot when one
    /// exists, otherwise open a single pane hosting `default_app`, and
    /// persist the result immediately so the disk reflects the boot state.
    pub fn bootstrap(&mut self, default_app: &str) -> Result<()> {
        let restored = match &self.snapshot_store {
            Some(store) => store.load().unwrap_or_else(|e| {
                log::warn!("snapshot load failed: {e:#}");
                None
            }),
            None => None,
        };

        match restored {
            Some(capture) if !capture.panes.is_empty() => {
                log::info!("restoring {} pane(s) from snapshot", capture.panes.len());
                self.apply_tree_capture(&capture);
            }
            _ => {
                let app = apps::create_app(default_app, &Value::Object(serde_json::Map::new()));
                let index = self.store.add(Uuid::new_v4(), app);
                self.tree = TreeNode::leaf(index);
                self.recalculate_layout();
                self.start_pane_app(index);
            }
        }

        self.persist();
        Ok(())
    }

    /// Rebuild the workspace from a capture. The ordering here is a hard
    /// invariant: apps are created prepared, the tree is rebuilt, layout
    /// assigns every pane its final rectangle, and only then do apps start,
    /// so none of them ever observes a 0x0 size.
    pub fn apply_tree_capture(&mut self, capture: &TreeSnapshot) {
        self.store = PaneStore::new();
        for pane in &capture.panes {
            let config: Value = serde_json::from_str(&pane.app_config)
                .unwrap_or(Value::Object(serde_json::Map::new()));
            let app = apps::create_app(&pane.app_type, &config);
            self.store.add(pane.pane_id, app);
        }

        let tree = TreeNode::from_snapshot(&capture.root);
        let max_index = tree.leaf_indices().into_iter().max().unwrap_or(0);
        self.tree = if max_index < self.store.len() {
            tree
        } else {
            log::warn!("snapshot tree references missing panes; tiling evenly");
            fallback_tree(self.store.len())
        };

        self.focused = 0;
        self.zoomed = None;
        self.recalculate_layout();
        for index in 0..self.store.len() {
            self.start_pane_app(index);
        }
    }

    fn start_pane_app(&mut self, index: usize) {
        if let Some(pane) = self.store.get_mut(index) {
            let (cols, rows) = (pane.rect.width.max(1) as u16, pane.rect.height.max(1) as u16);
            if let Err(e) = pane.app.start(cols, rows) {
                log::warn!("pane {} app failed to start: {e:#}", pane.id);
            }
        }
    }

    /// Drive the workspace until shutdown.
    pub fn run(&mut self, events: &Receiver<WorkspaceEvent>) {
        while !self.quit {
            let timeout = if self.animation.is_some() {
                ANIMATION_TICK
            } else {
                IDLE_TICK
            };
            match events.recv_timeout(timeout) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.tick();
        }
        self.persist();
    }

    pub fn handle_event(&mut self, event: WorkspaceEvent) {
        match event {
            WorkspaceEvent::Attach {
                session_id,
                listener,
            } => self.attach(session_id, listener),
            WorkspaceEvent::Detach { session_id } => {
                self.listeners.remove(&session_id);
            }
            WorkspaceEvent::Key(key) => self.handle_key(key),
            WorkspaceEvent::Mouse(mouse) => self.handle_mouse(mouse),
            WorkspaceEvent::Resize { cols, rows } => self.handle_resize(cols, rows),
            WorkspaceEvent::Paste(data) => self.handle_paste(&data),
            WorkspaceEvent::ThemeChanged => {
                self.broadcast_state();
                self.publish_all();
            }
            WorkspaceEvent::Shutdown => self.quit = true,
        }
    }

    /// Periodic work: drain app output, step animations, reap dead panes,
    /// publish changes and persist on the ticker.
    pub fn tick(&mut self) {
        self.store.tick_apps();
        self.step_animation();
        self.reap_dead_panes();

        // The per-pane revision check makes an unchanged publish cheap.
        self.publish_all();
        if self.last_persist.elapsed() >= PERSIST_INTERVAL {
            self.persist();
        }
    }

    // ----- attachment and broadcast ---------------------------------------

    /// Attach a connection's listener. The fresh `TreeSnapshot` is queued on
    /// the listener before anything else, so for this attachment it precedes
    /// every delta the connection will flush.
    fn attach(&mut self, session_id: SessionId, listener: Sender<Message>) {
        let snapshot = self.capture_tree();
        let _ = listener.send(Message::TreeSnapshot(snapshot));
        let _ = listener.send(Message::StateUpdate(self.state_update()));
        if let Some(pane) = self.store.get(self.focused) {
            let _ = listener.send(Message::PaneFocus(PaneFocus { pane_id: pane.id }));
        }
        for state in self.pane_states() {
            let _ = listener.send(Message::PaneState(state));
        }
        if let Ok(session) = self.registry.lookup(&session_id) {
            session.lock().expect("session lock poisoned").mark_snapshot();
        }
        self.listeners.insert(session_id, listener);
        // Make sure the new attachment has deltas to flush right away.
        self.publish_all();
    }

    fn broadcast(&mut self, message: &Message) {
        self.listeners
            .retain(|_, listener| listener.send(message.clone()).is_ok());
    }

    fn broadcast_tree(&mut self) {
        let snapshot = self.capture_tree();
        self.broadcast(&Message::TreeSnapshot(snapshot));
    }

    fn broadcast_state(&mut self) {
        let update = self.state_update();
        self.broadcast(&Message::StateUpdate(update));
    }

    fn broadcast_focus(&mut self) {
        if let Some(pane) = self.store.get(self.focused) {
            let pane_id = pane.id;
            self.broadcast(&Message::PaneFocus(PaneFocus { pane_id }));
        }
        for state in self.pane_states() {
            self.broadcast(&Message::PaneState(state));
        }
        self.broadcast_state();
    }

    fn pane_states(&self) -> Vec<PaneState> {
        let animating = self.animation.is_some();
        self.store
            .iter()
            .enumerate()
            .map(|(index, pane)| {
                let mut flags = 0u16;
                if index == self.focused {
                    flags |= PANE_FLAG_ACTIVE;
                }
                if animating {
                    flags |= PANE_FLAG_RESIZING;
                }
                if pane.app.handles_selection() {
                    flags |= PANE_FLAG_SELECTION_DELEGATED;
                }
                PaneState {
                    pane_id: pane.id,
                    flags,
                    z_order: pane.z_order,
                }
            })
            .collect()
    }

    fn state_update(&self) -> StateUpdate {
        StateUpdate {
            workspace_id: 1,
            all_workspaces: vec![1],
            in_control_mode: self.control_mode,
            sub_mode: 0,
            active_title: self
                .store
                .get(self.focused)
                .map(|p| p.title.clone())
                .unwrap_or_default(),
            desktop_bg_rgb: self.theme.desktop_bg_rgb(),
            zoomed: self.zoomed.is_some(),
            zoomed_pane_id: self.zoomed.unwrap_or_else(Uuid::nil),
        }
    }

    // ----- input routing ---------------------------------------------------

    fn handle_key(&mut self, key: KeyEvent) {
        if self.control_mode {
            self.handle_control_key(key);
            self.publish_all();
            return;
        }
        // Ctrl-a is the control-mode prefix.
        if key.key_code == keys::KEY_RUNE
            && key.rune == u32::from('a')
            && key.modifiers & keys::MOD_CTRL != 0
        {
            self.control_mode = true;
            self.broadcast_state();
            return;
        }
        if let Some(pane) = self.store.get_mut(self.focused) {
            if let Err(e) = pane.app.handle_key(key) {
                log::warn!("pane {} rejected key: {e:#}", pane.id);
            }
            if let Some(action) = pane.app.take_action() {
                self.apply_app_action(action);
            }
        }
        self.publish_all();
    }

    fn handle_control_key(&mut self, key: KeyEvent) {
        self.control_mode = false;
        match key.key_code {
            keys::KEY_UP => self.move_focus(0, -1),
            keys::KEY_DOWN => self.move_focus(0, 1),
            keys::KEY_LEFT => self.move_focus(-1, 0),
            keys::KEY_RIGHT => self.move_focus(1, 0),
            keys::KEY_RUNE => match char::from_u32(key.rune) {
                Some('s') => self.request_split(Split::Vertical),
                Some('v') => self.request_split(Split::Horizontal),
                Some('x') => self.request_close(),
                Some('z') => self.toggle_zoom(),
                Some('h') => self.move_focus(-1, 0),
                Some('j') => self.move_focus(0, 1),
                Some('k') => self.move_focus(0, -1),
                Some('l') => self.move_focus(1, 0),
                _ => {}
            },
            _ => {}
        }
        self.broadcast_focus();
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        let Some(index) = self.pane_index_at(i32::from(mouse.x), i32::from(mouse.y)) else {
            return;
        };
        if mouse.buttons != 0 && index != self.focused {
            self.focused = index;
            self.broadcast_focus();
        }
        if let Some(pane) = self.store.get_mut(index) {
            let local_x = (i32::from(mouse.x) - pane.rect.x).max(0) as u16;
            let local_y = (i32::from(mouse.y) - pane.rect.y).max(0) as u16;
            pane.app.handle_mouse(local_x, local_y, mouse.buttons);
            if let Some(action) = pane.app.take_action() {
                self.apply_app_action(action);
            }
        }
        self.publish_all();
    }

    fn handle_resize(&mut self, cols: u16, rows: u16) {
        if self.viewport == (cols, rows) {
            return;
        }
        self.viewport = (cols, rows);
        self.recalculate_layout();
        self.broadcast_tree();
        self.publish_all();
    }

    fn handle_paste(&mut self, data: &[u8]) {
        if let Some(pane) = self.store.get_mut(self.focused) {
            if let Err(e) = pane.app.handle_paste(data) {
                log::warn!("pane {} rejected paste: {e:#}", pane.id);
            }
        }
        self.publish_all();
    }

    fn apply_app_action(&mut self, action: AppAction) {
        match action {
            AppAction::Launch { app_type, config } => {
                let index = self.focused;
                if let Some(pane) = self.store.get_mut(index) {
                    let mut app = apps::create_app(&app_type, &config);
                    let (cols, rows) =
                        (pane.rect.width.max(1) as u16, pane.rect.height.max(1) as u16);
                    if let Err(e) = app.start(cols, rows) {
                        log::warn!("failed to launch {app_type}: {e:#}");
                        return;
                    }
                    pane.app = app;
                    pane.title = pane.app.title();
                }
                self.broadcast_tree();
                self.broadcast_focus();
            }
        }
    }

    // ----- structural commands --------------------------------------------

    fn request_split(&mut self, orientation: Split) {
        if self.animation.is_some() {
            self.queued.push_back(QueuedCommand::Split(orientation));
            return;
        }
        self.split(orientation);
    }

    fn split(&mut self, orientation: Split) {
        self.zoomed = None;
        let focused_index = self.focused;
        // New panes open the launcher; it swaps itself for whatever the
        // user picks.
        let app = apps::create_app(
            crate::apps::launcher::APP_TYPE,
            &Value::Object(serde_json::Map::new()),
        );
        let new_index = self.store.add(Uuid::new_v4(), app);
        let Some(path) = self.tree.split_leaf(focused_index, orientation, new_index) else {
            let _ = self.store.remove(new_index);
            return;
        };

        // Start the new app at its post-animation size: apply the target
        // ratios, lay out, start, then rewind for the animation.
        let target = vec![0.5, 0.5];
        let start = vec![1.0, 0.0];
        self.set_ratios_at(&path, &target);
        self.recalculate_layout();
        self.start_pane_app(new_index);
        self.set_ratios_at(&path, &start);
        self.recalculate_layout();

        self.animation = Some((
            LayoutAnimation::new(path, start, target),
            AnimationCompletion::None,
        ));
        self.focused = new_index;
        self.broadcast_focus();
        self.broadcast_tree();
    }

    fn request_close(&mut self) {
        if self.animation.is_some() {
            self.queued.push_back(QueuedCommand::ClosePane);
            return;
        }
        self.close_focused();
    }

    fn close_focused(&mut self) {
        if self.store.len() <= 1 {
            return;
        }
        self.zoomed = None;
        let pane_index = self.focused;
        let Some(path) = self.tree.path_to_leaf(pane_index) else {
            return;
        };
        if path.is_empty() {
            return;
        }
        let parent_path = &path[..path.len() - 1];
        let child_pos = path[path.len() - 1];
        let Some(TreeNode::Split { ratios, .. }) = self.tree.node_at_path_mut(parent_path) else {
            return;
        };
        let from = ratios.clone();
        let mut to = ratios.clone();
        to[child_pos] = 0.0;
        normalize_ratios_except(&mut to, child_pos);

        self.animation = Some((
            LayoutAnimation::new(parent_path.to_vec(), from, to),
            AnimationCompletion::RemovePane { pane_index },
        ));
        self.broadcast_focus();
    }

    fn toggle_zoom(&mut self) {
        self.zoomed = match self.zoomed {
            Some(_) => None,
            None => self.store.get(self.focused).map(|p| p.id),
        };
        self.recalculate_layout();
        self.broadcast_tree();
    }

    fn set_ratios_at(&mut self, path: &[usize], ratios: &[f32]) {
        if let Some(TreeNode::Split {
            ratios: node_ratios,
            ..
        }) = self.tree.node_at_path_mut(path)
        {
            if node_ratios.len() == ratios.len() {
                node_ratios.copy_from_slice(ratios);
            }
        }
    }

    /// Advance the running animation one frame. Returns true if the tree
    /// changed and a snapshot was broadcast.
    fn step_animation(&mut self) -> bool {
        let Some((animation, _)) = &self.animation else {
            return false;
        };
        let (ratios, done) = animation.step(Instant::now());
        let path = animation.path.clone();
        self.set_ratios_at(&path, &ratios);
        self.recalculate_layout();
        self.broadcast_tree();

        if done {
            let (animation, completion) = self.animation.take().expect("animation present");
            self.set_ratios_at(&animation.path, animation.target());
            if let AnimationCompletion::RemovePane { pane_index } = completion {
                self.remove_pane(pane_index);
            }
            self.recalculate_layout();
            self.broadcast_tree();
            self.broadcast_focus();
            // Queued structural commands run once the animation finishes.
            while self.animation.is_none() {
                match self.queued.pop_front() {
                    Some(QueuedCommand::Split(orientation)) => self.split(orientation),
                    Some(QueuedCommand::ClosePane) => self.close_focused(),
                    None => break,
                }
            }
        }
        true
    }

    fn remove_pane(&mut self, pane_index: usize) {
        if !self.tree.remove_leaf(pane_index) {
            return;
        }
        self.store.remove(pane_index);
        if self.focused >= self.store.len() {
            self.focused = self.store.len().saturating_sub(1);
        }
    }

    /// Close panes whose app exited. The last pane is never closed; its app
    /// is swapped for the launcher instead.
    fn reap_dead_panes(&mut self) -> bool {
        if self.animation.is_some() {
            return false;
        }
        let dead: Vec<usize> = self
            .store
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.app.is_running())
            .map(|(i, _)| i)
            .collect();
        if dead.is_empty() {
            return false;
        }
        for index in dead.into_iter().rev() {
            if self.store.len() > 1 {
                log::info!("pane exited; closing");
                self.remove_pane(index);
            } else if let Some(pane) = self.store.get_mut(index) {
                log::info!("last pane exited; opening launcher");
                let mut app = apps::create_app(
                    crate::apps::launcher::APP_TYPE,
                    &Value::Object(serde_json::Map::new()),
                );
                let (cols, rows) = (pane.rect.width.max(1) as u16, pane.rect.height.max(1) as u16);
                if app.start(cols, rows).is_ok() {
                    pane.app = app;
                    pane.title = pane.app.title();
                }
            }
        }
        self.recalculate_layout();
        self.broadcast_tree();
        self.broadcast_focus();
        true
    }

    // ----- layout ----------------------------------------------------------

    /// Recompute every pane rectangle from the tree (or the zoom override)
    /// and push size changes into the hosted apps.
    pub fn recalculate_layout(&mut self) {
        let area = self.tiling_area();
        let mut assignments: Vec<(usize, Rect, i32)> = self
            .tree
            .layout(area)
            .into_iter()
            .map(|(index, rect)| (index, rect, 0))
            .collect();

        if let Some(zoomed_id) = self.zoomed {
            if let Some(zoom_index) = self.store.index_of(zoomed_id) {
                for (index, rect, z) in &mut assignments {
                    if *index == zoom_index {
                        *rect = area;
                        *z = 1;
                    }
                }
            } else {
                self.zoomed = None;
            }
        }

        for (index, rect, z_order) in assignments {
            if let Some(pane) = self.store.get_mut(index) {
                pane.z_order = z_order;
                if pane.rect != rect {
                    pane.rect = rect;
                    let (cols, rows) = (rect.width.max(1) as u16, rect.height.max(1) as u16);
                    if let Err(e) = pane.app.resize(cols, rows) {
                        log::warn!("pane {} resize failed: {e:#}", pane.id);
                    }
                }
            }
        }
    }

    fn tiling_area(&self) -> Rect {
        Rect::new(
            0,
            0,
            i32::from(self.viewport.0),
            (i32::from(self.viewport.1) - STATUS_ROWS).max(1),
        )
    }

    fn pane_index_at(&self, x: i32, y: i32) -> Option<usize> {
        self.store
            .iter()
            .enumerate()
            .filter(|(_, p)| p.rect.contains(x, y))
            .max_by_key(|(_, p)| p.z_order)
            .map(|(i, _)| i)
    }

    /// Move focus to the nearest pane in the given direction.
    fn move_focus(&mut self, dx: i32, dy: i32) {
        let Some(current) = self.store.get(self.focused) else {
            return;
        };
        let (cx, cy) = (
            current.rect.x + current.rect.width / 2,
            current.rect.y + current.rect.height / 2,
        );
        let mut best: Option<(usize, i32)> = None;
        for (index, pane) in self.store.iter().enumerate() {
            if index == self.focused {
                continue;
            }
            let (px, py) = (
                pane.rect.x + pane.rect.width / 2,
                pane.rect.y + pane.rect.height / 2,
            );
            let (ox, oy) = (px - cx, py - cy);
            let aligned = (dx != 0 && ox.signum() == dx) || (dy != 0 && oy.signum() == dy);
            if !aligned {
                continue;
            }
            let distance = ox.abs() + oy.abs();
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((index, distance));
            }
        }
        if let Some((index, _)) = best {
            self.focused = index;
        }
    }

    // ----- capture, publish, persist ---------------------------------------

    /// Serialize the whole workspace for broadcast or persistence.
    pub fn capture_tree(&mut self) -> TreeSnapshot {
        let captures = self.store.snapshot_buffers();
        let panes = captures
            .into_iter()
            .map(|c| PaneSnapshot {
                pane_id: c.pane_id,
                revision: c.revision,
                title: c.title,
                rows: c.rows,
                x: c.rect.x,
                y: c.rect.y,
                width: c.rect.width,
                height: c.rect.height,
                app_type: c.app_type,
                app_config: c.app_config.to_string(),
            })
            .collect();
        TreeSnapshot {
            panes,
            root: self.tree.to_snapshot(),
        }
    }

    /// Diff every pane against each session's published revisions and
    /// enqueue the results.
    pub fn publish_all(&mut self) {
        let captures = self.store.snapshot_buffers();
        let sessions = self.registry.sessions();
        let publish_stats = self.publish_stats;
        for (session_id, session) in &sessions {
            let publisher = self.publishers.entry(*session_id).or_insert_with(|| {
                let mut publisher = Publisher::new(Arc::clone(session));
                if publish_stats {
                    let session_id = *session_id;
                    publisher.set_observer(Box::new(move |count, duration| {
                        log::info!("publish[{session_id}]: {count} pane(s) in {duration:?}");
                    }));
                }
                publisher
            });
            let published = publisher.publish(&captures);
            if published > 0 {
                log::debug!("published {published} delta(s) to session {session_id}");
            }
        }
        self.publishers
            .retain(|id, _| sessions.iter().any(|(sid, _)| sid == id));
    }

    fn persist(&mut self) {
        self.last_persist = Instant::now();
        let Some(store) = self.snapshot_store.take() else {
            return;
        };
        let capture = self.capture_tree();
        if let Err(e) = store.save(&capture) {
            log::warn!("snapshot persist failed: {e:#}");
        }
        self.snapshot_store = Some(store);
    }

    #[cfg(test)]
    pub fn store(&self) -> &PaneStore {
        &self.store
    }

    #[cfg(test)]
    pub fn tree(&self) -> &TreeNode {
        &self.tree
    }

    #[cfg(test)]
    pub fn focused_index(&self) -> usize {
        self.focused
    }
}

/// Keep the other children's proportions while one collapses to zero.
fn normalize_ratios_except(ratios: &mut [f32], zeroed: usize) {
    let sum: f32 = ratios
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != zeroed)
        .map(|(_, r)| *r)
        .sum();
    if sum <= f32::EPSILON {
        let others = ratios.len().saturating_sub(1).max(1);
        for (i, r) in ratios.iter_mut().enumerate() {
            *r = if i == zeroed { 0.0 } else { 1.0 / others as f32 };
        }
    } else {
        for (i, r) in ratios.iter_mut().enumerate() {
            if i != zeroed {
                *r /= sum;
            }
        }
    }
}

/// Even split of `n` panes, used when a snapshot's tree is unusable.
fn fallback_tree(n: usize) -> TreeNode {
    if n <= 1 {
        return TreeNode::leaf(0);
    }
    let mut ratios = vec![1.0 / n as f32; n];
    normalize_ratios(&mut ratios);
    TreeNode::Split {
        orientation: Split::Horizontal,
        ratios,
        children: (0..n).map(TreeNode::leaf).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::SPLIT_NONE;
    use std::sync::mpsc;

    fn workspace() -> Workspace {
        let registry = Arc::new(SessionRegistry::new());
        let theme = Arc::new(ThemeStore::in_memory());
        let mut ws = Workspace::new(registry, theme, None);
        ws.bootstrap("welcome").unwrap();
        ws
    }

    fn rune(c: char, modifiers: u16) -> KeyEvent {
        KeyEvent {
            key_code: keys::KEY_RUNE,
            rune: u32::from(c),
            modifiers,
        }
    }

    fn finish_animation(ws: &mut Workspace) {
        // Animations complete in 200ms; drive ticks well past that (a
        // queued command can start a second one).
        let deadline = Instant::now() + Duration::from_millis(1500);
        while ws.animation.is_some() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
            ws.step_animation();
        }
        assert!(ws.animation.is_none(), "animation did not complete");
    }

    #[test]
    fn bootstrap_without_snapshot_opens_the_default_app() {
        let ws = workspace();
        assert_eq!(ws.store().len(), 1);
        assert_eq!(ws.store().get(0).unwrap().app.app_type(), "welcome");
    }

    #[test]
    fn resize_reserves_the_status_row() {
        let mut ws = workspace();
        ws.handle_event(WorkspaceEvent::Resize { cols: 120, rows: 40 });
        let rect = ws.store().get(0).unwrap().rect;
        assert_eq!(rect.width, 120);
        assert_eq!(rect.height, 39);
    }

    #[test]
    fn control_prefix_then_split_creates_a_second_pane() {
        let mut ws = workspace();
        ws.handle_key(rune('a', keys::MOD_CTRL));
        assert!(ws.control_mode);
        ws.handle_key(rune('v', 0));
        assert!(!ws.control_mode);
        assert_eq!(ws.store().len(), 2);
        assert_eq!(ws.focused_index(), 1);
        finish_animation(&mut ws);

        // Widths along the horizontal split tile the viewport.
        let w0 = ws.store().get(0).unwrap().rect.width;
        let w1 = ws.store().get(1).unwrap().rect.width;
        assert_eq!(w0 + w1, 80);
    }

    #[test]
    fn close_removes_the_focused_pane_after_the_animation() {
        let mut ws = workspace();
        ws.handle_key(rune('a', keys::MOD_CTRL));
        ws.handle_key(rune('v', 0));
        finish_animation(&mut ws);
        assert_eq!(ws.store().len(), 2);

        ws.handle_key(rune('a', keys::MOD_CTRL));
        ws.handle_key(rune('x', 0));
        finish_animation(&mut ws);
        assert_eq!(ws.store().len(), 1);
        assert!(matches!(ws.tree(), TreeNode::Leaf { .. }));
    }

    #[test]
    fn structural_commands_queue_behind_a_running_animation() {
        let mut ws = workspace();
        ws.handle_key(rune('a', keys::MOD_CTRL));
        ws.handle_key(rune('v', 0));
        assert!(ws.animation.is_some());

        // A second split while animating must not mutate the tree yet.
        ws.handle_key(rune('a', keys::MOD_CTRL));
        ws.handle_key(rune('s', 0));
        assert_eq!(ws.store().len(), 2);

        finish_animation(&mut ws);
        // The queued split ran on completion (itself animating now or done).
        assert_eq!(ws.store().len(), 3);
    }

    #[test]
    fn zoom_assigns_full_area_and_higher_z() {
        let mut ws = workspace();
        ws.handle_key(rune('a', keys::MOD_CTRL));
        ws.handle_key(rune('v', 0));
        finish_animation(&mut ws);

        ws.handle_key(rune('a', keys::MOD_CTRL));
        ws.handle_key(rune('z', 0));
        let focused = ws.focused_index();
        let pane = ws.store().get(focused).unwrap();
        assert_eq!(pane.rect, Rect::new(0, 0, 80, 23));
        assert_eq!(pane.z_order, 1);

        ws.handle_key(rune('a', keys::MOD_CTRL));
        ws.handle_key(rune('z', 0));
        assert!(ws.zoomed.is_none());
    }

    #[test]
    fn focus_moves_toward_the_requested_direction() {
        let mut ws = workspace();
        ws.handle_key(rune('a', keys::MOD_CTRL));
        ws.handle_key(rune('v', 0));
        finish_animation(&mut ws);
        assert_eq!(ws.focused_index(), 1);

        ws.handle_key(rune('a', keys::MOD_CTRL));
        ws.handle_key(rune('h', 0));
        assert_eq!(ws.focused_index(), 0);

        ws.handle_key(rune('a', keys::MOD_CTRL));
        ws.handle_key(rune('l', 0));
        assert_eq!(ws.focused_index(), 1);
    }

    #[test]
    fn attach_sends_tree_snapshot_before_anything_else() {
        let mut ws = workspace();
        let (session_id, _) = ws.registry.create();
        let (tx, rx) = mpsc::channel();
        ws.handle_event(WorkspaceEvent::Attach {
            session_id,
            listener: tx,
        });

        match rx.try_recv().unwrap() {
            Message::TreeSnapshot(snap) => {
                assert_eq!(snap.panes.len(), 1);
                assert_eq!(snap.root.split, SPLIT_NONE);
            }
            other => panic!("expected TreeSnapshot first, got {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), Message::StateUpdate(_)));
        assert!(matches!(rx.try_recv().unwrap(), Message::PaneFocus(_)));
    }

    #[test]
    fn publish_feeds_every_session_queue() {
        let mut ws = workspace();
        let (_, s1) = ws.registry.create();
        let (_, s2) = ws.registry.create();
        ws.publish_all();
        assert_eq!(s1.lock().unwrap().pending(0).len(), 1);
        assert_eq!(s2.lock().unwrap().pending(0).len(), 1);
    }

    #[test]
    fn apply_tree_capture_starts_apps_at_final_size() {
        let mut ws = workspace();
        ws.handle_event(WorkspaceEvent::Resize { cols: 100, rows: 31 });
        let capture = ws.capture_tree();

        let registry = Arc::new(SessionRegistry::new());
        let theme = Arc::new(ThemeStore::in_memory());
        let mut restored = Workspace::new(registry, theme, None);
        restored.viewport = (100, 31);
        restored.apply_tree_capture(&capture);
        assert_eq!(restored.store().len(), 1);
        let rect = restored.store().get(0).unwrap().rect;
        assert_eq!((rect.width, rect.height), (100, 30));
        // The app rendered at its started size, never 0x0.
        let snap = restored.capture_tree();
        assert_eq!(snap.panes[0].rows.len(), 30);
    }

    #[test]
    fn capture_reflects_welcome_banner_content() {
        let mut ws = workspace();
        let capture = ws.capture_tree();
        assert!(capture.panes[0]
            .rows
            .iter()
            .any(|row| row.contains("T E X E L A T I O N")));
    }
}
