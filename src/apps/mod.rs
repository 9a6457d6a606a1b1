//! Applications hosted inside panes.
//!
//! An app is constructed in a *prepared* state that performs no I/O and
//! ignores geometry; `start` transitions it to running with its final
//! dimensions. Snapshot restore depends on this split: panes are created,
//! the tree is rebuilt, layout assigns real rectangles, and only then are
//! apps started, so no application ever observes a 0x0 size.

pub mod launcher;
pub mod texelterm;
pub mod welcome;

use anyhow::Result;
use serde_json::Value;

use crate::protocol::cell::Cell;
use crate::protocol::messages::KeyEvent;

/// A rendered grid: `rows x cols` of styled cells.
pub type CellGrid = Vec<Vec<Cell>>;

/// A request an app raises for the window manager to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum AppAction {
    /// Replace this app's pane content with a new app.
    Launch { app_type: String, config: Value },
}

/// The interface every pane application implements.
pub trait App: Send {
    /// Stable type tag persisted in snapshots ("welcome", "texelterm", ...).
    fn app_type(&self) -> &str;

    /// Opaque configuration persisted in snapshots. Unknown fields must
    /// round-trip untouched.
    fn config(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    fn title(&self) -> String;

    /// Leave the prepared state: allocate resources and begin I/O at the
    /// given size. Called exactly once, after layout.
    fn start(&mut self, cols: u16, rows: u16) -> Result<()>;

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()>;

    fn handle_key(&mut self, key: KeyEvent) -> Result<()>;

    fn handle_paste(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Mouse position is pane-relative. Most apps ignore it.
    fn handle_mouse(&mut self, _x: u16, _y: u16, _buttons: u32) {}

    /// Drain any pending output and report whether the visible state may
    /// have changed since the last call.
    fn tick(&mut self) -> bool {
        false
    }

    /// Produce the current cell grid at the started size.
    fn render(&mut self) -> CellGrid;

    fn is_running(&self) -> bool {
        true
    }

    /// An action for the window manager, if the last input produced one.
    fn take_action(&mut self) -> Option<AppAction> {
        None
    }

    /// True when the app consumes raw mouse events itself; such panes are
    /// excluded from client-side text selection.
    fn handles_selection(&self) -> bool {
        false
    }
}

/// Instantiate a prepared app for a snapshot or launch request. Unknown
/// types get a placeholder that preserves the original tag and config, so
/// a snapshot written by a newer server survives a round-trip here.
pub fn create_app(app_type: &str, config: &Value) -> Box<dyn App> {
    match app_type {
        welcome::APP_TYPE => Box::new(welcome::Welcome::new()),
        launcher::APP_TYPE => Box::new(launcher::Launcher::new()),
        texelterm::APP_TYPE => Box::new(texelterm::Texelterm::prepared(config.clone())),
        other => Box::new(Placeholder::new(other, config.clone())),
    }
}

/// Fills a pane whose app type this server build does not know. Keeps the
/// foreign tag and config intact for the next snapshot.
pub struct Placeholder {
    app_type: String,
    config: Value,
    cols: u16,
    rows: u16,
}

impl Placeholder {
    pub fn new(app_type: &str, config: Value) -> Self {
        Self {
            app_type: app_type.to_string(),
            config,
            cols: 0,
            rows: 0,
        }
    }
}

impl App for Placeholder {
    fn app_type(&self) -> &str {
        &self.app_type
    }

    fn config(&self) -> Value {
        self.config.clone()
    }

    fn title(&self) -> String {
        self.app_type.clone()
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
        welcome::centered_text_grid(
            self.cols,
            self.rows,
            &[format!("unknown application: {}", self.app_type)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_app_type_preserves_tag_and_config() {
        let config = json!({"format": "TXHIST02", "future_field": [1, 2, 3]});
        let mut app = create_app("holo-deck", &config);
        app.start(40, 10).unwrap();
        assert_eq!(app.app_type(), "holo-deck");
        assert_eq!(app.config(), config);
    }

    #[test]
    fn known_app_types_resolve() {
        let cfg = json!({});
        assert_eq!(create_app("welcome", &cfg).app_type(), "welcome");
        assert_eq!(create_app("launcher", &cfg).app_type(), "launcher");
        assert_eq!(create_app("texelterm", &cfg).app_type(), "texelterm");
    }
}
