//! Theme configuration: `(section, key, value)` strings loaded from a TOML
//! file, updated by `ThemeUpdate` messages and reloaded in place on SIGHUP.
//!
//! The store is read-mostly; loading is an explicit entry point at startup
//! so initialization order is never implicit.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};

/// Process-wide theme values behind a single lock.
pub struct ThemeStore {
    path: Option<PathBuf>,
    values: Mutex<HashMap<(String, String), String>>,
}

impl ThemeStore {
    /// A store without a backing file: only `ThemeUpdate` messages feed it.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            values: Mutex::new(HashMap::new()),
        }
    }

    /// The default theme file location under the user config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("texelation").join("theme.toml"))
    }

    /// Load (or reload) the backing file, replacing in-memory values. A
    /// missing file is not an error; a malformed one is.
    pub fn load(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read theme file: {}", path.display()))?;
        let table: toml::Table = contents
            .parse()
            .with_context(|| format!("Failed to parse theme file: {}", path.display()))?;

        let mut loaded = HashMap::new();
        for (section, value) in &table {
            if let toml::Value::Table(entries) = value {
                for (key, v) in entries {
                    loaded.insert((section.clone(), key.clone()), toml_value_string(v));
                }
            }
        }

        let mut values = self.values.lock().expect("theme lock poisoned");
        *values = loaded;
        log::info!("theme loaded: {} values from {}", values.len(), path.display());
        Ok(())
    }

    pub fn set(&self, section: &str, key: &str, value: &str) {
        let mut values = self.values.lock().expect("theme lock poisoned");
        values.insert((section.to_string(), key.to_string()), value.to_string());
    }

    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        let values = self.values.lock().expect("theme lock poisoned");
        values.get(&(section.to_string(), key.to_string())).cloned()
    }

    /// The desktop background, if the theme sets `desktop.background` as a
    /// `#rrggbb` string. Packed as `0x00rrggbb` for `StateUpdate`.
    pub fn desktop_bg_rgb(&self) -> u32 {
        self.get("desktop", "background")
            .and_then(|v| parse_rgb(&v))
            .unwrap_or(0)
    }
}

fn toml_value_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_rgb(value: &str) -> Option<u32> {
    let hex_part = value.strip_prefix('#')?;
    if hex_part.len() != 6 {
        return None;
    }
    u32::from_str_radix(hex_part, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reads_sections_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("theme.toml");
        fs::write(
            &path,
            "[colors]\nborder_active = \"#00ffcc\"\n\n[desktop]\nbackground = \"#1a1b26\"\n",
        )
        .unwrap();

        let store = ThemeStore::with_path(&path);
        store.load().unwrap();
        assert_eq!(
            store.get("colors", "border_active"),
            Some("#00ffcc".to_string())
        );
        assert_eq!(store.desktop_bg_rgb(), 0x1a1b26);
    }

    #[test]
    fn set_overrides_and_reload_restores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("theme.toml");
        fs::write(&path, "[colors]\nborder_active = \"#ffffff\"\n").unwrap();

        let store = ThemeStore::with_path(&path);
        store.load().unwrap();
        store.set("colors", "border_active", "#000000");
        assert_eq!(
            store.get("colors", "border_active"),
            Some("#000000".to_string())
        );

        store.load().unwrap();
        assert_eq!(
            store.get("colors", "border_active"),
            Some("#ffffff".to_string())
        );
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let store = ThemeStore::with_path("/nonexistent/theme.toml");
        assert!(store.load().is_ok());
        assert_eq!(store.get("colors", "anything"), None);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("theme.toml");
        fs::write(&path, "[colors\nbroken").unwrap();
        assert!(ThemeStore::with_path(&path).load().is_err());
    }

    #[test]
    fn non_string_values_stringify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("theme.toml");
        fs::write(&path, "[layout]\nstatus_height = 1\n").unwrap();
        let store = ThemeStore::with_path(&path);
        store.load().unwrap();
        assert_eq!(store.get("layout", "status_height"), Some("1".to_string()));
    }

    #[test]
    fn bad_rgb_strings_fall_back_to_zero() {
        let store = ThemeStore::in_memory();
        store.set("desktop", "background", "blue");
        assert_eq!(store.desktop_bg_rgb(), 0);
    }
}
