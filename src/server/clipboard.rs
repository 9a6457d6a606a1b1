//! The server-wide clipboard: a single `(mime, data)` record behind its
//! own lock. Set from client selections or `ClipboardSet` messages, read
//! back by `ClipboardGet`.

use std::sync::Mutex;

/// Single-valued clipboard store.
pub struct ClipboardStore {
    record: Mutex<Option<(String, Vec<u8>)>>,
}

impl ClipboardStore {
    pub fn new() -> Self {
        Self {
            record: Mutex::new(None),
        }
    }

    /// Replace the stored record.
    pub fn set(&self, mime: &str, data: &[u8]) {
        let mut record = self.record.lock().expect("clipboard lock poisoned");
        *record = Some((mime.to_string(), data.to_vec()));
    }

    /// The stored data, if it matches the requested MIME type.
    pub fn get(&self, mime: &str) -> Option<Vec<u8>> {
        let record = self.record.lock().expect("clipboard lock poisoned");
        match record.as_ref() {
            Some((stored_mime, data)) if stored_mime == mime => Some(data.clone()),
            _ => None,
        }
    }
}

impl Default for ClipboardStore {
    fn default() -> Self {
        Self::new()
    }
}
