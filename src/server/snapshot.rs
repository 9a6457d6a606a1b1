//! On-disk persistence of the full workspace: pane contents, app metadata
//! and the tiling tree, with a content hash for integrity checking.
//!
//! The file is JSON, written atomically (temp file + rename) on a periodic
//! ticker and at shutdown. On load a hash mismatch logs a warning but the
//! snapshot is still applied: a mostly-right workspace beats an empty one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::protocol::messages::{PaneSnapshot, TreeNodeSnapshot, TreeSnapshot};
use crate::protocol::PaneId;

/// Root of the snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub timestamp: DateTime<Utc>,
    /// SHA-1 over every pane's row text, in pane order.
    pub hash: String,
    pub panes: Vec<PaneRecord>,
    pub tree: TreeRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneRecord {
    /// Pane id as 32 hex characters.
    pub id: String,
    pub title: String,
    pub rows: Vec<String>,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub app_type: String,
    /// Opaque application config. Unknown fields round-trip untouched.
    #[serde(default)]
    pub app_config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeRecord {
    pub pane_index: i32,
    pub split: u8,
    #[serde(default)]
    pub split_ratios: Vec<f32>,
    #[serde(default)]
    pub children: Vec<TreeRecord>,
}

/// Disk-backed store bound to a single snapshot path.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a workspace capture atomically.
    pub fn save(&self, capture: &TreeSnapshot) -> Result<()> {
        let file = snapshot_file_from_capture(capture);
        let contents =
            serde_json::to_string_pretty(&file).context("Failed to serialize snapshot")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory: {}", parent.display())
                })?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write snapshot temp file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to move snapshot into place: {}", self.path.display())
        })?;
        Ok(())
    }

    /// Load the snapshot if one exists. A hash mismatch is logged and the
    /// snapshot applied anyway; unparseable files are errors.
    pub fn load(&self) -> Result<Option<TreeSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read snapshot: {}", self.path.display()))?;
        let file: SnapshotFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse snapshot: {}", self.path.display()))?;

        let computed = content_hash(file.panes.iter().map(|p| p.rows.as_slice()));
        if computed != file.hash {
            log::warn!(
                "snapshot integrity mismatch at {}: stored {}, computed {} (applying anyway)",
                self.path.display(),
                file.hash,
                computed
            );
        }

        Ok(Some(capture_from_snapshot_file(&file)))
    }
}

/// SHA-1 over each pane's rows, newline-terminated, in order.
fn content_hash<'a>(panes: impl Iterator<Item = &'a [String]>) -> String {
    let mut hasher = Sha1::new();
    for rows in panes {
        for row in rows {
            hasher.update(row.as_bytes());
            hasher.update(b"\n");
        }
    }
    hex::encode(hasher.finalize())
}

fn snapshot_file_from_capture(capture: &TreeSnapshot) -> SnapshotFile {
    let panes: Vec<PaneRecord> = capture
        .panes
        .iter()
        .map(|p| PaneRecord {
            id: p.pane_id.simple().to_string(),
            title: p.title.clone(),
            rows: p.rows.clone(),
            x: p.x,
            y: p.y,
            w: p.width,
            h: p.height,
            app_type: p.app_type.clone(),
            app_config: serde_json::from_str(&p.app_config)
                .unwrap_or(Value::Object(serde_json::Map::new())),
        })
        .collect();
    SnapshotFile {
        timestamp: Utc::now(),
        hash: content_hash(panes.iter().map(|p| p.rows.as_slice())),
        panes,
        tree: tree_record_from_node(&capture.root),
    }
}

fn capture_from_snapshot_file(file: &SnapshotFile) -> TreeSnapshot {
    let panes = file
        .panes
        .iter()
        .map(|p| PaneSnapshot {
            pane_id: Uuid::parse_str(&p.id).unwrap_or_else(|_| fallback_pane_id(&p.id)),
            revision: 0,
            title: p.title.clone(),
            rows: p.rows.clone(),
            x: p.x,
            y: p.y,
            width: p.w,
            height: p.h,
            app_type: p.app_type.clone(),
            app_config: p.app_config.to_string(),
        })
        .collect();
    TreeSnapshot {
        panes,
        root: tree_node_from_record(&file.tree),
    }
}

/// A damaged id field still yields a usable (fresh, random) pane id.
fn fallback_pane_id(raw: &str) -> PaneId {
    log::warn!("unparseable pane id {raw:?} in snapshot; assigning a new id");
    Uuid::new_v4()
}

fn tree_record_from_node(node: &TreeNodeSnapshot) -> TreeRecord {
    TreeRecord {
        pane_index: node.pane_index,
        split: node.split,
        split_ratios: node.split_ratios.clone(),
        children: node.children.iter().map(tree_record_from_node).collect(),
    }
}

fn tree_node_from_record(record: &TreeRecord) -> TreeNodeSnapshot {
    TreeNodeSnapshot {
        pane_index: record.pane_index,
        split: record.split,
        split_ratios: record.split_ratios.clone(),
        children: record.children.iter().map(tree_node_from_record).collect(),
    }
}
