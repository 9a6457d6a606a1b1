//! The tiling tree: leaves reference panes by index into the pane store's
//! ordered list, internal nodes carry a split orientation with per-child
//! ratios. The tree itself holds no pane state, which keeps it trivially
//! serializable.

use std::time::{Duration, Instant};

use crate::protocol::messages::{
    TreeNodeSnapshot, SPLIT_HORIZONTAL, SPLIT_NONE, SPLIT_VERTICAL,
};
pub use crate::protocol::Rect;

/// Default duration for a ratio animation.
pub const ANIMATION_DURATION: Duration = Duration::from_millis(200);

/// Split orientation: horizontal splits lay children side by side (widths
/// sum to the parent's), vertical splits stack them (heights sum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Vertical,
    Horizontal,
}

impl Split {
    pub fn wire(self) -> u8 {
        match self {
            Split::Vertical => SPLIT_VERTICAL,
            Split::Horizontal => SPLIT_HORIZONTAL,
        }
    }
}

/// A node in the tiling tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Leaf {
        pane_index: usize,
    },
    Split {
        orientation: Split,
        /// Parallel to `children`; kept summing to 1.0.
        ratios: Vec<f32>,
        children: Vec<TreeNode>,
    },
}

impl TreeNode {
    pub fn leaf(pane_index: usize) -> Self {
        TreeNode::Leaf { pane_index }
    }

    /// Number of leaves under this node.
    pub fn leaf_count(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { children, .. } => children.iter().map(TreeNode::leaf_count).sum(),
        }
    }

    /// Pane indices of every leaf, in tree order.
    pub fn leaf_indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<usize>) {
        match self {
            TreeNode::Leaf { pane_index } => out.push(*pane_index),
            TreeNode::Split { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Assign each leaf a rectangle within `area`. The last child along a
    /// split absorbs rounding remainders so children always tile the parent
    /// exactly.
    pub fn layout(&self, area: Rect) -> Vec<(usize, Rect)> {
        let mut out = Vec::with_capacity(self.leaf_count());
        self.layout_into(area, &mut out);
        out
    }

    fn layout_into(&self, area: Rect, out: &mut Vec<(usize, Rect)>) {
        match self {
            TreeNode::Leaf { pane_index } => out.push((*pane_index, area)),
            TreeNode::Split {
                orientation,
                ratios,
                children,
            } => {
                let total = match orientation {
                    Split::Horizontal => area.width,
                    Split::Vertical => area.height,
                };
                let mut offset = 0i32;
                for (i, (child, ratio)) in children.iter().zip(ratios.iter()).enumerate() {
                    let size = if i == children.len() - 1 {
                        total - offset
                    } else {
                        ((total as f32) * ratio).floor() as i32
                    };
                    let child_area = match orientation {
                        Split::Horizontal => {
                            Rect::new(area.x + offset, area.y, size, area.height)
                        }
                        Split::Vertical => Rect::new(area.x, area.y + offset, area.width, size),
                    };
                    child.layout_into(child_area, out);
                    offset += size;
                }
            }
        }
    }

    /// Path of child indices from the root to the leaf for `pane_index`.
    pub fn path_to_leaf(&self, pane_index: usize) -> Option<Vec<usize>> {
        match self {
            TreeNode::Leaf { pane_index: idx } => {
                if *idx == pane_index {
                    Some(Vec::new())
                } else {
                    None
                }
            }
            TreeNode::Split { children, .. } => {
                for (i, child) in children.iter().enumerate() {
                    if let Some(mut path) = child.path_to_leaf(pane_index) {
                        path.insert(0, i);
                        return Some(path);
                    }
                }
                None
            }
        }
    }

    pub fn node_at_path_mut(&mut self, path: &[usize]) -> Option<&mut TreeNode> {
        let mut node = self;
        for &idx in path {
            match node {
                TreeNode::Split { children, .. } => node = children.get_mut(idx)?,
                TreeNode::Leaf { .. } => return None,
            }
        }
        Some(node)
    }

    /// Replace the leaf for `pane_index` with a split holding the old leaf
    /// and a new leaf for `new_index`. The new child starts at ratio 0.0 so
    /// the caller can animate it open. Returns the path to the new split.
    pub fn split_leaf(
        &mut self,
        pane_index: usize,
        orientation: Split,
        new_index: usize,
    ) -> Option<Vec<usize>> {
        let path = self.path_to_leaf(pane_index)?;
        let node = self.node_at_path_mut(&path)?;
        *node = TreeNode::Split {
            orientation,
            ratios: vec![1.0, 0.0],
            children: vec![TreeNode::leaf(pane_index), TreeNode::leaf(new_index)],
        };
        Some(path)
    }

    /// Remove the leaf for `pane_index`, collapsing any split left with one
    /// child and renumbering leaf indices above the removed one to match
    /// the shrunk pane list. Returns false if the leaf was not found, or if
    /// it is the only leaf (the last pane is never removed structurally).
    pub fn remove_leaf(&mut self, pane_index: usize) -> bool {
        if self.leaf_count() <= 1 {
            return false;
        }
        if !Self::remove_leaf_inner(self, pane_index) {
            return false;
        }
        self.renumber_after_removal(pane_index);
        true
    }

    fn remove_leaf_inner(node: &mut TreeNode, pane_index: usize) -> bool {
        let TreeNode::Split {
            ratios, children, ..
        } = node
        else {
            return false;
        };

        if let Some(pos) = children
            .iter()
            .position(|c| matches!(c, TreeNode::Leaf { pane_index: idx } if *idx == pane_index))
        {
            children.remove(pos);
            ratios.remove(pos);
            normalize_ratios(ratios);
            if children.len() == 1 {
                *node = children.remove(0);
            }
            return true;
        }

        for child in children.iter_mut() {
            if Self::remove_leaf_inner(child, pane_index) {
                return true;
            }
        }
        false
    }

    fn renumber_after_removal(&mut self, removed: usize) {
        match self {
            TreeNode::Leaf { pane_index } => {
                if *pane_index > removed {
                    *pane_index -= 1;
                }
            }
            TreeNode::Split { children, .. } => {
                for child in children {
                    child.renumber_after_removal(removed);
                }
            }
        }
    }

    /// Convert to the wire/persistence shape.
    pub fn to_snapshot(&self) -> TreeNodeSnapshot {
        match self {
            TreeNode::Leaf { pane_index } => TreeNodeSnapshot {
                pane_index: *pane_index as i32,
                split: SPLIT_NONE,
                split_ratios: vec![],
                children: vec![],
            },
            TreeNode::Split {
                orientation,
                ratios,
                children,
            } => TreeNodeSnapshot {
                pane_index: -1,
                split: orientation.wire(),
                split_ratios: ratios.clone(),
                children: children.iter().map(TreeNode::to_snapshot).collect(),
            },
        }
    }

    /// Rebuild from the wire/persistence shape. Malformed nodes (unknown
    /// split, ratio/child length mismatch) collapse to leaf 0 so a damaged
    /// snapshot degrades instead of failing the boot.
    pub fn from_snapshot(snap: &TreeNodeSnapshot) -> Self {
        if snap.pane_index >= 0 {
            return TreeNode::leaf(snap.pane_index as usize);
        }
        let orientation = match snap.split {
            SPLIT_VERTICAL => Split::Vertical,
            SPLIT_HORIZONTAL => Split::Horizontal,
            _ => return TreeNode::leaf(0),
        };
        if snap.children.is_empty() || snap.children.len() != snap.split_ratios.len() {
            return TreeNode::leaf(0);
        }
        let mut ratios = snap.split_ratios.clone();
        normalize_ratios(&mut ratios);
        TreeNode::Split {
            orientation,
            ratios,
            children: snap.children.iter().map(TreeNode::from_snapshot).collect(),
        }
    }
}

/// Rescale ratios so they sum to 1.0. An all-zero vector becomes uniform.
pub fn normalize_ratios(ratios: &mut [f32]) {
    if ratios.is_empty() {
        return;
    }
    let sum: f32 = ratios.iter().sum();
    if sum <= f32::EPSILON {
        let uniform = 1.0 / ratios.len() as f32;
        for r in ratios.iter_mut() {
            *r = uniform;
        }
    } else {
        for r in ratios.iter_mut() {
            *r /= sum;
        }
    }
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// An in-flight interpolation of one split node's ratios. The workspace
/// ticks it at ~60 Hz, writing the stepped ratios back into the tree and
/// re-broadcasting snapshots until it completes.
pub struct LayoutAnimation {
    pub path: Vec<usize>,
    from: Vec<f32>,
    to: Vec<f32>,
    started: Instant,
    duration: Duration,
}

impl LayoutAnimation {
    pub fn new(path: Vec<usize>, from: Vec<f32>, to: Vec<f32>) -> Self {
        Self {
            path,
            from,
            to,
            started: Instant::now(),
            duration: ANIMATION_DURATION,
        }
    }

    /// Current interpolated ratios and whether the animation has finished.
    pub fn step(&self, now: Instant) -> (Vec<f32>, bool) {
        let elapsed = now.duration_since(self.started);
        let t = if self.duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
        };
        let eased = smoothstep(t);
        let ratios = self
            .from
            .iter()
            .zip(self.to.iter())
            .map(|(a, b)| a + (b - a) * eased)
            .collect();
        (ratios, t >= 1.0)
    }

    pub fn target(&self) -> &[f32] {
        &self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_pane_tree() -> TreeNode {
        TreeNode::Split {
            orientation: Split::Horizontal,
            ratios: vec![0.5, 0.5],
            children: vec![TreeNode::leaf(0), TreeNode::leaf(1)],
        }
    }

    #[test]
    fn single_leaf_fills_the_area() {
        let tree = TreeNode::leaf(0);
        let rects = tree.layout(Rect::new(0, 0, 120, 40));
        assert_eq!(rects, vec![(0, Rect::new(0, 0, 120, 40))]);
    }

    #[test]
    fn horizontal_split_widths_sum_to_parent_width() {
        let tree = two_pane_tree();
        let rects = tree.layout(Rect::new(0, 0, 121, 40));
        assert_eq!(rects[0].1, Rect::new(0, 0, 60, 40));
        // Last child absorbs the odd column.
        assert_eq!(rects[1].1, Rect::new(60, 0, 61, 40));
        assert_eq!(rects[0].1.width + rects[1].1.width, 121);
    }

    #[test]
    fn vertical_split_heights_sum_to_parent_height() {
        let tree = TreeNode::Split {
            orientation: Split::Vertical,
            ratios: vec![0.25, 0.75],
            children: vec![TreeNode::leaf(0), TreeNode::leaf(1)],
        };
        let rects = tree.layout(Rect::new(0, 0, 80, 41));
        assert_eq!(rects[0].1, Rect::new(0, 0, 80, 10));
        assert_eq!(rects[1].1, Rect::new(0, 10, 80, 31));
        assert_eq!(rects[0].1.height + rects[1].1.height, 41);
    }

    #[test]
    fn nested_splits_tile_without_overlap_or_gap() {
        let tree = TreeNode::Split {
            orientation: Split::Horizontal,
            ratios: vec![0.5, 0.5],
            children: vec![
                TreeNode::leaf(0),
                TreeNode::Split {
                    orientation: Split::Vertical,
                    ratios: vec![0.5, 0.5],
                    children: vec![TreeNode::leaf(1), TreeNode::leaf(2)],
                },
            ],
        };
        let area = Rect::new(0, 0, 100, 50);
        let rects = tree.layout(area);
        let total: i32 = rects.iter().map(|(_, r)| r.width * r.height).sum();
        assert_eq!(total, 100 * 50);
    }

    #[test]
    fn split_leaf_inserts_new_leaf_at_ratio_zero() {
        let mut tree = TreeNode::leaf(0);
        let path = tree.split_leaf(0, Split::Horizontal, 1).unwrap();
        assert!(path.is_empty());
        match &tree {
            TreeNode::Split {
                ratios, children, ..
            } => {
                assert_eq!(ratios, &vec![1.0, 0.0]);
                assert_eq!(children.len(), 2);
            }
            TreeNode::Leaf { .. } => panic!("expected split"),
        }
        assert_eq!(tree.leaf_indices(), vec![0, 1]);
    }

    #[test]
    fn remove_leaf_collapses_single_child_split() {
        let mut tree = two_pane_tree();
        assert!(tree.remove_leaf(1));
        assert_eq!(tree, TreeNode::leaf(0));
    }

    #[test]
    fn remove_leaf_renumbers_higher_indices() {
        let mut tree = TreeNode::Split {
            orientation: Split::Horizontal,
            ratios: vec![0.34, 0.33, 0.33],
            children: vec![TreeNode::leaf(0), TreeNode::leaf(1), TreeNode::leaf(2)],
        };
        assert!(tree.remove_leaf(1));
        // Former pane 2 is now pane 1 in the shrunk list.
        assert_eq!(tree.leaf_indices(), vec![0, 1]);
    }

    #[test]
    fn removing_the_last_leaf_is_refused() {
        let mut tree = TreeNode::leaf(0);
        assert!(!tree.remove_leaf(0));
    }

    #[test]
    fn snapshot_roundtrip_preserves_shape() {
        let tree = TreeNode::Split {
            orientation: Split::Vertical,
            ratios: vec![0.5, 0.5],
            children: vec![TreeNode::leaf(0), two_pane_tree()],
        };
        let restored = TreeNode::from_snapshot(&tree.to_snapshot());
        assert_eq!(restored, tree);
    }

    #[test]
    fn malformed_snapshot_degrades_to_a_leaf() {
        let snap = TreeNodeSnapshot {
            pane_index: -1,
            split: SPLIT_HORIZONTAL,
            split_ratios: vec![0.5], // mismatched with two children
            children: vec![
                TreeNodeSnapshot {
                    pane_index: 0,
                    split: SPLIT_NONE,
                    split_ratios: vec![],
                    children: vec![],
                },
                TreeNodeSnapshot {
                    pane_index: 1,
                    split: SPLIT_NONE,
                    split_ratios: vec![],
                    children: vec![],
                },
            ],
        };
        assert_eq!(TreeNode::from_snapshot(&snap), TreeNode::leaf(0));
    }

    #[test]
    fn normalize_handles_zero_and_skewed_sums() {
        let mut zeros = vec![0.0, 0.0];
        normalize_ratios(&mut zeros);
        assert_eq!(zeros, vec![0.5, 0.5]);

        let mut skewed = vec![2.0, 2.0];
        normalize_ratios(&mut skewed);
        assert_eq!(skewed, vec![0.5, 0.5]);
    }

    #[test]
    fn animation_steps_from_start_to_target() {
        let anim = LayoutAnimation::new(vec![], vec![1.0, 0.0], vec![0.5, 0.5]);
        let (at_start, done) = anim.step(Instant::now());
        assert!(!done);
        assert!(at_start[0] > 0.49 && at_start[0] <= 1.0);

        let (at_end, done) = anim.step(Instant::now() + ANIMATION_DURATION * 2);
        assert!(done);
        assert!((at_end[0] - 0.5).abs() < 1e-6);
        assert!((at_end[1] - 0.5).abs() < 1e-6);
    }
}
