//! Static-object bounding volume hierarchy.
//!
//! Built by recursive median splits over world-space boxes: the root splits
//! by bounding-sphere radius (large objects on one side), deeper levels
//! alternate x, y, z by box center. Items are reordered so every node covers
//! a contiguous item range, which lets a node fully inside the frustum emit
//! all of its items at once.

use std::ops::Range;

use crate::resources::BoundingBox;
use crate::scene::{Containment, Frustum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Internal { left: u32, right: u32 },
    Leaf,
}

#[derive(Debug, Clone)]
struct BvhNode {
    bounds: BoundingBox,
    items: Range<u32>,
    kind: NodeKind,
}

#[derive(Debug, Clone, Copy)]
struct BvhItem {
    id: u32,
    bounds: BoundingBox,
}

#[derive(Debug, Clone, Copy)]
enum SplitKey {
    Radius,
    Axis(usize),
}

impl SplitKey {
    fn for_depth(depth: u32) -> Self {
        if depth == 0 {
            Self::Radius
        } else {
            Self::Axis(((depth - 1) % 3) as usize)
        }
    }

    fn value(self, bounds: &BoundingBox) -> f32 {
        match self {
            Self::Radius => bounds.size().length(),
            Self::Axis(axis) => bounds.center()[axis],
        }
    }
}

#[derive(Debug, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    items: Vec<BvhItem>,
    leaf_size: u32,
}

impl Bvh {
    #[must_use]
    pub fn new(leaf_size: u32) -> Self {
        Self {
            nodes: Vec::new(),
            items: Vec::new(),
            leaf_size: leaf_size.max(1),
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Rebuilds the tree over `(id, world bounds)` pairs.
    pub fn build(&mut self, entries: impl IntoIterator<Item = (u32, BoundingBox)>) {
        self.nodes.clear();
        self.items.clear();
        self.items.extend(
            entries
                .into_iter()
                .filter(|(_, b)| !b.is_empty())
                .map(|(id, bounds)| BvhItem { id, bounds }),
        );
        if self.items.is_empty() {
            return;
        }

        self.nodes.push(BvhNode {
            bounds: BoundingBox::EMPTY,
            items: 0..self.items.len() as u32,
            kind: NodeKind::Leaf,
        });
        self.split(0, 0);
        log::debug!("BVH rebuilt: {} items, {} nodes", self.items.len(), self.nodes.len());
    }

    fn split(&mut self, node: usize, depth: u32) {
        let range = self.nodes[node].items.clone();
        let slice = &mut self.items[range.start as usize..range.end as usize];
        self.nodes[node].bounds = slice.iter().fold(BoundingBox::EMPTY, |acc, item| acc.union(&item.bounds));

        if range.len() as u32 <= self.leaf_size {
            return;
        }

        let key = SplitKey::for_depth(depth);
        let mid = slice.len() / 2;
        slice.select_nth_unstable_by(mid, |a, b| key.value(&a.bounds).total_cmp(&key.value(&b.bounds)));

        let split = range.start + mid as u32;
        let left = self.nodes.len() as u32;
        self.nodes.push(BvhNode {
            bounds: BoundingBox::EMPTY,
            items: range.start..split,
            kind: NodeKind::Leaf,
        });
        self.nodes.push(BvhNode {
            bounds: BoundingBox::EMPTY,
            items: split..range.end,
            kind: NodeKind::Leaf,
        });
        self.nodes[node].kind = NodeKind::Internal { left, right: left + 1 };

        self.split(left as usize, depth + 1);
        self.split(left as usize + 1, depth + 1);
    }

    /// Calls `visit` with the id of every item intersecting `frustum`.
    pub fn walk(&self, frustum: &Frustum, mut visit: impl FnMut(u32)) {
        if self.nodes.is_empty() {
            return;
        }

        let mut stack = vec![0u32];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            match frustum.classify_aabb(&node.bounds) {
                Containment::Outside => {}
                Containment::Inside => {
                    for item in &self.items[node.items.start as usize..node.items.end as usize] {
                        visit(item.id);
                    }
                }
                Containment::Partial => match node.kind {
                    NodeKind::Internal { left, right } => {
                        stack.push(right);
                        stack.push(left);
                    }
                    NodeKind::Leaf => {
                        for item in &self.items[node.items.start as usize..node.items.end as usize] {
                            if frustum.classify_aabb(&item.bounds) != Containment::Outside {
                                visit(item.id);
                            }
                        }
                    }
                },
            }
        }
    }
}
