// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Dynamic Bounding Volume Hierarchy
//!
//! An incrementally balanced binary tree of padded AABBs for broad-phase
//! queries and ray casts.
//!
//! Nodes live in a single arena addressed by 32-bit indices, so handles
//! survive arena growth. Leaves store their box expanded by
//! [`BvhSettings::aabb_margin`]; small movements that stay inside the padded
//! box never touch the tree. Insertion picks a sibling with the
//! surface-area heuristic and the path back to the root is rebalanced with
//! AVL-style rotations.
//!
//! The tree is not internally synchronized. Wrap it in a lock to share it
//! between threads.

mod arena;
mod balance;
mod diagnostics;
mod node;
mod query;

pub use diagnostics::BvhStats;
pub use node::{BvhNode, NodeId, NodeKind};
pub use query::{HitKind, Leaves, Overlaps, RaycastCandidate, RaycastHit, RaycastResult};

use node::NULL_NODE;

use super::{BvhError, BvhSettings};
use crate::math::Aabb;

/// A dynamic AABB tree for efficient spatial queries.
#[derive(Debug, Clone)]
pub struct Bvh {
    root: u32,
    nodes: Vec<BvhNode>,
    free_list: u32,
    count: u32,
    settings: BvhSettings,
}

impl Default for Bvh {
    fn default() -> Self {
        Self::new()
    }
}

impl Bvh {
    /// Creates a new, empty tree with default settings. Nothing is allocated
    /// until the first insertion.
    pub fn new() -> Self {
        Self {
            root: NULL_NODE,
            nodes: Vec::new(),
            free_list: NULL_NODE,
            count: 0,
            settings: BvhSettings::default(),
        }
    }

    /// Creates an empty tree and reserves room for
    /// [`BvhSettings::initial_leaf_capacity`] leaves.
    pub fn with_settings(settings: BvhSettings) -> Result<Self, BvhError> {
        let mut bvh = Self {
            settings,
            ..Self::new()
        };
        bvh.reserve(settings.initial_leaf_capacity)?;
        Ok(bvh)
    }

    /// Creates an empty tree with room for `leaf_capacity` leaves.
    pub fn with_capacity(leaf_capacity: u32) -> Result<Self, BvhError> {
        Self::with_settings(BvhSettings {
            initial_leaf_capacity: leaf_capacity,
            ..BvhSettings::default()
        })
    }

    /// The settings this tree was created with.
    pub fn settings(&self) -> &BvhSettings {
        &self.settings
    }

    /// Number of nodes in use, leaves and internal nodes alike.
    pub fn len(&self) -> u32 {
        self.count
    }

    /// Number of leaves. A full binary tree with `n` leaves has `2n - 1` nodes.
    pub fn leaf_count(&self) -> u32 {
        self.count.div_ceil(2)
    }

    /// Returns `true` if the tree holds no leaves.
    pub fn is_empty(&self) -> bool {
        self.root == NULL_NODE
    }

    /// Number of allocated node slots, including the reserved slot 0.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Handle of the root node, [`NodeId::NONE`] when the tree is empty.
    pub fn root(&self) -> NodeId {
        NodeId(self.root)
    }

    /// Height of the tree: 0 for an empty tree or a single leaf.
    pub fn height(&self) -> u32 {
        if self.root == NULL_NODE {
            0
        } else {
            self.at(self.root).height.max(0) as u32
        }
    }

    /// Read access to any live node, leaf or internal.
    pub fn node(&self, id: NodeId) -> Option<&BvhNode> {
        if id.is_none() {
            return None;
        }
        self.nodes.get(id.index()).filter(|node| !node.is_free())
    }

    /// Returns `true` if `id` refers to a live leaf.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(BvhNode::is_leaf)
    }

    /// The payload stored with a leaf.
    pub fn user(&self, id: NodeId) -> Option<u64> {
        self.node(id).filter(|n| n.is_leaf()).map(|n| n.user)
    }

    /// The padded box stored for a leaf.
    pub fn fat_aabb(&self, id: NodeId) -> Option<Aabb> {
        self.node(id).filter(|n| n.is_leaf()).map(|n| n.aabb)
    }

    /// The parent of a live node, `None` for the root or a dead handle.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)
            .map(|n| n.parent)
            .filter(|&p| p != NULL_NODE)
            .map(NodeId)
    }

    /// Inserts a leaf for `tight` and returns its handle.
    ///
    /// The stored box is `tight` padded by the configured margin. The new leaf
    /// is flagged as moved.
    pub fn insert(&mut self, tight: Aabb, user: u64) -> Result<NodeId, BvhError> {
        let leaf = self.alloc_node()?;
        let margin = self.settings.aabb_margin;
        {
            let node = self.at_mut(leaf);
            node.aabb = tight.expanded(margin);
            node.user = user;
            node.moved = true;
        }

        if let Err(err) = self.insert_leaf(leaf) {
            self.free_node(leaf);
            return Err(err);
        }
        Ok(NodeId(leaf))
    }

    /// Removes a leaf and returns its payload.
    pub fn remove(&mut self, id: NodeId) -> Result<u64, BvhError> {
        let leaf = self.leaf_index(id)?;
        let user = self.at(leaf).user;

        self.remove_leaf(leaf);
        self.free_node(leaf);
        Ok(user)
    }

    /// Moves a leaf to a new tight box.
    ///
    /// If `tight` still fits inside the padded box nothing changes and
    /// `Ok(false)` is returned. Otherwise the leaf is reinserted with a fresh
    /// padded box, flagged as moved, and `Ok(true)` is returned.
    pub fn update(&mut self, id: NodeId, tight: Aabb) -> Result<bool, BvhError> {
        let leaf = self.leaf_index(id)?;
        if self.at(leaf).aabb.contains_aabb(&tight) {
            return Ok(false);
        }

        self.remove_leaf(leaf);
        let margin = self.settings.aabb_margin;
        {
            let node = self.at_mut(leaf);
            node.aabb = tight.expanded(margin);
            node.moved = true;
        }
        // Detaching released the old parent slot, so this never grows the arena.
        self.insert_leaf(leaf)?;
        Ok(true)
    }

    /// Returns `true` if the leaf was (re)inserted since its flag was last cleared.
    pub fn is_moved(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| n.is_leaf() && n.moved)
    }

    /// Clears the moved flag of a leaf.
    pub fn clear_moved(&mut self, id: NodeId) -> Result<(), BvhError> {
        let leaf = self.leaf_index(id)?;
        self.at_mut(leaf).moved = false;
        Ok(())
    }

    /// Collects every leaf flagged as moved and clears the flags.
    pub fn take_moved(&mut self) -> Vec<NodeId> {
        let mut moved = Vec::new();
        for (index, node) in self.nodes.iter_mut().enumerate().skip(1) {
            if node.is_leaf() && node.moved {
                node.moved = false;
                moved.push(NodeId(index as u32));
            }
        }
        moved
    }

    /// Drops every node and releases the arena. Settings are kept.
    pub fn clear(&mut self) {
        log::debug!(
            "Clearing BVH ({} nodes, {} slots).",
            self.count,
            self.nodes.len()
        );
        self.nodes = Vec::new();
        self.root = NULL_NODE;
        self.free_list = NULL_NODE;
        self.count = 0;
    }

    // --- Internal Leaf Management ---

    #[inline]
    fn at(&self, index: u32) -> &BvhNode {
        &self.nodes[index as usize]
    }

    #[inline]
    fn at_mut(&mut self, index: u32) -> &mut BvhNode {
        &mut self.nodes[index as usize]
    }

    /// Resolves a caller handle to the index of a live leaf.
    fn leaf_index(&self, id: NodeId) -> Result<u32, BvhError> {
        let result = match self.node(id).map(BvhNode::kind) {
            Some(NodeKind::Leaf) => Ok(id.0),
            Some(NodeKind::Internal) => Err(BvhError::NotALeaf(id)),
            Some(NodeKind::Free) | None => Err(BvhError::NotFound(id)),
        };
        if let Err(err) = &result {
            log::warn!("Rejected BVH handle: {err}");
        }
        result
    }

    /// Finds the node the new leaf should be paired with, using the
    /// surface-area heuristic.
    fn find_best_sibling(&self, leaf_aabb: &Aabb) -> u32 {
        let mut index = self.root;
        while !self.at(index).is_leaf() {
            let node = self.at(index);
            let area = node.aabb.surface_area();
            let combined_area = node.aabb.merge(leaf_aabb).surface_area();

            // Cost of creating a new parent for this node and the new leaf
            let direct_cost = 2.0 * combined_area;

            // Minimum cost of pushing the leaf further down the tree
            let inheritance_cost = 2.0 * (combined_area - area);

            let descend_cost = |child: u32| {
                let child = self.at(child);
                let new_area = child.aabb.merge(leaf_aabb).surface_area();
                if child.is_leaf() {
                    new_area + inheritance_cost
                } else {
                    (new_area - child.aabb.surface_area()) + inheritance_cost
                }
            };
            let cost_left = descend_cost(node.left);
            let cost_right = descend_cost(node.right);

            if direct_cost < cost_left && direct_cost < cost_right {
                break;
            }

            index = if cost_left < cost_right {
                node.left
            } else {
                node.right
            };
        }
        index
    }

    /// Attaches an allocated, unlinked leaf to the tree.
    fn insert_leaf(&mut self, leaf: u32) -> Result<(), BvhError> {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.at_mut(leaf).parent = NULL_NODE;
            return Ok(());
        }

        let leaf_aabb = self.at(leaf).aabb;
        let sibling = self.find_best_sibling(&leaf_aabb);

        // Allocate before relinking anything so a failed grow leaves the tree intact.
        let new_parent = self.alloc_node()?;
        let old_parent = self.at(sibling).parent;
        let sibling_node = *self.at(sibling);
        {
            let node = self.at_mut(new_parent);
            node.parent = old_parent;
            node.aabb = leaf_aabb.merge(&sibling_node.aabb);
            node.height = sibling_node.height + 1;
            node.left = sibling;
            node.right = leaf;
        }
        self.at_mut(sibling).parent = new_parent;
        self.at_mut(leaf).parent = new_parent;

        if old_parent == NULL_NODE {
            self.root = new_parent;
        } else {
            self.replace_child(old_parent, sibling, new_parent);
        }

        self.fix_upwards(new_parent);
        Ok(())
    }

    /// Unlinks a leaf, promoting its sibling into the parent's place. The
    /// leaf slot itself stays allocated.
    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NULL_NODE;
            self.at_mut(leaf).parent = NULL_NODE;
            return;
        }

        let parent = self.at(leaf).parent;
        let grand_parent = self.at(parent).parent;
        let sibling = if self.at(parent).left == leaf {
            self.at(parent).right
        } else {
            self.at(parent).left
        };

        self.at_mut(sibling).parent = grand_parent;
        self.at_mut(leaf).parent = NULL_NODE;
        self.free_node(parent);

        if grand_parent == NULL_NODE {
            self.root = sibling;
        } else {
            self.replace_child(grand_parent, parent, sibling);
            self.fix_upwards(grand_parent);
        }
    }

    /// Points the child slot of `parent` that holds `old` at `new`.
    #[inline]
    fn replace_child(&mut self, parent: u32, old: u32, new: u32) {
        let node = self.at_mut(parent);
        if node.left == old {
            node.left = new;
        } else {
            debug_assert_eq!(node.right, old);
            node.right = new;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn cube(center: Vec3) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3::splat(0.5))
    }

    #[test]
    fn test_new_tree_is_empty() {
        let bvh = Bvh::new();
        assert!(bvh.is_empty());
        assert_eq!(bvh.len(), 0);
        assert_eq!(bvh.capacity(), 0);
        assert_eq!(bvh.root(), NodeId::NONE);
        assert_eq!(bvh.height(), 0);
    }

    #[test]
    fn test_single_leaf_is_root() {
        let mut bvh = Bvh::new();
        let id = bvh.insert(cube(Vec3::ZERO), 42).unwrap();

        assert_eq!(bvh.root(), id);
        assert_eq!(bvh.len(), 1);
        assert_eq!(bvh.leaf_count(), 1);
        assert_eq!(bvh.user(id), Some(42));
        assert_eq!(bvh.parent(id), None);
        assert!(bvh.is_moved(id));
        assert_eq!(bvh.fat_aabb(id), Some(cube(Vec3::ZERO).expanded(0.2)));
    }

    #[test]
    fn test_two_leaves_share_a_parent() {
        let mut bvh = Bvh::new();
        let a = bvh.insert(cube(Vec3::ZERO), 1).unwrap();
        let b = bvh.insert(cube(Vec3::new(5.0, 0.0, 0.0)), 2).unwrap();

        assert_eq!(bvh.len(), 3);
        assert_eq!(bvh.leaf_count(), 2);
        let parent = bvh.parent(a).unwrap();
        assert_eq!(bvh.parent(b), Some(parent));
        assert_eq!(bvh.root(), parent);
        assert_eq!(bvh.height(), 1);
        assert!(!bvh.contains(parent));
        assert_eq!(bvh.user(parent), None);
    }

    #[test]
    fn test_remove_promotes_sibling() {
        let mut bvh = Bvh::new();
        let a = bvh.insert(cube(Vec3::ZERO), 1).unwrap();
        let b = bvh.insert(cube(Vec3::new(5.0, 0.0, 0.0)), 2).unwrap();

        assert_eq!(bvh.remove(a), Ok(1));
        assert_eq!(bvh.root(), b);
        assert_eq!(bvh.len(), 1);
        assert_eq!(bvh.parent(b), None);

        assert_eq!(bvh.remove(b), Ok(2));
        assert!(bvh.is_empty());
        assert_eq!(bvh.len(), 0);
    }

    #[test]
    fn test_invalid_handles_are_rejected() {
        let mut bvh = Bvh::new();
        let a = bvh.insert(cube(Vec3::ZERO), 1).unwrap();
        bvh.insert(cube(Vec3::new(3.0, 0.0, 0.0)), 2).unwrap();
        let internal = bvh.root();

        assert_eq!(bvh.remove(NodeId::NONE), Err(BvhError::NotFound(NodeId::NONE)));
        assert_eq!(bvh.remove(NodeId(9999)), Err(BvhError::NotFound(NodeId(9999))));
        assert_eq!(bvh.remove(internal), Err(BvhError::NotALeaf(internal)));

        bvh.remove(a).unwrap();
        assert_eq!(bvh.remove(a), Err(BvhError::NotFound(a)));
        assert_eq!(bvh.update(a, cube(Vec3::ZERO)), Err(BvhError::NotFound(a)));
        assert_eq!(bvh.len(), 1);
    }

    #[test]
    fn test_update_inside_margin_is_a_no_op() {
        let mut bvh = Bvh::new();
        let a = bvh.insert(cube(Vec3::ZERO), 1).unwrap();
        bvh.clear_moved(a).unwrap();

        assert_eq!(bvh.update(a, cube(Vec3::new(0.1, 0.0, 0.0))), Ok(false));
        assert!(!bvh.is_moved(a));

        assert_eq!(bvh.update(a, cube(Vec3::new(3.0, 0.0, 0.0))), Ok(true));
        assert!(bvh.is_moved(a));
        assert_eq!(
            bvh.fat_aabb(a),
            Some(cube(Vec3::new(3.0, 0.0, 0.0)).expanded(0.2))
        );
    }

    #[test]
    fn test_take_moved_clears_flags() {
        let mut bvh = Bvh::new();
        let a = bvh.insert(cube(Vec3::ZERO), 1).unwrap();
        let b = bvh.insert(cube(Vec3::new(4.0, 0.0, 0.0)), 2).unwrap();

        let mut moved = bvh.take_moved();
        moved.sort();
        assert_eq!(moved, vec![a, b]);
        assert!(bvh.take_moved().is_empty());

        bvh.update(b, cube(Vec3::new(10.0, 0.0, 0.0))).unwrap();
        assert_eq!(bvh.take_moved(), vec![b]);
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut bvh = Bvh::with_capacity(10).unwrap();
        for i in 0..10 {
            bvh.insert(cube(Vec3::new(i as f32 * 2.0, 0.0, 0.0)), i).unwrap();
        }
        bvh.clear();
        assert!(bvh.is_empty());
        assert_eq!(bvh.capacity(), 0);

        let id = bvh.insert(cube(Vec3::ZERO), 7).unwrap();
        assert_eq!(bvh.user(id), Some(7));
    }
}
