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

//! Node storage for the bounding volume hierarchy.

use std::fmt;

use crate::math::Aabb;

/// Raw index of the reserved "none" slot. Slot 0 is never handed out.
pub(crate) const NULL_NODE: u32 = 0;

/// Height value marking a slot that sits in the free-list.
pub(crate) const FREE_HEIGHT: i32 = -1;

/// Stable handle to a leaf of a [`Bvh`](super::Bvh).
///
/// Handles stay valid across arena growth and tree restructuring until the
/// leaf is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The reserved "no node" handle.
    pub const NONE: Self = Self(NULL_NODE);

    /// Returns `true` if this is the reserved [`NodeId::NONE`] handle.
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == NULL_NODE
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node #{}", self.0)
    }
}

/// What a slot of the arena currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Unused slot chained into the free-list.
    Free,
    /// A leaf carrying a user payload.
    Leaf,
    /// An internal node with exactly two children.
    Internal,
}

/// A slot of the node arena.
///
/// The same flat record serves free slots, leaves and internal nodes; the
/// `height` field is the discriminant, read through [`BvhNode::kind`].
#[derive(Debug, Clone, Copy)]
pub struct BvhNode {
    /// Padded box for leaves, union of the children for internal nodes.
    pub aabb: Aabb,
    /// Opaque payload of a leaf.
    pub user: u64,
    /// Index of the parent node, `0` for the root.
    pub parent: u32,
    /// Index of the left child, `0` for leaves.
    pub left: u32,
    /// Index of the right child, `0` for leaves.
    pub right: u32,
    /// `-1` when free, `0` for leaves, otherwise `1 + max(child heights)`.
    pub height: i32,
    /// Next slot of the free-list while this slot is free.
    pub next: u32,
    /// Set whenever the leaf is (re)inserted.
    pub moved: bool,
}

impl BvhNode {
    /// A free slot pointing at `next` in the free-list.
    #[inline]
    pub(crate) fn free(next: u32) -> Self {
        Self {
            aabb: Aabb::INVALID,
            user: 0,
            parent: NULL_NODE,
            left: NULL_NODE,
            right: NULL_NODE,
            height: FREE_HEIGHT,
            next,
            moved: false,
        }
    }

    /// A freshly allocated, unlinked leaf.
    #[inline]
    pub(crate) fn detached() -> Self {
        Self {
            height: 0,
            next: NULL_NODE,
            ..Self::free(NULL_NODE)
        }
    }

    /// Classifies the slot.
    #[inline]
    pub fn kind(&self) -> NodeKind {
        match self.height {
            h if h < 0 => NodeKind::Free,
            0 => NodeKind::Leaf,
            _ => NodeKind::Internal,
        }
    }

    /// Returns true if this slot is in the free-list.
    #[inline]
    pub fn is_free(&self) -> bool {
        self.kind() == NodeKind::Free
    }

    /// Returns true if this node is a leaf (has no children).
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.kind() == NodeKind::Leaf
    }
}
