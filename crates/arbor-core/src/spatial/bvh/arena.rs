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

//! Node allocation: a single growable array with an index-threaded free-list.

use super::node::{BvhNode, FREE_HEIGHT, NULL_NODE};
use super::Bvh;
use crate::spatial::BvhError;

/// Slot count of the first implicit growth.
const MIN_GROWTH: usize = 64;

impl Bvh {
    /// Ensures the arena can hold a full tree with `leaf_capacity` leaves
    /// (`2 * leaf_capacity + 1` slots). Never shrinks.
    ///
    /// On failure the tree is left untouched.
    pub fn reserve(&mut self, leaf_capacity: u32) -> Result<(), BvhError> {
        if leaf_capacity == 0 {
            return Ok(());
        }
        let required = 2 * leaf_capacity as usize + 1;
        if required <= self.nodes.len() {
            return Ok(());
        }
        self.grow_to(required)
    }

    /// Pops a slot from the free-list, doubling the arena first when the
    /// list is empty. The slot comes back as an unlinked leaf.
    pub(super) fn alloc_node(&mut self) -> Result<u32, BvhError> {
        if self.free_list == NULL_NODE {
            let target = (self.nodes.len() * 2).max(MIN_GROWTH);
            self.grow_to(target)?;
        }

        let index = self.free_list;
        debug_assert_ne!(index, NULL_NODE);
        let node = self.at_mut(index);
        debug_assert!(node.is_free());
        let next = node.next;
        *node = BvhNode::detached();

        self.free_list = next;
        self.count += 1;
        Ok(index)
    }

    /// Returns a slot to the head of the free-list.
    pub(super) fn free_node(&mut self, index: u32) {
        debug_assert_ne!(index, NULL_NODE);
        let head = self.free_list;
        let node = self.at_mut(index);
        node.height = FREE_HEIGHT;
        node.next = head;
        node.parent = NULL_NODE;
        node.left = NULL_NODE;
        node.right = NULL_NODE;
        node.moved = false;

        self.free_list = index;
        self.count -= 1;
    }

    /// Grows the arena to `new_len` slots and threads the new slots, in
    /// ascending order, in front of the current free-list.
    fn grow_to(&mut self, new_len: usize) -> Result<(), BvhError> {
        let old_len = self.nodes.len();
        debug_assert!(new_len > old_len);
        if new_len > u32::MAX as usize {
            return Err(BvhError::AllocationFailed { requested: new_len });
        }
        self.nodes
            .try_reserve_exact(new_len - old_len)
            .map_err(|_| BvhError::AllocationFailed { requested: new_len })?;

        if old_len == 0 {
            // Slot 0 is the "none" sentinel and never enters the free-list.
            self.nodes.push(BvhNode::free(NULL_NODE));
        }

        let first = self.nodes.len() as u32;
        let last = new_len as u32 - 1;
        if first <= last {
            for index in first..=last {
                let next = if index == last {
                    self.free_list
                } else {
                    index + 1
                };
                self.nodes.push(BvhNode::free(next));
            }
            self.free_list = first;
        }

        log::debug!("BVH node arena grew from {old_len} to {new_len} slots.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Aabb, Vec3};

    #[test]
    fn test_zero_capacity_allocates_nothing() {
        let bvh = Bvh::with_capacity(0).unwrap();
        assert_eq!(bvh.capacity(), 0);
        assert!(bvh.is_empty());
    }

    #[test]
    fn test_reserve_covers_worst_case_node_count() {
        let mut bvh = Bvh::new();
        bvh.reserve(100).unwrap();
        assert_eq!(bvh.capacity(), 201);

        // Never shrinks.
        bvh.reserve(10).unwrap();
        assert_eq!(bvh.capacity(), 201);

        for i in 0..100u64 {
            let center = Vec3::new(i as f32 * 3.0, 0.0, 0.0);
            bvh.insert(Aabb::from_center_half_extents(center, Vec3::ONE), i)
                .unwrap();
        }
        assert_eq!(bvh.len(), 199);
        assert_eq!(bvh.capacity(), 201);
    }

    #[test]
    fn test_implicit_growth_starts_at_64_then_doubles() {
        let mut bvh = Bvh::new();
        bvh.alloc_node().unwrap();
        assert_eq!(bvh.capacity(), 64);

        for _ in 1..63 {
            bvh.alloc_node().unwrap();
        }
        assert_eq!(bvh.capacity(), 64);
        assert_eq!(bvh.free_list, NULL_NODE);

        bvh.alloc_node().unwrap();
        assert_eq!(bvh.capacity(), 128);
        assert_eq!(bvh.len(), 64);
    }

    #[test]
    fn test_sentinel_is_never_handed_out() {
        let mut bvh = Bvh::new();
        let mut seen = Vec::new();
        for _ in 0..200 {
            let index = bvh.alloc_node().unwrap();
            assert_ne!(index, NULL_NODE);
            seen.push(index);
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn test_freed_slot_is_reused_first() {
        let mut bvh = Bvh::new();
        let a = bvh.alloc_node().unwrap();
        let _b = bvh.alloc_node().unwrap();

        bvh.free_node(a);
        assert!(bvh.at(a).is_free());
        assert_eq!(bvh.len(), 1);
        assert_eq!(bvh.alloc_node().unwrap(), a);
        assert!(bvh.at(a).is_leaf());
    }

    #[test]
    fn test_oversized_reserve_fails_cleanly() {
        let mut bvh = Bvh::new();
        let err = bvh.reserve(u32::MAX).unwrap_err();
        assert!(matches!(err, BvhError::AllocationFailed { .. }));
        assert_eq!(bvh.capacity(), 0);
        assert!(bvh.is_empty());
    }
}
