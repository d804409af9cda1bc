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

//! Structural validation and quality statistics.

use super::node::{NodeKind, NULL_NODE};
use super::Bvh;
use crate::spatial::BvhError;

/// A snapshot of the tree's size and shape.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BvhStats {
    /// Number of leaves.
    pub leaf_count: u32,
    /// Number of nodes in use (leaves and internal nodes).
    pub node_count: u32,
    /// Number of allocated node slots.
    pub capacity: usize,
    /// Height of the root.
    pub height: u32,
    /// Largest height difference between the two children of any internal node.
    pub max_imbalance: u32,
    /// Summed surface area of internal nodes divided by the root's area.
    /// Lower means tighter boxes; `0.0` for trees with fewer than two leaves.
    pub area_ratio: f32,
}

impl Bvh {
    /// Collects size and quality figures for the tree.
    pub fn stats(&self) -> BvhStats {
        let mut stats = BvhStats {
            node_count: self.count,
            capacity: self.nodes.len(),
            height: self.height(),
            ..BvhStats::default()
        };

        let mut internal_area = 0.0;
        let mut stack = self.traversal_stack();
        while let Some(index) = stack.pop() {
            let node = self.at(index);
            if node.is_leaf() {
                stats.leaf_count += 1;
                continue;
            }
            internal_area += node.aabb.surface_area();
            let imbalance = (self.at(node.left).height - self.at(node.right).height).unsigned_abs();
            stats.max_imbalance = stats.max_imbalance.max(imbalance);
            stack.push(node.left);
            stack.push(node.right);
        }

        if self.root != NULL_NODE && !self.at(self.root).is_leaf() {
            let root_area = self.at(self.root).aabb.surface_area();
            if root_area > 0.0 {
                stats.area_ratio = internal_area / root_area;
            }
        }
        stats
    }

    /// Checks every structural invariant of the tree and its free-list.
    ///
    /// Intended for tests and debugging; a failure indicates a bug in the tree
    /// logic, not a caller error.
    pub fn validate(&self) -> Result<(), BvhError> {
        let corrupted = |msg: String| Err(BvhError::Corrupted(msg));

        if self.root == NULL_NODE {
            if self.count != 0 {
                return corrupted(format!("empty tree reports {} nodes", self.count));
            }
        } else if self.at(self.root).parent != NULL_NODE {
            return corrupted(format!("root {} has a parent", self.root));
        }

        let mut reachable = 0u32;
        let mut stack = self.traversal_stack();
        while let Some(index) = stack.pop() {
            if index == NULL_NODE || index as usize >= self.nodes.len() {
                return corrupted(format!("link to invalid slot {index}"));
            }
            reachable += 1;
            if reachable > self.count {
                return corrupted("more reachable nodes than allocated".to_string());
            }

            let node = self.at(index);
            match node.kind() {
                NodeKind::Free => {
                    return corrupted(format!("free slot {index} is linked into the tree"));
                }
                NodeKind::Leaf => {
                    if node.left != NULL_NODE || node.right != NULL_NODE {
                        return corrupted(format!("leaf {index} has children"));
                    }
                }
                NodeKind::Internal => {
                    let (l, r) = (node.left, node.right);
                    if l == NULL_NODE || r == NULL_NODE || l == r {
                        return corrupted(format!("internal node {index} lacks two children"));
                    }
                    for child in [l, r] {
                        if child as usize >= self.nodes.len() {
                            return corrupted(format!("node {index} links to slot {child}"));
                        }
                        let child_node = self.at(child);
                        if child_node.parent != index {
                            return corrupted(format!("child {child} does not point back to {index}"));
                        }
                        if !node.aabb.contains_aabb(&child_node.aabb) {
                            return corrupted(format!("node {index} does not contain child {child}"));
                        }
                    }
                    let (hl, hr) = (self.at(l).height, self.at(r).height);
                    if node.height != 1 + hl.max(hr) {
                        return corrupted(format!("node {index} has stale height {}", node.height));
                    }
                    if (hl - hr).abs() > 1 {
                        return corrupted(format!("node {index} unbalanced ({hl} vs {hr})"));
                    }
                    stack.push(l);
                    stack.push(r);
                }
            }
        }
        if reachable != self.count {
            return corrupted(format!(
                "{reachable} reachable nodes but {} allocated",
                self.count
            ));
        }

        let mut free = 0usize;
        let mut cursor = self.free_list;
        while cursor != NULL_NODE {
            if cursor as usize >= self.nodes.len() {
                return corrupted(format!("free-list links to slot {cursor}"));
            }
            let node = self.at(cursor);
            if !node.is_free() {
                return corrupted(format!("live node {cursor} is in the free-list"));
            }
            free += 1;
            if free > self.nodes.len() {
                return corrupted("free-list has a cycle".to_string());
            }
            cursor = node.next;
        }

        let sentinel = usize::from(!self.nodes.is_empty());
        if free + self.count as usize + sentinel != self.nodes.len() {
            return corrupted(format!(
                "{free} free + {} live slots do not account for {} slots",
                self.count,
                self.nodes.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Aabb, Vec3};

    fn cube(x: f32) -> Aabb {
        Aabb::from_center_half_extents(Vec3::new(x, 0.0, 0.0), Vec3::splat(0.5))
    }

    #[test]
    fn test_stats_of_small_tree() {
        let mut bvh = Bvh::new();
        assert_eq!(bvh.stats(), BvhStats::default());

        for i in 0..8u64 {
            bvh.insert(cube(i as f32 * 2.0), i).unwrap();
        }
        let stats = bvh.stats();
        assert_eq!(stats.leaf_count, 8);
        assert_eq!(stats.node_count, 15);
        assert_eq!(stats.capacity, 64);
        assert!(stats.max_imbalance <= 1);
        assert!(stats.area_ratio >= 1.0);
    }

    #[test]
    fn test_validate_accepts_fresh_and_mutated_trees() {
        let mut bvh = Bvh::new();
        bvh.validate().unwrap();
        let ids: Vec<_> = (0..20u64)
            .map(|i| bvh.insert(cube(i as f32), i).unwrap())
            .collect();
        bvh.validate().unwrap();
        for id in ids.iter().step_by(3) {
            bvh.remove(*id).unwrap();
        }
        bvh.validate().unwrap();
    }

    #[test]
    fn test_validate_detects_broken_parent_link() {
        let mut bvh = Bvh::new();
        let a = bvh.insert(cube(0.0), 1).unwrap();
        bvh.insert(cube(4.0), 2).unwrap();

        bvh.at_mut(a.0).parent = NULL_NODE;
        assert!(matches!(bvh.validate(), Err(BvhError::Corrupted(_))));
    }

    #[test]
    fn test_validate_detects_stale_box() {
        let mut bvh = Bvh::new();
        bvh.insert(cube(0.0), 1).unwrap();
        bvh.insert(cube(4.0), 2).unwrap();

        let root = bvh.root;
        bvh.at_mut(root).aabb = cube(0.0);
        assert!(matches!(bvh.validate(), Err(BvhError::Corrupted(_))));
    }
}
