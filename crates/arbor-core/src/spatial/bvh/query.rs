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

//! Spatial queries over the hierarchy.
//!
//! Every traversal uses an explicit stack rather than recursion, so tree
//! depth never bounds the call stack.

use super::node::{NodeId, NULL_NODE};
use super::Bvh;
use crate::math::{Aabb, Ray, Vec3};

/// What a ray hit reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    /// The ray hit a leaf's padded bounding box.
    BoundingBox,
    /// The ray hit actual geometry, as resolved by a narrow phase.
    Surface,
}

/// A leaf hit by a ray, as offered to a raycast filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastCandidate {
    /// Payload of the leaf.
    pub user: u64,
    /// Handle of the leaf.
    pub id: NodeId,
    /// Distance at which the ray enters the padded box (0 when starting inside).
    pub t_min: f32,
    /// Distance at which the ray leaves the padded box, clamped to the query range.
    pub t_max: f32,
    /// Distance of the reported hit.
    pub distance: f32,
    /// World-space point of the reported hit.
    pub position: Vec3,
}

/// A single accepted ray hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastHit {
    /// What was hit.
    pub kind: HitKind,
    /// Distance from the ray origin.
    pub distance: f32,
    /// Payload of the leaf.
    pub user: u64,
    /// Handle of the leaf.
    pub id: NodeId,
    /// World-space hit point.
    pub position: Vec3,
}

/// The outcome of a ray cast.
///
/// Hits are stored in traversal order, not by distance. The list only
/// allocates once the first hit is recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RaycastResult {
    /// Accepted hits, in traversal order.
    pub hits: Vec<RaycastHit>,
}

impl RaycastResult {
    /// Returns `true` if nothing was hit.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Number of hits.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// The closest hit, if any.
    pub fn nearest(&self) -> Option<&RaycastHit> {
        self.hits
            .iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Orders the hits from nearest to farthest.
    pub fn sort_by_distance(&mut self) {
        self.hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    }
}

/// Lazy iterator over the leaves whose padded box intersects a query box.
///
/// Yields `(handle, payload)` pairs. Children are pushed left then right, so
/// right subtrees are visited first.
pub struct Overlaps<'a> {
    bvh: &'a Bvh,
    query: Aabb,
    stack: Vec<u32>,
}

impl Iterator for Overlaps<'_> {
    type Item = (NodeId, u64);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(index) = self.stack.pop() {
            let node = self.bvh.at(index);
            if !node.aabb.intersects_aabb(&self.query) {
                continue;
            }
            if node.is_leaf() {
                return Some((NodeId(index), node.user));
            }
            self.stack.push(node.left);
            self.stack.push(node.right);
        }
        None
    }
}

/// Iterator for traversing all leaves of the tree.
///
/// Yields `(handle, payload, padded box)`.
pub struct Leaves<'a> {
    bvh: &'a Bvh,
    stack: Vec<u32>,
}

impl Iterator for Leaves<'_> {
    type Item = (NodeId, u64, Aabb);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(index) = self.stack.pop() {
            let node = self.bvh.at(index);
            if node.is_leaf() {
                return Some((NodeId(index), node.user, node.aabb));
            }
            self.stack.push(node.left);
            self.stack.push(node.right);
        }
        None
    }
}

impl Bvh {
    /// Seeds a traversal stack with the root, or leaves it unallocated for an empty tree.
    pub(super) fn traversal_stack(&self) -> Vec<u32> {
        if self.root == NULL_NODE {
            return Vec::new();
        }
        let mut stack = Vec::with_capacity(self.settings.query_stack_capacity);
        stack.push(self.root);
        stack
    }

    /// Returns an iterator over the leaves whose padded box intersects `aabb`.
    pub fn overlaps(&self, aabb: &Aabb) -> Overlaps<'_> {
        Overlaps {
            bvh: self,
            query: *aabb,
            stack: self.traversal_stack(),
        }
    }

    /// Returns an iterator over every leaf.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves {
            bvh: self,
            stack: self.traversal_stack(),
        }
    }

    /// Invokes `callback(payload, handle)` for every leaf whose padded box
    /// intersects `aabb` and returns how many calls answered `true`.
    pub fn query_overlaps<F>(&self, aabb: &Aabb, mut callback: F) -> u32
    where
        F: FnMut(u64, NodeId) -> bool,
    {
        let mut hits = 0;
        for (id, user) in self.overlaps(aabb) {
            if callback(user, id) {
                hits += 1;
            }
        }
        hits
    }

    /// Reports every pair of leaves whose padded boxes overlap, once per pair.
    pub fn query_pairs<F>(&self, mut callback: F)
    where
        F: FnMut(NodeId, NodeId),
    {
        let mut nodes = self.traversal_stack();
        let mut pairs: Vec<(u32, u32)> = Vec::new();

        // Each overlapping pair is found under its lowest common ancestor by
        // descending the left and right subtrees together.
        while let Some(index) = nodes.pop() {
            let node = self.at(index);
            if node.is_leaf() {
                continue;
            }
            nodes.push(node.left);
            nodes.push(node.right);

            pairs.push((node.left, node.right));
            while let Some((a, b)) = pairs.pop() {
                let node_a = self.at(a);
                let node_b = self.at(b);
                if !node_a.aabb.intersects_aabb(&node_b.aabb) {
                    continue;
                }

                match (node_a.is_leaf(), node_b.is_leaf()) {
                    (true, true) => callback(NodeId(a), NodeId(b)),
                    (true, false) => {
                        pairs.push((a, node_b.left));
                        pairs.push((a, node_b.right));
                    }
                    (false, true) => {
                        pairs.push((node_a.left, b));
                        pairs.push((node_a.right, b));
                    }
                    (false, false) => {
                        pairs.push((node_a.left, node_b.left));
                        pairs.push((node_a.left, node_b.right));
                        pairs.push((node_a.right, node_b.left));
                        pairs.push((node_a.right, node_b.right));
                    }
                }
            }
        }
    }

    /// Casts a ray and records every leaf whose padded box it crosses within
    /// `max_distance`.
    ///
    /// With `ignore_if_inside`, leaves containing the ray origin are skipped.
    pub fn raycast(&self, ray: &Ray, max_distance: f32, ignore_if_inside: bool) -> RaycastResult {
        self.raycast_filtered(ray, max_distance, ignore_if_inside, |_| true)
    }

    /// Like [`Bvh::raycast`], but each hit is only recorded when `filter`
    /// accepts its candidate.
    pub fn raycast_filtered<F>(
        &self,
        ray: &Ray,
        max_distance: f32,
        ignore_if_inside: bool,
        mut filter: F,
    ) -> RaycastResult
    where
        F: FnMut(&RaycastCandidate) -> bool,
    {
        let mut result = RaycastResult::default();
        let mut stack = self.traversal_stack();

        while let Some(index) = stack.pop() {
            let node = self.at(index);
            let Some((t_min, t_max)) = node.aabb.intersect_ray(ray, max_distance) else {
                continue;
            };

            if !node.is_leaf() {
                stack.push(node.left);
                stack.push(node.right);
                continue;
            }

            if ignore_if_inside && node.aabb.contains_point(ray.origin) {
                continue;
            }

            let candidate = RaycastCandidate {
                user: node.user,
                id: NodeId(index),
                t_min,
                t_max,
                distance: t_min,
                position: ray.at(t_min),
            };
            if filter(&candidate) {
                result.hits.push(RaycastHit {
                    kind: HitKind::BoundingBox,
                    distance: candidate.distance,
                    user: candidate.user,
                    id: candidate.id,
                    position: candidate.position,
                });
            }
        }

        result
    }
}
