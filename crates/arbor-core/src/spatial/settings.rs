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

//! Tunables for the bounding volume hierarchy.

use serde::{Deserialize, Serialize};

/// Settings applied when a [`Bvh`](super::Bvh) is created.
///
/// Missing fields fall back to their defaults when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BvhSettings {
    /// Distance every face of a leaf box is pushed outwards on insertion.
    /// Movements that stay inside the padded box do not touch the tree.
    pub aabb_margin: f32,
    /// Number of leaves to reserve node slots for up front.
    pub initial_leaf_capacity: u32,
    /// Initial capacity of the explicit traversal stack used by queries.
    pub query_stack_capacity: usize,
}

impl Default for BvhSettings {
    fn default() -> Self {
        Self {
            aabb_margin: 0.2,
            initial_leaf_capacity: 0,
            query_stack_capacity: 64,
        }
    }
}
