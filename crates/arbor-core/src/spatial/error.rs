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

//! Defines the error type of the spatial subsystem.

use thiserror::Error;

use super::bvh::NodeId;

/// An error raised by a bounding volume hierarchy operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BvhError {
    /// The node arena could not be grown. The tree is left as it was before the call.
    #[error("failed to grow the node arena to {requested} slots")]
    AllocationFailed {
        /// The slot count that was requested.
        requested: usize,
    },
    /// The handle does not refer to a live node.
    #[error("no live node for {0}")]
    NotFound(NodeId),
    /// The handle refers to an internal node; only leaves are addressable.
    #[error("{0} is an internal node, not a leaf")]
    NotALeaf(NodeId),
    /// A structural invariant does not hold.
    #[error("hierarchy invariant violated: {0}")]
    Corrupted(String),
}
