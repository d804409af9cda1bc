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

//! Broad-phase pair finding on top of the dynamic BVH.
//!
//! Proxies are addressed by caller-chosen `u64` keys. Overlapping pairs are
//! cached and only the proxies flagged as moved by the tree are re-queried,
//! so a frame where little moves costs little.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::bvh::{Bvh, NodeId};
use super::{BvhError, BvhSettings};
use crate::math::Aabb;

/// Broad-phase interface for inserting proxies and querying overlapping pairs.
///
/// Pairs are canonicalized so that `a < b` and the list is sorted ascending
/// by `(a, b)`.
pub trait BroadPhase {
    /// Inserts or moves the proxy with the given `key`.
    fn upsert(&mut self, key: u64, aabb: Aabb) -> Result<(), BvhError>;
    /// Removes a proxy. Returns `false` if the key was unknown.
    fn remove(&mut self, key: u64) -> bool;
    /// Returns the current list of overlapping pairs.
    fn pairs(&mut self) -> Vec<(u64, u64)>;
}

/// A [`BroadPhase`] backed by a [`Bvh`].
///
/// Two proxies form a pair when their padded boxes overlap.
#[derive(Debug, Clone, Default)]
pub struct BvhBroadPhase {
    tree: Bvh,
    proxies: HashMap<u64, NodeId>,
    pairs: BTreeSet<(u64, u64)>,
}

impl BvhBroadPhase {
    /// Creates an empty broad phase with default tree settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty broad phase whose tree uses `settings`.
    pub fn with_settings(settings: BvhSettings) -> Result<Self, BvhError> {
        Ok(Self {
            tree: Bvh::with_settings(settings)?,
            ..Self::default()
        })
    }

    /// The underlying tree, for queries and ray casts.
    pub fn tree(&self) -> &Bvh {
        &self.tree
    }

    /// Number of proxies.
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Returns `true` if there are no proxies.
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Spends up to `iterations` balancing steps on the underlying tree.
    pub fn rebalance(&mut self, iterations: u32) {
        self.tree.rebalance(iterations);
    }

    /// Recomputes the cached pairs of every proxy the tree flagged as moved.
    fn refresh(&mut self) {
        let moved = self.tree.take_moved();
        if moved.is_empty() {
            return;
        }

        let moved_keys: HashSet<u64> = moved.iter().filter_map(|&id| self.tree.user(id)).collect();
        self.pairs
            .retain(|(a, b)| !moved_keys.contains(a) && !moved_keys.contains(b));

        for id in moved {
            let (Some(key), Some(aabb)) = (self.tree.user(id), self.tree.fat_aabb(id)) else {
                continue;
            };
            for (other, other_key) in self.tree.overlaps(&aabb) {
                if other != id {
                    self.pairs.insert((key.min(other_key), key.max(other_key)));
                }
            }
        }
        log::trace!("Broad phase refreshed, {} cached pairs.", self.pairs.len());
    }
}

impl BroadPhase for BvhBroadPhase {
    fn upsert(&mut self, key: u64, aabb: Aabb) -> Result<(), BvhError> {
        match self.proxies.get(&key) {
            Some(&id) => {
                self.tree.update(id, aabb)?;
            }
            None => {
                let id = self.tree.insert(aabb, key)?;
                self.proxies.insert(key, id);
            }
        }
        Ok(())
    }

    fn remove(&mut self, key: u64) -> bool {
        let Some(id) = self.proxies.remove(&key) else {
            return false;
        };
        self.pairs.retain(|&(a, b)| a != key && b != key);
        self.tree.remove(id).is_ok()
    }

    fn pairs(&mut self) -> Vec<(u64, u64)> {
        self.refresh();
        self.pairs.iter().copied().collect()
    }
}
