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

//! Balancing (tree rotations) and bottom-up refitting.

use super::node::NULL_NODE;
use super::Bvh;

impl Bvh {
    /// Re-applies local balancing to up to `iterations` internal nodes,
    /// walking down from the root with right subtrees visited first.
    ///
    /// Meant to be called on a budget (e.g. once per frame) rather than after
    /// every mutation.
    pub fn rebalance(&mut self, iterations: u32) {
        if self.root == NULL_NODE || iterations == 0 {
            return;
        }

        let mut stack = Vec::with_capacity(self.settings.query_stack_capacity);
        stack.push(self.root);
        let mut visited = 0;
        let mut rotations = 0;

        while let Some(index) = stack.pop() {
            if visited >= iterations {
                break;
            }
            if self.at(index).is_leaf() {
                continue;
            }
            visited += 1;

            let top = self.balance(index);
            if top != index {
                rotations += 1;
                let parent = self.at(top).parent;
                if parent != NULL_NODE {
                    self.fix_upwards(parent);
                }
            }

            let node = self.at(top);
            stack.push(node.left);
            stack.push(node.right);
        }

        log::trace!("BVH rebalance visited {visited} nodes, performed {rotations} rotations.");
    }

    /// Balances, then refits, every node from `start` up to the root.
    ///
    /// `start` is always refitted and its parent always visited. Above that,
    /// the walk stops at the first node that was neither rotated nor changed
    /// by its refit: nothing further up can change either.
    pub(super) fn fix_upwards(&mut self, start: u32) {
        let mut index = start;
        let mut first = true;

        while index != NULL_NODE {
            let top = self.balance(index);
            let changed = self.refit(top);

            debug_assert!(self.at(top).left != NULL_NODE);
            debug_assert!(self.at(top).right != NULL_NODE);

            if !first && top == index && !changed {
                break;
            }
            first = false;
            index = self.at(top).parent;
        }
    }

    /// Restores the height balance at internal node `a` with a rotation when
    /// its children differ in height by more than one.
    ///
    /// The heavier child is promoted into `a`'s place and `a` becomes its
    /// child; of the promoted node's two children the taller stays with it
    /// and the shorter moves under `a`. The demoted `a` is then balanced in
    /// turn, so the subtree is balanced whenever both children of `a` were.
    ///
    /// Returns the node now occupying `a`'s position.
    pub(super) fn balance(&mut self, a: u32) -> u32 {
        debug_assert_ne!(a, NULL_NODE);

        let node_a = *self.at(a);
        if node_a.is_leaf() {
            return a;
        }

        let b = node_a.left;
        let c = node_a.right;
        let diff = self.at(c).height - self.at(b).height;

        // Rotate C up
        if diff > 1 {
            let f = self.at(c).left;
            let g = self.at(c).right;
            self.promote(a, c);

            let (taller, shorter) = if self.at(f).height > self.at(g).height {
                (f, g)
            } else {
                (g, f)
            };
            self.at_mut(c).left = a;
            self.at_mut(c).right = taller;
            self.at_mut(a).right = shorter;
            self.at_mut(shorter).parent = a;

            self.settle_demoted(a, c);
            log::trace!("BVH rotation: node {c} promoted over {a}.");
            return c;
        }

        // Rotate B up
        if diff < -1 {
            let d = self.at(b).left;
            let e = self.at(b).right;
            self.promote(a, b);

            let (taller, shorter) = if self.at(d).height > self.at(e).height {
                (d, e)
            } else {
                (e, d)
            };
            self.at_mut(b).left = a;
            self.at_mut(b).right = taller;
            self.at_mut(a).left = shorter;
            self.at_mut(shorter).parent = a;

            self.settle_demoted(a, b);
            log::trace!("BVH rotation: node {b} promoted over {a}.");
            return b;
        }

        a
    }

    /// Moves `child` into the position held by its parent `a`.
    fn promote(&mut self, a: u32, child: u32) {
        let grand_parent = self.at(a).parent;
        self.at_mut(child).parent = grand_parent;
        self.at_mut(a).parent = child;

        if grand_parent == NULL_NODE {
            self.root = child;
        } else {
            self.replace_child(grand_parent, a, child);
        }
    }

    /// Refits the demoted node, balances it again, then refits the promoted
    /// node (child first, since the parent depends on it).
    fn settle_demoted(&mut self, demoted: u32, promoted: u32) {
        self.refit(demoted);
        let settled = self.balance(demoted);
        self.refit(settled);
        self.refit(promoted);
    }

    /// Recomputes the box and height of an internal node from its children.
    /// Returns `true` if either changed.
    pub(super) fn refit(&mut self, index: u32) -> bool {
        let node = *self.at(index);
        let left = self.at(node.left);
        let right = self.at(node.right);

        let aabb = left.aabb.merge(&right.aabb);
        let height = 1 + left.height.max(right.height);
        if aabb == node.aabb && height == node.height {
            return false;
        }

        let node = self.at_mut(index);
        node.aabb = aabb;
        node.height = height;
        true
    }
}
