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

use std::collections::BTreeSet;

use approx::assert_relative_eq;
use arbor_core::math::{Aabb, Ray, Vec3};
use arbor_core::spatial::{Bvh, BvhSettings, NodeId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn random_box(rng: &mut StdRng) -> Aabb {
    let center = Vec3::new(
        rng.gen_range(-50.0..50.0),
        rng.gen_range(-50.0..50.0),
        rng.gen_range(-50.0..50.0),
    );
    let half = Vec3::new(
        rng.gen_range(0.1..3.0),
        rng.gen_range(0.1..3.0),
        rng.gen_range(0.1..3.0),
    );
    Aabb::from_center_half_extents(center, half)
}

fn populate(rng: &mut StdRng, count: u64) -> (Bvh, Vec<(NodeId, Aabb)>) {
    let mut bvh = Bvh::new();
    let entries = (0..count)
        .map(|user| {
            let tight = random_box(rng);
            (bvh.insert(tight, user).unwrap(), tight)
        })
        .collect();
    (bvh, entries)
}

#[test]
fn test_invariants_hold_through_random_mutations() {
    let mut rng = StdRng::seed_from_u64(0xB0B);
    let mut bvh = Bvh::new();
    let mut live: Vec<NodeId> = Vec::new();

    for step in 0..2000u64 {
        let roll = rng.gen_range(0..10);
        if roll < 5 || live.is_empty() {
            let id = bvh.insert(random_box(&mut rng), step).unwrap();
            assert!(!id.is_none());
            live.push(id);
        } else if roll < 8 {
            let id = live[rng.gen_range(0..live.len())];
            bvh.update(id, random_box(&mut rng)).unwrap();
        } else {
            let index = rng.gen_range(0..live.len());
            let id = live.swap_remove(index);
            bvh.remove(id).unwrap();
        }

        if let Err(err) = bvh.validate() {
            panic!("step {step}: {err}");
        }
    }

    let stats = bvh.stats();
    assert_eq!(stats.leaf_count as usize, live.len());
    assert!(stats.max_imbalance <= 1);
}

#[test]
fn test_leaves_contain_their_tight_boxes() {
    let mut rng = StdRng::seed_from_u64(11);
    let (bvh, entries) = populate(&mut rng, 300);

    for (id, tight) in &entries {
        let fat = bvh.fat_aabb(*id).unwrap();
        assert!(fat.contains_aabb(tight));
        let mut cursor = *id;
        while let Some(parent) = bvh.parent(cursor) {
            assert!(bvh.node(parent).unwrap().aabb.contains_aabb(&fat));
            cursor = parent;
        }
        assert_eq!(cursor, bvh.root());
    }
}

#[test]
fn test_insert_then_remove_all_empties_tree() {
    let mut rng = StdRng::seed_from_u64(3);
    let (mut bvh, mut entries) = populate(&mut rng, 500);
    entries.shuffle(&mut rng);

    for (id, _) in entries {
        bvh.remove(id).unwrap();
    }
    assert_eq!(bvh.len(), 0);
    assert_eq!(bvh.root(), NodeId::NONE);
    assert!(bvh.is_empty());
    bvh.validate().unwrap();
}

#[test]
fn test_query_matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(42);
    let (bvh, entries) = populate(&mut rng, 400);

    for _ in 0..50 {
        let query = random_box(&mut rng).expanded(rng.gen_range(0.0..10.0));

        let expected: BTreeSet<NodeId> = entries
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| bvh.fat_aabb(*id).unwrap().intersects_aabb(&query))
            .collect();

        let mut found = BTreeSet::new();
        let hits = bvh.query_overlaps(&query, |_, id| found.insert(id));

        assert_eq!(found, expected);
        assert_eq!(hits as usize, expected.len());
        assert_eq!(bvh.overlaps(&query).count(), expected.len());
    }
}

#[test]
fn test_update_within_margin_keeps_position() {
    let mut rng = StdRng::seed_from_u64(5);
    let (mut bvh, entries) = populate(&mut rng, 64);
    bvh.take_moved();

    for (id, tight) in &entries {
        let parent = bvh.parent(*id);
        let nudged = Aabb::from_min_max(
            tight.min + Vec3::new(0.1, -0.1, 0.05),
            tight.max + Vec3::new(0.1, -0.1, 0.05),
        );
        assert_eq!(bvh.update(*id, nudged), Ok(false));
        assert_eq!(bvh.parent(*id), parent);
        assert!(!bvh.is_moved(*id));
    }
    assert!(bvh.take_moved().is_empty());
}

#[test]
fn test_update_outside_margin_reinserts() {
    let mut bvh = Bvh::new();
    let a = bvh
        .insert(Aabb::from_min_max(Vec3::ZERO, Vec3::ONE), 1)
        .unwrap();
    bvh.insert(Aabb::from_min_max(Vec3::splat(5.0), Vec3::splat(6.0)), 2)
        .unwrap();
    bvh.take_moved();

    let far = Aabb::from_min_max(Vec3::splat(20.0), Vec3::splat(21.0));
    assert_eq!(bvh.update(a, far), Ok(true));
    assert!(bvh.is_moved(a));
    assert_eq!(bvh.user(a), Some(1));

    let around_far = Aabb::from_min_max(Vec3::splat(19.0), Vec3::splat(22.0));
    let found: Vec<u64> = bvh.overlaps(&around_far).map(|(_, user)| user).collect();
    assert_eq!(found, vec![1]);
    bvh.validate().unwrap();
}

#[test]
fn test_raycast_hits_unit_cube_analytically() {
    let settings = BvhSettings {
        aabb_margin: 0.0,
        ..BvhSettings::default()
    };
    let mut bvh = Bvh::with_settings(settings).unwrap();
    let cube = bvh
        .insert(
            Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(0.5)),
            7,
        )
        .unwrap();

    let ray = Ray::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::X);
    let result = bvh.raycast(&ray, 100.0, false);

    assert_eq!(result.len(), 1);
    let hit = result.hits[0];
    assert_eq!(hit.id, cube);
    assert_eq!(hit.user, 7);
    assert_relative_eq!(hit.distance, 9.5, epsilon = 1e-5);
    assert_relative_eq!(hit.position.x, -0.5, epsilon = 1e-5);
    assert_relative_eq!(hit.position.y, 0.0);

    // Out of range.
    assert!(bvh.raycast(&ray, 9.0, false).is_empty());
}

#[test]
fn test_raycast_with_default_margin_hits_padded_box() {
    let mut bvh = Bvh::new();
    bvh.insert(
        Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(0.5)),
        7,
    )
    .unwrap();

    let ray = Ray::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::X);
    let result = bvh.raycast(&ray, 100.0, false);
    assert_relative_eq!(result.nearest().unwrap().distance, 9.3, epsilon = 1e-4);
}

#[test]
fn test_raycast_matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(99);
    let (bvh, entries) = populate(&mut rng, 300);

    for _ in 0..40 {
        let origin = Vec3::new(
            rng.gen_range(-80.0..80.0),
            rng.gen_range(-80.0..80.0),
            rng.gen_range(-80.0..80.0),
        );
        let direction = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let ray = Ray::new(origin, direction);
        let max_distance = rng.gen_range(10.0..200.0);

        let mut expected: Vec<(NodeId, f32)> = entries
            .iter()
            .filter_map(|(id, _)| {
                let fat = bvh.fat_aabb(*id).unwrap();
                fat.intersect_ray(&ray, max_distance)
                    .map(|(t_min, _)| (*id, t_min))
            })
            .collect();
        expected.sort_by_key(|(id, _)| *id);

        let mut result = bvh.raycast(&ray, max_distance, false);
        let mut actual: Vec<(NodeId, f32)> =
            result.hits.iter().map(|h| (h.id, h.distance)).collect();
        actual.sort_by_key(|(id, _)| *id);

        assert_eq!(actual.len(), expected.len());
        for ((a_id, a_dist), (e_id, e_dist)) in actual.iter().zip(&expected) {
            assert_eq!(a_id, e_id);
            assert_relative_eq!(*a_dist, *e_dist);
        }

        result.sort_by_distance();
        if let Some(nearest) = result.nearest() {
            assert_eq!(nearest.distance, result.hits[0].distance);
        }
    }
}

#[test]
fn test_two_box_scenario() {
    let mut bvh = Bvh::new();
    let first = bvh
        .insert(Aabb::from_min_max(Vec3::ZERO, Vec3::ONE), 1)
        .unwrap();
    bvh.insert(Aabb::from_min_max(Vec3::splat(5.0), Vec3::splat(6.0)), 2)
        .unwrap();

    let mut hits = Vec::new();
    let near = Aabb::from_min_max(Vec3::splat(-1.0), Vec3::splat(2.0));
    assert_eq!(
        bvh.query_overlaps(&near, |user, id| {
            hits.push((user, id));
            true
        }),
        1
    );
    assert_eq!(hits, vec![(1, first)]);

    let all = Aabb::from_min_max(Vec3::splat(-100.0), Vec3::splat(100.0));
    assert_eq!(bvh.query_overlaps(&all, |_, _| true), 2);
}

#[test]
fn test_grid_remove_every_other() {
    let mut bvh = Bvh::new();
    let mut cells = Vec::new();
    for x in 0..10 {
        for y in 0..10 {
            for z in 0..10 {
                let center = Vec3::new(x as f32 * 3.0, y as f32 * 3.0, z as f32 * 3.0);
                let tight = Aabb::from_center_half_extents(center, Vec3::splat(0.5));
                let user = (x * 100 + y * 10 + z) as u64;
                cells.push((bvh.insert(tight, user).unwrap(), tight, user));
            }
        }
    }
    assert_eq!(bvh.leaf_count(), 1000);

    let mut kept = Vec::new();
    for (i, cell) in cells.into_iter().enumerate() {
        if i % 2 == 0 {
            bvh.remove(cell.0).unwrap();
        } else {
            kept.push(cell);
        }
    }
    assert_eq!(bvh.leaf_count(), 500);
    assert_eq!(bvh.len(), 999);
    bvh.validate().unwrap();

    for (id, tight, user) in kept {
        let found: Vec<(NodeId, u64)> = bvh.overlaps(&tight).collect();
        assert_eq!(found, vec![(id, user)]);
    }
}

#[test]
fn test_rebalance_keeps_tree_valid() {
    let mut rng = StdRng::seed_from_u64(8);
    let (mut bvh, entries) = populate(&mut rng, 200);
    for (id, _) in entries.iter().take(50) {
        bvh.update(*id, random_box(&mut rng)).unwrap();
    }
    bvh.rebalance(16);
    bvh.validate().unwrap();
    bvh.rebalance(u32::MAX);
    bvh.validate().unwrap();
    assert_eq!(bvh.leaf_count(), 200);
}
