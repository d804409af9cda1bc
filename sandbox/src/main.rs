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

// Arbor Sandbox
// Builds a scene of boxes, moves them for a few frames and prints what the
// tree reports along the way.

use std::path::Path;

use anyhow::{bail, Context, Result};
use arbor_core::math::{Aabb, Ray, Vec3};
use arbor_core::spatial::{BroadPhase, Bvh, BvhBroadPhase, BvhSettings};
use serde::Deserialize;

/// Scene description loaded from the optional JSON file given on the command line.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct Scene {
    settings: BvhSettings,
    boxes: Vec<Aabb>,
    rebalance_iterations: u32,
    frames: u32,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            settings: BvhSettings::default(),
            boxes: grid_boxes(8, 2.5),
            rebalance_iterations: 32,
            frames: 10,
        }
    }
}

fn grid_boxes(cells: u32, spacing: f32) -> Vec<Aabb> {
    let mut boxes = Vec::with_capacity((cells * cells * cells) as usize);
    for x in 0..cells {
        for y in 0..cells {
            for z in 0..cells {
                let center = Vec3::new(x as f32, y as f32, z as f32) * spacing;
                boxes.push(Aabb::from_center_half_extents(center, Vec3::splat(1.0)));
            }
        }
    }
    boxes
}

fn load_scene(path: &Path) -> Result<Scene> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scene file {}", path.display()))?;
    let scene: Scene = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse scene file {}", path.display()))?;
    if let Some(bad) = scene.boxes.iter().position(|aabb| !aabb.is_valid()) {
        bail!("box #{bad} in {} has min > max", path.display());
    }
    Ok(scene)
}

/// Offset applied to box `key` on `frame`; a slow wobble around the start position.
fn wobble(key: u64, frame: u32) -> Vec3 {
    let phase = key as f32 * 0.37 + frame as f32 * 0.5;
    Vec3::new(phase.sin(), (phase * 0.7).cos(), (phase * 1.3).sin()) * 0.6
}

fn run(scene: &Scene) -> Result<()> {
    let mut world =
        BvhBroadPhase::with_settings(scene.settings).context("invalid BVH settings")?;
    for (key, aabb) in scene.boxes.iter().enumerate() {
        world
            .upsert(key as u64, *aabb)
            .with_context(|| format!("failed to insert box #{key}"))?;
    }
    log::info!(
        "Inserted {} boxes, {} initial pairs.",
        world.len(),
        world.pairs().len()
    );

    for frame in 1..=scene.frames {
        for (key, aabb) in scene.boxes.iter().enumerate() {
            let offset = wobble(key as u64, frame);
            let moved = Aabb::from_min_max(aabb.min + offset, aabb.max + offset);
            world
                .upsert(key as u64, moved)
                .with_context(|| format!("failed to move box #{key} on frame {frame}"))?;
        }
        world.rebalance(scene.rebalance_iterations);

        let stats = world.tree().stats();
        log::info!(
            "Frame {frame}: {} pairs, height {}, imbalance {}, area ratio {:.2}",
            world.pairs().len(),
            stats.height,
            stats.max_imbalance,
            stats.area_ratio
        );
    }

    let tree = world.tree();
    tree.validate().context("tree failed validation")?;
    report_queries(tree);
    Ok(())
}

fn report_queries(tree: &Bvh) {
    let Some(root) = tree.node(tree.root()) else {
        log::info!("Scene is empty, nothing to query.");
        return;
    };
    let bounds = root.aabb;

    let probe = Aabb::from_center_half_extents(bounds.center(), bounds.half_extents() * 0.25);
    let inside = tree.query_overlaps(&probe, |_, _| true);
    log::info!("{inside} boxes overlap the central probe.");

    let mut tree_pairs = 0u32;
    tree.query_pairs(|_, _| tree_pairs += 1);
    log::info!("Self-overlap traversal found {tree_pairs} pairs.");

    let origin = bounds.min - Vec3::splat(5.0);
    let ray = Ray::new(origin, bounds.center() - origin);
    let reach = (bounds.max - origin).length();
    let mut result = tree.raycast(&ray, reach, false);
    result.sort_by_distance();
    match result.nearest() {
        Some(hit) => log::info!(
            "Diagonal ray crossed {} boxes, nearest is payload {} at distance {:.3}.",
            result.len(),
            hit.user,
            hit.distance
        ),
        None => log::info!("Diagonal ray missed every box."),
    }

    let stats = tree.stats();
    log::info!(
        "Final tree: {} leaves, {} nodes, {} slots allocated.",
        stats.leaf_count,
        stats.node_count,
        stats.capacity
    );
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let scene = match std::env::args().nth(1) {
        Some(path) => load_scene(Path::new(&path))?,
        None => {
            log::info!("No scene file given, using the built-in grid.");
            Scene::default()
        }
    };

    run(&scene)
}
