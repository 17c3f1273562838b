//! Point-in-closed-surface test. External to the core diffusion loop but
//! shared by release-site placement and count queries, so it lives as a
//! free function over a `Partition`'s wall table rather than a method
//! tied to any one caller.

use crate::collision::{wall_ray_test, CollisionOutcome};
use crate::mesh::WallIndex;
use crate::partition::Partition;
use crate::rng::KernelRng;
use nalgebra::Vector3;

/// Casts an axis-parallel ray of length `partition_edge_length` from
/// `point` along `+x`, counting hits against `walls`. A point is inside
/// iff the count is odd. This is a non-update caller (region-inside
/// tests must not allow REDO): `wall_ray_test` is called with
/// `update_move = false`, and any `Redo` it still reports (an edge/corner
/// tie it cannot suppress on its own) is simply excluded from the parity
/// count rather than perturbed and retried.
pub fn is_point_inside_region(p: &Partition, point: Vector3<f64>, walls: &[WallIndex]) -> bool {
    let mut rng = KernelRng::new(0);
    let direction = Vector3::new(p.grid.edge_length, 0.0, 0.0);

    let mut count = 0u32;
    for &w in walls {
        let wall = &p.walls[w as usize];
        let v0 = p.vertices[wall.vertices[0] as usize].position;
        match wall_ray_test(point, direction, wall, v0, false, &mut rng) {
            CollisionOutcome::Front { .. } | CollisionOutcome::Back { .. } => count += 1,
            CollisionOutcome::Redo { .. } | CollisionOutcome::Miss => {}
        }
    }
    count % 2 == 1
}
