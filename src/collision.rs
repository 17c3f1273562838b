//! Collision detectors: volume-volume interaction-disk tests,
//! ray-triangle wall tests with edge/corner disambiguation, and the
//! optional moving-wall extension.

use crate::geometry::{self, EdgeCrossing, EPS_C};
use crate::mesh::Wall;
use crate::rng::KernelRng;
use nalgebra::Vector3;

/// Outcome of a single collision test, used instead of a class hierarchy
/// per the "Polymorphism" design note: collision outcomes are a small
/// tagged variant, not virtual dispatch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CollisionOutcome {
    Miss,
    /// Hit from the front face (`n.d < 0`, i.e. the mover approaches
    /// along the outward normal) at fractional time `tau` and the
    /// local-frame hit point `(b, c)`.
    Front { tau: f64, local: nalgebra::Vector2<f64> },
    /// Hit from the back face.
    Back { tau: f64, local: nalgebra::Vector2<f64> },
    /// Geometry is ambiguous under the current displacement; the caller
    /// must perturb `d` (via [`geometry::jump_away_line`]) and restart
    /// wall iteration for this ray.
    Redo { perturbation: Vector3<f64> },
}

/// Volume-volume disk test: does mover `m_pos` moving by `d` pass within
/// `sigma` of stationary target `t_pos`?
///
/// Returns `Some((tau, point))` if it does, where `tau` in `[0, 1]` is
/// the fractional collision time along `d`.
pub fn mol_mol_disk_test(m_pos: Vector3<f64>, d: Vector3<f64>, t_pos: Vector3<f64>, sigma: f64) -> Option<(f64, Vector3<f64>)> {
    let r = t_pos - m_pos;
    let d2 = d.dot(&d);
    if d2 <= 0.0 {
        return None;
    }
    let rd = r.dot(&d);
    if rd < 0.0 || rd > d2 {
        return None; // target not ahead, or beyond this step
    }
    let r2 = r.dot(&r);
    if d2 * r2 - rd * rd > d2 * sigma * sigma {
        return None; // passes farther than sigma from the path
    }
    let tau = rd / d2;
    Some((tau, m_pos + tau * d))
}

/// Ray-triangle wall test. `pos`/`d` are the
/// mover's world-space start and displacement; `wall` supplies the plane
/// and local frame, anchored at `v0` (`wall`'s first vertex position, the
/// origin of its uv frame). `update_move` controls whether a coplanar
/// grazing hit perturbs `d` and asks for a retry, or is reported as a
/// plain miss (non-update callers, e.g. region-inside tests, must not
/// allow REDO).
pub fn wall_ray_test(pos: Vector3<f64>, d: Vector3<f64>, wall: &Wall, v0: Vector3<f64>, update_move: bool, rng: &mut KernelRng) -> CollisionOutcome {
    const EPS_D: f64 = 1e-9;

    let n = wall.normal;
    let dp = n.dot(&pos);
    let dv = n.dot(&d);
    let dd = dp - wall.distance;

    let end_dd = dd + dv;
    if dd.abs() > EPS_D && end_dd.abs() > EPS_D && same_sign(dd, end_dd) {
        return CollisionOutcome::Miss;
    }

    if dd.abs() <= EPS_D && dv.abs() <= EPS_D {
        // Coplanar: the whole segment lies in the wall's plane.
        if update_move {
            let max_pd = pos.abs_max().max(d.abs_max()) + 1.0;
            let magnitude = EPS_C * max_pd;
            let perturbation = if rng.one_bit() {
                -n * magnitude
            } else {
                d * (1.0 - magnitude / d.norm().max(EPS_C))
            };
            return CollisionOutcome::Redo { perturbation };
        } else {
            return CollisionOutcome::Miss;
        }
    }

    if dv.abs() < EPS_C {
        return CollisionOutcome::Miss;
    }

    let a = -dd / dv;
    if !(0.0..=1.0).contains(&a) {
        return CollisionOutcome::Miss;
    }

    let hit = pos + a * d;
    let local = wall.xyz_to_uv(hit, v0);
    let tri = wall.uv_triangle();

    let d1 = geometry::cross2d(tri[1] - tri[0], local - tri[0]);
    let d2 = geometry::cross2d(tri[2] - tri[1], local - tri[1]);
    let d3 = geometry::cross2d(tri[0] - tri[2], local - tri[2]);

    let ties = [d1, d2, d3].iter().filter(|v| v.abs() < EPS_C).count();
    if ties >= 2 {
        // Corner tie: ambiguous, perturb against whichever edge is closest.
        let edge_idx = [d1, d2, d3]
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.abs().partial_cmp(&b.abs()).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        return redo_against_edge(wall, v0, pos, d, edge_idx, rng);
    }

    let inside = !(d1 < 0.0 || d2 < 0.0 || d3 < 0.0) || !(d1 > 0.0 || d2 > 0.0 || d3 > 0.0);
    if !inside {
        return CollisionOutcome::Miss;
    }

    if ties == 1 {
        let edge_idx = [d1, d2, d3]
            .iter()
            .position(|v| v.abs() < EPS_C)
            .unwrap();
        return redo_against_edge(wall, v0, pos, d, edge_idx, rng);
    }

    let tau = a;
    if dv < 0.0 {
        CollisionOutcome::Front { tau, local }
    } else {
        CollisionOutcome::Back { tau, local }
    }
}

fn redo_against_edge(wall: &Wall, v0: Vector3<f64>, pos: Vector3<f64>, d: Vector3<f64>, edge_idx: usize, rng: &mut KernelRng) -> CollisionOutcome {
    let tri = wall.uv_triangle();
    let a2 = tri[edge_idx];
    let b2 = tri[(edge_idx + 1) % 3];
    let a3 = wall.uv_to_xyz(a2, v0);
    let b3 = wall.uv_to_xyz(b2, v0);
    let perturbation = geometry::jump_away_line(pos, d, 1.0, a3, b3, wall.normal, rng);
    CollisionOutcome::Redo { perturbation }
}

fn same_sign(a: f64, b: f64) -> bool {
    (a >= 0.0) == (b >= 0.0)
}

/// Newton-iterated moving-wall vs. segment test, included only for
/// interface completeness since geometry is static in the core.
///
/// `edge_from`/`edge_to` are the two endpoints of the moving edge at
/// `t=0` and `t=1`; `seg_e`/`seg_f` are the molecule's traced segment.
/// Returns the parametric time `t` at which the edge and segment become
/// coplanar, if any, found by Newton iteration to `|t - t_prev| < EPS`.
pub fn moving_wall_vs_segment(
    edge_from: (Vector3<f64>, Vector3<f64>),
    edge_to: (Vector3<f64>, Vector3<f64>),
    seg_e: Vector3<f64>,
    seg_f: Vector3<f64>,
) -> Option<f64> {
    const EPS: f64 = 1e-10;
    const MAX_ITERS: usize = 32;

    let o = |t: f64| -> Vector3<f64> {
        edge_from.0 + (edge_to.0 - edge_from.0) * t
    };
    let p = |t: f64| -> Vector3<f64> { edge_from.1 + (edge_to.1 - edge_from.1) * t };

    let f = |t: f64| -> f64 {
        (seg_e - seg_f).cross(&(o(t) - seg_f)).dot(&(p(t) - seg_e))
    };

    let mut t = 0.5;
    let mut t_prev;
    let h = 1e-6;
    for _ in 0..MAX_ITERS {
        let f_t = f(t);
        let df = (f(t + h) - f(t - h)) / (2.0 * h);
        if df.abs() < EPS && f_t.abs() > EPS {
            return None; // df=0 & f!=0: no crossing
        }
        if df.abs() < EPS {
            break;
        }
        t_prev = t;
        t -= f_t / df;
        if !(0.0..=1.0).contains(&t) {
            return None;
        }
        if (t - t_prev).abs() < EPS {
            return Some(t);
        }
    }
    Some(t)
}

trait AbsMax {
    fn abs_max(&self) -> f64;
}

impl AbsMax for Vector3<f64> {
    fn abs_max(&self) -> f64 {
        self.x.abs().max(self.y.abs()).max(self.z.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_test_detects_head_on_approach() {
        let m = Vector3::new(0.0, 0.0, 0.0);
        let d = Vector3::new(1.0, 0.0, 0.0);
        let t = Vector3::new(0.5, 0.0, 0.0);
        let result = mol_mol_disk_test(m, d, t, 0.1);
        assert!(result.is_some());
        let (tau, point) = result.unwrap();
        assert!((tau - 0.5).abs() < 1e-12);
        assert!((point - t).norm() < 1e-12);
    }

    #[test]
    fn disk_test_misses_when_target_behind() {
        let m = Vector3::new(0.0, 0.0, 0.0);
        let d = Vector3::new(1.0, 0.0, 0.0);
        let t = Vector3::new(-0.5, 0.0, 0.0);
        assert!(mol_mol_disk_test(m, d, t, 0.1).is_none());
    }

    #[test]
    fn disk_test_misses_when_too_far_off_axis() {
        let m = Vector3::new(0.0, 0.0, 0.0);
        let d = Vector3::new(1.0, 0.0, 0.0);
        let t = Vector3::new(0.5, 10.0, 0.0);
        assert!(mol_mol_disk_test(m, d, t, 0.1).is_none());
    }

    fn flat_wall() -> Wall {
        use crate::geometry::EdgeTransform2d;
        use crate::mesh::WallEdge;
        use smallvec::SmallVec;

        let v0 = Vector3::new(-1.0, -1.0, 0.5);
        let v1 = Vector3::new(1.0, -1.0, 0.5);
        let v2 = Vector3::new(-1.0, 1.0, 0.5);
        let geom = Wall::from_vertices(v0, v1, v2).unwrap();
        let edge = WallEdge {
            neighbor: None,
            neighbor_edge: 0,
            transform: EdgeTransform2d { cos_theta: 1.0, sin_theta: 0.0, translate: nalgebra::Vector2::zeros() },
            is_forward: true,
        };
        Wall {
            vertices: [0, 1, 2],
            normal: geom.normal,
            distance: geom.distance,
            unit_u: geom.unit_u,
            unit_v: geom.unit_v,
            uv_vert1_u: geom.uv_vert1_u,
            uv_vert2: geom.uv_vert2,
            edges: [edge, edge, edge],
            grid: None,
            regions: SmallVec::new(),
        }
    }

    #[test]
    fn ray_triangle_detects_straight_crossing() {
        let wall = flat_wall();
        let v0 = Vector3::new(-1.0, -1.0, 0.5);
        let mut rng = KernelRng::new(1);
        let pos = Vector3::new(-0.2, -0.2, 0.4);
        let d = Vector3::new(0.0, 0.0, 0.2);
        let outcome = wall_ray_test(pos, d, &wall, v0, true, &mut rng);
        assert!(matches!(outcome, CollisionOutcome::Front { .. } | CollisionOutcome::Back { .. }));
    }

    #[test]
    fn ray_triangle_misses_when_same_side() {
        let wall = flat_wall();
        let v0 = Vector3::new(-1.0, -1.0, 0.5);
        let mut rng = KernelRng::new(1);
        let pos = Vector3::new(-0.2, -0.2, 0.1);
        let d = Vector3::new(0.0, 0.0, 0.2);
        let outcome = wall_ray_test(pos, d, &wall, v0, true, &mut rng);
        assert_eq!(outcome, CollisionOutcome::Miss);
    }
}
