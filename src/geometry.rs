//! Pure geometric primitives: no partition/molecule state, no RNG state
//! consumption except where the spec explicitly calls for a perturbation
//! draw (`jump_away_line`). Everything here is deterministic given its
//! inputs.

use crate::rng::KernelRng;
use nalgebra::{Vector2, Vector3};

/// Absolute tolerance used to guard near-zero denominators throughout
/// the edge/plane intersection tests.
pub const EPS: f64 = 1e-12;
/// Tolerance used specifically by the collision detectors (ray-triangle,
/// jump-away) where the reference keeps a distinct, slightly looser
/// constant from the edge-parameterization `EPS`.
pub const EPS_C: f64 = 1e-10;

/// 2D cross product `u.x*v.y - u.y*v.x`, used by the point-in-triangle
/// sign test. Named `cross2D` in the spec to distinguish it from the 3D
/// cross product.
#[inline]
pub fn cross2d(u: Vector2<f64>, v: Vector2<f64>) -> f64 {
    u.x * v.y - u.y * v.x
}

/// Maps a wall-local 2D coordinate to world space: `a.u*unit_u + a.v*unit_v + v0`.
#[inline]
pub fn uv_to_xyz(a: Vector2<f64>, unit_u: Vector3<f64>, unit_v: Vector3<f64>, v0: Vector3<f64>) -> Vector3<f64> {
    v0 + a.x * unit_u + a.y * unit_v
}

/// Projects a world-space point onto a wall's local 2D frame.
#[inline]
pub fn xyz_to_uv(p: Vector3<f64>, unit_u: Vector3<f64>, unit_v: Vector3<f64>, v0: Vector3<f64>) -> Vector2<f64> {
    let rel = p - v0;
    Vector2::new(rel.dot(&unit_u), rel.dot(&unit_v))
}

/// Sign-agreement point-in-triangle test for a 2D triangle `(a, b, c)`.
/// Returns `true` on the boundary (the reference treats boundary points
/// as inside).
pub fn point_in_triangle_2d(p: Vector2<f64>, a: Vector2<f64>, b: Vector2<f64>, c: Vector2<f64>) -> bool {
    let d1 = cross2d(b - a, p - a);
    let d2 = cross2d(c - b, p - b);
    let d3 = cross2d(a - c, p - c);

    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;

    !(has_neg && has_pos)
}

/// Closest point on triangle `(a, b, c)` to `p`, using the exact Voronoi
/// region decomposition from Ericson, *Real-Time Collision Detection*
/// §5.1.5 (vertex regions, edge regions, face region).
pub fn closest_point_on_triangle(
    p: Vector3<f64>,
    a: Vector3<f64>,
    b: Vector3<f64>,
    c: Vector3<f64>,
) -> Vector3<f64> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a; // vertex region A
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b; // vertex region B
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + v * ab; // edge region AB
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c; // vertex region C
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + w * ac; // edge region AC
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + w * (c - b); // edge region BC
    }

    // face region: barycentric coordinates (u,v,w)
    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Outcome of [`find_edge_point`]: which edge (if any) a 2D displacement
/// crosses first, in wall-local coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeCrossing {
    /// The endpoint `loc + disp` stays inside the triangle.
    Inside,
    /// Crosses edge `0`, `1`, or `2` (vertex pairs `(0,1)`, `(1,2)`, `(2,0)`).
    Edge(u8),
    /// The test is ambiguous (a corner/edge tie); the caller must retry
    /// with a perturbed displacement via [`jump_away_line`].
    Ambiguous,
}

/// Given a starting point `loc` inside (or on the boundary of) triangle
/// `tri` and a 2D displacement `disp`, returns which edge is crossed
/// first.
///
/// For each of the three edges, solves for the fractional parameter `t`
/// at which the displacement ray crosses the edge's line, accepts the
/// smallest `t` with `0 < t < 1` that also lands within the edge's
/// `0 < s < 1` range, and guards denominators with [`EPS`].
pub fn find_edge_point(loc: Vector2<f64>, disp: Vector2<f64>, tri: [Vector2<f64>; 3]) -> EdgeCrossing {
    let endpoint = loc + disp;
    if point_in_triangle_2d(endpoint, tri[0], tri[1], tri[2]) {
        return EdgeCrossing::Inside;
    }

    let mut best: Option<(f64, u8)> = None;
    let mut ambiguous = false;

    for edge in 0..3u8 {
        let va = tri[edge as usize];
        let vb = tri[((edge + 1) % 3) as usize];
        let edge_dir = vb - va;

        // Solve loc + t*disp = va + s*edge_dir for (t, s).
        let denom = cross2d(disp, edge_dir);
        if denom.abs() < EPS {
            continue; // parallel to this edge: never the crossed edge
        }
        let rel = va - loc;
        let t = cross2d(rel, edge_dir) / denom;
        let s = cross2d(rel, disp) / denom;

        if t > 0.0 && t < 1.0 && s > 0.0 && s < 1.0 {
            match best {
                None => best = Some((t, edge)),
                Some((best_t, _)) => {
                    if (t - best_t).abs() < EPS {
                        ambiguous = true;
                    } else if t < best_t {
                        best = Some((t, edge));
                        ambiguous = false;
                    }
                }
            }
        }
    }

    if ambiguous {
        EdgeCrossing::Ambiguous
    } else {
        match best {
            Some((_, edge)) => EdgeCrossing::Edge(edge),
            // The endpoint test said "outside" but no edge crossing was
            // found within tolerance: treat as a tie at a corner.
            None => EdgeCrossing::Ambiguous,
        }
    }
}

/// A rigid 2D transform (rotation stored as `(cos, sin)` plus a
/// translation) that flattens a neighbor wall's local uv frame onto the
/// frame of the wall owning the edge.
#[derive(Clone, Copy, Debug)]
pub struct EdgeTransform2d {
    pub cos_theta: f64,
    pub sin_theta: f64,
    pub translate: Vector2<f64>,
}

impl EdgeTransform2d {
    /// Applies the forward transform: rotate then translate.
    pub fn apply(&self, p: Vector2<f64>) -> Vector2<f64> {
        let rotated = Vector2::new(
            self.cos_theta * p.x - self.sin_theta * p.y,
            self.sin_theta * p.x + self.cos_theta * p.y,
        );
        rotated + self.translate
    }

    /// Applies the exact inverse transform (subtract translation, rotate
    /// by `-theta`). Must satisfy `inverse(apply(p)) == p` to within
    /// 1e-12 relative, per the shared-edge invariant.
    pub fn inverse(&self) -> EdgeTransform2d {
        // cos(-theta) = cos(theta), sin(-theta) = -sin(theta); the
        // translation of the inverse maps the forward translation back
        // through the negated rotation.
        let inv_rotate = |p: Vector2<f64>| {
            Vector2::new(
                self.cos_theta * p.x + self.sin_theta * p.y,
                -self.sin_theta * p.x + self.cos_theta * p.y,
            )
        };
        let inv_translate = -inv_rotate(self.translate);
        EdgeTransform2d {
            cos_theta: self.cos_theta,
            sin_theta: -self.sin_theta,
            translate: inv_translate,
        }
    }

    pub fn apply_inverse(&self, p: Vector2<f64>) -> Vector2<f64> {
        self.inverse().apply(p)
    }
}

/// Perturbs an ambiguous displacement by a tiny vector so that a retried
/// collision test is no longer a tie.
///
/// `p` is the point the ray currently starts from, `k` a magnitude
/// scale, `a`/`b` the endpoints of the offending edge, and `n` the wall
/// normal. Returns the perturbation vector to add to the displacement;
/// the sign is chosen by one random bit so repeated ambiguous hits on
/// the same geometry do not cycle.
pub fn jump_away_line(
    p: Vector3<f64>,
    v: Vector3<f64>,
    k: f64,
    a: Vector3<f64>,
    b: Vector3<f64>,
    n: Vector3<f64>,
    rng: &mut KernelRng,
) -> Vector3<f64> {
    let ab = b - a;
    let ab_len = ab.norm();
    let f = if ab_len > EPS_C {
        n.cross(&(ab / ab_len))
    } else {
        Vector3::zeros()
    };

    let max_f = f.max().max(EPS_C);
    let max_p = p.max();
    let max_v = v.max();
    let magnitude = EPS_C * (max_p + max_v + 1.0) / (k.max(EPS_C) * max_f);

    let sign = if rng.one_bit() { 1.0 } else { -1.0 };
    f * (sign * magnitude / f.norm().max(EPS_C))
}

/// Small helper so `jump_away_line` can write `vec.abs_max()` without
/// pulling in a dependency purely for "largest absolute component".
trait MaxComponent {
    fn max(&self) -> f64;
}

impl MaxComponent for Vector3<f64> {
    fn max(&self) -> f64 {
        self.x.abs().max(self.y.abs()).max(self.z.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn point_in_triangle_accepts_boundary() {
        let a = Vector2::new(0.0, 0.0);
        let b = Vector2::new(1.0, 0.0);
        let c = Vector2::new(0.0, 1.0);
        assert!(point_in_triangle_2d(Vector2::new(0.5, 0.0), a, b, c));
        assert!(point_in_triangle_2d(Vector2::new(0.25, 0.25), a, b, c));
        assert!(!point_in_triangle_2d(Vector2::new(1.0, 1.0), a, b, c));
    }

    #[test]
    fn closest_point_on_triangle_face_region() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(1.0, 0.0, 0.0);
        let c = Vector3::new(0.0, 1.0, 0.0);
        let p = Vector3::new(0.25, 0.25, 1.0);
        let closest = closest_point_on_triangle(p, a, b, c);
        assert!((closest - Vector3::new(0.25, 0.25, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn closest_point_on_triangle_vertex_region() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(1.0, 0.0, 0.0);
        let c = Vector3::new(0.0, 1.0, 0.0);
        let p = Vector3::new(-1.0, -1.0, 0.0);
        let closest = closest_point_on_triangle(p, a, b, c);
        assert!((closest - a).norm() < 1e-12);
    }

    #[test]
    fn find_edge_point_inside() {
        let tri = [
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
        ];
        let result = find_edge_point(Vector2::new(0.1, 0.1), Vector2::new(0.05, 0.05), tri);
        assert_eq!(result, EdgeCrossing::Inside);
    }

    #[test]
    fn find_edge_point_crosses_single_edge() {
        let tri = [
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
        ];
        // Starting near the right-angle corner, moving straight down
        // crosses edge 0 (the leg from vertex 0 to vertex 1, i.e. y=0).
        let result = find_edge_point(Vector2::new(0.1, 0.1), Vector2::new(0.0, -0.5), tri);
        assert_eq!(result, EdgeCrossing::Edge(0));
    }

    #[test]
    fn edge_transform_round_trips() {
        let t = EdgeTransform2d {
            cos_theta: (0.6f64),
            sin_theta: (0.8f64),
            translate: Vector2::new(1.5, -2.25),
        };
        let p = Vector2::new(0.37, 0.91);
        let round_tripped = t.apply_inverse(t.apply(p));
        assert_relative_eq!(round_tripped.x, p.x, epsilon = 1e-10);
        assert_relative_eq!(round_tripped.y, p.y, epsilon = 1e-10);
    }
}
