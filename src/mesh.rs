//! Static mesh data: vertices, walls (triangles with a local 2D frame
//! and per-edge neighbor transforms), optional surface tile grids, and
//! named regions.
//!
//! Walls and vertices are immutable after initialization; this module
//! only exposes constructors and accessors, never in-place mutation of
//! topology.

use crate::geometry::{self, EdgeTransform2d, EPS_C};
use nalgebra::{Vector2, Vector3};
use smallvec::SmallVec;

/// Dense index into [`Partition`](crate::partition::Partition)'s vertex array.
pub type VertexIndex = u32;
/// Dense index into the wall array.
pub type WallIndex = u32;
/// Index of one of a wall's three edges, in `[0, 3)`.
pub type EdgeSlot = u8;

/// A shared mesh vertex plus the back-index of walls that use it.
#[derive(Clone, Debug)]
pub struct Vertex {
    pub position: Vector3<f64>,
    /// Walls that reference this vertex, populated by `Partition::register_wall`.
    pub walls: SmallVec<[WallIndex; 8]>,
}

impl Vertex {
    pub fn new(position: Vector3<f64>) -> Self {
        Self {
            position,
            walls: SmallVec::new(),
        }
    }
}

/// One of a wall's three edges: the adjacent wall (if any) and the
/// rigid-body transform that flattens the neighbor's local frame onto
/// this wall's frame.
#[derive(Clone, Copy, Debug)]
pub struct WallEdge {
    /// The wall sharing this edge, or `None` at a mesh boundary.
    pub neighbor: Option<WallIndex>,
    /// Which edge slot of `neighbor` this edge corresponds to.
    pub neighbor_edge: EdgeSlot,
    /// Flattens `neighbor`'s local uv frame onto this wall's frame.
    pub transform: EdgeTransform2d,
    /// `true` if this wall is the "forward" owner of the transform
    /// (crossing from this wall to the neighbor applies `transform`
    /// directly; crossing the other way applies its inverse).
    pub is_forward: bool,
}

/// A triangle of the static mesh, with a precomputed plane and a local
/// 2D frame.
#[derive(Clone, Debug)]
pub struct Wall {
    /// The three vertex indices, in winding order.
    pub vertices: [VertexIndex; 3],
    /// Unit plane normal.
    pub normal: Vector3<f64>,
    /// Signed distance of the plane from the origin (`normal . p = distance`).
    pub distance: f64,
    /// Unit vector along the local u axis (from vertex 0 towards vertex 1).
    pub unit_u: Vector3<f64>,
    /// Unit vector along the local v axis, orthogonal to `unit_u` in the
    /// triangle's plane.
    pub unit_v: Vector3<f64>,
    /// u-coordinate of vertex 1 in the local frame (vertex 1 sits at `(uv_vert1_u, 0)`).
    pub uv_vert1_u: f64,
    /// uv-coordinates of vertex 2 in the local frame.
    pub uv_vert2: Vector2<f64>,
    /// Per-edge neighbor/transform data, indexed by [`EdgeSlot`].
    pub edges: [WallEdge; 3],
    /// Optional tile grid for surface molecule occupancy.
    pub grid: Option<Grid>,
    /// Region memberships (indices into [`crate::partition::Partition::regions`]).
    pub regions: SmallVec<[u32; 4]>,
}

impl Wall {
    /// Builds a wall from three world-space vertex positions, computing
    /// the plane and local frame. Returns an error description if the
    /// triangle is degenerate (near-zero area).
    pub fn from_vertices(v0: Vector3<f64>, v1: Vector3<f64>, v2: Vector3<f64>) -> Result<WallGeometry, String> {
        let e1 = v1 - v0;
        let e2 = v2 - v0;
        let raw_normal = e1.cross(&e2);
        let area2 = raw_normal.norm();
        if area2 < EPS_C {
            return Err("degenerate triangle (near-zero area)".to_string());
        }
        let normal = raw_normal / area2;
        let distance = normal.dot(&v0);

        let unit_u = e1.normalize();
        // unit_v completes a right-handed orthonormal frame in the
        // triangle's plane.
        let unit_v = normal.cross(&unit_u).normalize();

        let uv_vert1_u = e1.norm();
        let uv_vert2 = geometry::xyz_to_uv(v2, unit_u, unit_v, v0);

        Ok(WallGeometry {
            normal,
            distance,
            unit_u,
            unit_v,
            uv_vert1_u,
            uv_vert2,
        })
    }

    /// Vertex positions of this wall's local frame triangle, in uv space:
    /// `(0,0)`, `(uv_vert1_u, 0)`, `uv_vert2`.
    pub fn uv_triangle(&self) -> [Vector2<f64>; 3] {
        [Vector2::new(0.0, 0.0), Vector2::new(self.uv_vert1_u, 0.0), self.uv_vert2]
    }

    pub fn uv_to_xyz(&self, a: Vector2<f64>, v0: Vector3<f64>) -> Vector3<f64> {
        geometry::uv_to_xyz(a, self.unit_u, self.unit_v, v0)
    }

    pub fn xyz_to_uv(&self, p: Vector3<f64>, v0: Vector3<f64>) -> Vector2<f64> {
        geometry::xyz_to_uv(p, self.unit_u, self.unit_v, v0)
    }
}

/// Geometric quantities derived from three vertex positions, before the
/// wall is wired into the mesh (edges, grid, regions are added by the
/// caller once neighbor walls are known).
pub struct WallGeometry {
    pub normal: Vector3<f64>,
    pub distance: f64,
    pub unit_u: Vector3<f64>,
    pub unit_v: Vector3<f64>,
    pub uv_vert1_u: f64,
    pub uv_vert2: Vector2<f64>,
}

/// An N x N tile decomposition of a wall for surface-molecule occupancy.
/// Tiles are equal-area triangular strips, alternating upright/inverted
/// within each strip.
#[derive(Clone, Debug)]
pub struct Grid {
    /// Number of strips along the v axis; there are `n*n` tiles total.
    pub n: u32,
    /// uv-origin the grid is measured from (subtracted before `xyz->uv`).
    pub vert0: Vector2<f64>,
    /// Height of the triangle along v, used to compute strip width.
    pub full_height: f64,
    /// Occupant molecule id per tile, `None` if vacant.
    pub tiles: Vec<Option<u64>>,
}

impl Grid {
    pub fn new(n: u32, vert0: Vector2<f64>, full_height: f64) -> Self {
        Self {
            n,
            vert0,
            full_height,
            tiles: vec![None; (n * n) as usize],
        }
    }

    pub fn tile_count(&self) -> u32 {
        self.n * self.n
    }

    pub fn is_occupied(&self, tile: u32) -> bool {
        self.tiles[tile as usize].is_some()
    }

    pub fn occupant(&self, tile: u32) -> Option<u64> {
        self.tiles[tile as usize]
    }

    pub fn set(&mut self, tile: u32, molecule: Option<u64>) {
        self.tiles[tile as usize] = molecule;
    }

    /// Maps a uv-point (already relative to `vert0`) to a tile index:
    /// `strip = N - floor(v * inv_strip_width) - 1`,
    /// with stripe/flip bits from the within-strip position, and
    /// `index = strip^2 + 2*stripe + flip`. The three triangle vertices
    /// map to the three corner tiles as a degenerate special case.
    pub fn uv_to_tile(&self, p: Vector2<f64>) -> u32 {
        let n = self.n as f64;
        let inv_strip_width = n / self.full_height;
        let v = p.y.clamp(0.0, self.full_height);

        if v <= 0.0 {
            return 0; // degenerate: bottom-left corner vertex
        }
        if v >= self.full_height {
            return self.tile_count() - 1; // degenerate: apex vertex
        }

        let strip_f = (n - (v * inv_strip_width).floor() - 1.0).clamp(0.0, n - 1.0);
        let strip = strip_f as u32;

        let strip_bottom_v = self.full_height - (strip as f64 + 1.0) / inv_strip_width;
        let strip_top_v = self.full_height - (strip as f64) / inv_strip_width;
        let strip_height = (strip_top_v - strip_bottom_v).max(EPS_C);
        let local_v_frac = ((v - strip_bottom_v) / strip_height).clamp(0.0, 1.0);

        // Within a strip, u spans a trapezoid that narrows towards the
        // apex; normalize u against the strip's width at this v to get a
        // stripe index and a flip bit (upright vs inverted sub-triangle).
        let half_width_at_bottom = (strip as f64 + 1.0) / n;
        let half_width_at_top = strip as f64 / n;
        let width_at_v = half_width_at_bottom + (half_width_at_top - half_width_at_bottom) * local_v_frac;
        let width_at_v = width_at_v.max(EPS_C);

        let u_frac = ((p.x / width_at_v) + 1.0) / 2.0;
        let stripe = ((u_frac * (strip as f64 + 1.0)).floor() as u32).min(strip);
        let flip = if local_v_frac < 0.5 { 0u32 } else { 1u32 };

        (strip * strip + 2 * stripe + flip).min(self.tile_count() - 1)
    }

    /// Approximate inverse of [`Self::uv_to_tile`]: a representative
    /// point inside `tile`, relative to `vert0` the same way `uv_to_tile`'s
    /// input is. Used by product placement when a centroid (rather than
    /// a uniform-random point) is requested within the tile.
    pub fn tile_centroid(&self, tile: u32) -> Vector2<f64> {
        let n = self.n as f64;
        let inv_strip_width = n / self.full_height;
        let strip = ((tile as f64).sqrt().floor() as u32).min(self.n - 1);
        let remainder = tile - strip * strip;
        let stripe = (remainder / 2).min(strip);
        let flip = remainder % 2;

        let strip_bottom_v = self.full_height - (strip as f64 + 1.0) / inv_strip_width;
        let strip_top_v = self.full_height - (strip as f64) / inv_strip_width;
        let mid_v = (strip_bottom_v + strip_top_v) / 2.0;
        let v_center = if flip == 0 { (strip_bottom_v + mid_v) / 2.0 } else { (mid_v + strip_top_v) / 2.0 };

        let half_width_at_bottom = (strip as f64 + 1.0) / n;
        let half_width_at_top = strip as f64 / n;
        let local_v_frac = ((v_center - strip_bottom_v) / (strip_top_v - strip_bottom_v).max(EPS_C)).clamp(0.0, 1.0);
        let width_at_v = (half_width_at_bottom + (half_width_at_top - half_width_at_bottom) * local_v_frac).max(EPS_C);

        let u_frac_center = (stripe as f64 + 0.5) / (strip as f64 + 1.0);
        let u_center = width_at_v * (2.0 * u_frac_center - 1.0);

        Vector2::new(u_center, v_center)
    }
}

/// A named subset of walls, optionally carrying a surface-class species
/// for reactive behavior and inside/outside tests.
#[derive(Clone, Debug)]
pub struct Region {
    pub name: String,
    pub walls: SmallVec<[WallIndex; 16]>,
    /// Species id of the surface class associated with this region, if
    /// the region is reactive.
    pub surface_class: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_from_right_triangle_has_orthonormal_frame() {
        let v0 = Vector3::new(0.0, 0.0, 0.0);
        let v1 = Vector3::new(1.0, 0.0, 0.0);
        let v2 = Vector3::new(0.0, 1.0, 0.0);
        let geom = Wall::from_vertices(v0, v1, v2).unwrap();
        assert!((geom.unit_u.norm() - 1.0).abs() < 1e-12);
        assert!((geom.unit_v.norm() - 1.0).abs() < 1e-12);
        assert!(geom.unit_u.dot(&geom.unit_v).abs() < 1e-12);
        assert!((geom.uv_vert1_u - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_triangle_is_rejected() {
        let v0 = Vector3::new(0.0, 0.0, 0.0);
        let v1 = Vector3::new(1.0, 0.0, 0.0);
        let v2 = Vector3::new(2.0, 0.0, 0.0);
        assert!(Wall::from_vertices(v0, v1, v2).is_err());
    }

    #[test]
    fn grid_corner_tiles_cover_vertices() {
        let grid = Grid::new(4, Vector2::new(0.0, 0.0), 1.0);
        assert_eq!(grid.uv_to_tile(Vector2::new(0.0, 0.0)), 0);
        assert_eq!(grid.uv_to_tile(Vector2::new(0.0, 1.0)), grid.tile_count() - 1);
    }

    #[test]
    fn grid_tiles_start_unoccupied() {
        let grid = Grid::new(2, Vector2::new(0.0, 0.0), 1.0);
        for t in 0..grid.tile_count() {
            assert!(!grid.is_occupied(t));
        }
    }

    #[test]
    fn tile_centroid_maps_back_to_same_tile() {
        let grid = Grid::new(4, Vector2::new(0.0, 0.0), 1.0);
        for t in 0..grid.tile_count() {
            let centroid = grid.tile_centroid(t);
            assert_eq!(grid.uv_to_tile(centroid), t);
        }
    }
}
