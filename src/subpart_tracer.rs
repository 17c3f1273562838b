//! The ray-subpart tracer: walks the uniform subpartition grid
//! along a proposed displacement, producing an ordered list of
//! subpartitions for wall testing and an unordered halo of subpartitions
//! for molecule testing.

use crate::geometry::EPS;
use crate::partition::SubpartGrid;
use itertools::Itertools;
use nalgebra::Vector3;
use smallvec::SmallVec;
use std::collections::HashSet;

/// Result of walking the subpart grid along one displacement.
pub struct TraceResult {
    /// Subpartitions the open segment pierces, including the start, in
    /// crossing order. Used for wall collision testing.
    pub ordered_subparts: SmallVec<[u32; 8]>,
    /// Union of all subparts visited plus their interaction-radius halo.
    /// Used for molecule collision testing (order does not matter).
    pub halo_subparts: HashSet<u32>,
    /// Subpartition index containing `pos + d`, or `None` if it left the domain.
    pub destination: Option<u32>,
}

/// Walks from `pos` (in subpart `i0`) along displacement `d`, with
/// interaction radius `r`, through `grid`.
///
/// Ties between axes are broken x -> y -> z. An axis
/// whose displacement component has `|d_k| < EPS` is treated as never
/// crossing.
pub fn trace(grid: &SubpartGrid, pos: Vector3<f64>, i0: [i64; 3], d: Vector3<f64>, r: f64) -> TraceResult {
    let mut ordered = SmallVec::<[u32; 8]>::new();
    let mut halo = HashSet::new();

    let mut cell = i0;
    if let Some(idx) = grid.index_of_cell(cell) {
        ordered.push(idx);
    }
    add_halo(grid, &mut halo, pos, cell, r);

    let sign = [
        axis_sign(d.x),
        axis_sign(d.y),
        axis_sign(d.z),
    ];

    let mut current_pos = pos;
    // Remaining axis-aligned distance to travel before `pos + d` is reached.
    let mut traveled = 0.0f64;

    loop {
        // Parametric distance to the next plane crossing along each axis.
        let mut t = [f64::INFINITY; 3];
        for axis in 0..3 {
            if sign[axis] != 0 && d[axis].abs() >= EPS {
                let next_plane = grid.next_plane(cell, axis, sign[axis]);
                let denom = d[axis];
                let candidate = (next_plane - current_pos[axis]) / denom;
                if candidate.is_finite() && candidate >= 0.0 {
                    t[axis] = candidate;
                }
            }
        }

        let min_t = t[0].min(t[1]).min(t[2]);
        if !min_t.is_finite() || traveled + min_t > 1.0 + EPS {
            break;
        }

        // Tie-break x -> y -> z.
        let axis = if (t[0] - min_t).abs() < EPS {
            0
        } else if (t[1] - min_t).abs() < EPS {
            1
        } else {
            2
        };

        current_pos += d * min_t.min(1.0 - traveled);
        traveled += min_t;
        cell[axis] += sign[axis] as i64;

        match grid.index_of_cell(cell) {
            Some(idx) => {
                ordered.push(idx);
                add_halo(grid, &mut halo, current_pos, cell, r);
            }
            None => break, // left the domain: clean miss, stop walking
        }

        if traveled >= 1.0 - EPS {
            break;
        }
    }

    let destination_point = pos + d;
    let destination_cell = grid.cell_of_point(destination_point);
    let destination = grid.index_of_cell(destination_cell);
    if let Some(idx) = destination {
        add_halo(grid, &mut halo, destination_point, destination_cell, r);
        if !ordered.contains(&idx) {
            ordered.push(idx);
        }
    }

    TraceResult {
        ordered_subparts: ordered,
        halo_subparts: halo,
        destination,
    }
}

fn axis_sign(v: f64) -> i8 {
    if v > EPS {
        1
    } else if v < -EPS {
        -1
    } else {
        0
    }
}

/// Inserts the halo around `point` (currently in `cell`) into `halo`:
/// face-adjacent neighbors within `r*sqrt(2)` of a cell boundary, plus
/// edge/corner-adjacent neighbors whose axis flags were all triggered.
/// The sqrt(2) inflation compensates for the fact that an axis-only
/// margin underestimates Euclidean distance near corners.
fn add_halo(grid: &SubpartGrid, halo: &mut HashSet<u32>, point: Vector3<f64>, cell: [i64; 3], r: f64) {
    if let Some(idx) = grid.index_of_cell(cell) {
        halo.insert(idx);
    }

    let margin = r * std::f64::consts::SQRT_2;
    let mut low_flag = [false; 3];
    let mut high_flag = [false; 3];

    for axis in 0..3 {
        let (lo, hi) = grid.cell_bounds(cell, axis);
        if point[axis] - lo <= margin {
            low_flag[axis] = true;
        }
        if hi - point[axis] <= margin {
            high_flag[axis] = true;
        }
    }

    // Single-axis face neighbors.
    for axis in 0..3 {
        if low_flag[axis] {
            insert_offset(grid, halo, cell, axis_offset(axis, -1));
        }
        if high_flag[axis] {
            insert_offset(grid, halo, cell, axis_offset(axis, 1));
        }
    }

    // Edge-adjacent (two axes triggered) and corner-adjacent (three axes
    // triggered) neighbors.
    let deltas: [i64; 3] = [
        signed_delta(low_flag[0], high_flag[0]),
        signed_delta(low_flag[1], high_flag[1]),
        signed_delta(low_flag[2], high_flag[2]),
    ];
    let active_axes: Vec<usize> = (0..3).filter(|&a| deltas[a] != 0).collect();
    if active_axes.len() >= 2 {
        for count in 2..=active_axes.len() {
            for combo in active_axes.iter().copied().combinations(count) {
                let mut offset = [0i64; 3];
                for axis in combo {
                    offset[axis] = deltas[axis];
                }
                insert_offset(grid, halo, cell, offset);
            }
        }
    }
}

fn signed_delta(low: bool, high: bool) -> i64 {
    if low && !high {
        -1
    } else if high && !low {
        1
    } else {
        0
    }
}

fn axis_offset(axis: usize, sign: i64) -> [i64; 3] {
    let mut o = [0i64; 3];
    o[axis] = sign;
    o
}

fn insert_offset(grid: &SubpartGrid, halo: &mut HashSet<u32>, cell: [i64; 3], offset: [i64; 3]) {
    let neighbor = [cell[0] + offset[0], cell[1] + offset[1], cell[2] + offset[2]];
    if let Some(idx) = grid.index_of_cell(neighbor) {
        halo.insert(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::SubpartGrid;

    #[test]
    fn straight_line_within_one_subpart_has_single_ordered_entry() {
        let grid = SubpartGrid::new(1.0, 4);
        let pos = Vector3::new(0.1, 0.1, 0.1);
        let cell = grid.cell_of_point(pos);
        let d = Vector3::new(0.01, 0.0, 0.0);
        let result = trace(&grid, pos, cell, d, 0.0);
        assert_eq!(result.ordered_subparts.len(), 1);
    }

    #[test]
    fn crossing_subpart_boundary_adds_second_entry() {
        let grid = SubpartGrid::new(1.0, 4); // subpart edge = 0.25
        let pos = Vector3::new(0.24, 0.1, 0.1);
        let cell = grid.cell_of_point(pos);
        let d = Vector3::new(0.1, 0.0, 0.0);
        let result = trace(&grid, pos, cell, d, 0.0);
        assert!(result.ordered_subparts.len() >= 2);
    }

    #[test]
    fn leaving_domain_is_a_clean_miss() {
        let grid = SubpartGrid::new(1.0, 4);
        let pos = Vector3::new(0.99, 0.5, 0.5);
        let cell = grid.cell_of_point(pos);
        let d = Vector3::new(0.1, 0.0, 0.0);
        let result = trace(&grid, pos, cell, d, 0.0);
        assert!(result.destination.is_none());
    }
}
