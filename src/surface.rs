//! Surface diffusion step: samples a 2D displacement for one
//! surface molecule within its wall's local uv frame, walks across
//! triangle edges via the mesh's shared-edge transforms when the
//! displacement would leave the current triangle, resolves any
//! region-gated edge reactions along the way, and finally commits the
//! molecule to its new tile if vacant.

use crate::diffusion::{ensure_unimol_clock, wall_surface_class};
use crate::diffusion::DiffuseOutcome;
use crate::error::Result;
use crate::geometry::{cross2d, find_edge_point, EdgeCrossing, EPS};
use crate::mesh::WallIndex;
use crate::molecule::{MoleculeId, MoleculePlace};
use crate::observe::{ReactionEvent, ReactionEventKind};
use crate::partition::Partition;
use crate::reaction::{test_bimolecular, GateOutcome, RxnType};
use crate::reaction_exec::place_surface_product;
use crate::scheduler::Calendar;
use nalgebra::Vector2;

/// Runs one surface diffusion step for `molecule`, covering at most
/// `tau_left` seconds from `event_time`. Mirrors
/// [`crate::diffusion::diffuse_step`]'s unimolecular-clock handling; a
/// molecule that is not currently a surface molecule is left untouched
/// (handled by the volume path instead).
pub fn surface_diffuse_step(
    partition: &mut Partition,
    calendar: &mut Calendar,
    molecule: MoleculeId,
    event_time: f64,
    tau_left: f64,
    stats: &mut crate::observe::StepStats,
    events: &mut Vec<ReactionEvent>,
) -> Result<DiffuseOutcome> {
    if partition.molecule(molecule).defunct {
        return Ok(DiffuseOutcome::Survived);
    }

    let species_id = partition.molecule(molecule).species;
    let unimol_time = ensure_unimol_clock(partition, calendar, molecule, event_time);
    let window = tau_left.min((unimol_time - event_time).max(0.0));

    let (orig_wall, orig_tile, orig_uv, orientation) = match partition.molecule(molecule).place {
        MoleculePlace::Surface { wall, tile, uv, orientation } => (wall, tile, uv, orientation),
        MoleculePlace::Volume { .. } => return Ok(DiffuseOutcome::Survived),
    };

    let species = partition.species[species_id as usize].clone();
    let steps = (window / species.time_step.max(EPS)).clamp(EPS, 1.0);
    let sigma = species.space_step * steps.sqrt();
    let mut disp = partition.rng.gaussian_2d_polar(sigma);

    let mut wall = orig_wall;
    let mut loc = orig_uv;
    let mut reflections = 0u32;

    'walk: loop {
        let tri = partition.walls[wall as usize].uv_triangle();
        match find_edge_point(loc, disp, tri) {
            EdgeCrossing::Inside => {
                loc += disp;
                break 'walk;
            }
            EdgeCrossing::Ambiguous => {
                // Cannot safely resolve a tie at this precision: stop
                // here, discarding the remaining displacement.
                break 'walk;
            }
            EdgeCrossing::Edge(e) => {
                let e = e as usize;
                let va = tri[e];
                let vb = tri[(e + 1) % 3];
                let edge_dir = vb - va;
                let denom = cross2d(disp, edge_dir);
                if denom.abs() < EPS {
                    break 'walk;
                }
                let rel = va - loc;
                let t = cross2d(rel, edge_dir) / denom;
                let hit = loc + disp * t;
                let remaining = disp * (1.0 - t);

                let edge_info = partition.walls[wall as usize].edges[e];
                let surface_class = wall_surface_class(partition, wall);
                let rxn = surface_class.and_then(|sc| partition.bimolecular.get(&(species_id, sc)).cloned());

                // Absent class or an explicitly transparent one: pass
                // through to the neighbor if there is one (an ordinary
                // internal mesh edge), otherwise there's nowhere to go
                // and the molecule reflects off the free edge. A
                // `Reflect` class always bounces off the edge, bypassing
                // the stochastic gate entirely.
                let is_transparent = match &rxn {
                    Some(r) => r.rxn_type == RxnType::Transparent,
                    None => true,
                };
                let is_reflect = matches!(&rxn, Some(r) if r.rxn_type == RxnType::Reflect);

                if is_reflect {
                    disp = reflect_velocity(remaining, va, vb);
                    loc = hit;
                } else if is_transparent {
                    match edge_info.neighbor {
                        Some(_) => {
                            let (new_wall, new_loc, new_disp) = traverse_edge(partition, wall, e, hit, remaining);
                            wall = new_wall;
                            loc = new_loc;
                            disp = new_disp;
                        }
                        None => {
                            disp = reflect_velocity(remaining, va, vb);
                            loc = hit;
                        }
                    }
                } else {
                    let rxn = rxn.unwrap();
                    let u = partition.rng.uniform_open01();
                    let outcome = test_bimolecular(&rxn, 1.0, 1.0, u);
                    match outcome {
                        GateOutcome::Pathway(idx) => {
                            partition.defunct_molecule(molecule);
                            let mut products = Vec::new();
                            if rxn.rxn_type != RxnType::AbsorbRegionBorder {
                                let pathway = rxn.pathways[idx].clone();
                                for product in &pathway.products {
                                    products.push(place_surface_product(partition, product.species, wall, hit, product.orientation)?);
                                }
                            }
                            stats.reactions_fired += 1;
                            let v0 = partition.vertices[partition.walls[wall as usize].vertices[0] as usize].position;
                            events.push(ReactionEvent {
                                time: event_time,
                                event_kind: ReactionEventKind::Bimolecular,
                                reactant_ids: vec![molecule],
                                product_ids: products,
                                position: partition.walls[wall as usize].uv_to_xyz(hit, v0),
                            });
                            return Ok(DiffuseOutcome::Reacted);
                        }
                        GateOutcome::NoReaction => match (rxn.rxn_type, edge_info.neighbor) {
                            (RxnType::Standard, Some(_)) => {
                                let (new_wall, new_loc, new_disp) = traverse_edge(partition, wall, e, hit, remaining);
                                wall = new_wall;
                                loc = new_loc;
                                disp = new_disp;
                            }
                            _ => {
                                disp = reflect_velocity(remaining, va, vb);
                                loc = hit;
                            }
                        },
                    }
                }

                reflections += 1;
                stats.wall_reflections += 1;
                if reflections > partition.config.max_wall_reflections {
                    break 'walk;
                }
            }
        }
    }

    let grid = match &partition.walls[wall as usize].grid {
        Some(g) => g,
        None => return Ok(DiffuseOutcome::Survived), // no tile grid on this wall: revert
    };
    let new_tile = grid.uv_to_tile(loc);

    let occupant = grid.occupant(new_tile);
    if occupant.is_some() && occupant != Some(molecule) {
        stats.tile_full_rejections += 1;
        return Ok(DiffuseOutcome::Survived); // molecule stays on its current tile this step
    }

    if wall != orig_wall || new_tile != orig_tile {
        if let Some(old_grid) = partition.walls[orig_wall as usize].grid.as_mut() {
            old_grid.set(orig_tile, None);
        }
        partition.walls[wall as usize].grid.as_mut().unwrap().set(new_tile, Some(molecule));
    }

    let new_subpart = partition.wall_home_subpart(wall);
    partition.molecule_mut(molecule).place = MoleculePlace::Surface { wall, tile: new_tile, uv: loc, orientation };
    partition.change_molecule_subpart(molecule, new_subpart);
    stats.molecules_diffused += 1;
    Ok(DiffuseOutcome::Survived)
}

/// Flattens a post-crossing point and remaining displacement from
/// `wall`'s local frame into its edge-`e` neighbor's frame, using the
/// shared-edge transform (applied directly or inverted depending on
/// which wall owns it forward).
fn traverse_edge(partition: &Partition, wall: WallIndex, e: usize, hit: Vector2<f64>, remaining: Vector2<f64>) -> (WallIndex, Vector2<f64>, Vector2<f64>) {
    let edge = partition.walls[wall as usize].edges[e];
    let neighbor = edge.neighbor.expect("caller only traverses edges with a neighbor");
    if edge.is_forward {
        let new_loc = edge.transform.apply(hit);
        let new_disp = rotate2d(remaining, edge.transform.cos_theta, edge.transform.sin_theta);
        (neighbor, new_loc, new_disp)
    } else {
        let inv = edge.transform.inverse();
        let new_loc = inv.apply(hit);
        let new_disp = rotate2d(remaining, inv.cos_theta, inv.sin_theta);
        (neighbor, new_loc, new_disp)
    }
}

/// Rotates (but does not translate) a 2D vector by the given transform,
/// for carrying a remaining-displacement direction across a shared edge.
fn rotate2d(v: Vector2<f64>, cos_theta: f64, sin_theta: f64) -> Vector2<f64> {
    Vector2::new(cos_theta * v.x - sin_theta * v.y, sin_theta * v.x + cos_theta * v.y)
}

/// Reflects a 2D velocity across the line through `a`/`b`.
fn reflect_velocity(v: Vector2<f64>, a: Vector2<f64>, b: Vector2<f64>) -> Vector2<f64> {
    let edge_dir = (b - a).normalize();
    let n = Vector2::new(-edge_dir.y, edge_dir.x);
    v - 2.0 * v.dot(&n) * n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::geometry::EdgeTransform2d;
    use crate::mesh::{Grid, Wall, WallEdge};
    use crate::observe::StepStats;
    use nalgebra::Vector3;
    use smallvec::SmallVec;

    fn test_config() -> SimulationConfig {
        SimulationConfig {
            partition_edge_length: 1.0,
            num_subpartitions_per_partition: 4,
            rx_radius_3d: 1e-3,
            use_expanded_list: false,
            vacancy_search_dist2: 1e-2,
            randomize_smol_pos: false,
            base_time_step: 1e-6,
            max_wall_reflections: 10,
            max_redo_retries: 8,
        }
    }

    fn isolated_wall(p: &mut Partition, n: u32) -> WallIndex {
        let v0 = Vector3::new(0.0, 0.0, 0.0);
        let v1 = Vector3::new(1.0, 0.0, 0.0);
        let v2 = Vector3::new(0.0, 1.0, 0.0);
        let geom = Wall::from_vertices(v0, v1, v2).unwrap();
        let no_neighbor = WallEdge {
            neighbor: None,
            neighbor_edge: 0,
            transform: EdgeTransform2d { cos_theta: 1.0, sin_theta: 0.0, translate: nalgebra::Vector2::zeros() },
            is_forward: true,
        };
        let wall = Wall {
            vertices: [0, 1, 2],
            normal: geom.normal,
            distance: geom.distance,
            unit_u: geom.unit_u,
            unit_v: geom.unit_v,
            uv_vert1_u: geom.uv_vert1_u,
            uv_vert2: geom.uv_vert2,
            edges: [no_neighbor, no_neighbor, no_neighbor],
            grid: Some(Grid::new(n, Vector2::new(0.0, 0.0), geom.uv_vert2.y)),
            regions: SmallVec::new(),
        };
        p.add_vertex(v0);
        p.add_vertex(v1);
        p.add_vertex(v2);
        let idx = p.walls.len() as u32;
        p.walls.push(wall);
        p.register_wall(idx);
        idx
    }

    #[test]
    fn surface_molecule_stays_inside_triangle_for_small_step() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let wall = isolated_wall(&mut p, 4);
        p.species.push(crate::reaction::Species::new_surface(0, "S", 1e-8, 1e-6, 1.0));
        let uv = Vector2::new(0.1, 0.1);
        let tile = p.walls[wall as usize].grid.as_ref().unwrap().uv_to_tile(uv);
        let id = p.add_molecule(0, MoleculePlace::Surface { wall, tile, uv, orientation: 1 }).unwrap();
        p.walls[wall as usize].grid.as_mut().unwrap().set(tile, Some(id));

        let mut calendar = Calendar::new(1e-6);
        let mut stats = StepStats::default();
        let mut events = Vec::new();
        let outcome = surface_diffuse_step(&mut p, &mut calendar, id, 0.0, 1e-6, &mut stats, &mut events).unwrap();
        assert_eq!(outcome, DiffuseOutcome::Survived);
        match p.molecule(id).place {
            MoleculePlace::Surface { wall: w, .. } => assert_eq!(w, wall),
            _ => panic!("expected surface molecule"),
        }
    }

    #[test]
    fn reflecting_off_a_free_edge_keeps_molecule_on_same_wall() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let wall = isolated_wall(&mut p, 4);
        p.species.push(crate::reaction::Species::new_surface(0, "S", 1e5, 1e-6, 1.0));
        let uv = Vector2::new(0.05, 0.02);
        let tile = p.walls[wall as usize].grid.as_ref().unwrap().uv_to_tile(uv);
        let id = p.add_molecule(0, MoleculePlace::Surface { wall, tile, uv, orientation: 1 }).unwrap();
        p.walls[wall as usize].grid.as_mut().unwrap().set(tile, Some(id));

        let mut calendar = Calendar::new(1e-6);
        let mut stats = StepStats::default();
        let mut events = Vec::new();
        let outcome = surface_diffuse_step(&mut p, &mut calendar, id, 0.0, 1e-6, &mut stats, &mut events).unwrap();
        assert_eq!(outcome, DiffuseOutcome::Survived);
        match p.molecule(id).place {
            MoleculePlace::Surface { wall: w, .. } => assert_eq!(w, wall),
            _ => panic!("expected surface molecule"),
        }
    }
}
