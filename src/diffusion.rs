//! Volume diffusion step: samples a displacement for one volume
//! molecule, walks the subpartition grid to collect wall and
//! molecule-molecule collision candidates, resolves them in time order,
//! and either reacts the molecule away or moves it to its new position.

use crate::collision::{mol_mol_disk_test, wall_ray_test, CollisionOutcome};
use crate::error::{Result, SimulationError};
use crate::geometry::EPS;
use crate::mesh::WallIndex;
use crate::molecule::{MoleculeId, MoleculePlace};
use crate::observe::{ReactionEvent, ReactionEventKind};
use crate::partition::Partition;
use crate::reaction::{test_bimolecular, GateOutcome, RxnClass, RxnType};
use crate::reaction_exec::apply_bimolecular_outcome;
use crate::scheduler::{Action, Calendar};
use crate::subpart_tracer::trace;
use nalgebra::Vector3;
use std::collections::HashSet;

/// Result of one call to [`diffuse_step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffuseOutcome {
    /// The molecule moved (or reflected in place) and still exists.
    Survived,
    /// The molecule reacted away; its id is now defunct.
    Reacted,
}

struct WallHit {
    wall: WallIndex,
}

struct MolHit {
    other: MoleculeId,
}

enum Candidate {
    Wall(WallHit),
    Mol(MolHit),
}

/// Runs one diffusion step for `molecule`, covering at most `tau_left`
/// seconds from `event_time`. On first touch, schedules the
/// molecule's unimolecular reaction into `calendar`.
pub fn diffuse_step(
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

    // Steps 1-2: ACT_NEWBIE unimolecular clock, then clip the window to
    // land on its firing time if that comes sooner.
    let unimol_time = ensure_unimol_clock(partition, calendar, molecule, event_time);
    let window = tau_left.min((unimol_time - event_time).max(0.0));

    let (mut pos, mut exclude_wall) = match partition.molecule(molecule).place {
        MoleculePlace::Volume { position } => (position, partition.molecule(molecule).last_reflected_wall),
        MoleculePlace::Surface { .. } => return Ok(DiffuseOutcome::Survived), // handled by surface.rs
    };

    // Step 3: sample the displacement.
    let species = partition.species[species_id as usize].clone();
    let steps = (window / species.time_step.max(EPS)).clamp(EPS, 1.0);
    let mut d = partition.rng.displacement_3d(steps, species.space_step);

    let mut reflections = 0u32;

    loop {
        let i0 = partition.grid.cell_of_point(pos);
        let walk = trace(&partition.grid, pos, i0, d, partition.config.rx_radius_3d);

        let wall_hits = collect_wall_hits(partition, pos, &mut d, &walk.ordered_subparts, exclude_wall, stats);
        let mol_hits = collect_mol_hits(partition, molecule, species_id, pos, d, &walk.halo_subparts);

        let mut merged: Vec<(f64, usize, Candidate)> = Vec::with_capacity(wall_hits.len() + mol_hits.len());
        for (order, (tau, hit)) in wall_hits.into_iter().enumerate() {
            merged.push((tau, order, Candidate::Wall(hit)));
        }
        let offset = merged.len();
        for (order, (tau, hit)) in mol_hits.into_iter().enumerate() {
            merged.push((tau, offset + order, Candidate::Mol(hit)));
        }
        merged.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));

        let mut reflect_to: Option<(Vector3<f64>, Vector3<f64>, WallIndex)> = None;

        for (tau, _, candidate) in &merged {
            let tau = *tau;
            if tau < EPS {
                continue;
            }
            match candidate {
                Candidate::Mol(hit) => {
                    let other = hit.other;
                    let other_species = partition.molecule(other).species;
                    let rxn = partition.bimolecular.get(&(species_id, other_species)).cloned();
                    if let Some(rxn) = rxn {
                        let u = partition.rng.uniform_open01();
                        let outcome = test_bimolecular(&rxn, 1.0, 1.0, u);
                        if let GateOutcome::Pathway(_) = outcome {
                            let point = pos + tau * d;
                            let products = apply_bimolecular_outcome(partition, &rxn, outcome, molecule, other, point)?.unwrap_or_default();
                            stats.reactions_fired += 1;
                            events.push(ReactionEvent {
                                time: event_time + tau * window,
                                event_kind: ReactionEventKind::Bimolecular,
                                reactant_ids: vec![molecule, other],
                                product_ids: products,
                                position: point,
                            });
                            return Ok(DiffuseOutcome::Reacted);
                        }
                    }
                }
                Candidate::Wall(hit) => {
                    let surface_class = wall_surface_class(partition, hit.wall);
                    let rxn = surface_class.and_then(|sc| partition.bimolecular.get(&(species_id, sc)).cloned());
                    match rxn {
                        Some(rxn) if rxn.rxn_type == RxnType::Transparent => continue,
                        Some(rxn) if rxn.rxn_type == RxnType::Reflect => {
                            let n = partition.walls[hit.wall as usize].normal;
                            let hit_point = pos + tau * d;
                            let reflected = (d - 2.0 * d.dot(&n) * n) * (1.0 - tau);
                            reflect_to = Some((hit_point, reflected, hit.wall));
                            break;
                        }
                        Some(rxn) => {
                            let u = partition.rng.uniform_open01();
                            let outcome = test_bimolecular(&rxn, 1.0, 1.0, u);
                            match outcome {
                                GateOutcome::Pathway(idx) => {
                                    let point = pos + tau * d;
                                    let products = if rxn.rxn_type == RxnType::AbsorbRegionBorder {
                                        partition.defunct_molecule(molecule);
                                        Vec::new()
                                    } else {
                                        apply_wall_pathway(partition, &rxn, idx, molecule, point)?
                                    };
                                    stats.reactions_fired += 1;
                                    events.push(ReactionEvent {
                                        time: event_time + tau * window,
                                        event_kind: ReactionEventKind::Bimolecular,
                                        reactant_ids: vec![molecule],
                                        product_ids: products,
                                        position: point,
                                    });
                                    return Ok(DiffuseOutcome::Reacted);
                                }
                                GateOutcome::NoReaction => {
                                    let n = partition.walls[hit.wall as usize].normal;
                                    let hit_point = pos + tau * d;
                                    let reflected = (d - 2.0 * d.dot(&n) * n) * (1.0 - tau);
                                    reflect_to = Some((hit_point, reflected, hit.wall));
                                    break;
                                }
                            }
                        }
                        None => {
                            let n = partition.walls[hit.wall as usize].normal;
                            let hit_point = pos + tau * d;
                            let reflected = (d - 2.0 * d.dot(&n) * n) * (1.0 - tau);
                            reflect_to = Some((hit_point, reflected, hit.wall));
                            break;
                        }
                    }
                }
            }
        }

        match reflect_to {
            Some((new_pos, new_d, wall)) => {
                reflections += 1;
                stats.wall_reflections += 1;
                exclude_wall = Some(wall);
                if reflections > partition.config.max_wall_reflections {
                    pos = new_pos;
                    break;
                }
                pos = new_pos;
                d = new_d;
                continue;
            }
            None => {
                pos += d;
                break;
            }
        }
    }

    let new_subpart = partition
        .subpart_index_checked(pos)
        .map_err(|_| SimulationError::RuntimeOutOfDomain(molecule))?;
    partition.molecule_mut(molecule).place = MoleculePlace::Volume { position: pos };
    partition.molecule_mut(molecule).last_reflected_wall = exclude_wall;
    partition.change_molecule_subpart(molecule, new_subpart);
    stats.molecules_diffused += 1;
    Ok(DiffuseOutcome::Survived)
}

/// Ensures `molecule`'s unimolecular clock has been sampled
/// (`ACT_NEWBIE`), scheduling its firing time into `calendar`, and
/// returns the (possibly just-sampled) firing time. Shared by the
/// volume and surface diffusion steps, which both open with this check
/// before clipping their step window to it.
pub(crate) fn ensure_unimol_clock(partition: &mut Partition, calendar: &mut Calendar, molecule: MoleculeId, event_time: f64) -> f64 {
    if !partition.molecule(molecule).unimol_clock_set {
        let species_id = partition.molecule(molecule).species;
        let k_tot = partition
            .unimolecular
            .get(&species_id)
            .map(|rxn| rxn.effective_max_fixed_p(event_time))
            .unwrap_or(0.0);
        let lifetime = partition.rng.exponential_lifetime(k_tot);
        let unimol_time = event_time + lifetime;
        {
            let m = partition.molecule_mut(molecule);
            m.unimol_clock_set = true;
            m.unimol_rx_time = unimol_time;
        }
        if unimol_time.is_finite() {
            calendar.insert(Action::Unimolecular { molecule, time: unimol_time });
        }
    }
    partition.molecule(molecule).unimol_rx_time
}

pub(crate) fn wall_surface_class(partition: &Partition, wall: WallIndex) -> Option<u32> {
    partition.walls[wall as usize]
        .regions
        .iter()
        .filter_map(|&r| partition.regions[r as usize].surface_class)
        .next()
}

fn apply_wall_pathway(partition: &mut Partition, rxn: &RxnClass, pathway_idx: usize, molecule: MoleculeId, point: Vector3<f64>) -> Result<Vec<MoleculeId>> {
    let pathway = rxn.pathways[pathway_idx].clone();
    partition.defunct_molecule(molecule);
    let mut products = Vec::with_capacity(pathway.products.len());
    for product in &pathway.products {
        products.push(partition.add_molecule(product.species, MoleculePlace::Volume { position: point })?);
    }
    Ok(products)
}

/// Gathers wall-ray hits along `ordered_subparts`, retrying on
/// REDO up to `config.max_redo_retries` times; exhausting the budget is
/// treated as a clean miss (`AmbiguousCollision`).
fn collect_wall_hits(
    partition: &mut Partition,
    pos: Vector3<f64>,
    d: &mut Vector3<f64>,
    ordered_subparts: &[u32],
    exclude_wall: Option<WallIndex>,
    stats: &mut crate::observe::StepStats,
) -> Vec<(f64, WallHit)> {
    let max_redo = partition.config.max_redo_retries;
    for attempt in 0..=max_redo {
        let mut hits = Vec::new();
        let mut seen = HashSet::new();
        let mut redo_triggered = false;

        'subparts: for &sp in ordered_subparts {
            let walls_here: Vec<WallIndex> = partition.walls_in_subpart(sp).to_vec();
            for w in walls_here {
                if Some(w) == exclude_wall || !seen.insert(w) {
                    continue;
                }
                let v0 = partition.vertices[partition.walls[w as usize].vertices[0] as usize].position;
                match wall_ray_test(pos, *d, &partition.walls[w as usize], v0, true, &mut partition.rng) {
                    CollisionOutcome::Miss => {}
                    CollisionOutcome::Front { tau, .. } | CollisionOutcome::Back { tau, .. } => {
                        hits.push((tau, WallHit { wall: w }));
                    }
                    CollisionOutcome::Redo { perturbation } => {
                        stats.redo_count += 1;
                        *d += perturbation;
                        redo_triggered = true;
                        break 'subparts;
                    }
                }
            }
        }

        if !redo_triggered {
            return hits;
        }
        if attempt == max_redo {
            return Vec::new();
        }
    }
    Vec::new()
}

/// Gathers molecule-molecule disk-test candidates (step 5) over the
/// halo subparts, restricted to species with a registered bimolecular
/// class against `species_id`.
fn collect_mol_hits(
    partition: &Partition,
    molecule: MoleculeId,
    species_id: u32,
    pos: Vector3<f64>,
    d: Vector3<f64>,
    halo_subparts: &HashSet<u32>,
) -> Vec<(f64, MolHit)> {
    let partner_species: Vec<u32> = partition
        .bimolecular
        .keys()
        .filter(|(a, _)| *a == species_id)
        .map(|(_, b)| *b)
        .collect();
    let sigma = partition.config.rx_radius_3d;
    let mut hits = Vec::new();

    for &b in &partner_species {
        for &sp in halo_subparts {
            let candidates: Vec<MoleculeId> = partition.reactants_in_subpart(sp, b).to_vec();
            for other in candidates {
                if other == molecule {
                    continue;
                }
                let om = partition.molecule(other);
                if om.defunct {
                    continue;
                }
                if let MoleculePlace::Volume { position: t_pos } = om.place {
                    if let Some((tau, _point)) = mol_mol_disk_test(pos, d, t_pos, sigma) {
                        hits.push((tau, MolHit { other }));
                    }
                }
            }
        }
    }
    hits
}
