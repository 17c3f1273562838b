//! Reaction executor: turns a probability-gate decision into concrete
//! mutations on the [`Partition`] (product placement and reactant
//! defuncting), shared by the volume and surface diffusion steps.

use crate::error::{Result, SimulationError};
use crate::mesh::WallIndex;
use crate::molecule::{MoleculeId, MoleculePlace};
use crate::partition::Partition;
use crate::reaction::{GateOutcome, RxnClass};
use nalgebra::{Vector2, Vector3};

/// Fires a unimolecular reaction class for `molecule`, at the rate in
/// effect at `time`. Draws one uniform from the shared RNG regardless of
/// outcome, so identical seeds reproduce runs bit-exactly. On a firing
/// pathway, defuncts `molecule`
/// and places that pathway's products; volume products appear at
/// `molecule`'s current position, surface products require `molecule` to
/// already be a surface molecule (a volume molecule cannot unimolecularly
/// yield a surface product in this kernel).
pub fn fire_unimolecular(partition: &mut Partition, rxn: &RxnClass, molecule: MoleculeId, time: f64) -> Result<Option<Vec<MoleculeId>>> {
    let u = partition.rng.uniform_open01();
    let rate = rxn.effective_max_fixed_p(time);
    let p = u * rate;
    let pathway_idx = match rxn.pick_pathway(p, 1.0) {
        Some(i) => i,
        None => return Ok(None),
    };
    let pathway = &rxn.pathways[pathway_idx];
    let pathway = pathway.clone();

    let position = match partition.molecule(molecule).place {
        MoleculePlace::Volume { position } => position,
        MoleculePlace::Surface { .. } => Vector3::zeros(), // unused for surface-anchored products below
    };
    let is_surface_parent = partition.molecule(molecule).is_surface();

    partition.defunct_molecule(molecule);

    let mut products = Vec::with_capacity(pathway.products.len());
    for product in &pathway.products {
        let id = if is_surface_parent {
            let (wall, tile, uv) = match partition.molecule(molecule).place {
                MoleculePlace::Surface { wall, tile, uv, .. } => (wall, tile, uv),
                MoleculePlace::Volume { .. } => unreachable!(),
            };
            partition.add_molecule(
                product.species,
                MoleculePlace::Surface { wall, tile, uv, orientation: product.orientation },
            )?
        } else {
            partition.add_molecule(product.species, MoleculePlace::Volume { position })?
        };
        products.push(id);
    }
    Ok(Some(products))
}

/// Applies a bimolecular gate outcome from `test_bimolecular`: on
/// [`GateOutcome::Pathway`], defuncts both reactants and places the
/// pathway's products as volume molecules at `position`; on
/// [`GateOutcome::NoReaction`], does nothing.
pub fn apply_bimolecular_outcome(
    partition: &mut Partition,
    rxn: &RxnClass,
    outcome: GateOutcome,
    a: MoleculeId,
    b: MoleculeId,
    position: Vector3<f64>,
) -> Result<Option<Vec<MoleculeId>>> {
    let pathway_idx = match outcome {
        GateOutcome::Pathway(i) => i,
        GateOutcome::NoReaction => return Ok(None),
    };
    let pathway = rxn.pathways[pathway_idx].clone();

    partition.defunct_molecule(a);
    partition.defunct_molecule(b);

    let mut products = Vec::with_capacity(pathway.products.len());
    for product in &pathway.products {
        let id = partition.add_molecule(product.species, MoleculePlace::Volume { position })?;
        products.push(id);
    }
    Ok(Some(products))
}

/// Places a surface product of species `species` near `target_uv` on
/// `wall`, searching for a vacant tile within `vacancy_search_dist2` of
/// the target. When `randomize_smol_pos` is
/// set, the product sits at a uniformly sampled point within the tile's
/// footprint approximated as a disk of `vacancy_search_dist2` radius
/// around the tile's centroid clipped to the triangle; when unset, it
/// sits at the tile centroid.
///
/// Returns [`SimulationError::TileFull`] if no vacant tile is found
/// within the search radius after a bounded number of probes.
pub fn place_surface_product(
    partition: &mut Partition,
    species: u32,
    wall: WallIndex,
    target_uv: Vector2<f64>,
    orientation: i8,
) -> Result<MoleculeId> {
    const MAX_PROBES: usize = 48;
    let vacancy_search_dist2 = partition.config.vacancy_search_dist2;
    let randomize = partition.config.randomize_smol_pos;
    let search_radius = vacancy_search_dist2.sqrt();

    if partition.walls[wall as usize].grid.is_none() {
        return Err(SimulationError::TileFull(species));
    }

    let target_tile = partition.walls[wall as usize].grid.as_ref().unwrap().uv_to_tile(target_uv);
    if !partition.walls[wall as usize].grid.as_ref().unwrap().is_occupied(target_tile) {
        let place_uv = if randomize {
            sample_near(partition, target_uv, search_radius)
        } else {
            partition.walls[wall as usize].grid.as_ref().unwrap().tile_centroid(target_tile)
        };
        return finish_surface_placement(partition, species, wall, target_tile, place_uv, orientation);
    }

    for _ in 0..MAX_PROBES {
        let candidate_uv = sample_near(partition, target_uv, search_radius);
        let grid = partition.walls[wall as usize].grid.as_ref().unwrap();
        let tile = grid.uv_to_tile(candidate_uv);
        if !grid.is_occupied(tile) {
            let place_uv = if randomize { candidate_uv } else { grid.tile_centroid(tile) };
            return finish_surface_placement(partition, species, wall, tile, place_uv, orientation);
        }
    }

    Err(SimulationError::TileFull(species))
}

fn sample_near(partition: &mut Partition, center: Vector2<f64>, radius: f64) -> Vector2<f64> {
    let offset = partition.rng.gaussian_2d_polar(radius.max(1e-12));
    center + offset
}

fn finish_surface_placement(
    partition: &mut Partition,
    species: u32,
    wall: WallIndex,
    tile: u32,
    uv: Vector2<f64>,
    orientation: i8,
) -> Result<MoleculeId> {
    let id = partition.add_molecule(species, MoleculePlace::Surface { wall, tile, uv, orientation })?;
    partition.walls[wall as usize]
        .grid
        .as_mut()
        .unwrap()
        .set(tile, Some(id));
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::reaction::{Pathway, ProductSpec, RxnType};
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

    #[test]
    fn unimolecular_firing_defuncts_parent_and_places_products() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let id = p.add_molecule(0, MoleculePlace::Volume { position: Vector3::new(0.1, 0.1, 0.1) }).unwrap();
        let rxn = RxnClass::new(
            SmallVec::from_slice(&[0]),
            RxnType::Standard,
            vec![Pathway { probability: 1.0, products: vec![ProductSpec { species: 1, orientation: 1 }] }],
        )
        .unwrap();
        let result = fire_unimolecular(&mut p, &rxn, id, 0.0).unwrap();
        assert!(result.is_some());
        assert!(p.molecule(id).defunct);
        let products = result.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(p.molecule(products[0]).species, 1);
    }

    #[test]
    fn bimolecular_no_reaction_leaves_both_reactants_alive() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let a = p.add_molecule(0, MoleculePlace::Volume { position: Vector3::zeros() }).unwrap();
        let b = p.add_molecule(1, MoleculePlace::Volume { position: Vector3::zeros() }).unwrap();
        let rxn = RxnClass::new(SmallVec::from_slice(&[0, 1]), RxnType::Standard, vec![Pathway { probability: 1.0, products: vec![] }]).unwrap();
        let result = apply_bimolecular_outcome(&mut p, &rxn, GateOutcome::NoReaction, a, b, Vector3::zeros()).unwrap();
        assert!(result.is_none());
        assert!(!p.molecule(a).defunct);
        assert!(!p.molecule(b).defunct);
    }

    #[test]
    fn bimolecular_pathway_defuncts_both_reactants() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let a = p.add_molecule(0, MoleculePlace::Volume { position: Vector3::zeros() }).unwrap();
        let b = p.add_molecule(1, MoleculePlace::Volume { position: Vector3::zeros() }).unwrap();
        let rxn = RxnClass::new(SmallVec::from_slice(&[0, 1]), RxnType::Standard, vec![Pathway { probability: 1.0, products: vec![] }]).unwrap();
        apply_bimolecular_outcome(&mut p, &rxn, GateOutcome::Pathway(0), a, b, Vector3::zeros()).unwrap();
        assert!(p.molecule(a).defunct);
        assert!(p.molecule(b).defunct);
    }
}
