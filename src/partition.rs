//! The [`Partition`]: a cubic simulation box subdivided into uniform
//! subpartitions, owning the vertex/wall/molecule tables and the
//! per-subpart membership sets used by the diffuse-and-react kernel.

use crate::config::SimulationConfig;
use crate::diffusion::{diffuse_step, DiffuseOutcome};
use crate::error::{Result, SimulationError};
use crate::mesh::{Region, Vertex, Wall, WallIndex};
use crate::molecule::{Molecule, MoleculeId, MoleculeIdAllocator, MoleculePlace};
use crate::observe::{ReactionEvent, ReactionEventKind, ReactionObserver, Snapshot, SnapshotObserver, StepStats};
use crate::reaction::{RxnClass, Species};
use crate::reaction_exec::fire_unimolecular;
use crate::rng::KernelRng;
use crate::scheduler::{Action, Calendar, InEventQueue};
use crate::surface::surface_diffuse_step;
use crate::workspace::StepWorkspace;
use crate::{new_map, MapType};
use log::info;
use nalgebra::Vector3;
use smallvec::SmallVec;

/// Pure coordinate math for the uniform subpartition grid: maps world
/// points to integer cell coordinates and back. The box is centered at
/// the origin, spanning `[-edge/2, edge/2]` on every axis.
#[derive(Clone, Copy, Debug)]
pub struct SubpartGrid {
    pub edge_length: f64,
    pub n: u32,
}

impl SubpartGrid {
    pub fn new(edge_length: f64, n: u32) -> Self {
        Self { edge_length, n }
    }

    pub fn subpart_edge_length(&self) -> f64 {
        self.edge_length / self.n as f64
    }

    fn low_corner(&self) -> f64 {
        -self.edge_length / 2.0
    }

    /// Integer cell coordinates (not necessarily in-bounds) of a world point.
    pub fn cell_of_point(&self, p: Vector3<f64>) -> [i64; 3] {
        let edge = self.subpart_edge_length();
        let low = self.low_corner();
        [
            ((p.x - low) / edge).floor() as i64,
            ((p.y - low) / edge).floor() as i64,
            ((p.z - low) / edge).floor() as i64,
        ]
    }

    /// Flat subpart index of a cell, or `None` if the cell is out of domain.
    pub fn index_of_cell(&self, cell: [i64; 3]) -> Option<u32> {
        let n = self.n as i64;
        if cell.iter().any(|&c| c < 0 || c >= n) {
            return None;
        }
        Some((cell[2] * n * n + cell[1] * n + cell[0]) as u32)
    }

    /// Inverse of [`Self::index_of_cell`].
    pub fn cell_of_index(&self, index: u32) -> [i64; 3] {
        let n = self.n as i64;
        let index = index as i64;
        [index % n, (index / n) % n, index / (n * n)]
    }

    /// World-space bounds of `cell` along `axis`.
    pub fn cell_bounds(&self, cell: [i64; 3], axis: usize) -> (f64, f64) {
        let edge = self.subpart_edge_length();
        let low = self.low_corner() + cell[axis] as f64 * edge;
        (low, low + edge)
    }

    /// World coordinate of the next subpart-boundary plane along `axis`
    /// in the direction `sign` (+1 or -1).
    pub fn next_plane(&self, cell: [i64; 3], axis: usize, sign: i8) -> f64 {
        let (lo, hi) = self.cell_bounds(cell, axis);
        if sign >= 0 {
            hi
        } else {
            lo
        }
    }

    /// Axis-aligned bounding box of a cell.
    pub fn cell_aabb(&self, cell: [i64; 3]) -> (Vector3<f64>, Vector3<f64>) {
        let (x0, x1) = self.cell_bounds(cell, 0);
        let (y0, y1) = self.cell_bounds(cell, 1);
        let (z0, z1) = self.cell_bounds(cell, 2);
        (Vector3::new(x0, y0, z0), Vector3::new(x1, y1, z1))
    }
}

/// The full simulation state owned by one partition: geometry, molecules,
/// reaction catalogue, and the shared RNG. Safe to replicate
/// one-instance-per-partition with no shared mutable state other than
/// read-only catalogues.
pub struct Partition {
    pub grid: SubpartGrid,
    pub config: SimulationConfig,

    pub vertices: Vec<Vertex>,
    pub walls: Vec<Wall>,
    pub regions: Vec<Region>,

    pub species: Vec<Species>,
    pub unimolecular: MapType<u32, RxnClass>,
    pub bimolecular: MapType<(u32, u32), RxnClass>,

    pub molecules: Vec<Molecule>,
    id_alloc: MoleculeIdAllocator,

    /// Walls registered in each subpart, indexed by flat subpart index.
    wall_subparts: Vec<SmallVec<[WallIndex; 8]>>,
    /// Ids of non-defunct molecules of each species present in each
    /// subpart, indexed by `(subpart_index, species_id)`.
    reactant_subparts: MapType<(u32, u32), SmallVec<[MoleculeId; 4]>>,

    pub rng: KernelRng,
}

impl Partition {
    pub fn new(config: SimulationConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let grid = SubpartGrid::new(config.partition_edge_length, config.num_subpartitions_per_partition);
        let total_subparts = (grid.n as usize).pow(3);
        info!(
            "Creating partition: edge={}, subparts_per_axis={}, subpart_edge={}",
            config.partition_edge_length,
            grid.n,
            grid.subpart_edge_length()
        );
        Ok(Self {
            grid,
            config,
            vertices: Vec::new(),
            walls: Vec::new(),
            regions: Vec::new(),
            species: Vec::new(),
            unimolecular: new_map(),
            bimolecular: new_map(),
            molecules: Vec::new(),
            id_alloc: MoleculeIdAllocator::default(),
            wall_subparts: vec![SmallVec::new(); total_subparts],
            reactant_subparts: new_map(),
            rng: KernelRng::new(seed),
        })
    }

    pub fn add_vertex(&mut self, position: Vector3<f64>) -> u32 {
        let idx = self.vertices.len() as u32;
        self.vertices.push(Vertex::new(position));
        idx
    }

    /// Registers a wall's AABB into every subpart it (conservatively)
    /// overlaps. The AABB is inflated by `eps + max(|llf|,|urb|)*eps +
    /// rx_radius_3d` when `use_expanded_list` is set.
    pub fn register_wall(&mut self, wall: WallIndex) {
        const EPS: f64 = 1e-9;
        let w = &self.walls[wall as usize];
        let v0 = self.vertices[w.vertices[0] as usize].position;
        let v1 = self.vertices[w.vertices[1] as usize].position;
        let v2 = self.vertices[w.vertices[2] as usize].position;

        let mut lo = v0.inf(&v1).inf(&v2);
        let mut hi = v0.sup(&v1).sup(&v2);

        let margin = if self.config.use_expanded_list {
            let scale = lo.abs_max().max(hi.abs_max());
            EPS + scale * EPS + self.config.rx_radius_3d
        } else {
            EPS
        };
        lo -= Vector3::new(margin, margin, margin);
        hi += Vector3::new(margin, margin, margin);

        let cell_lo = self.grid.cell_of_point(lo);
        let cell_hi = self.grid.cell_of_point(hi);

        for z in cell_lo[2].max(0)..=cell_hi[2].min(self.grid.n as i64 - 1) {
            for y in cell_lo[1].max(0)..=cell_hi[1].min(self.grid.n as i64 - 1) {
                for x in cell_lo[0].max(0)..=cell_hi[0].min(self.grid.n as i64 - 1) {
                    if let Some(idx) = self.grid.index_of_cell([x, y, z]) {
                        self.wall_subparts[idx as usize].push(wall);
                    }
                }
            }
        }

        for &v in &w.vertices {
            self.vertices[v as usize].walls.push(wall);
        }
    }

    pub fn walls_in_subpart(&self, i: u32) -> &[WallIndex] {
        &self.wall_subparts[i as usize]
    }

    pub fn reactants_in_subpart(&self, i: u32, species: u32) -> &[MoleculeId] {
        self.reactant_subparts
            .get(&(i, species))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn reactant_set_mut(&mut self, i: u32, species: u32) -> &mut SmallVec<[MoleculeId; 4]> {
        self.reactant_subparts.entry((i, species)).or_insert_with(SmallVec::new)
    }

    /// Adds a freshly created molecule to the partition, computing its
    /// subpart index and registering it in the reactant sets.
    pub fn add_molecule(&mut self, species: u32, place: MoleculePlace) -> Result<MoleculeId> {
        let id = self.id_alloc.alloc();
        let subpart = match place {
            MoleculePlace::Volume { position } => self.subpart_index_checked(position)?,
            MoleculePlace::Surface { wall, .. } => self.wall_home_subpart(wall),
        };
        let molecule = match place {
            MoleculePlace::Volume { position } => Molecule::new_volume(id, species, subpart, position),
            MoleculePlace::Surface { wall, tile, uv, orientation } => {
                Molecule::new_surface(id, species, subpart, wall, tile, uv, orientation)
            }
        };
        debug_assert_eq!(self.molecules.len() as u64, id);
        self.molecules.push(molecule);
        self.reactant_set_mut(subpart, species).push(id);
        Ok(id)
    }

    /// A representative subpart for a surface molecule: the subpart
    /// containing the wall's centroid. Surface molecules are still
    /// registered as reactants of a subpart so volume molecules can find
    /// them, even though their true position is 2D.
    pub(crate) fn wall_home_subpart(&self, wall: WallIndex) -> u32 {
        let w = &self.walls[wall as usize];
        let centroid = (self.vertices[w.vertices[0] as usize].position
            + self.vertices[w.vertices[1] as usize].position
            + self.vertices[w.vertices[2] as usize].position)
            / 3.0;
        let cell = self.grid.cell_of_point(centroid);
        self.grid.index_of_cell(cell).unwrap_or(0)
    }

    pub fn subpart_index_checked(&self, pos: Vector3<f64>) -> Result<u32> {
        let cell = self.grid.cell_of_point(pos);
        self.grid
            .index_of_cell(cell)
            .ok_or(SimulationError::RuntimeOutOfDomain(0))
    }

    pub fn subpart_3d(&self, i: u32) -> [i64; 3] {
        self.grid.cell_of_index(i)
    }

    /// Moves `molecule` from its current subpart's reactant set into
    /// `new_i`'s.
    pub fn change_molecule_subpart(&mut self, molecule: MoleculeId, new_i: u32) {
        let (old_i, species) = {
            let m = &self.molecules[molecule as usize];
            (m.subpart_index, m.species)
        };
        if old_i == new_i {
            return;
        }
        if let Some(set) = self.reactant_subparts.get_mut(&(old_i, species)) {
            if let Some(pos) = set.iter().position(|&id| id == molecule) {
                set.swap_remove(pos);
            }
        }
        self.reactant_set_mut(new_i, species).push(molecule);
        self.molecules[molecule as usize].subpart_index = new_i;
    }

    /// Tombstones a molecule: removes it from its reactant set and sets
    /// `defunct`. Its id is never reassigned (`MoleculeIdAllocator` keeps
    /// monotonically advancing).
    pub fn defunct_molecule(&mut self, molecule: MoleculeId) {
        let (subpart, species) = {
            let m = &self.molecules[molecule as usize];
            (m.subpart_index, m.species)
        };
        if let Some(set) = self.reactant_subparts.get_mut(&(subpart, species)) {
            if let Some(pos) = set.iter().position(|&id| id == molecule) {
                set.swap_remove(pos);
            }
        }
        self.molecules[molecule as usize].defunct = true;
    }

    pub fn molecule(&self, id: MoleculeId) -> &Molecule {
        &self.molecules[id as usize]
    }

    pub fn molecule_mut(&mut self, id: MoleculeId) -> &mut Molecule {
        &mut self.molecules[id as usize]
    }

    /// World-space position of any molecule, volume or surface, for
    /// reporting purposes (the snapshot/reaction-event position field).
    pub fn molecule_world_position(&self, id: MoleculeId) -> Vector3<f64> {
        match self.molecule(id).place {
            MoleculePlace::Volume { position } => position,
            MoleculePlace::Surface { wall, uv, .. } => {
                let v0 = self.vertices[self.walls[wall as usize].vertices[0] as usize].position;
                self.walls[wall as usize].uv_to_xyz(uv, v0)
            }
        }
    }

    /// Pops the next scheduled action from `calendar` and processes it:
    /// a `Diffuse` action runs the appropriate volume or surface
    /// diffusion step and reschedules the molecule if it survived; an
    /// `Unimolecular` action fires the reaction unless it has since been
    /// superseded by an intervening diffuse step or reaction. Fired
    /// reactions are reported to `observer`; their products are staged
    /// on an in-event FIFO queue and only then scheduled into
    /// `calendar`, so two reactions fired within this same call land in
    /// `calendar` in the order they fired rather than being reordered by
    /// time. Returns `false` once `calendar` is exhausted.
    pub fn run_next_event<O: ReactionObserver>(&mut self, calendar: &mut Calendar, stats: &mut StepStats, observer: &mut O) -> Result<bool> {
        let action = match calendar.pop_next() {
            Some(a) => a,
            None => return Ok(false),
        };

        let mut in_event = InEventQueue::default();

        match action {
            Action::Diffuse { molecule, time } => {
                if self.molecule(molecule).defunct {
                    return Ok(true);
                }
                let species_id = self.molecule(molecule).species;
                let tau = self.species[species_id as usize].time_step;
                let mut events = Vec::new();
                let outcome = if self.molecule(molecule).is_surface() {
                    surface_diffuse_step(self, calendar, molecule, time, tau, stats, &mut events)?
                } else {
                    diffuse_step(self, calendar, molecule, time, tau, stats, &mut events)?
                };
                for event in &events {
                    for &product in &event.product_ids {
                        in_event.push(Action::Diffuse { molecule: product, time: event.time });
                    }
                    observer.observe_reaction(event);
                }
                if outcome == DiffuseOutcome::Survived {
                    in_event.push(Action::Diffuse { molecule, time: time + tau });
                }
            }
            Action::Unimolecular { molecule, time } => {
                let m = self.molecule(molecule);
                if m.defunct || (m.unimol_rx_time - time).abs() > 1e-9 {
                    // Superseded: either the molecule already reacted away,
                    // or a diffuse step re-sampled its clock to a later time.
                    return Ok(true);
                }
                let species_id = m.species;
                if let Some(rxn) = self.unimolecular.get(&species_id).cloned() {
                    if let Some(products) = fire_unimolecular(self, &rxn, molecule, time)? {
                        for &product in &products {
                            in_event.push(Action::Diffuse { molecule: product, time });
                        }
                        stats.reactions_fired += 1;
                        observer.observe_reaction(&ReactionEvent {
                            time,
                            event_kind: ReactionEventKind::Unimolecular,
                            reactant_ids: vec![molecule],
                            product_ids: products,
                            position: self.molecule_world_position(molecule),
                        });
                    }
                }
            }
        }

        while let Some(queued) = in_event.pop() {
            calendar.insert(queued);
        }

        Ok(true)
    }

    /// Emits one [`Snapshot`] per live (non-defunct) molecule to
    /// `observer`, reusing `workspace`'s scratch buffer across calls.
    pub fn collect_snapshot<O: SnapshotObserver>(&self, workspace: &mut StepWorkspace, iteration: u64, observer: &mut O) {
        workspace.clear();
        for m in &self.molecules {
            if !m.defunct {
                workspace.live_molecules.push(m.id);
            }
        }
        for &id in &workspace.live_molecules {
            observer.observe_snapshot(&Snapshot {
                iteration,
                molecule_id: id,
                species_id: self.molecule(id).species,
                position: self.molecule_world_position(id),
            });
        }
    }
}

trait AbsMax3 {
    fn abs_max(&self) -> f64;
}

impl AbsMax3 for Vector3<f64> {
    fn abs_max(&self) -> f64 {
        self.x.abs().max(self.y.abs()).max(self.z.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::WallEdge;
    use crate::geometry::EdgeTransform2d;

    fn test_config() -> SimulationConfig {
        SimulationConfig {
            partition_edge_length: 1.0,
            num_subpartitions_per_partition: 4,
            rx_radius_3d: 1e-3,
            use_expanded_list: true,
            vacancy_search_dist2: 1e-2,
            randomize_smol_pos: false,
            base_time_step: 1e-6,
            max_wall_reflections: 10,
            max_redo_retries: 8,
        }
    }

    #[test]
    fn subpart_roundtrips_through_index() {
        let grid = SubpartGrid::new(1.0, 4);
        let cell = [1i64, 2, 3];
        let idx = grid.index_of_cell(cell).unwrap();
        assert_eq!(grid.cell_of_index(idx), cell);
    }

    #[test]
    fn volume_molecule_subpart_matches_position() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let pos = Vector3::new(0.1, -0.2, 0.05);
        let id = p.add_molecule(0, MoleculePlace::Volume { position: pos }).unwrap();
        let expected = p.subpart_index_checked(pos).unwrap();
        assert_eq!(p.molecule(id).subpart_index, expected);
    }

    #[test]
    fn registered_wall_appears_in_overlapping_subparts() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let v0 = p.add_vertex(Vector3::new(-0.05, -0.05, 0.0));
        let v1 = p.add_vertex(Vector3::new(0.05, -0.05, 0.0));
        let v2 = p.add_vertex(Vector3::new(-0.05, 0.05, 0.0));
        let geom = Wall::from_vertices(
            p.vertices[v0 as usize].position,
            p.vertices[v1 as usize].position,
            p.vertices[v2 as usize].position,
        )
        .unwrap();
        let edge = WallEdge {
            neighbor: None,
            neighbor_edge: 0,
            transform: EdgeTransform2d { cos_theta: 1.0, sin_theta: 0.0, translate: nalgebra::Vector2::zeros() },
            is_forward: true,
        };
        let wall = Wall {
            vertices: [v0, v1, v2],
            normal: geom.normal,
            distance: geom.distance,
            unit_u: geom.unit_u,
            unit_v: geom.unit_v,
            uv_vert1_u: geom.uv_vert1_u,
            uv_vert2: geom.uv_vert2,
            edges: [edge, edge, edge],
            grid: None,
            regions: SmallVec::new(),
        };
        let wall_idx = p.walls.len() as u32;
        p.walls.push(wall);
        p.register_wall(wall_idx);

        let centroid = Vector3::new(-0.05 + 0.1 / 3.0, -0.05 + 0.1 / 3.0, 0.0);
        let cell = p.grid.cell_of_point(centroid);
        let idx = p.grid.index_of_cell(cell).unwrap();
        assert!(p.walls_in_subpart(idx).contains(&wall_idx));
    }

    #[test]
    fn change_molecule_subpart_moves_reactant_membership() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let pos = Vector3::new(0.0, 0.0, 0.0);
        let id = p.add_molecule(0, MoleculePlace::Volume { position: pos }).unwrap();
        let old_subpart = p.molecule(id).subpart_index;
        let new_subpart = if old_subpart == 0 { 1 } else { 0 };
        p.change_molecule_subpart(id, new_subpart);
        assert_eq!(p.molecule(id).subpart_index, new_subpart);
        assert!(!p.reactants_in_subpart(old_subpart, 0).contains(&id));
        assert!(p.reactants_in_subpart(new_subpart, 0).contains(&id));
    }

    #[test]
    fn defunct_molecule_is_removed_from_reactant_set() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let pos = Vector3::new(0.0, 0.0, 0.0);
        let id = p.add_molecule(0, MoleculePlace::Volume { position: pos }).unwrap();
        let subpart = p.molecule(id).subpart_index;
        p.defunct_molecule(id);
        assert!(p.molecule(id).defunct);
        assert!(!p.reactants_in_subpart(subpart, 0).contains(&id));
    }
}
