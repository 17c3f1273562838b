//! Molecule storage. Ids are assigned monotonically and
//! never reused; a molecule that is consumed by a reaction or otherwise
//! removed is tombstoned (`defunct = true`) rather than erased from the
//! table, so outstanding indices stay valid.

use crate::mesh::{EdgeSlot, WallIndex};
use nalgebra::{Vector2, Vector3};

/// Stable molecule identifier. Never reused within one partition's lifetime.
pub type MoleculeId = u64;

/// Where a molecule sits: in the volume, or anchored to a wall's surface tile.
#[derive(Clone, Copy, Debug)]
pub enum MoleculePlace {
    Volume { position: Vector3<f64> },
    Surface {
        wall: WallIndex,
        tile: u32,
        uv: Vector2<f64>,
        /// Orientation of the surface molecule relative to the wall
        /// normal, `+1` or `-1`.
        orientation: i8,
    },
}

/// A single particle: species, place, subpartition, and scheduling state.
#[derive(Clone, Debug)]
pub struct Molecule {
    pub id: MoleculeId,
    pub species: u32,
    pub subpart_index: u32,
    pub place: MoleculePlace,
    /// Absolute simulation time of this molecule's next unimolecular
    /// event, or `+inf` if it has no unimolecular reaction or has not
    /// yet had its clock sampled (`ACT_NEWBIE`).
    pub unimol_rx_time: f64,
    /// `true` once `unimol_rx_time` has been sampled from the exponential
    /// distribution; `false` is the `ACT_NEWBIE` state.
    pub unimol_clock_set: bool,
    /// Tombstone flag: once set, this record is never touched again and
    /// its id is never reassigned.
    pub defunct: bool,
    /// Last wall this molecule reflected off of, excluded from
    /// self-collision on the immediately following diffusion test
    /// (avoids re-detecting the same reflective hit at `t=0`).
    pub last_reflected_wall: Option<WallIndex>,
    /// Last edge a surface molecule crossed, for the equivalent exclusion
    /// on surface diffusion.
    pub last_crossed_edge: Option<(WallIndex, EdgeSlot)>,
}

impl Molecule {
    pub fn new_volume(id: MoleculeId, species: u32, subpart_index: u32, position: Vector3<f64>) -> Self {
        Self {
            id,
            species,
            subpart_index,
            place: MoleculePlace::Volume { position },
            unimol_rx_time: f64::INFINITY,
            unimol_clock_set: false,
            defunct: false,
            last_reflected_wall: None,
            last_crossed_edge: None,
        }
    }

    pub fn new_surface(
        id: MoleculeId,
        species: u32,
        subpart_index: u32,
        wall: WallIndex,
        tile: u32,
        uv: Vector2<f64>,
        orientation: i8,
    ) -> Self {
        Self {
            id,
            species,
            subpart_index,
            place: MoleculePlace::Surface { wall, tile, uv, orientation },
            unimol_rx_time: f64::INFINITY,
            unimol_clock_set: false,
            defunct: false,
            last_reflected_wall: None,
            last_crossed_edge: None,
        }
    }

    pub fn position_hint(&self) -> Option<Vector3<f64>> {
        match self.place {
            MoleculePlace::Volume { position } => Some(position),
            MoleculePlace::Surface { .. } => None,
        }
    }

    pub fn is_volume(&self) -> bool {
        matches!(self.place, MoleculePlace::Volume { .. })
    }

    pub fn is_surface(&self) -> bool {
        matches!(self.place, MoleculePlace::Surface { .. })
    }
}

/// Allocates monotonically increasing, never-reused molecule ids.
#[derive(Default)]
pub struct MoleculeIdAllocator {
    next: MoleculeId,
}

impl MoleculeIdAllocator {
    pub fn alloc(&mut self) -> MoleculeId {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_never_repeat() {
        let mut alloc = MoleculeIdAllocator::default();
        let ids: Vec<_> = (0..100).map(|_| alloc.alloc()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn newbie_molecule_has_no_clock_yet() {
        let m = Molecule::new_volume(0, 0, 0, Vector3::zeros());
        assert!(!m.unimol_clock_set);
        assert_eq!(m.unimol_rx_time, f64::INFINITY);
    }
}
