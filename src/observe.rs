//! Run-statistics and observation hooks. The kernel's boundary outputs
//! ("a stream of snapshots", "a stream of observed reactions") need a
//! plain-Rust shape it can call into without depending on any
//! particular writer or serialization format.

use crate::molecule::MoleculeId;
use nalgebra::Vector3;

/// Per-run counters, accumulated across calls to
/// `Partition::run_next_event` (or reset by the caller between
/// snapshots).
#[derive(Clone, Debug, Default)]
pub struct StepStats {
    pub molecules_diffused: u64,
    pub wall_reflections: u64,
    pub redo_count: u64,
    pub tile_full_rejections: u64,
    /// Reactions fired, keyed by reaction class index (position in
    /// `Partition::bimolecular`/`Partition::unimolecular` iteration is
    /// caller-defined; the kernel just counts by the class's reactant
    /// tuple hash via the caller-supplied key).
    pub reactions_fired: u64,
}

impl StepStats {
    pub fn merge(&mut self, other: &StepStats) {
        self.molecules_diffused += other.molecules_diffused;
        self.wall_reflections += other.wall_reflections;
        self.redo_count += other.redo_count;
        self.tile_full_rejections += other.tile_full_rejections;
        self.reactions_fired += other.reactions_fired;
    }
}

/// One observed reaction event: a `(time, event_kind,
/// reactant_ids, product_ids, position)` tuple.
#[derive(Clone, Debug)]
pub struct ReactionEvent {
    pub time: f64,
    pub event_kind: ReactionEventKind,
    pub reactant_ids: Vec<MoleculeId>,
    pub product_ids: Vec<MoleculeId>,
    pub position: Vector3<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionEventKind {
    Unimolecular,
    Bimolecular,
}

/// Called once per fired reaction. Implemented as a plain trait (rather
/// than a concrete writer) so the kernel stays free of any output format.
pub trait ReactionObserver {
    fn observe_reaction(&mut self, event: &ReactionEvent);
}

/// No-op observer, used when the caller does not want reaction events.
impl ReactionObserver for () {
    fn observe_reaction(&mut self, _event: &ReactionEvent) {}
}

/// One position snapshot: an `(iteration, molecule_id,
/// species_id, position)` tuple.
#[derive(Clone, Copy, Debug)]
pub struct Snapshot {
    pub iteration: u64,
    pub molecule_id: MoleculeId,
    pub species_id: u32,
    pub position: Vector3<f64>,
}

/// Called at a caller-chosen cadence with the current molecule table.
pub trait SnapshotObserver {
    fn observe_snapshot(&mut self, snapshot: &Snapshot);
}

impl SnapshotObserver for () {
    fn observe_snapshot(&mut self, _snapshot: &Snapshot) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_counters() {
        let mut a = StepStats {
            molecules_diffused: 3,
            wall_reflections: 1,
            redo_count: 0,
            tile_full_rejections: 0,
            reactions_fired: 2,
        };
        let b = StepStats {
            molecules_diffused: 1,
            wall_reflections: 0,
            redo_count: 4,
            tile_full_rejections: 1,
            reactions_fired: 0,
        };
        a.merge(&b);
        assert_eq!(a.molecules_diffused, 4);
        assert_eq!(a.redo_count, 4);
        assert_eq!(a.reactions_fired, 2);
    }

    #[test]
    fn unit_observers_accept_events_without_panicking() {
        let mut observer = ();
        observer.observe_reaction(&ReactionEvent {
            time: 0.0,
            event_kind: ReactionEventKind::Bimolecular,
            reactant_ids: vec![0, 1],
            product_ids: vec![],
            position: Vector3::zeros(),
        });
        observer.observe_snapshot(&Snapshot {
            iteration: 0,
            molecule_id: 0,
            species_id: 0,
            position: Vector3::zeros(),
        });
    }
}
