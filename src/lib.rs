//! A particle-based stochastic reaction-diffusion kernel for cellular
//! microphysiology: a [`MoleculePlace`](molecule::MoleculePlace)-typed
//! population of point particles diffuses through (or across the walls
//! of) a triangulated mesh inside a cubic [`Partition`](partition::Partition),
//! reacting unimolecularly and bimolecularly according to a probability
//! gate evaluated once per candidate collision.
//!
//! The kernel itself has no notion of file formats, model description
//! languages, or parallelism across partitions: a caller builds one
//! [`Partition`](partition::Partition) by hand (or from whatever loader
//! they write), then drives it event by event with
//! [`Partition::run_next_event`](partition::Partition::run_next_event).

pub mod collision;
pub mod config;
pub mod containment;
pub mod diffusion;
pub mod error;
pub mod geometry;
pub mod mesh;
pub mod molecule;
pub mod observe;
pub mod partition;
pub mod reaction;
pub mod reaction_exec;
pub mod rng;
pub mod scheduler;
pub mod subpart_tracer;
pub mod surface;
pub mod workspace;

/// Hasher used by every [`MapType`] in the kernel. `fxhash` trades
/// DoS-resistance for speed, appropriate here since keys are either
/// small integers or integer tuples derived from internal ids, never
/// attacker-controlled strings.
pub(crate) type HashState = fxhash::FxBuildHasher;

/// A `HashMap` keyed with [`HashState`], used throughout the kernel for
/// reactant-subpart membership and the reaction catalogue.
pub(crate) type MapType<K, V> = std::collections::HashMap<K, V, HashState>;

pub(crate) fn new_map<K, V>() -> MapType<K, V> {
    MapType::with_hasher(HashState::default())
}

#[cfg(test)]
mod tests {
    use crate::config::SimulationConfig;
    use crate::molecule::MoleculePlace;
    use crate::observe::StepStats;
    use crate::partition::Partition;
    use crate::scheduler::{Action, Calendar};
    use crate::workspace::StepWorkspace;
    use nalgebra::Vector3;

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
    fn run_next_event_drains_a_single_scheduled_diffusion() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        p.species.push(crate::reaction::Species::new_volume(0, "A", 1e-7, 1e-6, 1.0));
        let id = p.add_molecule(0, MoleculePlace::Volume { position: Vector3::zeros() }).unwrap();

        let mut calendar = Calendar::new(1e-6);
        calendar.insert(Action::Diffuse { molecule: id, time: 0.0 });
        let mut stats = StepStats::default();

        let mut observer = ();
        assert!(p.run_next_event(&mut calendar, &mut stats, &mut observer).unwrap());
        assert_eq!(stats.molecules_diffused, 1);
        // The molecule reschedules its own next diffuse step.
        assert!(!calendar.is_empty());
    }

    #[test]
    fn run_next_event_reports_false_once_calendar_is_empty() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let mut calendar = Calendar::new(1e-6);
        let mut stats = StepStats::default();
        let mut observer = ();
        assert!(!p.run_next_event(&mut calendar, &mut stats, &mut observer).unwrap());
    }

    #[test]
    fn collect_snapshot_reuses_workspace_buffer() {
        let mut p = Partition::new(test_config(), 1).unwrap();
        let id = p.add_molecule(0, MoleculePlace::Volume { position: Vector3::new(1.0, 2.0, 3.0) }).unwrap();

        let mut workspace = StepWorkspace::new();
        let mut seen = Vec::new();
        p.collect_snapshot(&mut workspace, 0, &mut seen);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].molecule_id, id);
    }

    impl crate::observe::SnapshotObserver for Vec<crate::observe::Snapshot> {
        fn observe_snapshot(&mut self, snapshot: &crate::observe::Snapshot) {
            self.push(*snapshot);
        }
    }
}
