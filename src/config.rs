//! Simulation-wide configuration. Validated eagerly, before any
//! partition is constructed from it.

use crate::error::{Result, SimulationError};

/// Process-wide configuration, read-only after construction.
///
/// Per-species overrides (`time_step_factor`) live on [`crate::reaction::Species`]
/// rather than here, since they are keyed by species id.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Side length of the cubic simulation box.
    pub partition_edge_length: f64,
    /// Number of subpartitions per edge of the partition (N_sp).
    pub num_subpartitions_per_partition: u32,
    /// Interaction radius `sigma` used for volume-volume reaction tests.
    pub rx_radius_3d: f64,
    /// Whether wall-subpart registration is inflated by `rx_radius_3d`.
    pub use_expanded_list: bool,
    /// Squared distance allowed when searching for a free surface tile for
    /// a reaction product.
    pub vacancy_search_dist2: f64,
    /// Whether surface products are placed at a random point within their
    /// tile, rather than at the tile centroid.
    pub randomize_smol_pos: bool,
    /// Base timestep (seconds) from which per-species `time_step_factor`
    /// derives `Delta t_s`.
    pub base_time_step: f64,
    /// Upper bound on wall reflections processed within a single
    /// diffusion step; the remainder of the displacement is discarded
    /// once the bound is hit.
    pub max_wall_reflections: u32,
    /// Upper bound on REDO retries for a single collision test before it
    /// is accepted as a miss (`AmbiguousCollision`).
    pub max_redo_retries: u32,
}

impl SimulationConfig {
    /// Edge length of one subpartition.
    pub fn subpart_edge_length(&self) -> f64 {
        self.partition_edge_length / self.num_subpartitions_per_partition as f64
    }

    /// Validates the `ConfigInconsistent` constraints: the subpart edge
    /// must exceed the interaction radius, and the box must be
    /// subdivided into at least one subpartition.
    pub fn validate(&self) -> Result<()> {
        if self.num_subpartitions_per_partition == 0 {
            return Err(SimulationError::ConfigInconsistent(
                "num_subpartitions_per_partition must be at least 1".to_string(),
            ));
        }
        if self.partition_edge_length <= 0.0 {
            return Err(SimulationError::ConfigInconsistent(
                "partition_edge_length must be positive".to_string(),
            ));
        }
        if self.rx_radius_3d < 0.0 {
            return Err(SimulationError::ConfigInconsistent(
                "rx_radius_3d must not be negative".to_string(),
            ));
        }
        let subpart_edge = self.subpart_edge_length();
        if subpart_edge <= self.rx_radius_3d {
            return Err(SimulationError::ConfigInconsistent(format!(
                "subpart edge length ({subpart_edge}) must be greater than rx_radius_3d ({})",
                self.rx_radius_3d
            )));
        }
        if self.vacancy_search_dist2 < 0.0 {
            return Err(SimulationError::ConfigInconsistent(
                "vacancy_search_dist2 must not be negative".to_string(),
            ));
        }
        if self.base_time_step <= 0.0 {
            return Err(SimulationError::ConfigInconsistent(
                "base_time_step must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            partition_edge_length: 1.0,
            num_subpartitions_per_partition: 10,
            rx_radius_3d: 1e-3,
            use_expanded_list: true,
            vacancy_search_dist2: 1e-2,
            randomize_smol_pos: true,
            base_time_step: 1e-6,
            max_wall_reflections: 10,
            max_redo_retries: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subpart_edge_must_exceed_rx_radius() {
        let mut cfg = SimulationConfig::default();
        cfg.rx_radius_3d = cfg.subpart_edge_length();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_subpartitions_rejected() {
        let mut cfg = SimulationConfig::default();
        cfg.num_subpartitions_per_partition = 0;
        assert!(matches!(
            cfg.validate(),
            Err(SimulationError::ConfigInconsistent(_))
        ));
    }
}
