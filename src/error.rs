//! Error types returned by the kernel, following the split between
//! fatal initialization errors and locally-recovered runtime conditions
//! described for the diffuse-and-react kernel.

use thiserror::Error as ThisError;

/// Error type returned by fallible kernel operations.
///
/// Initialization errors ([`SimulationError::InvalidGeometry`],
/// [`SimulationError::ConfigInconsistent`]) are fatal: construction simply
/// fails. The runtime variants are mostly recovered locally by the step
/// that triggered them (see [`crate::observe::StepStats`]) and only
/// surface here when the caller asked for the fatal form, e.g. via
/// [`crate::partition::Partition::run_next_event`] propagating a
/// [`SimulationError::MissedUnimolecular`] bug report.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum SimulationError {
    /// Degenerate triangle, non-manifold shared edge, or a surface that is
    /// required to be closed but is not.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// Subpart edge not greater than the interaction radius, a negative
    /// rate, or an empty reactant tuple.
    #[error("inconsistent configuration: {0}")]
    ConfigInconsistent(String),
    /// A molecule's proposed displacement would leave the partition; the
    /// reference implementation has no notion of a neighboring partition.
    #[error("molecule {0} would leave the partition")]
    RuntimeOutOfDomain(u64),
    /// A surface product could not find a free tile within
    /// `vacancy_search_dist2`; the reaction is rejected and reactants survive.
    #[error("no free tile found for product of species {0} within search radius")]
    TileFull(u32),
    /// A collision test's REDO budget was exceeded; treated as a miss.
    #[error("ambiguous collision for molecule {0} after exhausting REDO budget")]
    AmbiguousCollision(u64),
    /// A scheduled unimolecular reaction fired in the past. Indicates a
    /// scheduler bug and is always fatal.
    #[error("unimolecular reaction for molecule {0} scheduled at {1} fired at {2} (in the past)")]
    MissedUnimolecular(u64, f64, f64),
    /// Catch-all for errors not represented by a more specific variant.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SimulationError>;
