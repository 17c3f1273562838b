//! Scratch buffers reused across repeated calls into the simulation
//! driver, so the hot event loop doesn't allocate a fresh `Vec` every
//! time it needs to list the live molecule table for a snapshot.
//!
//! The kernel runs a single partition on a single thread, so there is no
//! thread-local indirection here: one `StepWorkspace` per
//! [`Partition`](crate::partition::Partition) the caller is driving.

use crate::molecule::MoleculeId;

#[derive(Default)]
pub struct StepWorkspace {
    /// Reused by [`Partition::collect_snapshot`](crate::partition::Partition::collect_snapshot)
    /// to list currently live molecule ids.
    pub live_molecules: Vec<MoleculeId>,
}

impl StepWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.live_molecules.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_empties_buffer_without_deallocating() {
        let mut ws = StepWorkspace::new();
        ws.live_molecules.push(1);
        ws.live_molecules.push(2);
        let cap_before = ws.live_molecules.capacity();
        ws.clear();
        assert!(ws.live_molecules.is_empty());
        assert_eq!(ws.live_molecules.capacity(), cap_before);
    }
}
