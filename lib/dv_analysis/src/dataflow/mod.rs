//! Dataflow analysis framework.

use dv_dex::Addr;
use std::collections::BTreeMap;

mod forward;

pub use forward::{forward, AbstractForwardState};

/// Processing status of a basic block during the fixpoint computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// No state has reached the block yet.
    Unvisited,
    /// The entry state of the block changed since its last processing.
    Pending,
    Stable,
}

/// Dataflow analysis result object.
///
/// Contains entries and exits abstract states for every instruction
/// of the analyzed method, after reaching fixpoint, and the number of times
/// each basic block was processed.
#[derive(Debug, Clone)]
pub struct Dataflow<S> {
    pub entries: BTreeMap<Addr, S>,
    pub exits: BTreeMap<Addr, S>,
    pub visits: BTreeMap<Addr, usize>,
}

impl<S> Dataflow<S> {
    /// Checks if the instruction at the given address was reached by the analysis.
    #[must_use]
    pub fn is_reachable(&self, addr: Addr) -> bool {
        self.entries.contains_key(&addr)
    }
}
