//! Boundary to domain vocabularies.
//!
//! A perception maps domain symbols onto input/output cells and turns raw
//! data into training samples. The core never looks past the
//! `(input, output)` cell pairs it produces.

use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;
use crate::network::{CellId, Network};
use crate::trainer::TrainingSettings;

/// One domain symbol and the cells standing for it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PerceptionUnit<V> {
    pub value: V,
    pub input: CellId,
    pub output: CellId,
}

/// Capability set a domain vocabulary provides to training and sampling.
pub trait Perception {
    type Error: std::error::Error + From<NetworkError>;

    /// Assign cells to every symbol in the raw data and build the samples.
    fn prepare_data(&mut self, net: &mut Network) -> Result<TrainingSettings, Self::Error>;

    /// Fire the cells for `seed` and decode what the network answers.
    fn seed_and_sample(&self, seed: &str, net: &mut Network) -> Result<String, Self::Error>;

    fn save_vocab(&self, path: &Path) -> Result<(), Self::Error>;

    fn load_vocab(&mut self, path: &Path) -> Result<(), Self::Error>;
}

impl Network {
    /// Reserve a distinct, immortal input/output cell pair for `label`.
    ///
    /// Existing cells are reused when there are enough of them; otherwise
    /// fresh cells are added.
    pub fn claim_io_pair(&mut self, label: &str) -> (CellId, CellId) {
        let free: Vec<CellId> = self
            .cells
            .values()
            .filter(|c| !c.immortal && c.tag.is_none())
            .map(|c| c.id)
            .collect();

        let input = match self.rng.pick(&free) {
            Some(&id) => id,
            None => self.add_cell(),
        };
        let output = loop {
            match self.rng.pick(&free) {
                Some(&id) if id != input && free.len() > 1 => break id,
                Some(_) if free.len() > 1 => continue,
                _ => break self.add_cell(),
            }
        };

        for (id, side) in [(input, "in"), (output, "out")] {
            if let Some(cell) = self.cells.get_mut(&id) {
                cell.immortal = true;
                cell.tag = Some(format!("{side}-{label}"));
            }
        }
        (input, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimed_pair_is_distinct_immortal_and_tagged() {
        let mut net = Network::new();
        net.grow(10, 2, 0);
        let (input, output) = net.claim_io_pair("a");

        assert_ne!(input, output);
        assert_eq!(net.cell_count(), 10);
        let i = net.cell(input).unwrap();
        let o = net.cell(output).unwrap();
        assert!(i.immortal && o.immortal);
        assert_eq!(i.tag.as_deref(), Some("in-a"));
        assert_eq!(o.tag.as_deref(), Some("out-a"));
    }

    #[test]
    fn claimed_cells_are_not_reused() {
        let mut net = Network::new();
        net.grow(6, 2, 0);
        let mut seen = std::collections::BTreeSet::new();
        for label in ["a", "b", "c", "d"] {
            let (i, o) = net.claim_io_pair(label);
            assert!(seen.insert(i));
            assert!(seen.insert(o));
        }
        // Six existing cells, eight needed.
        assert_eq!(net.cell_count(), 8);
    }

    #[test]
    fn empty_network_gets_new_cells() {
        let mut net = Network::new();
        let (i, o) = net.claim_io_pair("x");
        assert_ne!(i, o);
        assert_eq!(net.cell_count(), 2);
        // Unconnected but immortal, so pruning keeps them.
        net.prune();
        assert!(net.contains_cell(i) && net.contains_cell(o));
    }
}
