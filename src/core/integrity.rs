//! Referential integrity checks over the graph store.
//!
//! Every ID a cell or synapse holds must name something that exists. This is
//! run after merges and after loading an image.

use std::fmt;

use crate::error::{NetworkError, Result};
use crate::network::{CellId, Network, SynapseId};

/// One broken cross reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DanglingRef {
    MissingAxon { cell: CellId, synapse: SynapseId },
    MissingDendrite { cell: CellId, synapse: SynapseId },
    MissingFromCell { synapse: SynapseId, cell: CellId },
    MissingToCell { synapse: SynapseId, cell: CellId },
}

impl fmt::Display for DanglingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DanglingRef::MissingAxon { cell, synapse } => {
                write!(f, "cell {cell} lists missing axon synapse {synapse}")
            }
            DanglingRef::MissingDendrite { cell, synapse } => {
                write!(f, "cell {cell} lists missing dendrite synapse {synapse}")
            }
            DanglingRef::MissingFromCell { synapse, cell } => {
                write!(f, "synapse {synapse} comes from missing cell {cell}")
            }
            DanglingRef::MissingToCell { synapse, cell } => {
                write!(f, "synapse {synapse} goes to missing cell {cell}")
            }
        }
    }
}

/// All problems found by one integrity pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub problems: Vec<DanglingRef>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.problems.is_empty() {
            return write!(f, "no integrity problems");
        }
        write!(f, "{} integrity problem(s)", self.problems.len())?;
        for problem in &self.problems {
            write!(f, "\n  {problem}")?;
        }
        Ok(())
    }
}

impl Network {
    /// Verify every cell and synapse reference resolves.
    pub fn check_integrity(&self) -> IntegrityReport {
        let mut problems = Vec::new();

        for cell in self.cells.values() {
            for &synapse in &cell.axons {
                if !self.synapses.contains_key(&synapse) {
                    problems.push(DanglingRef::MissingAxon {
                        cell: cell.id,
                        synapse,
                    });
                }
            }
            for &synapse in &cell.dendrites {
                if !self.synapses.contains_key(&synapse) {
                    problems.push(DanglingRef::MissingDendrite {
                        cell: cell.id,
                        synapse,
                    });
                }
            }
        }

        for synapse in self.synapses.values() {
            if !self.cells.contains_key(&synapse.from) {
                problems.push(DanglingRef::MissingFromCell {
                    synapse: synapse.id,
                    cell: synapse.from,
                });
            }
            if !self.cells.contains_key(&synapse.to) {
                problems.push(DanglingRef::MissingToCell {
                    synapse: synapse.id,
                    cell: synapse.to,
                });
            }
        }

        IntegrityReport { problems }
    }

    /// Like [`Network::check_integrity`], but fails on any problem.
    pub fn verify_integrity(&self) -> Result<()> {
        let report = self.check_integrity();
        if report.is_ok() {
            Ok(())
        } else {
            Err(NetworkError::Integrity(report))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkConfig, ACTUAL_SYNAPSE_MAX};
    use crate::diff::Diff;

    fn assert_clean(net: &Network, after: &str) {
        let report = net.check_integrity();
        assert!(report.is_ok(), "after {after}: {report}");
    }

    #[test]
    fn fresh_network_is_clean() {
        let mut net = Network::new();
        let a = net.add_cell();
        let b = net.add_cell();
        net.link_cells(a, b).unwrap();
        net.link_cells(b, a).unwrap();

        assert!(net.check_integrity().is_ok());
        assert!(net.verify_integrity().is_ok());
    }

    #[test]
    fn detects_all_four_dangling_kinds() {
        let mut net = Network::new();
        let a = net.add_cell();
        let b = net.add_cell();
        let s = net.link_cells(a, b).unwrap();

        // Drop the synapse without detaching it.
        net.synapses.remove(&s);
        let report = net.check_integrity();
        assert_eq!(report.len(), 2);
        assert!(report
            .problems
            .contains(&DanglingRef::MissingAxon { cell: a, synapse: s }));
        assert!(report
            .problems
            .contains(&DanglingRef::MissingDendrite { cell: b, synapse: s }));

        let mut net = Network::new();
        let a = net.add_cell();
        let b = net.add_cell();
        let s = net.link_cells(a, b).unwrap();
        net.cells.remove(&a);
        net.cells.remove(&b);
        let report = net.check_integrity();
        assert_eq!(
            report.problems,
            vec![
                DanglingRef::MissingFromCell { synapse: s, cell: a },
                DanglingRef::MissingToCell { synapse: s, cell: b },
            ]
        );
    }

    #[test]
    fn verify_wraps_report_in_error() {
        let mut net = Network::new();
        let a = net.add_cell();
        let b = net.add_cell();
        let s = net.link_cells(a, b).unwrap();
        net.synapses.remove(&s);

        match net.verify_integrity() {
            Err(NetworkError::Integrity(report)) => {
                assert_eq!(report.len(), 2);
                assert!(report.to_string().contains("missing axon synapse"));
            }
            other => panic!("expected integrity error, got {other:?}"),
        }
    }

    #[test]
    fn mixed_operations_keep_references_intact() {
        let mut net = Network::with_config(NetworkConfig::default().with_seed(21)).unwrap();
        net.grow(30, 4, 40);
        assert_clean(&net, "initial growth");

        for round in 0..6u64 {
            net.grow(4, 3, 10);
            assert_clean(&net, "grow");

            net.reset_for_training();
            net.fire_noise();
            net.step_until_quiet(8);
            assert_clean(&net, "step");

            let cells = net.cell_ids();
            let (input, output, stray) = (cells[0], cells[cells.len() / 2], cells[cells.len() - 1]);
            let good = net.trace_good_path(output, &[input]);
            let noise = net.trace_noise(&[input], &[stray], &good);
            net.apply_backtrace(&[input], &good, &noise);
            assert_clean(&net, "backtrace");

            let mut clone = net.clone();
            clone.reseed(1000 + round);
            clone.grow(3, 2, 5);
            let strong = clone.synapse_ids()[0];
            clone.synapse_mut(strong).unwrap().millivolts = ACTUAL_SYNAPSE_MAX - 1;
            clone.reinforce_synapse(strong).unwrap();
            let doomed = clone.synapse_ids()[1];
            clone.prune_synapse(doomed).unwrap();
            net.apply_diff(&Diff::between(&net, &clone)).unwrap();
            assert_clean(&net, "diff apply");

            net.prune();
            assert_clean(&net, "prune");

            net.consolidate_duplicates();
            assert_clean(&net, "consolidation");
        }
    }
}
