//! Folding duplicate synapses back together.
//!
//! Clamp splitting leaves several synapses between the same pair of cells.
//! Their combined weight is redistributed over as few synapses as the clamp
//! bounds allow and the rest are pruned.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::{Millivolts, ACTUAL_SYNAPSE_MAX, ACTUAL_SYNAPSE_MIN};
use crate::network::{CellId, Network, SynapseId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Cell pairs that had more than one synapse.
    pub groups: usize,
    pub synapses_removed: usize,
    pub cells_removed: usize,
}

impl Network {
    /// Groups of two or more synapses sharing both endpoints.
    pub fn duplicate_synapses(&self) -> Vec<Vec<SynapseId>> {
        let mut by_pair: BTreeMap<(CellId, CellId), Vec<SynapseId>> = BTreeMap::new();
        for synapse in self.synapses.values() {
            by_pair
                .entry((synapse.from, synapse.to))
                .or_default()
                .push(synapse.id);
        }
        by_pair.into_values().filter(|group| group.len() > 1).collect()
    }

    /// Merge every duplicate group into `ceil(|sum| / |bound|)` synapses,
    /// where the bound is the clamp limit on the side of the sum's sign.
    pub fn consolidate_duplicates(&mut self) -> ConsolidationReport {
        let mut report = ConsolidationReport::default();
        for group in self.duplicate_synapses() {
            report.groups += 1;
            let sum: i64 = group
                .iter()
                .filter_map(|id| self.synapses.get(id))
                .map(|s| i64::from(s.millivolts))
                .sum();
            let bound = if sum >= 0 {
                ACTUAL_SYNAPSE_MAX
            } else {
                ACTUAL_SYNAPSE_MIN
            };
            let keep = sum
                .unsigned_abs()
                .div_ceil(i64::from(bound).unsigned_abs()) as usize;
            let keep = keep.min(group.len());
            let (kept, removed) = group.split_at(keep);

            if let Some((&last, pinned)) = kept.split_last() {
                for id in pinned {
                    if let Some(s) = self.synapses.get_mut(id) {
                        s.millivolts = bound;
                    }
                }
                let remainder = sum - pinned.len() as i64 * i64::from(bound);
                if let Some(s) = self.synapses.get_mut(&last) {
                    s.millivolts = remainder
                        .clamp(i64::from(ACTUAL_SYNAPSE_MIN), i64::from(ACTUAL_SYNAPSE_MAX))
                        as Millivolts;
                }
            }

            for &id in removed {
                if let Ok(cells) = self.prune_synapse(id) {
                    report.synapses_removed += 1;
                    report.cells_removed += cells;
                }
            }
        }
        if report.groups > 0 {
            debug!(
                groups = report.groups,
                removed = report.synapses_removed,
                "consolidated duplicate synapses"
            );
        }
        report
    }
}
