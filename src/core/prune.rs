//! Pruning, decay and reinforcement of synapses.

use tracing::{debug, info};

use crate::config::{Millivolts, ACTUAL_SYNAPSE_MAX, ACTUAL_SYNAPSE_MIN, SYNAPSE_LEARN_RATE};
use crate::error::{NetworkError, Result};
use crate::network::{CellId, Network, Synapse, SynapseId};

/// What one prune cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub reinforced: usize,
    /// Reinforcements that hit a clamp bound and split into a duplicate.
    pub split: usize,
    pub decayed: usize,
    pub synapses_removed: usize,
    pub cells_removed: usize,
}

impl Network {
    /// One decay/reinforce/remove cycle over every synapse.
    ///
    /// Synapses active enough since the last cycle are reinforced; idle
    /// zero-weight synapses are removed; everything else decays toward zero.
    /// Activation history is reset for all of them. Removal runs after the
    /// pass and cascades into orphaned cells.
    pub fn prune(&mut self) -> PruneReport {
        let min_fires = self.cfg.synapse_min_fire_threshold;
        let snap = self.cfg.decay_snap_band;
        let mut report = PruneReport::default();
        let mut to_reinforce = Vec::new();
        let mut to_remove = Vec::new();

        for synapse in self.synapses.values_mut() {
            let history = std::mem::take(&mut synapse.activation_history);
            if history >= min_fires {
                to_reinforce.push(synapse.id);
            } else if synapse.millivolts == 0 && history == 0 {
                to_remove.push(synapse.id);
            } else {
                synapse.millivolts = decay(synapse.millivolts, snap);
                report.decayed += 1;
            }
        }

        for id in to_reinforce {
            if let Ok(split) = self.reinforce_synapse(id) {
                report.reinforced += 1;
                report.split += usize::from(split.is_some());
            }
        }

        for id in to_remove {
            if let Ok(cells) = self.prune_synapse(id) {
                report.synapses_removed += 1;
                report.cells_removed += cells;
            }
        }

        info!(
            reinforced = report.reinforced,
            split = report.split,
            decayed = report.decayed,
            synapses_removed = report.synapses_removed,
            cells_removed = report.cells_removed,
            "pruned network"
        );
        report
    }

    /// Remove a synapse and any endpoint cell it leaves orphaned.
    ///
    /// Returns the number of cells removed.
    pub fn prune_synapse(&mut self, id: SynapseId) -> Result<usize> {
        let synapse = self.remove_synapse(id)?;
        let mut removed = 0;
        for cell_id in [synapse.from, synapse.to] {
            let orphan = self.cells.get(&cell_id).is_some_and(|c| c.is_orphan());
            if orphan {
                self.remove_cell(cell_id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove a cell together with all of its synapses. Neighbours orphaned
    /// along the way are removed too. Immortal cells are left alone.
    ///
    /// Returns whether `id` was removed.
    pub fn prune_cell(&mut self, id: CellId) -> Result<bool> {
        let cell = self.cell(id)?;
        if cell.immortal {
            return Ok(false);
        }
        let synapses: Vec<SynapseId> = cell.axons.iter().chain(&cell.dendrites).copied().collect();
        for synapse in synapses {
            // A self-link shows up on both sides.
            if self.synapses.contains_key(&synapse) {
                self.prune_synapse(synapse)?;
            }
        }
        if self.cells.contains_key(&id) {
            self.remove_cell(id)?;
        }
        debug!(cell = %id, "pruned cell");
        Ok(true)
    }

    /// Push a synapse one learning step away from zero.
    ///
    /// When the step would cross a clamp bound the synapse is pinned at half
    /// the bound and a duplicate between the same cells carries the rest; the
    /// duplicate's ID is returned. Zero-weight synapses are left as they are.
    pub fn reinforce_synapse(&mut self, id: SynapseId) -> Result<Option<SynapseId>> {
        let synapse = self
            .synapses
            .get_mut(&id)
            .ok_or(NetworkError::SynapseNotFound(id))?;
        let mv = i32::from(synapse.millivolts);
        let step = i32::from(SYNAPSE_LEARN_RATE);
        let next = match mv.signum() {
            1 => mv + step,
            -1 => mv - step,
            _ => return Ok(None),
        };

        let bound = if next > i32::from(ACTUAL_SYNAPSE_MAX) {
            ACTUAL_SYNAPSE_MAX
        } else if next < i32::from(ACTUAL_SYNAPSE_MIN) {
            ACTUAL_SYNAPSE_MIN
        } else {
            synapse.millivolts = next as Millivolts;
            return Ok(None);
        };

        let half = bound / 2;
        synapse.millivolts = half;
        let (from, to) = (synapse.from, synapse.to);
        let rest = (next - i32::from(half)) as Millivolts;

        let dup = self.fresh_synapse_id();
        self.insert_synapse(Synapse::new(dup, from, to, rest));
        debug!(synapse = %id, duplicate = %dup, "split saturated synapse");
        Ok(Some(dup))
    }
}

/// Halve the distance to zero; snap to zero inside `band`.
fn decay(mv: Millivolts, band: Millivolts) -> Millivolts {
    let halved = mv / 2;
    if halved.abs() <= band {
        0
    } else {
        halved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    fn pair(mv: Millivolts) -> (Network, CellId, CellId, SynapseId) {
        let mut net = Network::new();
        let a = net.add_cell();
        let b = net.add_cell();
        let s = net.link_cells_with_weight(a, b, mv).unwrap();
        (net, a, b, s)
    }

    #[test]
    fn decay_halves_and_snaps() {
        assert_eq!(decay(100, 2), 50);
        assert_eq!(decay(-100, 2), -50);
        assert_eq!(decay(5, 2), 0);
        assert_eq!(decay(-4, 2), 0);
        assert_eq!(decay(6, 2), 3);
    }

    #[test]
    fn prune_decays_idle_synapses() {
        let (mut net, _, _, s) = pair(80);
        let report = net.prune();
        assert_eq!(report.decayed, 1);
        assert_eq!(net.synapse(s).unwrap().millivolts, 40);
    }

    #[test]
    fn prune_reinforces_busy_synapses_and_resets_history() {
        let (mut net, _, _, s) = pair(80);
        net.synapse_mut(s).unwrap().activation_history = 8;
        let report = net.prune();

        assert_eq!(report.reinforced, 1);
        let syn = net.synapse(s).unwrap();
        assert_eq!(syn.millivolts, 82);
        assert_eq!(syn.activation_history, 0);
    }

    #[test]
    fn inhibitory_reinforcement_grows_more_negative() {
        let (mut net, _, _, s) = pair(-80);
        net.reinforce_synapse(s).unwrap();
        assert_eq!(net.synapse(s).unwrap().millivolts, -82);
    }

    #[test]
    fn zero_idle_synapse_and_orphans_are_removed() {
        let (mut net, a, b, s) = pair(0);
        let report = net.prune();

        assert_eq!(report.synapses_removed, 1);
        assert_eq!(report.cells_removed, 2);
        assert!(!net.contains_synapse(s));
        assert!(!net.contains_cell(a));
        assert!(!net.contains_cell(b));
    }

    #[test]
    fn decay_reaches_removal_over_cycles() {
        let (mut net, _, _, s) = pair(40);
        for _ in 0..10 {
            net.prune();
        }
        assert!(!net.contains_synapse(s));
        assert!(net.is_empty());
    }

    #[test]
    fn prune_synapse_cascades_to_both_endpoints() {
        let (mut net, a, b, s) = pair(30);
        assert_eq!(net.prune_synapse(s).unwrap(), 2);
        assert!(!net.contains_cell(a));
        assert!(!net.contains_cell(b));
    }

    #[test]
    fn prune_synapse_keeps_connected_and_immortal_cells() {
        let mut net = Network::new();
        let a = net.add_cell();
        let b = net.add_cell();
        let c = net.add_cell();
        let ab = net.link_cells_with_weight(a, b, 10).unwrap();
        net.link_cells_with_weight(b, c, 10).unwrap();
        net.set_immortal(a, true).unwrap();

        assert_eq!(net.prune_synapse(ab).unwrap(), 0);
        assert!(net.contains_cell(a));
        assert!(net.contains_cell(b));
        assert!(net.check_integrity().is_ok());
    }

    #[test]
    fn prune_cell_cascades_and_respects_immortality() {
        let mut net = Network::new();
        let hub = net.add_cell();
        let leaf = net.add_cell();
        let keeper = net.add_cell();
        net.link_cells_with_weight(hub, leaf, 10).unwrap();
        net.link_cells_with_weight(keeper, hub, 10).unwrap();
        net.link_cells_with_weight(hub, hub, 10).unwrap();
        net.set_immortal(keeper, true).unwrap();

        assert!(!net.prune_cell(keeper).unwrap());
        assert!(net.prune_cell(hub).unwrap());
        assert!(!net.contains_cell(hub));
        assert!(!net.contains_cell(leaf));
        assert!(net.contains_cell(keeper));
        assert_eq!(net.synapse_count(), 0);
        assert!(net.check_integrity().is_ok());
    }

    #[test]
    fn saturated_reinforcement_splits_in_half() {
        let (mut net, a, b, s) = pair(ACTUAL_SYNAPSE_MAX - 1);
        let dup = net.reinforce_synapse(s).unwrap().expect("split");

        assert_eq!(net.synapse(s).unwrap().millivolts, ACTUAL_SYNAPSE_MAX / 2);
        let dup = net.synapse(dup).unwrap();
        assert_eq!((dup.from(), dup.to()), (a, b));
        assert_eq!(
            i32::from(dup.millivolts) + i32::from(ACTUAL_SYNAPSE_MAX / 2),
            i32::from(ACTUAL_SYNAPSE_MAX) - 1 + i32::from(SYNAPSE_LEARN_RATE)
        );
    }

    #[test]
    fn saturated_inhibitor_splits_toward_min() {
        let (mut net, _, _, s) = pair(ACTUAL_SYNAPSE_MIN);
        let dup = net.reinforce_synapse(s).unwrap().expect("split");
        assert_eq!(net.synapse(s).unwrap().millivolts, ACTUAL_SYNAPSE_MIN / 2);
        assert!(net.synapse(dup).unwrap().millivolts < 0);
    }

    #[test]
    fn repeated_reinforcement_stays_in_bounds() {
        let (mut net, _, _, s) = pair(ACTUAL_SYNAPSE_MAX - 10);
        for _ in 0..20_000 {
            let ids = net.synapse_ids();
            for id in ids {
                net.reinforce_synapse(id).unwrap();
            }
            if net.synapse_count() > 8 {
                break;
            }
        }
        assert!(net.synapse_count() > 1);
        assert!(net
            .synapses()
            .all(|x| (ACTUAL_SYNAPSE_MIN..=ACTUAL_SYNAPSE_MAX).contains(&x.millivolts)));
        assert!(net.contains_synapse(s));
    }

    #[test]
    fn config_threshold_controls_reinforcement() {
        let cfg = NetworkConfig {
            synapse_min_fire_threshold: 1,
            ..Default::default()
        };
        let mut net = Network::with_config(cfg).unwrap();
        let a = net.add_cell();
        let b = net.add_cell();
        let s = net.link_cells_with_weight(a, b, 20).unwrap();
        net.synapse_mut(s).unwrap().activation_history = 1;
        net.prune();
        assert_eq!(net.synapse(s).unwrap().millivolts, 22);
    }
}
