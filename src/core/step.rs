//! Discrete-tick simulation.
//!
//! Each tick consumes the synapses queued by the previous tick. All charge
//! aimed at a cell is summed before the cell's firing decision, so evaluation
//! order never changes the outcome.

use hashbrown::{HashMap, HashSet};
use tracing::trace;

use crate::config::{ACTUAL_SYNAPSE_MAX, ACTUAL_SYNAPSE_MIN};
use crate::error::{NetworkError, Result};
use crate::network::{CellId, Network, SynapseId};

impl Network {
    /// Fire `id` as if it had crossed threshold: it turns refractory, all of
    /// its outbound synapses are queued for the next tick and its observers
    /// run. Does nothing while the network is disabled.
    pub fn fire_cell(&mut self, id: CellId) -> Result<()> {
        let resting = self.cfg.resting_voltage;
        let cell = self
            .cells
            .get_mut(&id)
            .ok_or(NetworkError::CellNotFound(id))?;
        if self.disabled {
            return Ok(());
        }
        cell.activating = true;
        cell.was_fired = true;
        cell.voltage = resting;
        for synapse_id in &cell.axons {
            if let Some(synapse) = self.synapses.get_mut(synapse_id) {
                synapse.fire_next_round = true;
            }
        }
        cell.observers.notify(id);
        self.reset_cells_on_next_step.insert(id);
        Ok(())
    }

    /// Fire `ceil(cells * noise_ratio)` random cells.
    pub fn fire_noise(&mut self) -> usize {
        let count = (self.cells.len() as f64 * self.cfg.noise_ratio).ceil() as usize;
        let mut fired = 0;
        for _ in 0..count {
            if let Some(id) = self.random_cell_id() {
                if self.fire_cell(id).is_ok() {
                    fired += 1;
                }
            }
        }
        fired
    }

    /// Advance one tick. Returns whether any cell fired, i.e. whether another
    /// tick has work to do.
    pub fn step(&mut self) -> bool {
        if self.disabled {
            return false;
        }
        let threshold = i32::from(self.cfg.fire_threshold);
        let resting = self.cfg.resting_voltage;
        let exiting_refractory = std::mem::take(&mut self.reset_cells_on_next_step);

        let mut tally: HashMap<CellId, i32> = HashMap::new();
        let mut contributors: HashMap<CellId, Vec<SynapseId>> = HashMap::new();
        for synapse in self.synapses.values_mut() {
            if !synapse.fire_next_round {
                continue;
            }
            synapse.fire_next_round = false;
            let Some(dest) = self.cells.get(&synapse.to) else {
                continue;
            };
            if dest.activating {
                continue;
            }
            synapse.activation_history = synapse.activation_history.saturating_add(1);
            *tally.entry(synapse.to).or_insert(0) += i32::from(synapse.millivolts);
            contributors.entry(synapse.to).or_default().push(synapse.id);
        }

        let mut order: Vec<CellId> = tally.keys().copied().collect();
        order.sort_unstable();

        let mut fired: HashSet<CellId> = HashSet::new();
        for cell_id in order {
            let incoming = tally.get(&cell_id).copied().unwrap_or(0);
            let Some(cell) = self.cells.get_mut(&cell_id) else {
                continue;
            };
            let total = i32::from(cell.voltage) + incoming;
            if total < threshold {
                cell.voltage = total
                    .clamp(i32::from(ACTUAL_SYNAPSE_MIN), i32::from(ACTUAL_SYNAPSE_MAX))
                    as i16;
                continue;
            }

            cell.activating = true;
            cell.was_fired = true;
            cell.voltage = resting;
            for synapse_id in &cell.axons {
                if let Some(synapse) = self.synapses.get_mut(synapse_id) {
                    synapse.fire_next_round = true;
                }
            }
            // Causing a threshold crossing counts twice.
            for synapse_id in contributors.get(&cell_id).into_iter().flatten() {
                if let Some(synapse) = self.synapses.get_mut(synapse_id) {
                    if synapse.is_excitatory() {
                        synapse.activation_history = synapse.activation_history.saturating_add(1);
                    }
                }
            }
            cell.observers.notify(cell_id);
            fired.insert(cell_id);
        }

        for cell_id in exiting_refractory {
            if fired.contains(&cell_id) {
                continue;
            }
            if let Some(cell) = self.cells.get_mut(&cell_id) {
                cell.activating = false;
                // Charge that arrived meanwhile is kept.
                cell.voltage = cell.voltage.max(resting);
            }
        }

        trace!(fired = fired.len(), "step");
        let any_fired = !fired.is_empty();
        self.reset_cells_on_next_step.extend(fired);
        any_fired
    }

    /// Step until a tick fires nothing or `max_steps` ticks have run.
    /// Returns the number of ticks taken.
    pub fn step_until_quiet(&mut self, max_steps: usize) -> usize {
        let mut steps = 0;
        while steps < max_steps {
            steps += 1;
            if !self.step() {
                break;
            }
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    fn chain(weights: &[i16]) -> (Network, Vec<CellId>, Vec<SynapseId>) {
        let mut net = Network::with_config(NetworkConfig::default().with_seed(5)).unwrap();
        let mut cells = vec![net.add_cell()];
        let mut synapses = Vec::new();
        for &w in weights {
            let next = net.add_cell();
            let prev = *cells.last().unwrap();
            synapses.push(net.link_cells_with_weight(prev, next, w).unwrap());
            cells.push(next);
        }
        (net, cells, synapses)
    }

    #[test]
    fn strong_synapse_fires_destination() {
        let (mut net, cells, syns) = chain(&[300]);
        net.fire_cell(cells[0]).unwrap();

        assert!(net.step());
        let dest = net.cell(cells[1]).unwrap();
        assert!(dest.was_fired());
        assert!(dest.is_activating());
        // Activation plus the threshold-crossing credit.
        assert_eq!(net.synapse(syns[0]).unwrap().activation_history, 2);
    }

    #[test]
    fn weak_synapse_only_charges() {
        let (mut net, cells, syns) = chain(&[50]);
        net.fire_cell(cells[0]).unwrap();

        assert!(!net.step());
        let dest = net.cell(cells[1]).unwrap();
        assert!(!dest.was_fired());
        assert_eq!(dest.voltage, -30 + 50);
        assert_eq!(net.synapse(syns[0]).unwrap().activation_history, 1);
    }

    #[test]
    fn contributions_are_summed_before_deciding() {
        let mut net = Network::new();
        let a = net.add_cell();
        let b = net.add_cell();
        let target = net.add_cell();
        net.link_cells_with_weight(a, target, 150).unwrap();
        net.link_cells_with_weight(b, target, 150).unwrap();
        let inhibit = net.link_cells_with_weight(b, target, -200).unwrap();

        net.fire_cell(a).unwrap();
        net.fire_cell(b).unwrap();
        assert!(!net.step());
        assert!(!net.cell(target).unwrap().was_fired());
        assert_eq!(net.cell(target).unwrap().voltage, -30 + 100);
        assert_eq!(net.synapse(inhibit).unwrap().activation_history, 1);
    }

    #[test]
    fn seed_is_excitable_again_after_one_tick() {
        let mut net = Network::new();
        let a = net.add_cell();
        let b = net.add_cell();
        let ab = net.link_cells_with_weight(a, b, 300).unwrap();
        let ba = net.link_cells_with_weight(b, a, 300).unwrap();

        net.fire_cell(a).unwrap();
        assert!(net.step());
        assert!(!net.cell(a).unwrap().is_activating());
        assert!(net.cell(b).unwrap().is_activating());

        assert!(net.step());
        assert!(net.cell(a).unwrap().is_activating());
        assert_eq!(net.synapse(ab).unwrap().activation_history, 2);
        assert_eq!(net.synapse(ba).unwrap().activation_history, 2);
    }

    #[test]
    fn refractory_window_is_one_tick() {
        let mut net = Network::new();
        let a = net.add_cell();
        let b = net.add_cell();
        let c = net.add_cell();
        // a fires b and c at once; c immediately fires back at b.
        net.link_cells_with_weight(a, b, 300).unwrap();
        net.link_cells_with_weight(a, c, 300).unwrap();
        let cb = net.link_cells_with_weight(c, b, 300).unwrap();

        net.fire_cell(a).unwrap();
        assert!(net.step());
        assert!(net.cell(b).unwrap().is_activating());
        // c -> b lands while b is refractory and is dropped.
        net.step();
        assert_eq!(net.synapse(cb).unwrap().activation_history, 0);
        assert!(!net.cell(b).unwrap().is_activating());
        assert_eq!(net.cell(b).unwrap().voltage, -30);
    }

    #[test]
    fn disabled_network_does_not_fire() {
        let (mut net, cells, _) = chain(&[300]);
        net.disabled = true;
        net.fire_cell(cells[0]).unwrap();
        assert!(!net.cell(cells[0]).unwrap().was_fired());
        assert!(!net.step());
    }

    #[test]
    fn voltage_is_clamped_on_accumulation() {
        let cfg = NetworkConfig::default().with_fire_threshold(i16::MAX);
        let mut net = Network::with_config(cfg).unwrap();
        let target = net.add_cell();
        for _ in 0..4 {
            let src = net.add_cell();
            net.link_cells_with_weight(src, target, ACTUAL_SYNAPSE_MIN).unwrap();
            net.fire_cell(src).unwrap();
        }
        net.step();
        assert_eq!(net.cell(target).unwrap().voltage, ACTUAL_SYNAPSE_MIN);
    }

    #[test]
    fn fire_noise_uses_ratio() {
        let cfg = NetworkConfig {
            noise_ratio: 0.5,
            ..Default::default()
        };
        let mut net = Network::with_config(cfg).unwrap();
        for _ in 0..10 {
            net.add_cell();
        }
        // Picks are made with replacement.
        assert_eq!(net.fire_noise(), 5);
        assert!(net.fired_cells().count() >= 1);
    }

    #[test]
    fn reset_for_training_clears_transient_state() {
        let (mut net, cells, syns) = chain(&[300, 300]);
        net.fire_cell(cells[0]).unwrap();
        net.step();
        net.reset_for_training();

        assert_eq!(net.fired_cells().count(), 0);
        assert!(net.cells().all(|c| !c.is_activating() && c.voltage == -30));
        assert!(!net.step());
        // History survives a training reset.
        assert_eq!(net.synapse(syns[0]).unwrap().activation_history, 2);
    }

    #[test]
    fn step_until_quiet_respects_budget() {
        let mut net = Network::new();
        let a = net.add_cell();
        let b = net.add_cell();
        let c = net.add_cell();
        net.link_cells_with_weight(a, b, 300).unwrap();
        net.link_cells_with_weight(b, c, 300).unwrap();
        net.link_cells_with_weight(c, a, 300).unwrap();

        net.fire_cell(a).unwrap();
        assert_eq!(net.step_until_quiet(7), 7);
    }
}
