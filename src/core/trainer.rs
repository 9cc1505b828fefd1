//! Single-network training: fire an input, check the expected output, and
//! either reinforce what worked or grow what is missing.

use std::collections::BTreeSet;
use std::ops::AddAssign;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::Result;
use crate::network::{CellId, Network};

/// Ordered `(input, expected output)` pairs trained one after another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrainingSample {
    pub pairs: Vec<(CellId, CellId)>,
}

impl TrainingSample {
    pub fn new(pairs: Vec<(CellId, CellId)>) -> Self {
        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Everything a training run needs besides the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSettings {
    pub samples: Vec<TrainingSample>,
    /// Every cell that stands for some output; firing one that was not
    /// expected counts as noise.
    pub output_cells: BTreeSet<CellId>,
    /// Parallel workers. Zero is treated as one.
    pub threads: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            output_cells: BTreeSet::new(),
            threads: 2,
        }
    }
}

/// Tally of what training did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleOutcome {
    pub pairs: usize,
    /// Pairs whose expected output fired.
    pub hits: usize,
    pub misses: usize,
    pub reinforced: usize,
    pub inhibitors_added: usize,
    pub inhibitors_strengthened: usize,
    pub cells_grown: usize,
    pub synapses_grown: usize,
}

impl SampleOutcome {
    /// Fraction of pairs that hit; `None` before any pair was trained.
    pub fn hit_rate(&self) -> Option<f64> {
        (self.pairs > 0).then(|| self.hits as f64 / self.pairs as f64)
    }
}

impl AddAssign for SampleOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.pairs += rhs.pairs;
        self.hits += rhs.hits;
        self.misses += rhs.misses;
        self.reinforced += rhs.reinforced;
        self.inhibitors_added += rhs.inhibitors_added;
        self.inhibitors_strengthened += rhs.inhibitors_strengthened;
        self.cells_grown += rhs.cells_grown;
        self.synapses_grown += rhs.synapses_grown;
    }
}

impl Network {
    /// Grow some random structure, then forge a path between every pair of
    /// every sample so training starts with something to reinforce.
    pub fn pretrain(
        &mut self,
        settings: &TrainingSettings,
        cells: usize,
        synapses: usize,
    ) -> Result<SampleOutcome> {
        let mut outcome = SampleOutcome::default();
        let grown = self.grow(cells, self.cfg.default_neuron_synapses, synapses);
        outcome.cells_grown += grown.cells_added;
        outcome.synapses_grown += grown.synapses_added;

        let pairs: BTreeSet<(CellId, CellId)> = settings
            .samples
            .iter()
            .flat_map(|s| s.pairs.iter().copied())
            .collect();
        for (input, output) in pairs {
            let path = self.grow_path_between(input, output, self.cfg.grow_path_min_synapses)?;
            outcome.synapses_grown += path.added.len();
        }
        debug!(
            cells = outcome.cells_grown,
            synapses = outcome.synapses_grown,
            "pretrained network"
        );
        Ok(outcome)
    }

    /// Train one sample, pair by pair.
    ///
    /// Each input is fired `firing_iterations_per_sample` times, letting the
    /// network settle in between, until the expected output fires. A hit
    /// reinforces the causal path and inhibits paths into other fired
    /// outputs. A miss grows a few random cells and forges a path.
    pub fn train_sample(
        &mut self,
        sample: &TrainingSample,
        outputs: &BTreeSet<CellId>,
    ) -> Result<SampleOutcome> {
        let mut outcome = SampleOutcome::default();
        let iterations = self.cfg.firing_iterations_per_sample.max(1);
        let settle = self.cfg.max_post_fire_steps;
        let was_disabled = self.disabled;

        for &(input, expected) in &sample.pairs {
            self.cell(input)?;
            self.cell(expected)?;
            self.reset_for_training();
            outcome.pairs += 1;

            for _ in 0..iterations {
                self.fire_cell(input)?;
                self.step_until_quiet(settle);
                if self.cell(expected)?.was_fired() {
                    break;
                }
            }

            if self.cell(expected)?.was_fired() {
                outcome.hits += 1;
                let good = self.trace_good_path(expected, &[input]);
                let unexpected: Vec<CellId> = outputs
                    .iter()
                    .copied()
                    .filter(|&c| c != expected && c != input)
                    .filter(|&c| self.cells.get(&c).is_some_and(|cell| cell.was_fired))
                    .collect();
                let noise = if unexpected.is_empty() {
                    Vec::new()
                } else {
                    self.trace_noise(&[input], &unexpected, &good)
                };
                let applied = self.apply_backtrace(&[input], &good, &noise);
                outcome.reinforced += applied.reinforced;
                outcome.inhibitors_added += applied.inhibitors_added;
                outcome.inhibitors_strengthened += applied.inhibitors_strengthened;
                trace!(%input, %expected, good = good.len(), noise = noise.len(), "hit");
            } else {
                outcome.misses += 1;
                let grown = self.grow(
                    self.cfg.retrain_neurons_to_grow,
                    self.cfg.default_neuron_synapses,
                    self.cfg.retrain_synapses_to_grow,
                );
                let path =
                    self.grow_path_between(input, expected, self.cfg.grow_path_min_synapses)?;
                outcome.cells_grown += grown.cells_added;
                outcome.synapses_grown += grown.synapses_added + path.added.len();
                trace!(%input, %expected, forged = path.added.len(), "miss");
            }
        }

        self.reset_for_training();
        self.disabled = was_disabled;
        Ok(outcome)
    }

    /// Train every sample in order on this network alone.
    pub fn train_samples(
        &mut self,
        samples: &[TrainingSample],
        outputs: &BTreeSet<CellId>,
    ) -> Result<SampleOutcome> {
        let mut total = SampleOutcome::default();
        for sample in samples {
            total += self.train_sample(sample, outputs)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    fn quiet_config() -> NetworkConfig {
        let mut cfg = NetworkConfig::default().with_seed(7);
        cfg.retrain_neurons_to_grow = 0;
        cfg.retrain_synapses_to_grow = 0;
        cfg
    }

    #[test]
    fn miss_forges_a_path_and_next_pass_hits() {
        let mut net = Network::with_config(quiet_config()).unwrap();
        let input = net.add_cell();
        let output = net.add_cell();
        net.set_immortal(input, true).unwrap();
        net.set_immortal(output, true).unwrap();
        let sample = TrainingSample::new(vec![(input, output)]);
        let outputs = BTreeSet::from([output]);

        let first = net.train_sample(&sample, &outputs).unwrap();
        assert_eq!(first.misses, 1);
        assert!(first.synapses_grown > 0);

        let second = net.train_sample(&sample, &outputs).unwrap();
        assert_eq!(second.hits, 1);
        assert!(second.reinforced > 0);
        assert!(net.check_integrity().is_ok());
    }

    #[test]
    fn hit_inhibits_other_fired_outputs() {
        let mut net = Network::with_config(quiet_config()).unwrap();
        let input = net.add_cell();
        let right = net.add_cell();
        let wrong = net.add_cell();
        net.link_cells_with_weight(input, right, 300).unwrap();
        net.link_cells_with_weight(input, wrong, 300).unwrap();
        let sample = TrainingSample::new(vec![(input, right)]);
        let outputs = BTreeSet::from([right, wrong]);

        let outcome = net.train_sample(&sample, &outputs).unwrap();
        assert_eq!(outcome.hits, 1);
        assert_eq!(outcome.inhibitors_added, 1);

        net.fire_cell(input).unwrap();
        net.step_until_quiet(5);
        assert!(net.cell(right).unwrap().was_fired());
        assert!(!net.cell(wrong).unwrap().was_fired());
    }

    #[test]
    fn network_is_reset_after_training() {
        let mut net = Network::with_config(quiet_config()).unwrap();
        let a = net.add_cell();
        let b = net.add_cell();
        net.link_cells_with_weight(a, b, 300).unwrap();
        net.disabled = true;

        net.train_sample(&TrainingSample::new(vec![(a, b)]), &BTreeSet::from([b]))
            .unwrap();
        assert_eq!(net.fired_cells().count(), 0);
        assert!(net.disabled);
    }

    #[test]
    fn unknown_cells_are_errors() {
        let mut net = Network::new();
        let a = net.add_cell();
        let ghost = CellId::new(999_999).unwrap();
        let sample = TrainingSample::new(vec![(a, ghost)]);
        assert!(net.train_sample(&sample, &BTreeSet::new()).is_err());
    }

    #[test]
    fn pretrain_connects_every_pair() {
        let mut net = Network::with_config(NetworkConfig::default().with_seed(3)).unwrap();
        net.grow(30, 3, 0);
        let ids = net.cell_ids();
        let settings = TrainingSettings {
            samples: vec![TrainingSample::new(vec![(ids[0], ids[1]), (ids[2], ids[3])])],
            output_cells: BTreeSet::from([ids[1], ids[3]]),
            threads: 1,
        };
        net.pretrain(&settings, 5, 10).unwrap();

        let min = net.config().grow_path_min_synapses;
        for output in [ids[1], ids[3]] {
            let excitatory = net
                .cell(output)
                .unwrap()
                .dendrites()
                .iter()
                .filter(|&&s| net.synapse(s).unwrap().is_excitatory())
                .count();
            assert!(excitatory >= min);
        }
        assert!(net.check_integrity().is_ok());
    }

    #[test]
    fn outcomes_accumulate() {
        let mut total = SampleOutcome::default();
        assert_eq!(total.hit_rate(), None);
        total += SampleOutcome {
            pairs: 4,
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        total += SampleOutcome {
            pairs: 4,
            hits: 1,
            misses: 3,
            ..Default::default()
        };
        assert_eq!(total.pairs, 8);
        assert_eq!(total.hit_rate(), Some(0.5));
    }
}
