//! Causal backtrace: which synapses carried a firing from the inputs to an
//! output, and how to suppress the ones that reached the wrong output.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::Millivolts;
use crate::network::{CellId, Network, SynapseId};
use crate::walk::{WalkOutcome, WalkStep, Walker};

/// What `apply_backtrace` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacktraceOutcome {
    pub reinforced: usize,
    pub split: usize,
    pub inhibitors_added: usize,
    pub inhibitors_strengthened: usize,
    /// Forward level at which the first noise synapse was found.
    pub noise_level: Option<usize>,
}

impl Network {
    fn unbounded_walker(&self) -> Walker {
        Walker::new(self.cells.len().saturating_add(1), self.cfg.walk_parallelism)
    }

    /// Walk backward from `roots` along excitatory synapses whose source
    /// fired, stopping at `inputs`.
    fn trace_fired(
        &self,
        roots: &[CellId],
        inputs: &BTreeSet<CellId>,
        exclude: &BTreeSet<SynapseId>,
    ) -> WalkOutcome {
        self.unbounded_walker().run(roots, |cell| {
            if inputs.contains(&cell) {
                return Vec::new();
            }
            let Some(cell) = self.cells.get(&cell) else {
                return Vec::new();
            };
            cell.dendrites
                .iter()
                .filter(|id| !exclude.contains(id))
                .filter_map(|id| self.synapses.get(id))
                .filter(|s| s.is_excitatory())
                .filter(|s| self.cells.get(&s.from).is_some_and(|c| c.was_fired))
                .map(|s| WalkStep {
                    record: Some(s.id),
                    follow: Some(s.from),
                })
                .collect()
        })
    }

    /// Synapses that causally carried the firing of `output` back from
    /// `inputs`.
    pub fn trace_good_path(&self, output: CellId, inputs: &[CellId]) -> Vec<SynapseId> {
        let inputs: BTreeSet<CellId> = inputs.iter().copied().collect();
        self.trace_fired(&[output], &inputs, &BTreeSet::new()).recorded
    }

    /// Synapses that carried firing into `unexpected` outputs, leaving out
    /// anything already on the good path.
    pub fn trace_noise(
        &self,
        inputs: &[CellId],
        unexpected: &[CellId],
        good: &[SynapseId],
    ) -> Vec<SynapseId> {
        let inputs: BTreeSet<CellId> = inputs.iter().copied().collect();
        let good: BTreeSet<SynapseId> = good.iter().copied().collect();
        self.trace_fired(unexpected, &inputs, &good).recorded
    }

    /// Reinforce the good path from `inputs` to `output`. Returns how many
    /// synapses were reinforced.
    pub fn reinforce_good_path(&mut self, output: CellId, inputs: &[CellId]) -> usize {
        let good = self.trace_good_path(output, inputs);
        good.iter()
            .filter(|&&id| self.reinforce_synapse(id).is_ok())
            .count()
    }

    /// Reinforce every good synapse, then suppress noise at the earliest
    /// forward level from `inputs` where a noise synapse fires.
    ///
    /// Each noise synapse on that level gets an inhibitor onto its
    /// destination from a good-path source: an existing inhibitor is
    /// strengthened, otherwise a new one mirrors the noise weight. The noise
    /// synapse's own source is preferred when it lies on the good path, since
    /// it fires on the same tick as the noise.
    pub fn apply_backtrace(
        &mut self,
        inputs: &[CellId],
        good: &[SynapseId],
        noise: &[SynapseId],
    ) -> BacktraceOutcome {
        let mut outcome = BacktraceOutcome::default();

        let good_sources: BTreeSet<CellId> = good
            .iter()
            .filter_map(|id| self.synapses.get(id))
            .map(|s| s.from)
            .collect();

        for &id in good {
            if let Ok(split) = self.reinforce_synapse(id) {
                outcome.reinforced += 1;
                outcome.split += usize::from(split.is_some());
            }
        }

        if noise.is_empty() {
            return outcome;
        }

        let noise_set: BTreeSet<SynapseId> = noise.iter().copied().collect();
        let first = self.first_noise_level(inputs, &noise_set);
        if first.recorded.is_empty() {
            debug!(noise = noise.len(), "no noise reachable from inputs");
            return outcome;
        }
        outcome.noise_level = Some(first.depth);

        let fallback: Vec<CellId> = inputs.to_vec();
        for noisy in first.recorded {
            let Some(synapse) = self.synapses.get(&noisy) else {
                continue;
            };
            let (source, dest, mv) = (synapse.from, synapse.to, synapse.millivolts);

            let existing = self.cells.get(&dest).and_then(|cell| {
                cell.dendrites.iter().copied().find(|id| {
                    self.synapses
                        .get(id)
                        .is_some_and(|s| s.is_inhibitory() && good_sources.contains(&s.from))
                })
            });
            if let Some(inhibitor) = existing {
                if self.reinforce_synapse(inhibitor).is_ok() {
                    outcome.inhibitors_strengthened += 1;
                }
                continue;
            }

            let from = if good_sources.contains(&source) {
                Some(source)
            } else {
                let candidates: Vec<CellId> = good_sources
                    .iter()
                    .chain(&fallback)
                    .copied()
                    .filter(|&c| c != dest && self.cells.contains_key(&c))
                    .collect();
                self.rng.pick(&candidates).copied()
            };
            if let Some(from) = from {
                self.add_inhibitor_synapse(dest, from, mv);
                outcome.inhibitors_added += 1;
            }
        }

        debug!(
            reinforced = outcome.reinforced,
            inhibitors_added = outcome.inhibitors_added,
            inhibitors_strengthened = outcome.inhibitors_strengthened,
            level = ?outcome.noise_level,
            "applied backtrace"
        );
        outcome
    }

    /// Forward walk over fired excitatory synapses from `inputs`, stopping
    /// at the first level containing any of `noise`.
    fn first_noise_level(&self, inputs: &[CellId], noise: &BTreeSet<SynapseId>) -> WalkOutcome {
        self.unbounded_walker().with_target(1).run(inputs, |cell| {
            let Some(cell) = self.cells.get(&cell) else {
                return Vec::new();
            };
            cell.axons
                .iter()
                .filter_map(|id| self.synapses.get(id))
                .filter(|s| s.is_excitatory())
                .filter(|s| self.cells.get(&s.to).is_some_and(|c| c.was_fired))
                .map(|s| {
                    if noise.contains(&s.id) {
                        WalkStep {
                            record: Some(s.id),
                            follow: None,
                        }
                    } else {
                        WalkStep {
                            record: None,
                            follow: Some(s.to),
                        }
                    }
                })
                .collect()
        })
    }

    /// Add an inhibitor `from -> dest` mirroring a noise weight.
    pub(crate) fn add_inhibitor_synapse(
        &mut self,
        dest: CellId,
        from: CellId,
        noisy_mv: Millivolts,
    ) -> SynapseId {
        let mv = noisy_mv.saturating_neg().min(-1);
        self.link_existing(from, dest, mv)
    }
}
