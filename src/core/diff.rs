//! Structural and weight deltas between a baseline and an evolved clone.
//!
//! A [`Diff`] only ever adds: new cells, new synapses, weight deltas and
//! extra activation history. Removals made by the clone are not carried.
//! Every diff is tagged with the baseline generation it was computed
//! against; applying it to any other generation is refused until it has
//! been rebased.

use std::collections::BTreeMap;
use std::fmt;

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::config::{Millivolts, ACTUAL_SYNAPSE_MAX, ACTUAL_SYNAPSE_MIN};
use crate::error::{NetworkError, Result};
use crate::network::{Cell, CellId, Network, Synapse, SynapseId};

#[derive(Debug, Clone, Default)]
pub struct Diff {
    pub base_generation: u64,
    pub added_cells: BTreeMap<CellId, Cell>,
    pub added_synapses: Vec<Synapse>,
    /// Signed weight change per existing synapse.
    pub weight_deltas: BTreeMap<SynapseId, i32>,
    /// Additional activation history per existing synapse.
    pub history_deltas: BTreeMap<SynapseId, u32>,
}

/// What applying a diff did to the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub cells_added: usize,
    pub synapses_added: usize,
    pub cells_rekeyed: usize,
    pub synapses_rekeyed: usize,
    pub weights_adjusted: usize,
    pub histories_added: usize,
    /// Entries dropped because something they referenced is gone.
    pub skipped: usize,
}

impl std::ops::AddAssign for ApplyReport {
    fn add_assign(&mut self, rhs: Self) {
        self.cells_added += rhs.cells_added;
        self.synapses_added += rhs.synapses_added;
        self.cells_rekeyed += rhs.cells_rekeyed;
        self.synapses_rekeyed += rhs.synapses_rekeyed;
        self.weights_adjusted += rhs.weights_adjusted;
        self.histories_added += rhs.histories_added;
        self.skipped += rhs.skipped;
    }
}

impl Diff {
    /// Everything `evolved` has gained relative to `baseline`.
    ///
    /// A synapse that exists in both with different endpoints is an ID
    /// collision and counts as new.
    pub fn between(baseline: &Network, evolved: &Network) -> Diff {
        let mut diff = Diff {
            base_generation: baseline.generation,
            ..Default::default()
        };

        for (id, cell) in &evolved.cells {
            if !baseline.cells.contains_key(id) {
                diff.added_cells.insert(*id, cell.clone());
            }
        }

        for (id, synapse) in &evolved.synapses {
            match baseline.synapses.get(id) {
                Some(base) if base.from == synapse.from && base.to == synapse.to => {
                    let delta = i32::from(synapse.millivolts) - i32::from(base.millivolts);
                    if delta != 0 {
                        diff.weight_deltas.insert(*id, delta);
                    }
                    let history = synapse
                        .activation_history
                        .saturating_sub(base.activation_history);
                    if history > 0 {
                        diff.history_deltas.insert(*id, history);
                    }
                }
                _ => diff.added_synapses.push(synapse.clone()),
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added_cells.is_empty()
            && self.added_synapses.is_empty()
            && self.weight_deltas.is_empty()
            && self.history_deltas.is_empty()
    }

    /// Re-target a stale diff at `onto`'s current generation, dropping
    /// deltas for synapses that no longer exist there.
    pub fn rebase(mut self, onto: &Network) -> Diff {
        let before = self.weight_deltas.len() + self.history_deltas.len();
        self.weight_deltas.retain(|id, _| onto.synapses.contains_key(id));
        self.history_deltas
            .retain(|id, _| onto.synapses.contains_key(id));
        let dropped = before - self.weight_deltas.len() - self.history_deltas.len();
        if dropped > 0 {
            debug!(
                dropped,
                from = self.base_generation,
                to = onto.generation,
                "rebase dropped deltas"
            );
        }
        self.base_generation = onto.generation;
        self
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "diff against generation {}", self.base_generation)?;
        writeln!(f, "added cells: {}", self.added_cells.len())?;
        for (id, cell) in &self.added_cells {
            match &cell.tag {
                Some(tag) => writeln!(f, "  + cell {id} ({tag})")?,
                None => writeln!(f, "  + cell {id}")?,
            }
        }
        writeln!(f, "added synapses: {}", self.added_synapses.len())?;
        for s in &self.added_synapses {
            writeln!(f, "  + synapse {} {} -> {} {}mV", s.id, s.from, s.to, s.millivolts)?;
        }
        writeln!(f, "weight deltas: {}", self.weight_deltas.len())?;
        for (id, delta) in &self.weight_deltas {
            writeln!(f, "  ~ synapse {id} {delta:+}mV")?;
        }
        writeln!(f, "history deltas: {}", self.history_deltas.len())?;
        for (id, delta) in &self.history_deltas {
            writeln!(f, "  ~ synapse {id} +{delta} activations")?;
        }
        Ok(())
    }
}

impl Network {
    /// Apply `diff` onto this network.
    ///
    /// Cells go in first, then synapses, then weight deltas, then history.
    /// Colliding IDs are re-keyed and endpoints remapped. Synapses whose
    /// endpoints are missing here are skipped. Bumps the generation.
    pub fn apply_diff(&mut self, diff: &Diff) -> Result<ApplyReport> {
        if diff.base_generation != self.generation {
            return Err(NetworkError::StaleDiff {
                diff: diff.base_generation,
                baseline: self.generation,
            });
        }

        let mut report = ApplyReport::default();
        let resting = self.cfg.resting_voltage;

        let mut cell_map: HashMap<CellId, CellId> = HashMap::new();
        for (&id, cell) in &diff.added_cells {
            let target = if self.cells.contains_key(&id) {
                report.cells_rekeyed += 1;
                self.fresh_cell_id()
            } else {
                id
            };
            let mut fresh = Cell::new(target, resting);
            fresh.immortal = cell.immortal;
            fresh.tag = cell.tag.clone();
            self.cells.insert(target, fresh);
            cell_map.insert(id, target);
            report.cells_added += 1;
        }

        for synapse in &diff.added_synapses {
            let from = cell_map.get(&synapse.from).copied().unwrap_or(synapse.from);
            let to = cell_map.get(&synapse.to).copied().unwrap_or(synapse.to);
            if !self.cells.contains_key(&from) || !self.cells.contains_key(&to) {
                warn!(synapse = %synapse.id, "skipping added synapse with missing endpoint");
                report.skipped += 1;
                continue;
            }
            let id = if self.synapses.contains_key(&synapse.id) {
                report.synapses_rekeyed += 1;
                self.fresh_synapse_id()
            } else {
                synapse.id
            };
            let mut added = Synapse::new(id, from, to, synapse.millivolts);
            added.activation_history = synapse.activation_history;
            self.insert_synapse(added);
            report.synapses_added += 1;
        }

        for (id, &delta) in &diff.weight_deltas {
            match self.synapses.get_mut(id) {
                Some(synapse) => {
                    let mv = (i32::from(synapse.millivolts) + delta)
                        .clamp(i32::from(ACTUAL_SYNAPSE_MIN), i32::from(ACTUAL_SYNAPSE_MAX));
                    synapse.millivolts = mv as Millivolts;
                    report.weights_adjusted += 1;
                }
                None => report.skipped += 1,
            }
        }

        for (id, &extra) in &diff.history_deltas {
            match self.synapses.get_mut(id) {
                Some(synapse) => {
                    synapse.activation_history = synapse.activation_history.saturating_add(extra);
                    report.histories_added += 1;
                }
                None => report.skipped += 1,
            }
        }

        // Added cells whose synapses all failed to attach cannot stay.
        for target in cell_map.values() {
            if self.cells.get(target).is_some_and(|c| c.is_orphan()) {
                self.cells.remove(target);
                report.cells_added -= 1;
                report.skipped += 1;
            }
        }

        self.generation += 1;
        debug!(
            generation = self.generation,
            cells = report.cells_added,
            synapses = report.synapses_added,
            weights = report.weights_adjusted,
            rekeyed = report.cells_rekeyed + report.synapses_rekeyed,
            skipped = report.skipped,
            "applied diff"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    fn baseline() -> Network {
        let mut net = Network::with_config(NetworkConfig::default().with_seed(9)).unwrap();
        net.grow(12, 3, 10);
        net
    }

    /// Compare weights and topology, allowing re-keyed IDs.
    fn topology(net: &Network) -> Vec<(Option<String>, Option<String>, Millivolts)> {
        let mut edges: Vec<_> = net
            .synapses()
            .map(|s| {
                let tag = |id| net.cell(id).ok().and_then(|c| c.tag.clone());
                (tag(s.from()), tag(s.to()), s.millivolts)
            })
            .collect();
        edges.sort();
        edges
    }

    fn tag_all(net: &mut Network) {
        for (i, id) in net.cell_ids().into_iter().enumerate() {
            net.cell_mut(id).unwrap().tag = Some(format!("{i:04}"));
        }
    }

    #[test]
    fn identical_networks_have_empty_diff() {
        let base = baseline();
        let diff = Diff::between(&base, &base.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn round_trip_reproduces_evolved_network() {
        let base = baseline();
        let mut evolved = base.clone();
        evolved.reseed(77);
        evolved.grow(5, 2, 6);
        let some = evolved.synapse_ids()[0];
        evolved.reinforce_synapse(some).unwrap();
        evolved.synapse_mut(some).unwrap().activation_history = 4;

        let diff = Diff::between(&base, &evolved);
        assert_eq!(diff.added_cells.len(), 5);
        assert!(diff.weight_deltas.contains_key(&some) || diff.added_synapses.iter().any(|s| s.id() == some));

        let mut merged = base.clone();
        let report = merged.apply_diff(&diff).unwrap();
        assert_eq!(report.skipped, 0);

        assert_eq!(merged.cell_count(), evolved.cell_count());
        assert_eq!(merged.synapse_count(), evolved.synapse_count());
        for s in evolved.synapses() {
            let m = merged.synapse(s.id()).unwrap();
            assert_eq!(m.millivolts, s.millivolts);
            assert_eq!((m.from(), m.to()), (s.from(), s.to()));
        }
        assert!(merged.check_integrity().is_ok());
        assert_eq!(merged.generation(), base.generation() + 1);
    }

    #[test]
    fn round_trip_carries_splits_but_not_removals() {
        let base = baseline();
        let mut evolved = base.clone();
        evolved.reseed(31);
        let ids = evolved.synapse_ids();
        let (strong, doomed) = (ids[0], ids[1]);

        evolved.synapse_mut(strong).unwrap().millivolts = ACTUAL_SYNAPSE_MAX - 1;
        let split = evolved.reinforce_synapse(strong).unwrap().unwrap();
        evolved.prune_synapse(doomed).unwrap();
        evolved.prune();

        let diff = Diff::between(&base, &evolved);
        assert!(diff.added_synapses.iter().any(|s| s.id() == split));

        let mut merged = base.clone();
        merged.apply_diff(&diff).unwrap();
        assert!(merged.check_integrity().is_ok());

        for s in evolved.synapses() {
            let m = merged.synapse(s.id()).unwrap();
            assert_eq!(m.millivolts, s.millivolts);
            assert_eq!((m.from(), m.to()), (s.from(), s.to()));
        }
        // Removals stay local to the clone.
        assert!(merged.synapse(doomed).is_ok());
        assert_eq!(merged.synapse_count(), base.synapse_count() + 1);
        assert_eq!(merged.cell_count(), base.cell_count());
    }

    #[test]
    fn stale_diff_is_rejected_then_rebased() {
        let mut base = baseline();
        let mut a = base.clone();
        let mut b = base.clone();
        a.reseed(100);
        b.reseed(200);
        a.grow(2, 2, 2);
        b.grow(3, 2, 2);
        let diff_a = Diff::between(&base, &a);
        let diff_b = Diff::between(&base, &b);

        base.apply_diff(&diff_a).unwrap();
        assert!(matches!(
            base.apply_diff(&diff_b),
            Err(NetworkError::StaleDiff { diff: 0, baseline: 1 })
        ));

        let rebased = diff_b.rebase(&base);
        assert_eq!(rebased.base_generation, 1);
        base.apply_diff(&rebased).unwrap();
        assert_eq!(base.cell_count(), 12 + 2 + 3);
        assert!(base.check_integrity().is_ok());
    }

    #[test]
    fn weight_deltas_from_parallel_clones_accumulate() {
        let mut base = baseline();
        let target = base.synapse_ids()[0];
        let start = base.synapse(target).unwrap().millivolts;

        let mut a = base.clone();
        let mut b = base.clone();
        a.synapse_mut(target).unwrap().millivolts = start + 10;
        b.synapse_mut(target).unwrap().millivolts = start - 4;

        let diff_a = Diff::between(&base, &a);
        let diff_b = Diff::between(&base, &b);
        base.apply_diff(&diff_a).unwrap();
        base.apply_diff(&diff_b.rebase(&base)).unwrap();
        assert_eq!(base.synapse(target).unwrap().millivolts, start + 6);
    }

    #[test]
    fn colliding_ids_are_rekeyed_with_topology_preserved() {
        let mut base = baseline();
        tag_all(&mut base);
        // Same seed on both clones forces identical fresh IDs.
        let mut a = base.clone();
        let mut b = base.clone();
        a.reseed(5);
        b.reseed(5);
        let a1 = a.add_tagged_cell("a1");
        let a2 = a.add_tagged_cell("a2");
        a.link_cells_with_weight(a1, a2, 40).unwrap();
        let b1 = b.add_tagged_cell("b1");
        let b2 = b.add_tagged_cell("b2");
        b.link_cells_with_weight(b1, b2, -40).unwrap();
        assert_eq!(a1, b1);

        let diff_a = Diff::between(&base, &a);
        let diff_b = Diff::between(&base, &b);
        base.apply_diff(&diff_a).unwrap();
        let report = base.apply_diff(&diff_b.rebase(&base)).unwrap();

        assert_eq!(report.cells_rekeyed, 2);
        assert_eq!(report.synapses_rekeyed, 1);
        assert!(base.check_integrity().is_ok());
        let edges = topology(&base);
        assert!(edges.contains(&(Some("a1".into()), Some("a2".into()), 40)));
        assert!(edges.contains(&(Some("b1".into()), Some("b2".into()), -40)));
    }

    #[test]
    fn synapse_with_changed_endpoints_counts_as_new() {
        let base = baseline();
        let mut evolved = base.clone();
        let id = evolved.synapse_ids()[0];
        let cells = evolved.cell_ids();
        let old = evolved.remove_synapse(id).unwrap();
        let other = cells.iter().copied().find(|&c| c != old.to() && c != old.from()).unwrap();
        evolved.insert_synapse(Synapse::new(id, old.from(), other, old.millivolts));

        let diff = Diff::between(&base, &evolved);
        assert_eq!(diff.added_synapses.len(), 1);
        assert!(!diff.weight_deltas.contains_key(&id));

        let mut merged = base.clone();
        let report = merged.apply_diff(&diff).unwrap();
        assert_eq!(report.synapses_rekeyed, 1);
        assert_eq!(merged.synapse_count(), base.synapse_count() + 1);
    }

    #[test]
    fn missing_endpoints_are_skipped() {
        let mut base = baseline();
        let mut evolved = base.clone();
        let a = evolved.cell_ids()[0];
        let b = evolved.cell_ids()[1];
        evolved.link_cells_with_weight(a, b, 10).unwrap();
        let diff = Diff::between(&base, &evolved);

        // The baseline loses `a` before the diff lands.
        base.prune_cell(a).unwrap();
        let report = base.apply_diff(&diff).unwrap();
        assert_eq!(report.synapses_added, 0);
        assert_eq!(report.skipped, 1);
        assert!(base.check_integrity().is_ok());
    }

    #[test]
    fn display_lists_changes() {
        let base = baseline();
        let mut evolved = base.clone();
        let c = evolved.add_tagged_cell("fresh");
        let existing = evolved.cell_ids()[0];
        evolved.link_cells_with_weight(existing, c, 12).unwrap();
        let text = Diff::between(&base, &evolved).to_string();
        assert!(text.contains("added cells: 1"));
        assert!(text.contains("(fresh)"));
        assert!(text.contains("12mV"));
    }
}
