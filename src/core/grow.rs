//! Structural growth: random cells/synapses and goal-directed path forging.

use tracing::debug;

use crate::config::Millivolts;
use crate::error::Result;
use crate::network::{CellId, Network, Synapse, SynapseId};
use crate::walk::{WalkStep, Walker};

/// Counts from one `grow` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrowthReport {
    pub cells_added: usize,
    pub synapses_added: usize,
}

/// Result of forging a path between two cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathGrowth {
    /// Existing excitatory synapses into the end cell reached from the start.
    pub found: Vec<SynapseId>,
    /// Synapses forged to make up the shortfall.
    pub added: Vec<SynapseId>,
    /// Forged routes into the end cell; each carries one synapse into it.
    pub routes: usize,
    /// Cells the search reached, `start` included.
    pub reached: usize,
    /// Levels searched.
    pub depth: usize,
    /// Good-path synapses reinforced afterwards.
    pub reinforced: usize,
}

impl Network {
    /// Add `cells` unconnected cells, then attach each of them to
    /// `synapses_per_cell` random other cells.
    ///
    /// The direction of every attachment is a coin flip, so new cells are not
    /// biased toward being sources.
    pub fn grow_random_neurons(&mut self, cells: usize, synapses_per_cell: usize) -> GrowthReport {
        let added: Vec<CellId> = (0..cells).map(|_| self.add_cell()).collect();
        let mut report = GrowthReport {
            cells_added: added.len(),
            synapses_added: 0,
        };
        if self.cells.len() < 2 {
            return report;
        }

        let ids = self.cell_ids();
        for &cell in &added {
            for _ in 0..synapses_per_cell {
                let Some(other) = self.pick_other(&ids, cell) else {
                    break;
                };
                let mv = self.random_new_synapse_mv();
                if self.rng.gen_bool() {
                    self.link_existing(cell, other, mv);
                } else {
                    self.link_existing(other, cell, mv);
                }
                report.synapses_added += 1;
            }
        }
        report
    }

    /// Add `count` random synapses between existing cells, never a self-loop.
    pub fn grow_random_synapses(&mut self, count: usize) -> usize {
        if self.cells.len() < 2 {
            return 0;
        }
        let ids = self.cell_ids();
        let mut added = 0;
        for _ in 0..count {
            let Some(&from) = self.rng.pick(&ids) else {
                break;
            };
            let Some(to) = self.pick_other(&ids, from) else {
                break;
            };
            let mv = self.random_new_synapse_mv();
            self.link_existing(from, to, mv);
            added += 1;
        }
        added
    }

    /// Random growth: new cells with their synapses, then extra synapses
    /// between any existing cells.
    pub fn grow(&mut self, cells: usize, synapses_per_cell: usize, synapses: usize) -> GrowthReport {
        let mut report = self.grow_random_neurons(cells, synapses_per_cell);
        report.synapses_added += self.grow_random_synapses(synapses);
        debug!(
            cells = report.cells_added,
            synapses = report.synapses_added,
            "grew network"
        );
        report
    }

    /// Make sure at least `min_synapses` excitatory synapses lead into `end`
    /// from structure reachable from `start`.
    ///
    /// The forward search is bounded by `max_path_depth` and stops after the
    /// first level that meets the target. Each missing synapse becomes a
    /// forged route that starts at a cell of the last level reached. Routes
    /// alternate between linking that cell to `end` directly and going
    /// through a random other cell first. Forged synapses are strong enough to fire their target
    /// from rest. No cells are created. The causal path from `end` back to
    /// `start` is reinforced afterwards.
    pub fn grow_path_between(
        &mut self,
        start: CellId,
        end: CellId,
        min_synapses: usize,
    ) -> Result<PathGrowth> {
        self.cell(start)?;
        self.cell(end)?;

        let walker = Walker::new(self.cfg.max_path_depth, self.cfg.walk_parallelism)
            .with_target(min_synapses);
        let net = &*self;
        let outcome = walker.run(&[start], |cell| {
            let Some(cell) = net.cells.get(&cell) else {
                return Vec::new();
            };
            cell.axons
                .iter()
                .filter_map(|id| net.synapses.get(id))
                .filter(|s| s.is_excitatory())
                .map(|s| {
                    if s.to == end {
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
        });

        let shortfall = min_synapses.saturating_sub(outcome.recorded.len());
        let sources: Vec<CellId> = outcome
            .frontier
            .iter()
            .copied()
            .filter(|&c| c != end)
            .collect();
        let all_cells = self.cell_ids();
        let mv = self.cfg.forged_synapse_mv();

        let mut added = Vec::new();
        let mut routes = 0;
        for i in 0..shortfall {
            let Some(&source) = self.rng.pick(&sources) else {
                break;
            };
            // Every other route detours through a random cell so no single
            // frontier cell becomes the only bridge.
            let via = if i % 2 == 1 {
                self.pick_other_than(&all_cells, &[source, end])
            } else {
                None
            };
            match via {
                Some(via) => {
                    added.push(self.link_existing(source, via, mv));
                    added.push(self.link_existing(via, end, mv));
                }
                None => added.push(self.link_existing(source, end, mv)),
            }
            routes += 1;
        }

        let reinforced = self.reinforce_good_path(end, &[start]);
        debug!(
            found = outcome.recorded.len(),
            added = added.len(),
            routes,
            depth = outcome.depth,
            reinforced,
            "forged path"
        );

        Ok(PathGrowth {
            found: outcome.recorded,
            added,
            routes,
            reached: outcome.visited.len(),
            depth: outcome.depth,
            reinforced,
        })
    }

    /// A random entry of `ids` other than `not`.
    fn pick_other(&mut self, ids: &[CellId], not: CellId) -> Option<CellId> {
        self.pick_other_than(ids, &[not])
    }

    /// A random entry of `ids` not in `excluded`.
    fn pick_other_than(&mut self, ids: &[CellId], excluded: &[CellId]) -> Option<CellId> {
        if !ids.iter().any(|c| !excluded.contains(c)) {
            return None;
        }
        loop {
            let &candidate = self.rng.pick(ids)?;
            if !excluded.contains(&candidate) {
                return Some(candidate);
            }
        }
    }

    /// Link two cells already known to exist.
    pub(crate) fn link_existing(&mut self, from: CellId, to: CellId, mv: Millivolts) -> SynapseId {
        let id = self.fresh_synapse_id();
        self.insert_synapse(Synapse::new(id, from, to, mv));
        id
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::config::NetworkConfig;

    fn seeded() -> Network {
        Network::with_config(NetworkConfig::default().with_seed(42)).unwrap()
    }

    /// start -> m1 -> end and start -> m2 -> end, all excitatory.
    fn two_two_hop_paths() -> (Network, CellId, CellId) {
        let mut net = seeded();
        let start = net.add_cell();
        let m1 = net.add_cell();
        let m2 = net.add_cell();
        let end = net.add_cell();
        net.link_cells_with_weight(start, m1, 50).unwrap();
        net.link_cells_with_weight(m1, end, 50).unwrap();
        net.link_cells_with_weight(start, m2, 50).unwrap();
        net.link_cells_with_weight(m2, end, 50).unwrap();
        (net, start, end)
    }

    #[test]
    fn grow_from_empty_yields_expected_counts() {
        let mut net = seeded();
        let report = net.grow(50, 5, 200);

        assert_eq!(report.cells_added, 50);
        assert_eq!(report.synapses_added, 450);
        assert_eq!(net.cell_count(), 50);
        assert_eq!(net.synapse_count(), 450);
        assert!(net.check_integrity().is_ok());
    }

    #[test]
    fn random_growth_never_self_loops() {
        let mut net = seeded();
        net.grow(20, 4, 300);
        assert!(net.synapses().all(|s| s.from() != s.to()));
    }

    #[test]
    fn new_cells_are_both_senders_and_receivers() {
        let mut net = seeded();
        net.grow_random_neurons(40, 10);
        let sends = net.cells().filter(|c| !c.axons().is_empty()).count();
        let receives = net.cells().filter(|c| !c.dendrites().is_empty()).count();
        assert!(sends > 20);
        assert!(receives > 20);
    }

    #[test]
    fn growth_on_single_cell_adds_no_synapses() {
        let mut net = seeded();
        let report = net.grow(1, 5, 5);
        assert_eq!(report.cells_added, 1);
        assert_eq!(report.synapses_added, 0);
    }

    #[test]
    fn path_already_satisfied_adds_nothing() {
        let (mut net, start, end) = two_two_hop_paths();
        let growth = net.grow_path_between(start, end, 2).unwrap();

        assert_eq!(growth.found.len(), 2);
        assert!(growth.added.is_empty());
        assert_eq!(net.synapse_count(), 4);
    }

    /// Cells reachable from `from` over excitatory synapses.
    fn reachable(net: &Network, from: CellId) -> BTreeSet<CellId> {
        let mut seen = BTreeSet::from([from]);
        let mut queue = vec![from];
        while let Some(cell) = queue.pop() {
            for id in net.cell(cell).unwrap().axons() {
                let s = net.synapse(*id).unwrap();
                if s.is_excitatory() && seen.insert(s.to()) {
                    queue.push(s.to());
                }
            }
        }
        seen
    }

    #[test]
    fn path_shortfall_is_bridged_without_new_cells() {
        let (mut net, start, end) = two_two_hop_paths();
        let growth = net.grow_path_between(start, end, 4).unwrap();

        assert_eq!(growth.found.len(), 2);
        assert_eq!(growth.routes, 2);
        // One direct route, one through a random cell.
        assert_eq!(growth.added.len(), 3);
        assert_eq!(net.cell_count(), 4);
        assert_eq!(net.synapse_count(), 7);
        let into_end = growth
            .added
            .iter()
            .filter(|id| net.synapse(**id).unwrap().to() == end)
            .count();
        assert_eq!(into_end, 2);
        for id in &growth.added {
            let s = net.synapse(*id).unwrap();
            assert_ne!(s.from(), end);
            assert_eq!(s.millivolts, net.config().forged_synapse_mv());
        }
        assert!(net.check_integrity().is_ok());
    }

    #[test]
    fn forged_routes_start_from_cells_reachable_from_start() {
        let mut net = seeded();
        let start = net.add_cell();
        let end = net.add_cell();
        let unrelated: Vec<CellId> = (0..20).map(|_| net.add_cell()).collect();
        for pair in unrelated.windows(2) {
            net.link_cells_with_weight(pair[0], pair[1], 50).unwrap();
        }

        let growth = net.grow_path_between(start, end, 4).unwrap();
        assert_eq!(growth.routes, 4);

        let from_start = reachable(&net, start);
        assert!(from_start.contains(&end));
        for id in &growth.added {
            let s = net.synapse(*id).unwrap();
            assert!(
                from_start.contains(&s.from()),
                "forged synapse {id} starts outside the start cell's reach"
            );
        }
        let live_into_end = net
            .cell(end)
            .unwrap()
            .dendrites()
            .iter()
            .map(|id| net.synapse(*id).unwrap())
            .filter(|s| s.is_excitatory() && from_start.contains(&s.from()))
            .count();
        assert!(live_into_end >= 4);
    }

    #[test]
    fn inhibitory_synapses_are_not_paths() {
        let mut net = seeded();
        let start = net.add_cell();
        let mid = net.add_cell();
        let end = net.add_cell();
        net.link_cells_with_weight(start, mid, -50).unwrap();
        net.link_cells_with_weight(mid, end, 50).unwrap();

        let growth = net.grow_path_between(start, end, 1).unwrap();
        assert!(growth.found.is_empty());
        assert_eq!(growth.added.len(), 1);
        // Only the start cell was reachable.
        assert_eq!(net.synapse(growth.added[0]).unwrap().from(), start);
    }

    #[test]
    fn search_depth_is_bounded() {
        let cfg = NetworkConfig::default().with_seed(3).with_max_path_depth(2);
        let mut net = Network::with_config(cfg).unwrap();
        let cells: Vec<CellId> = (0..5).map(|_| net.add_cell()).collect();
        for pair in cells.windows(2) {
            net.link_cells_with_weight(pair[0], pair[1], 50).unwrap();
        }

        let growth = net.grow_path_between(cells[0], cells[4], 1).unwrap();
        assert!(growth.found.is_empty());
        assert_eq!(growth.depth, 2);
        assert_eq!(growth.added.len(), 1);
    }

    #[test]
    fn cycles_do_not_hang_path_search() {
        let mut net = seeded();
        let a = net.add_cell();
        let b = net.add_cell();
        let c = net.add_cell();
        let end = net.add_cell();
        net.link_cells_with_weight(a, b, 10).unwrap();
        net.link_cells_with_weight(b, c, 10).unwrap();
        net.link_cells_with_weight(c, a, 10).unwrap();

        let growth = net.grow_path_between(a, end, 1).unwrap();
        assert_eq!(growth.added.len(), 1);
        assert!(growth.depth <= 3);
    }

    #[test]
    fn forged_path_fires_end_cell() {
        let mut net = seeded();
        let start = net.add_cell();
        let end = net.add_cell();
        net.grow_path_between(start, end, 1).unwrap();

        net.fire_cell(start).unwrap();
        net.step();
        assert!(net.cell(end).unwrap().was_fired());
    }
}
