//! Level-synchronous fan-out walk shared by path forging and backtrace.
//!
//! Every frontier cell of a level is expanded by its own task; tasks of a
//! level are joined before the next level starts. With the `parallel`
//! feature the tasks of a level run on rayon, otherwise serially. A single
//! locked visited set guarantees each cell is expanded by exactly one task,
//! so cycles terminate.

use std::sync::Mutex;

use hashbrown::HashSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::network::{CellId, SynapseId};

/// What expanding one cell yields for one of its synapses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WalkStep {
    /// Synapse to report to the caller.
    pub record: Option<SynapseId>,
    /// Cell to expand on the next level, unless already visited.
    pub follow: Option<CellId>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct WalkOutcome {
    pub recorded: Vec<SynapseId>,
    /// Every cell reached, roots included, sorted.
    pub visited: Vec<CellId>,
    /// Deepest non-empty level reached, sorted. The roots if nothing was
    /// reached past them.
    pub frontier: Vec<CellId>,
    /// Levels expanded.
    pub depth: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Walker {
    pub max_depth: usize,
    /// Upper bound on the pieces one level is split into under rayon.
    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    pub threads: usize,
    /// Stop after the first level that brings the record count to this.
    pub target: Option<usize>,
}

impl Walker {
    pub fn new(max_depth: usize, threads: usize) -> Self {
        Self {
            max_depth,
            threads: threads.max(1),
            target: None,
        }
    }

    pub fn with_target(mut self, target: usize) -> Self {
        self.target = Some(target);
        self
    }

    fn target_met(&self, found: usize) -> bool {
        self.target.is_some_and(|t| found >= t)
    }

    pub fn run<F>(&self, roots: &[CellId], expand: F) -> WalkOutcome
    where
        F: Fn(CellId) -> Vec<WalkStep> + Sync,
    {
        let visited: Mutex<HashSet<CellId>> = Mutex::new(roots.iter().copied().collect());
        let mut frontier: Vec<CellId> = roots.to_vec();
        frontier.sort_unstable();
        frontier.dedup();

        let mut recorded = Vec::new();
        let mut depth = 0;
        let mut last_level = frontier.clone();

        while !frontier.is_empty() && depth < self.max_depth && !self.target_met(recorded.len()) {
            depth += 1;

            let task = |cell: CellId| -> (Vec<SynapseId>, Vec<CellId>) {
                let mut records = Vec::new();
                let mut next = Vec::new();
                for step in expand(cell) {
                    if let Some(synapse) = step.record {
                        records.push(synapse);
                    }
                    if let Some(to) = step.follow {
                        let fresh = visited
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .insert(to);
                        if fresh {
                            next.push(to);
                        }
                    }
                }
                (records, next)
            };

            let mut next_frontier = Vec::new();
            for (records, next) in self.fan_out(&frontier, &task) {
                recorded.extend(records);
                next_frontier.extend(next);
            }
            // Membership is schedule independent; order is made so.
            next_frontier.sort_unstable();
            last_level = std::mem::replace(&mut frontier, next_frontier);
        }
        if frontier.is_empty() {
            frontier = last_level;
        }

        recorded.sort_unstable();
        recorded.dedup();
        let mut visited: Vec<CellId> = visited
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .collect();
        visited.sort_unstable();

        WalkOutcome {
            recorded,
            visited,
            frontier,
            depth,
        }
    }

    /// Expand one level. With `parallel`, rayon splits the frontier into at
    /// most `threads` pieces; otherwise the level runs on the caller's thread.
    #[cfg(feature = "parallel")]
    fn fan_out<T, F>(&self, frontier: &[CellId], task: &F) -> Vec<T>
    where
        F: Fn(CellId) -> T + Sync,
        T: Send,
    {
        if frontier.len() <= 1 || self.threads <= 1 {
            return frontier.iter().map(|&cell| task(cell)).collect();
        }
        let chunk = frontier.len().div_ceil(self.threads);
        frontier
            .par_iter()
            .with_min_len(chunk)
            .map(|&cell| task(cell))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn fan_out<T, F>(&self, frontier: &[CellId], task: &F) -> Vec<T>
    where
        F: Fn(CellId) -> T + Sync,
        T: Send,
    {
        frontier.iter().map(|&cell| task(cell)).collect()
    }
}
