//! Firing patterns: which cells fired, how often, during one stimulation.

use hashbrown::HashMap;

use crate::error::Result;
use crate::network::{CellId, Network};

/// Fire count per cell for one stimulation run. Not part of network state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FiringPattern {
    counts: HashMap<CellId, u32>,
}

impl FiringPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, cell: CellId) {
        *self.counts.entry(cell).or_insert(0) += 1;
    }

    pub fn count(&self, cell: CellId) -> u32 {
        self.counts.get(&cell).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellId, u32)> + '_ {
        self.counts.iter().map(|(&id, &n)| (id, n))
    }

    /// Cells in ascending ID order.
    pub fn cells(&self) -> Vec<CellId> {
        let mut cells: Vec<CellId> = self.counts.keys().copied().collect();
        cells.sort_unstable();
        cells
    }

    /// Compare against `other`.
    pub fn diff(&self, other: &FiringPattern) -> FiringPatternDiff {
        let mut diff = FiringPatternDiff::default();
        for (&cell, &a) in &self.counts {
            match other.counts.get(&cell) {
                Some(&b) => {
                    diff.shared.insert(cell, a.min(b));
                    if a != b {
                        diff.unshared.insert(cell, a.abs_diff(b));
                    }
                    diff.total += u64::from(a.max(b));
                }
                None => {
                    diff.unshared.insert(cell, a);
                    diff.total += u64::from(a);
                }
            }
        }
        for (&cell, &b) in &other.counts {
            if !self.counts.contains_key(&cell) {
                diff.unshared.insert(cell, b);
                diff.total += u64::from(b);
            }
        }
        diff
    }

    /// `(total - unshared) / total`; `None` when both patterns are empty.
    pub fn similarity(&self, other: &FiringPattern) -> Option<f64> {
        self.diff(other).ratio()
    }

    /// Whether the two patterns overlap beyond `limit`.
    pub fn too_similar(&self, other: &FiringPattern, limit: f64) -> bool {
        self.similarity(other).is_some_and(|r| r > limit)
    }

    /// Average shared counts, keep unshared ones.
    pub fn merge(&self, other: &FiringPattern) -> FiringPattern {
        let mut merged = self.clone();
        for (&cell, &b) in &other.counts {
            merged
                .counts
                .entry(cell)
                .and_modify(|a| *a = (*a + b) / 2)
                .or_insert(b);
        }
        merged
    }
}

impl FromIterator<(CellId, u32)> for FiringPattern {
    fn from_iter<I: IntoIterator<Item = (CellId, u32)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().collect(),
        }
    }
}

/// Overlap between two firing patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FiringPatternDiff {
    /// Per cell in both patterns: the smaller count.
    pub shared: HashMap<CellId, u32>,
    /// Per cell: count difference, or the whole count if only one pattern has it.
    pub unshared: HashMap<CellId, u32>,
    /// Sum of per-cell maxima.
    pub total: u64,
}

impl FiringPatternDiff {
    pub fn unshared_total(&self) -> u64 {
        self.unshared.values().map(|&n| u64::from(n)).sum()
    }

    pub fn ratio(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let unshared = self.unshared_total();
        Some((self.total - unshared) as f64 / self.total as f64)
    }
}

/// The candidate most similar to `observed`, with its similarity.
pub fn closest<'a, K, I>(observed: &FiringPattern, candidates: I) -> Option<(K, f64)>
where
    I: IntoIterator<Item = (K, &'a FiringPattern)>,
{
    let mut best: Option<(K, f64)> = None;
    for (key, pattern) in candidates {
        let Some(score) = observed.similarity(pattern) else {
            continue;
        };
        if best.as_ref().map_or(true, |(_, s)| score > *s) {
            best = Some((key, score));
        }
    }
    best
}

impl Network {
    /// Fire `seeds` and step until quiet or `max_post_fire_steps` ticks,
    /// counting every firing (seeds included).
    pub fn fire_until_done(&mut self, seeds: &[CellId]) -> Result<FiringPattern> {
        let mut pattern = FiringPattern::new();
        for &seed in seeds {
            self.fire_cell(seed)?;
            pattern.record(seed);
        }
        for _ in 0..self.cfg.max_post_fire_steps {
            let more = self.step();
            // Cells that fired this tick are the ones queued for reset.
            for &cell in &self.reset_cells_on_next_step {
                pattern.record(cell);
            }
            if !more {
                break;
            }
        }
        Ok(pattern)
    }
}
