use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::consolidation::ConsolidationReport;
use crate::diff::{ApplyReport, Diff};
use crate::error::Result;
use crate::network::{CellId, Network};
use crate::prune::PruneReport;
use crate::trainer::{SampleOutcome, TrainingSample, TrainingSettings};

/// A private clone of the baseline, trained on its own batch.
#[derive(Debug, Clone)]
pub struct Worker {
    pub name: String,
    pub id: u64,
    pub network: Network,
    /// Samples still to train this round.
    pub queue: Vec<TrainingSample>,
    /// Samples trained over the worker's lifetime.
    pub trained: usize,
    pub last: SampleOutcome,
}

/// What one train/reconcile/prune round did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u64,
    pub workers: usize,
    pub samples: usize,
    pub outcome: SampleOutcome,
    pub diffs_applied: usize,
    /// Diffs that went stale behind an earlier worker's and were rebased.
    pub rebased: usize,
    pub merged: ApplyReport,
    pub pruned: PruneReport,
    pub consolidated: ConsolidationReport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainingReport {
    pub rounds: u64,
    pub samples: usize,
    pub outcome: SampleOutcome,
    /// The stop flag ended training before all samples were seen.
    pub stopped: bool,
}

pub struct Supervisor {
    pub baseline: Network,
    pub workers: Vec<Worker>,

    max_parallelism: usize,
    rounds: u64,
    next_worker_id: u64,
}

impl Supervisor {
    pub fn new(baseline: Network) -> Self {
        Self {
            baseline,
            workers: Vec::new(),
            max_parallelism: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            rounds: 0,
            next_worker_id: 1,
        }
    }

    /// Upper bound on OS threads used when training workers.
    /// `1` trains them one after another on the caller's thread.
    pub fn set_max_parallelism(&mut self, threads: usize) {
        self.max_parallelism = threads.max(1);
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn into_baseline(self) -> Network {
        self.baseline
    }

    /// Replace the workers with `count` fresh clones of the baseline, each
    /// reseeded so their new IDs do not collide.
    pub fn spawn_workers(&mut self, count: usize) {
        self.workers.clear();
        for _ in 0..count {
            let mut network = self.baseline.clone();
            network.reseed(self.baseline.rng.next_u64());

            let id = self.next_worker_id;
            self.next_worker_id = self.next_worker_id.wrapping_add(1);

            self.workers.push(Worker {
                name: format!("worker-{id}"),
                id,
                network,
                queue: Vec::new(),
                trained: 0,
                last: SampleOutcome::default(),
            });
        }
    }

    /// Train one batch per worker in parallel, merge every worker back into
    /// the baseline, then prune and consolidate the baseline.
    pub fn train_round(
        &mut self,
        batches: Vec<Vec<TrainingSample>>,
        outputs: &BTreeSet<CellId>,
    ) -> Result<RoundReport> {
        self.spawn_workers(batches.len());
        let mut report = RoundReport {
            round: self.rounds + 1,
            workers: batches.len(),
            ..Default::default()
        };
        for (worker, batch) in self.workers.iter_mut().zip(batches) {
            report.samples += batch.len();
            worker.queue = batch;
        }

        self.train_workers(outputs)?;
        for worker in &self.workers {
            report.outcome += worker.last;
        }

        self.reconcile(&mut report)?;
        report.pruned = self.baseline.prune();
        report.consolidated = self.baseline.consolidate_duplicates();
        self.rounds += 1;

        info!(
            round = report.round,
            samples = report.samples,
            hits = report.outcome.hits,
            misses = report.outcome.misses,
            diffs = report.diffs_applied,
            totals = %self.baseline.totals(),
            "training round done"
        );
        Ok(report)
    }

    /// Run every sample in `settings` through rounds of
    /// `settings.threads` workers, each taking `samples_between_merges`.
    pub fn train(&mut self, settings: &TrainingSettings) -> Result<TrainingReport> {
        self.train_until(settings, &AtomicBool::new(false))
    }

    /// Like [`Supervisor::train`], checking `stop` before each round. The
    /// baseline always holds every completed round.
    pub fn train_until(
        &mut self,
        settings: &TrainingSettings,
        stop: &AtomicBool,
    ) -> Result<TrainingReport> {
        let threads = settings.threads.max(1);
        let per_worker = self.baseline.config().samples_between_merges.max(1);
        let mut report = TrainingReport::default();

        for round in settings.samples.chunks(threads * per_worker) {
            if stop.load(Ordering::Acquire) {
                report.stopped = true;
                info!(rounds = report.rounds, "training stopped");
                break;
            }
            let batches = round.chunks(per_worker).map(<[_]>::to_vec).collect();
            let done = self.train_round(batches, &settings.output_cells)?;
            report.rounds += 1;
            report.samples += done.samples;
            report.outcome += done.outcome;
        }
        Ok(report)
    }

    fn train_workers(&mut self, outputs: &BTreeSet<CellId>) -> Result<()> {
        let live = self.workers.iter().filter(|w| !w.queue.is_empty()).count();
        if live <= 1 || self.max_parallelism <= 1 {
            for worker in &mut self.workers {
                train_one_worker(worker, outputs)?;
            }
            return Ok(());
        }

        let threads = self.max_parallelism.min(self.workers.len()).max(1);
        let chunk = self.workers.len().div_ceil(threads);

        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .workers
                .chunks_mut(chunk)
                .map(|segment| {
                    scope.spawn(move || {
                        segment
                            .iter_mut()
                            .try_for_each(|worker| train_one_worker(worker, outputs))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
                .collect()
        });
        results.into_iter().collect()
    }

    /// Apply each worker's diff to the baseline, one at a time.
    ///
    /// All diffs are taken against the untouched baseline first; every one
    /// after the first is therefore stale and gets rebased. An integrity
    /// failure after any apply ends the round with an error.
    fn reconcile(&mut self, report: &mut RoundReport) -> Result<()> {
        let diffs: Vec<Diff> = self
            .workers
            .iter()
            .map(|w| Diff::between(&self.baseline, &w.network))
            .collect();

        for (worker, diff) in self.workers.iter().zip(diffs) {
            if diff.is_empty() {
                continue;
            }
            let diff = if diff.base_generation == self.baseline.generation() {
                diff
            } else {
                report.rebased += 1;
                diff.rebase(&self.baseline)
            };
            let applied = self.baseline.apply_diff(&diff)?;
            self.baseline.verify_integrity()?;
            debug!(
                worker = %worker.name,
                cells = applied.cells_added,
                synapses = applied.synapses_added,
                weights = applied.weights_adjusted,
                generation = self.baseline.generation(),
                "merged worker"
            );
            report.merged += applied;
            report.diffs_applied += 1;
        }
        Ok(())
    }
}

fn train_one_worker(worker: &mut Worker, outputs: &BTreeSet<CellId>) -> Result<()> {
    let queue = std::mem::take(&mut worker.queue);
    worker.last = worker.network.train_samples(&queue, outputs)?;
    worker.trained += queue.len();
    Ok(())
}
