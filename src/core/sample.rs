//! Sampling: stimulate seed cells and collect which output cells fire.
//!
//! Output firings arrive through fire observers on a channel. A collector
//! thread races them against a wall-clock deadline, an optional end cell and
//! an output cap, while the caller's thread drives the simulation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;
use crate::network::{CellId, Network};

#[derive(Debug, Clone)]
pub struct SampleRequest {
    /// Fired one per tick, in order.
    pub seeds: Vec<CellId>,
    /// Cells whose firings are collected.
    pub outputs: Vec<CellId>,
    /// Firing of this cell ends collection; it is not reported.
    pub end: Option<CellId>,
    pub max_outputs: usize,
    pub max_steps: usize,
    pub timeout: Duration,
}

impl SampleRequest {
    /// Defaults taken from the network's config.
    pub fn new(net: &Network, seeds: Vec<CellId>, outputs: Vec<CellId>) -> Self {
        let cfg = net.config();
        Self {
            max_steps: seeds.len() + cfg.max_post_fire_steps,
            seeds,
            outputs,
            end: None,
            max_outputs: usize::MAX,
            timeout: Duration::from_millis(cfg.sample_timeout_ms),
        }
    }

    pub fn with_end(mut self, end: CellId) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_max_outputs(mut self, max: usize) -> Self {
        self.max_outputs = max;
        self
    }

    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleResult {
    /// Output firings in the order they happened.
    pub outputs: Vec<CellId>,
    /// The deadline passed before anything else ended collection.
    pub timed_out: bool,
    /// The end cell fired.
    pub ended: bool,
    pub steps: usize,
}

/// Run one sampling pass over `net`.
///
/// The network is reset first; afterwards its observers are cleared and it is
/// reset again, so no sampling state leaks into training.
pub fn sample(net: &mut Network, req: &SampleRequest) -> Result<SampleResult> {
    for &cell in req.seeds.iter().chain(&req.outputs).chain(&req.end) {
        net.cell(cell)?;
    }
    net.reset_for_training();

    let (tx, rx) = mpsc::channel::<CellId>();
    let mut observed = req.outputs.clone();
    observed.extend(req.end);
    observed.sort_unstable();
    observed.dedup();
    for cell in observed {
        let tx = tx.clone();
        net.observe_cell(
            cell,
            Arc::new(move |id| {
                let _ = tx.send(id);
            }),
        )?;
    }
    drop(tx);

    let done = AtomicBool::new(false);
    let deadline = Instant::now() + req.timeout;
    let end = req.end;
    let max_outputs = req.max_outputs;

    let result = thread::scope(|scope| {
        let done = &done;
        let collector = scope.spawn(move || {
            let mut result = SampleResult::default();
            while result.outputs.len() < max_outputs {
                let now = Instant::now();
                if now >= deadline {
                    result.timed_out = true;
                    break;
                }
                let wait = deadline.saturating_duration_since(now);
                match rx.recv_timeout(wait) {
                    Ok(id) if Some(id) == end => {
                        result.ended = true;
                        break;
                    }
                    Ok(id) => result.outputs.push(id),
                    Err(RecvTimeoutError::Timeout) => {
                        result.timed_out = true;
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            done.store(true, Ordering::Release);
            result
        });

        let mut steps = 0;
        let mut seeds = req.seeds.iter();
        while steps < req.max_steps && !done.load(Ordering::Acquire) {
            let seeded = match seeds.next() {
                Some(&seed) => net.fire_cell(seed).is_ok(),
                None => false,
            };
            steps += 1;
            if !net.step() && !seeded && seeds.len() == 0 {
                break;
            }
        }

        // Dropping the observers closes the channel.
        net.disabled = true;
        net.clear_observers();

        let mut result = collector
            .join()
            .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
        result.steps = steps;
        result
    });

    net.reset_for_training();
    debug!(
        outputs = result.outputs.len(),
        steps = result.steps,
        timed_out = result.timed_out,
        ended = result.ended,
        "sampled network"
    );
    Ok(result)
}
