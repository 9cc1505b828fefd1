use crate::network::{Network, NetworkTotals};
use crate::supervisor::Supervisor;
use crate::trainer::SampleOutcome;

/// A read-only snapshot of a network's shape.
///
/// Observers cannot mutate or steer the network. Snapshotting is on-demand
/// and walks every cell and synapse, so keep it out of hot loops.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSnapshot {
    pub totals: NetworkTotals,
    pub immortal_cells: usize,
    pub tagged_cells: usize,
    pub excitatory_synapses: usize,
    pub inhibitory_synapses: usize,
    /// Synapses with a weight of exactly zero, awaiting removal.
    pub silent_synapses: usize,
    pub generation: u64,
    pub disabled: bool,
    /// Number of dangling references; zero for a healthy network.
    pub integrity_problems: usize,
}

impl NetworkSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.integrity_problems == 0
    }
}

pub struct NetworkAdapter<'a> {
    net: &'a Network,
}

impl<'a> NetworkAdapter<'a> {
    pub fn new(net: &'a Network) -> Self {
        Self { net }
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        let mut snap = NetworkSnapshot {
            totals: self.net.totals(),
            immortal_cells: 0,
            tagged_cells: 0,
            excitatory_synapses: 0,
            inhibitory_synapses: 0,
            silent_synapses: 0,
            generation: self.net.generation(),
            disabled: self.net.disabled,
            integrity_problems: self.net.check_integrity().len(),
        };
        for cell in self.net.cells() {
            snap.immortal_cells += usize::from(cell.immortal);
            snap.tagged_cells += usize::from(cell.tag.is_some());
        }
        for synapse in self.net.synapses() {
            if synapse.is_excitatory() {
                snap.excitatory_synapses += 1;
            } else if synapse.is_inhibitory() {
                snap.inhibitory_synapses += 1;
            } else {
                snap.silent_synapses += 1;
            }
        }
        snap
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSnapshot {
    pub baseline: NetworkSnapshot,
    pub rounds: u64,
    pub workers: Vec<WorkerSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSnapshot {
    pub name: String,
    pub id: u64,
    pub queued: usize,
    pub trained: usize,
    pub last: SampleOutcome,
    pub totals: NetworkTotals,
}

pub struct SupervisorAdapter<'a> {
    sup: &'a Supervisor,
}

impl<'a> SupervisorAdapter<'a> {
    pub fn new(sup: &'a Supervisor) -> Self {
        Self { sup }
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        let baseline = NetworkAdapter::new(&self.sup.baseline).snapshot();
        let workers = self
            .sup
            .workers
            .iter()
            .map(|w| WorkerSnapshot {
                name: w.name.clone(),
                id: w.id,
                queued: w.queue.len(),
                trained: w.trained,
                last: w.last,
                totals: w.network.totals(),
            })
            .collect();

        SupervisorSnapshot {
            baseline,
            rounds: self.sup.rounds(),
            workers,
        }
    }
}
