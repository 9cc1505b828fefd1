use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use hashbrown::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{Millivolts, NetworkConfig, ACTUAL_SYNAPSE_MAX, ACTUAL_SYNAPSE_MIN};
use crate::error::{NetworkError, Result};
use crate::prng::Prng;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
        pub struct $name(NonZeroU64);

        impl $name {
            /// `None` for the reserved zero value.
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map(Self)
            }

            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl From<NonZeroU64> for $name {
            fn from(v: NonZeroU64) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(
    /// Opaque handle to a [`Cell`]. Zero is never a valid handle.
    CellId
);

opaque_id!(
    /// Opaque handle to a [`Synapse`]. Zero is never a valid handle.
    SynapseId
);

/// Callback run whenever the observed cell fires.
pub type FireObserver = Arc<dyn Fn(CellId) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Observers(Vec<FireObserver>);

impl Observers {
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn notify(&self, id: CellId) {
        for observer in &self.0 {
            observer(id);
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observers({})", self.0.len())
    }
}

/// A node of the network; holds voltage and the IDs of the synapses it
/// sends on (axons) and receives from (dendrites).
#[derive(Debug, Clone)]
pub struct Cell {
    pub(crate) id: CellId,
    pub voltage: Millivolts,
    /// Exempt from pruning regardless of connectivity.
    pub immortal: bool,
    pub tag: Option<String>,

    // Refractory for the tick after firing.
    pub(crate) activating: bool,
    pub(crate) was_fired: bool,

    pub(crate) axons: BTreeSet<SynapseId>,
    pub(crate) dendrites: BTreeSet<SynapseId>,
    pub(crate) observers: Observers,
}

impl Cell {
    pub(crate) fn new(id: CellId, voltage: Millivolts) -> Self {
        Self {
            id,
            voltage,
            immortal: false,
            tag: None,
            activating: false,
            was_fired: false,
            axons: BTreeSet::new(),
            dendrites: BTreeSet::new(),
            observers: Observers::default(),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Outbound synapses.
    pub fn axons(&self) -> &BTreeSet<SynapseId> {
        &self.axons
    }

    /// Inbound synapses.
    pub fn dendrites(&self) -> &BTreeSet<SynapseId> {
        &self.dendrites
    }

    pub fn is_activating(&self) -> bool {
        self.activating
    }

    /// Whether the cell fired since the last `reset_for_training`.
    pub fn was_fired(&self) -> bool {
        self.was_fired
    }

    pub fn has_synapses(&self) -> bool {
        !self.axons.is_empty() || !self.dendrites.is_empty()
    }

    /// A non-immortal cell with no synapses must not stay in the network.
    pub(crate) fn is_orphan(&self) -> bool {
        !self.immortal && !self.has_synapses()
    }
}

/// Directed, weighted edge: `from` cell axon -> `to` cell dendrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synapse {
    pub(crate) id: SynapseId,
    pub millivolts: Millivolts,
    pub(crate) from: CellId,
    pub(crate) to: CellId,
    /// Times this synapse contributed to firing since the last prune.
    pub activation_history: u32,
    pub(crate) fire_next_round: bool,
}

impl Synapse {
    pub(crate) fn new(id: SynapseId, from: CellId, to: CellId, millivolts: Millivolts) -> Self {
        Self {
            id,
            millivolts,
            from,
            to,
            activation_history: 0,
            fire_next_round: false,
        }
    }

    pub fn id(&self) -> SynapseId {
        self.id
    }

    pub fn from(&self) -> CellId {
        self.from
    }

    pub fn to(&self) -> CellId {
        self.to
    }

    pub fn is_excitatory(&self) -> bool {
        self.millivolts > 0
    }

    pub fn is_inhibitory(&self) -> bool {
        self.millivolts < 0
    }
}

/// Basic size figures of a network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkTotals {
    pub cells: usize,
    pub synapses: usize,
    pub avg_synapses_per_cell: f64,
}

impl fmt::Display for NetworkTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cells, {} synapses, {:.2} avg synapses per cell",
            self.cells, self.synapses, self.avg_synapses_per_cell
        )
    }
}

/// The owning aggregate of all cells and synapses.
///
/// Cross references are IDs only. Cloning is deep and keeps every ID.
#[derive(Debug, Clone)]
pub struct Network {
    /// Disabling halts firing so in-flight state can drain.
    pub disabled: bool,

    pub(crate) cells: BTreeMap<CellId, Cell>,
    pub(crate) synapses: BTreeMap<SynapseId, Synapse>,
    pub(crate) reset_cells_on_next_step: HashSet<CellId>,

    pub(crate) cfg: NetworkConfig,
    pub(crate) rng: Prng,
    pub(crate) generation: u64,
}

impl Default for Network {
    fn default() -> Self {
        Self::from_config(NetworkConfig::default())
    }
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty network after validating `cfg`.
    pub fn with_config(cfg: NetworkConfig) -> Result<Self> {
        cfg.validate().map_err(NetworkError::Config)?;
        Ok(Self::from_config(cfg))
    }

    pub(crate) fn from_config(cfg: NetworkConfig) -> Self {
        Self {
            disabled: false,
            cells: BTreeMap::new(),
            synapses: BTreeMap::new(),
            reset_cells_on_next_step: HashSet::new(),
            rng: Prng::new(cfg.seed.unwrap_or(1)),
            cfg,
            generation: 0,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.cfg
    }

    /// Baseline generation; bumped by every applied diff.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace the random stream, e.g. so worker clones mint distinct IDs.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = Prng::new(seed);
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn synapse_count(&self) -> usize {
        self.synapses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.cells.values()
    }

    pub fn synapses(&self) -> impl Iterator<Item = &Synapse> + '_ {
        self.synapses.values()
    }

    pub fn cell_ids(&self) -> Vec<CellId> {
        self.cells.keys().copied().collect()
    }

    pub fn synapse_ids(&self) -> Vec<SynapseId> {
        self.synapses.keys().copied().collect()
    }

    pub fn contains_cell(&self, id: CellId) -> bool {
        self.cells.contains_key(&id)
    }

    pub fn contains_synapse(&self, id: SynapseId) -> bool {
        self.synapses.contains_key(&id)
    }

    pub fn cell(&self, id: CellId) -> Result<&Cell> {
        self.cells.get(&id).ok_or(NetworkError::CellNotFound(id))
    }

    pub fn cell_mut(&mut self, id: CellId) -> Result<&mut Cell> {
        self.cells.get_mut(&id).ok_or(NetworkError::CellNotFound(id))
    }

    pub fn synapse(&self, id: SynapseId) -> Result<&Synapse> {
        self.synapses.get(&id).ok_or(NetworkError::SynapseNotFound(id))
    }

    pub fn synapse_mut(&mut self, id: SynapseId) -> Result<&mut Synapse> {
        self.synapses
            .get_mut(&id)
            .ok_or(NetworkError::SynapseNotFound(id))
    }

    /// Cells that fired since the last reset.
    pub fn fired_cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.values().filter(|c| c.was_fired).map(|c| c.id)
    }

    pub(crate) fn fresh_cell_id(&mut self) -> CellId {
        loop {
            let id = CellId::from(self.rng.next_nonzero_u64());
            if !self.cells.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn fresh_synapse_id(&mut self) -> SynapseId {
        loop {
            let id = SynapseId::from(self.rng.next_nonzero_u64());
            if !self.synapses.contains_key(&id) {
                return id;
            }
        }
    }

    /// Add an unconnected cell at resting voltage.
    pub fn add_cell(&mut self) -> CellId {
        let id = self.fresh_cell_id();
        self.cells
            .insert(id, Cell::new(id, self.cfg.resting_voltage));
        id
    }

    pub fn add_tagged_cell(&mut self, tag: impl Into<String>) -> CellId {
        let id = self.add_cell();
        if let Some(cell) = self.cells.get_mut(&id) {
            cell.tag = Some(tag.into());
        }
        id
    }

    pub fn set_immortal(&mut self, id: CellId, immortal: bool) -> Result<()> {
        self.cell_mut(id)?.immortal = immortal;
        Ok(())
    }

    pub(crate) fn random_new_synapse_mv(&mut self) -> Millivolts {
        self.rng.gen_range_i32(
            i32::from(self.cfg.new_synapse_min_mv),
            i32::from(self.cfg.new_synapse_max_mv),
        ) as Millivolts
    }

    /// Link `from` -> `to` with a random weight in the configured range.
    pub fn link_cells(&mut self, from: CellId, to: CellId) -> Result<SynapseId> {
        let mv = self.random_new_synapse_mv();
        self.link_cells_with_weight(from, to, mv)
    }

    /// Link `from` -> `to` with `mv`, clamped to the legal weight range.
    pub fn link_cells_with_weight(
        &mut self,
        from: CellId,
        to: CellId,
        mv: Millivolts,
    ) -> Result<SynapseId> {
        self.cell(from)?;
        self.cell(to)?;
        let id = self.fresh_synapse_id();
        let mv = mv.clamp(ACTUAL_SYNAPSE_MIN, ACTUAL_SYNAPSE_MAX);
        self.insert_synapse(Synapse::new(id, from, to, mv));
        Ok(id)
    }

    /// Store `synapse` and register it on both endpoints.
    ///
    /// Callers guarantee both endpoints exist and the ID is free.
    pub(crate) fn insert_synapse(&mut self, synapse: Synapse) {
        if let Some(cell) = self.cells.get_mut(&synapse.from) {
            cell.axons.insert(synapse.id);
        }
        if let Some(cell) = self.cells.get_mut(&synapse.to) {
            cell.dendrites.insert(synapse.id);
        }
        self.synapses.insert(synapse.id, synapse);
    }

    /// A uniformly random existing cell.
    pub fn random_cell_id(&mut self) -> Option<CellId> {
        if self.cells.is_empty() {
            return None;
        }
        let n = self.rng.gen_range_usize(0, self.cells.len());
        self.cells.keys().nth(n).copied()
    }

    /// Remove a synapse and detach it from both endpoint cells.
    ///
    /// Orphaned endpoint cells are left in place; see `prune_synapse` for the
    /// cascading variant.
    pub fn remove_synapse(&mut self, id: SynapseId) -> Result<Synapse> {
        let synapse = self
            .synapses
            .remove(&id)
            .ok_or(NetworkError::SynapseNotFound(id))?;
        if let Some(cell) = self.cells.get_mut(&synapse.from) {
            cell.axons.remove(&id);
        }
        if let Some(cell) = self.cells.get_mut(&synapse.to) {
            cell.dendrites.remove(&id);
        }
        Ok(synapse)
    }

    /// Remove a cell that no longer owns any synapses.
    ///
    /// # Panics
    /// Panics if the cell still references synapses; detaching them first is
    /// the caller's job.
    pub fn remove_cell(&mut self, id: CellId) -> Result<Cell> {
        let cell = self.cell(id)?;
        assert!(
            !cell.has_synapses(),
            "cell {id} removed while it still has {} axon and {} dendrite synapses",
            cell.axons.len(),
            cell.dendrites.len()
        );
        self.reset_cells_on_next_step.remove(&id);
        self.cells.remove(&id).ok_or(NetworkError::CellNotFound(id))
    }

    /// Clear transient firing state everywhere and re-enable the network.
    pub fn reset_for_training(&mut self) {
        let resting = self.cfg.resting_voltage;
        for cell in self.cells.values_mut() {
            cell.voltage = resting;
            cell.activating = false;
            cell.was_fired = false;
        }
        for synapse in self.synapses.values_mut() {
            synapse.fire_next_round = false;
        }
        self.reset_cells_on_next_step.clear();
        self.disabled = false;
    }

    pub fn totals(&self) -> NetworkTotals {
        let cells = self.cells.len();
        let synapses = self.synapses.len();
        let avg_synapses_per_cell = if cells == 0 {
            0.0
        } else {
            synapses as f64 / cells as f64
        };
        NetworkTotals {
            cells,
            synapses,
            avg_synapses_per_cell,
        }
    }

    /// Run `observer` every time cell `id` fires.
    pub fn observe_cell(&mut self, id: CellId, observer: FireObserver) -> Result<()> {
        self.cell_mut(id)?.observers.0.push(observer);
        Ok(())
    }

    pub fn clear_observers(&mut self) {
        for cell in self.cells.values_mut() {
            cell.observers.0.clear();
        }
    }
}
