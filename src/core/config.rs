#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Signed synapse weight / cell voltage unit.
pub type Millivolts = i16;

/// How much a synapse is bumped away from zero when reinforced.
pub const SYNAPSE_LEARN_RATE: Millivolts = 2;

/// Lowest legal synapse weight.
///
/// One inside the integer range, minus the learn rate, so a reinforcement step
/// can never wrap the sign.
pub const ACTUAL_SYNAPSE_MIN: Millivolts = -32767 + SYNAPSE_LEARN_RATE;

/// Highest legal synapse weight. See [`ACTUAL_SYNAPSE_MIN`].
pub const ACTUAL_SYNAPSE_MAX: Millivolts = 32766 - SYNAPSE_LEARN_RATE;

/// Tunable ratios of a network's universe.
///
/// Everything that keeps a network predictable across training and sampling
/// sessions lives here. Persisted alongside the network image.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NetworkConfig {
    /// Weight range for randomly grown synapses (inclusive).
    pub new_synapse_min_mv: Millivolts,
    pub new_synapse_max_mv: Millivolts,

    /// Accumulated voltage at which a cell fires.
    pub fire_threshold: Millivolts,
    /// Voltage a cell returns to after its refractory tick.
    pub resting_voltage: Millivolts,

    /// Synapses attached to each cell added by random growth.
    pub default_neuron_synapses: usize,

    /// How deep path forging searches before it starts bridging.
    pub max_path_depth: usize,
    /// Minimum connecting synapses path forging aims for during training.
    pub grow_path_min_synapses: usize,

    /// Step budget after the seeds when collecting a firing pattern.
    pub max_post_fire_steps: usize,
    /// How many times an input is fired per sample.
    pub firing_iterations_per_sample: usize,
    /// Similarity above which two output patterns need differentiation.
    pub pattern_similarity_limit: f64,
    /// Fraction of cells fired by `fire_noise`.
    pub noise_ratio: f64,

    /// Activation history a synapse needs per prune cycle to be reinforced.
    pub synapse_min_fire_threshold: u32,
    /// Decaying weights within this distance of zero snap to zero.
    pub decay_snap_band: Millivolts,

    /// Samples each worker trains between reconciliations.
    pub samples_between_merges: usize,
    /// Growth applied when a sample fails to fire its expected output.
    pub retrain_neurons_to_grow: usize,
    pub retrain_synapses_to_grow: usize,

    /// Wall-clock bound on a sampling run.
    pub sample_timeout_ms: u64,
    /// Upper bound on threads used by a single graph walk.
    pub walk_parallelism: usize,

    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let fire_threshold = 180;
        Self {
            new_synapse_min_mv: -100,
            new_synapse_max_mv: 100,
            fire_threshold,
            resting_voltage: -(fire_threshold / 6),
            default_neuron_synapses: 20,
            max_path_depth: 20,
            grow_path_min_synapses: 10,
            max_post_fire_steps: 5,
            firing_iterations_per_sample: 4,
            pattern_similarity_limit: 0.6,
            noise_ratio: 0.3,
            synapse_min_fire_threshold: 8,
            decay_snap_band: SYNAPSE_LEARN_RATE,
            samples_between_merges: 25,
            retrain_neurons_to_grow: 1,
            retrain_synapses_to_grow: 0,
            sample_timeout_ms: 1000,
            walk_parallelism: 4,
            seed: None,
        }
    }
}

impl NetworkConfig {
    /// Validate the configuration, returning an error message if invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.new_synapse_min_mv > self.new_synapse_max_mv {
            return Err("new_synapse_min_mv must be <= new_synapse_max_mv");
        }
        if self.new_synapse_min_mv < ACTUAL_SYNAPSE_MIN
            || self.new_synapse_max_mv > ACTUAL_SYNAPSE_MAX
        {
            return Err("new synapse range must stay inside the synapse clamp bounds");
        }
        if self.fire_threshold <= 0 {
            return Err("fire_threshold must be > 0");
        }
        if self.resting_voltage >= self.fire_threshold {
            return Err("resting_voltage must be below fire_threshold");
        }
        if self.max_path_depth == 0 {
            return Err("max_path_depth must be > 0");
        }
        if !(0.0..=1.0).contains(&self.pattern_similarity_limit) {
            return Err("pattern_similarity_limit must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.noise_ratio) {
            return Err("noise_ratio must be in [0, 1]");
        }
        if self.decay_snap_band < 0 {
            return Err("decay_snap_band must be >= 0");
        }
        if self.samples_between_merges == 0 {
            return Err("samples_between_merges must be > 0");
        }
        if self.sample_timeout_ms == 0 {
            return Err("sample_timeout_ms must be > 0");
        }
        if self.walk_parallelism == 0 {
            return Err("walk_parallelism must be > 0");
        }
        Ok(())
    }

    /// Set the random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_fire_threshold(mut self, threshold: Millivolts) -> Self {
        self.fire_threshold = threshold;
        self
    }

    pub fn with_max_path_depth(mut self, depth: usize) -> Self {
        self.max_path_depth = depth;
        self
    }

    pub fn with_walk_parallelism(mut self, threads: usize) -> Self {
        self.walk_parallelism = threads;
        self
    }

    pub fn with_max_post_fire_steps(mut self, steps: usize) -> Self {
        self.max_post_fire_steps = steps;
        self
    }

    /// Weight given to synapses forged by path growth: enough to take a
    /// resting destination to threshold on its own.
    pub fn forged_synapse_mv(&self) -> Millivolts {
        let mv = i32::from(self.fire_threshold) - i32::from(self.resting_voltage);
        mv.clamp(1, i32::from(ACTUAL_SYNAPSE_MAX)) as Millivolts
    }
}
