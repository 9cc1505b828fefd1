//! A spiking network engine that learns by growing, pruning and inhibiting
//! its own synapses.
//!
//! Features:
//! - `serde` (default): network images and vocabulary files.
//! - `parallel`: rayon fan-out for path search and backtrace walks.

#[path = "core/config.rs"]
pub mod config;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/integrity.rs"]
pub mod integrity;

#[path = "core/step.rs"]
pub mod step;

#[path = "core/walk.rs"]
pub(crate) mod walk;

#[path = "core/grow.rs"]
pub mod grow;

#[path = "core/prune.rs"]
pub mod prune;

#[path = "core/backtrace.rs"]
pub mod backtrace;

#[path = "core/consolidation.rs"]
pub mod consolidation;

#[path = "core/diff.rs"]
pub mod diff;

#[path = "core/firing.rs"]
pub mod firing;

#[cfg(feature = "serde")]
#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/sample.rs"]
pub mod sample;

#[path = "core/perception.rs"]
pub mod perception;

#[path = "core/trainer.rs"]
pub mod trainer;

#[path = "core/supervisor.rs"]
pub mod supervisor;

pub mod observer;

pub use config::{Millivolts, NetworkConfig};
pub use diff::{ApplyReport, Diff};
pub use error::{NetworkError, Result};
pub use firing::{FiringPattern, FiringPatternDiff};
pub use network::{Cell, CellId, Network, Synapse, SynapseId};
pub use perception::{Perception, PerceptionUnit};
pub use sample::{sample, SampleRequest, SampleResult};
pub use supervisor::Supervisor;
pub use trainer::{SampleOutcome, TrainingSample, TrainingSettings};
