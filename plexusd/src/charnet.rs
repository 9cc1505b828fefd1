//! Character vocabulary: every distinct character of the training text gets
//! its own input and output cell, plus `START` and `END` markers per line.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use plexus::{
    sample, CellId, Network, Perception, PerceptionUnit, SampleRequest, TrainingSample,
    TrainingSettings,
};
use tracing::{info, warn};

use crate::error::DaemonError;

pub const START: &str = "START";
pub const END: &str = "END";

/// Upper bound on characters produced by one sampling run.
const MAX_SAMPLE_CHARS: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct CharPerception {
    text: String,
    units: BTreeMap<String, PerceptionUnit<String>>,
}

impl CharPerception {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_raw_data(&mut self, text: &str) {
        self.text = text.to_owned();
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn unit(&self, key: &str) -> Option<&PerceptionUnit<String>> {
        self.units.get(key)
    }

    fn require(&self, key: &str) -> Result<&PerceptionUnit<String>, DaemonError> {
        self.unit(key)
            .ok_or_else(|| DaemonError::MissingUnit(key.to_owned()))
    }

    /// Make sure `key` has live, immortal cells in `net`.
    fn ensure_unit(&mut self, net: &mut Network, key: &str) -> Result<(), DaemonError> {
        if let Some(unit) = self.units.get(key) {
            let (input, output) = (unit.input, unit.output);
            if net.contains_cell(input) && net.contains_cell(output) {
                // Loaded vocabularies may predate the immortal flag.
                net.set_immortal(input, true)?;
                net.set_immortal(output, true)?;
                return Ok(());
            }
            warn!(key, "vocabulary cells missing from network; reassigning");
        }
        let (input, output) = net.claim_io_pair(key);
        self.units.insert(
            key.to_owned(),
            PerceptionUnit {
                value: key.to_owned(),
                input,
                output,
            },
        );
        Ok(())
    }
}

impl Perception for CharPerception {
    type Error = DaemonError;

    /// One sample per non-empty line: `START -> c0 -> c1 -> ... -> END`,
    /// each pair firing the previous symbol's input and expecting the next
    /// symbol's output.
    fn prepare_data(&mut self, net: &mut Network) -> Result<TrainingSettings, DaemonError> {
        let chars: BTreeSet<char> = self.text.chars().filter(|&c| c != '\n').collect();
        for c in chars {
            self.ensure_unit(net, &c.to_string())?;
        }
        self.ensure_unit(net, START)?;
        self.ensure_unit(net, END)?;

        let start = self.require(START)?.input;
        let end = self.require(END)?.output;
        let mut samples = Vec::new();
        for line in self.text.lines() {
            let mut units = Vec::with_capacity(line.len());
            for c in line.chars() {
                units.push(self.require(&c.to_string())?);
            }
            let (Some(first), Some(last)) = (units.first(), units.last()) else {
                continue;
            };
            let mut pairs = Vec::with_capacity(units.len() + 1);
            pairs.push((start, first.output));
            pairs.extend(units.windows(2).map(|w| (w[0].input, w[1].output)));
            pairs.push((last.input, end));
            samples.push(TrainingSample::new(pairs));
        }

        let output_cells = self
            .units
            .values()
            .filter(|u| u.value != START)
            .map(|u| u.output)
            .collect();

        info!(
            vocab = self.units.len(),
            samples = samples.len(),
            "prepared character data"
        );
        Ok(TrainingSettings {
            samples,
            output_cells,
            ..Default::default()
        })
    }

    fn seed_and_sample(&self, seed: &str, net: &mut Network) -> Result<String, DaemonError> {
        let mut seeds = vec![self.require(START)?.input];
        for c in seed.chars() {
            seeds.push(self.require(&c.to_string())?.input);
        }
        let end = self.require(END)?.output;

        let by_output: BTreeMap<CellId, &str> = self
            .units
            .values()
            .filter(|u| u.value != START && u.value != END)
            .map(|u| (u.output, u.value.as_str()))
            .collect();
        let outputs = by_output.keys().copied().collect();

        let req = SampleRequest::new(net, seeds, outputs)
            .with_end(end)
            .with_max_outputs(MAX_SAMPLE_CHARS);
        let result = sample(net, &req)?;
        Ok(result
            .outputs
            .iter()
            .filter_map(|cell| by_output.get(cell).copied())
            .collect())
    }

    fn save_vocab(&self, path: &Path) -> Result<(), DaemonError> {
        let units: Vec<&PerceptionUnit<String>> = self.units.values().collect();
        std::fs::write(path, serde_json::to_vec_pretty(&units)?)?;
        Ok(())
    }

    fn load_vocab(&mut self, path: &Path) -> Result<(), DaemonError> {
        let bytes = std::fs::read(path)?;
        let units: Vec<PerceptionUnit<String>> = serde_json::from_slice(&bytes)?;
        self.units = units.into_iter().map(|u| (u.value.clone(), u)).collect();
        Ok(())
    }
}
