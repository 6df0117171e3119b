use serde::{Deserialize, Serialize};

use crate::session::Observation;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub schema_version: u32,
    pub tool_version: String,
    pub profile: String,
    /// Benchmark family the measurements came from.
    pub adapter: String,
    pub seed: u64,
    pub timestamp_utc: String,
    pub git_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub session_id: u64,
    pub target: String,
    pub input: u32,

    /// Enabled flag indices.
    pub configuration: Vec<usize>,
    /// Concrete compiler flags the configuration resolved to.
    pub flags: Vec<String>,

    pub value_s: f64,
    pub samples_s: Vec<f64>,
    pub kept: usize,
    pub relative_std: Option<f64>,
    pub low_confidence: bool,
    pub rounds: u32,

    pub extra: serde_json::Value,
}

impl Measurement {
    pub fn from_observation(
        session_id: u64,
        target: &str,
        input: u32,
        flags: Vec<String>,
        observation: Observation,
    ) -> Self {
        Self {
            session_id,
            target: target.to_string(),
            input,
            configuration: observation.configuration.enabled().collect(),
            flags,
            value_s: observation.value,
            samples_s: observation.samples,
            kept: observation.kept,
            relative_std: observation.relative_std,
            low_confidence: observation.low_confidence,
            rounds: observation.rounds,
            extra: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagBenchReport {
    pub run: RunMeta,
    pub measurements: Vec<Measurement>,
}
