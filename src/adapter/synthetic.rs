//! A deterministic stand-in benchmark family.
//!
//! Durations are a function of the target, the input and the enabled flags, perturbed by
//! seeded noise and occasional spikes. No process is spawned and no time passes, which makes
//! the family useful for dry runs of a sweep and for exercising the session logic.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

use super::{BenchmarkAdapter, RunOutput};
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct SyntheticAdapter {
    seed: u64,
    rng: ChaCha8Rng,
    /// Runtime of one round with no flag enabled, in seconds.
    pub base_seconds: f64,
    /// Relative amplitude of the uniform noise on every run.
    pub noise: f64,
    /// Probability that a run is hit by a spike.
    pub spike_rate: f64,
    /// Slowdown factor of a spiked run.
    pub spike_factor: f64,
    /// A flag (without `-f`) whose enabling changes the program's output. A validity
    /// reference for it has to be captured at a baseline that leaves the flag off.
    pub miscompiling_flag: Option<String>,
    /// Targets whose metadata is reported as unreadable.
    pub broken_targets: Vec<String>,
    target: Option<String>,
    prepared: Option<Vec<String>>,
}

impl SyntheticAdapter {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            base_seconds: 0.5,
            noise: 0.02,
            spike_rate: 0.05,
            spike_factor: 3.0,
            miscompiling_flag: None,
            broken_targets: Vec::new(),
            target: None,
            prepared: None,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn target(&self) -> Result<&str> {
        self.target
            .as_deref()
            .ok_or_else(|| Error::InvalidSetup("no synthetic target selected".to_string()))
    }

    /// Noise-free runtime of one round of the prepared artifact.
    pub fn expected_seconds(&self, input: u32) -> Result<f64> {
        let target = self.target()?;
        let flags = self.prepared.as_deref().ok_or_else(|| Error::Run {
            target: target.to_string(),
            message: "artifact not prepared".to_string(),
        })?;

        let mut seconds = self.base_seconds * (1.0 + unit_hash(target) + 0.25 * f64::from(input));
        for flag in flags {
            if let Some(name) = flag.strip_prefix("-f").filter(|n| !n.starts_with("no-")) {
                // Each enabled flag saves between 0% and 10%.
                seconds *= 1.0 - 0.1 * unit_hash(name);
            }
        }
        Ok(seconds)
    }
}

/// Maps a string onto `[0, 1)` deterministically.
fn unit_hash(s: &str) -> f64 {
    let digest = Sha256::digest(s.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}

impl BenchmarkAdapter for SyntheticAdapter {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn select_target(&mut self, target: &str) -> Result<()> {
        if target.is_empty() {
            return Err(Error::UnknownTarget(target.to_string()));
        }
        self.target = Some(target.to_string());
        self.prepared = None;
        Ok(())
    }

    fn default_repetition_count(&self, input: u32) -> Result<u32> {
        let target = self.target()?;
        if self.broken_targets.iter().any(|t| t == target) {
            return Err(Error::TargetMetadata {
                target: target.to_string(),
                reason: "dataset table is unreadable".to_string(),
            });
        }
        Ok(1 + input % 4)
    }

    fn prepare(&mut self, flags: &[String], _parallel: bool) -> Result<()> {
        self.target()?;
        self.prepared = Some(flags.to_vec());
        Ok(())
    }

    fn run(&mut self, input: u32, _rounds: u32) -> Result<RunOutput> {
        let expected = self.expected_seconds(input)?;
        let jitter = self.rng.gen_range(-1.0..=1.0) * self.noise;
        let mut seconds = expected * (1.0 + jitter);
        if self.rng.gen_bool(self.spike_rate.clamp(0.0, 1.0)) {
            seconds *= self.spike_factor;
        }

        let target = self.target()?;
        let mut output = format!("{target}:{input}\n").into_bytes();
        let miscompiled = match (&self.miscompiling_flag, &self.prepared) {
            (Some(bad), Some(flags)) => {
                flags.iter().any(|f| f.strip_prefix("-f") == Some(bad.as_str()))
            }
            _ => false,
        };
        if miscompiled {
            output.extend_from_slice(b"checksum mismatch\n");
        }
        Ok(RunOutput { seconds, output })
    }

    fn cleanup(&mut self) -> Result<()> {
        self.prepared = None;
        Ok(())
    }
}
