use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::flags::FlagSubset;

/// Timed runs per measurement under [`Profile::Quick`].
const QUICK_RUNS: NonZeroU32 = match NonZeroU32::new(5) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Quick,
    Full,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Quick => "quick",
            Profile::Full => "full",
        }
    }

    pub fn iterations(&self) -> Iterations {
        match self {
            Profile::Quick => Iterations::Fixed(QUICK_RUNS),
            Profile::Full => Iterations::Auto,
        }
    }

    pub fn escalation_cap(&self) -> Option<NonZeroU32> {
        match self {
            Profile::Quick => None,
            Profile::Full => NonZeroU32::new(50),
        }
    }
}

/// How many timed runs make up one measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Iterations {
    /// Exactly this many runs.
    Fixed(NonZeroU32),
    /// Keep running until the filtered batch is stable or the escalation cap is reached.
    Auto,
}

impl Iterations {
    pub fn fixed(n: u32) -> Result<Self> {
        NonZeroU32::new(n)
            .map(Iterations::Fixed)
            .ok_or_else(|| {
                Error::InvalidSetup("iteration count must be positive or -1 (auto)".to_string())
            })
    }
}

impl TryFrom<i64> for Iterations {
    type Error = Error;

    fn try_from(n: i64) -> Result<Self> {
        match n {
            -1 => Ok(Iterations::Auto),
            n if n > 0 => u32::try_from(n)
                .map_err(|_| Error::InvalidSetup(format!("iteration count {n} is too large")))
                .and_then(Iterations::fixed),
            n => Err(Error::InvalidSetup(format!(
                "iteration count must be positive or -1 (auto), got {n}"
            ))),
        }
    }
}

impl From<Iterations> for i64 {
    fn from(it: Iterations) -> i64 {
        match it {
            Iterations::Fixed(n) => i64::from(n.get()),
            Iterations::Auto => -1,
        }
    }
}

impl FromStr for Iterations {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Iterations::Auto);
        }
        let n: i64 = s
            .parse()
            .map_err(|_| Error::InvalidSetup(format!("'{s}' is not an iteration count")))?;
        Iterations::try_from(n)
    }
}

impl fmt::Display for Iterations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Iterations::Fixed(n) => write!(f, "{n}"),
            Iterations::Auto => write!(f, "auto"),
        }
    }
}

/// Persistent parameters of a measurement session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSetup {
    /// Benchmark the session measures.
    pub target: String,
    /// Input (dataset) selector passed to every run.
    pub input: u32,
    pub iterations: Iterations,
    /// Largest standard deviation relative to the mean that still counts as stable.
    pub max_relative_std: f64,
    /// Total two-sided exclusion probability of the outlier filter.
    pub outlier_percentile: f64,
    /// Largest number of runs auto mode may perform. Required for [`Iterations::Auto`].
    #[serde(default)]
    pub escalation_cap: Option<NonZeroU32>,
    /// Flags a configuration may toggle.
    pub flag_subset: FlagSubset,
    /// Allow the adapter to build with parallel jobs.
    #[serde(default)]
    pub parallel: bool,
}

impl MeasurementSetup {
    pub fn new(target: impl Into<String>, profile: Profile, flag_subset: FlagSubset) -> Self {
        Self {
            target: target.into(),
            input: 1,
            iterations: profile.iterations(),
            max_relative_std: 0.05,
            outlier_percentile: 0.1,
            escalation_cap: profile.escalation_cap(),
            flag_subset,
            parallel: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(Error::InvalidSetup("target must not be empty".to_string()));
        }
        if !self.max_relative_std.is_finite() || self.max_relative_std < 0.0 {
            return Err(Error::InvalidSetup(format!(
                "max_relative_std must be a finite non-negative number, got {}",
                self.max_relative_std
            )));
        }
        if !(0.0..1.0).contains(&self.outlier_percentile) {
            return Err(Error::InvalidSetup(format!(
                "outlier_percentile must lie in [0, 1), got {}",
                self.outlier_percentile
            )));
        }
        match (self.iterations, self.escalation_cap) {
            (Iterations::Auto, None) => Err(Error::InvalidSetup(
                "auto iterations need an explicit escalation cap".to_string(),
            )),
            (Iterations::Auto, Some(cap)) if cap.get() < 2 => Err(Error::InvalidSetup(
                "escalation cap must allow at least two runs".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let setup: Self = serde_json::from_str(&text)?;
        setup.validate()?;
        Ok(setup)
    }
}
