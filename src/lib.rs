//! Runtime measurement of compiler-generated binaries under varying optimisation flags.
//!
//! A [`Session`] builds a benchmark for a flag [`Configuration`] through a
//! [`BenchmarkAdapter`], runs it until the timings are stable, filters outliers and reports
//! one runtime in seconds.

use clap::ValueEnum;

pub mod adapter;
pub mod diversity;
pub mod error;
pub mod export;
pub mod flags;
pub mod harness;
pub mod ids;
pub mod parallel;
pub mod schema;
pub mod session;
pub mod stats;

pub use adapter::{BenchmarkAdapter, RunOutput};
pub use diversity::most_diverse_subset;
pub use error::{Error, Result};
pub use flags::{Configuration, FlagCatalog, FlagSubset};
pub use harness::{Iterations, MeasurementSetup, Profile};
pub use ids::IdGenerator;
pub use parallel::{parallel_map, ProgressParallel, WorkerPool};
pub use session::{Observation, Session, SessionState};

/// Benchmark family to measure.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum AdapterFamily {
    /// cBench programs built from source with a real compiler.
    #[default]
    Cbench,
    /// Seeded simulated runtimes; nothing is compiled or executed.
    Synthetic,
}

impl AdapterFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterFamily::Cbench => "cbench",
            AdapterFamily::Synthetic => "synthetic",
        }
    }
}
