//! Benchmark-family adapters.
//!
//! An adapter knows how to build a configuration-specific artifact for a target and how to
//! execute it and extract a raw duration. Sessions only depend on [`BenchmarkAdapter`].

pub mod cbench;
pub mod synthetic;

pub use cbench::{CBenchAdapter, Compiler, CompilerKind};
pub use synthetic::SyntheticAdapter;

use crate::error::Result;

/// Result of one execution of a prepared artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    /// Elapsed time of one round, in seconds.
    pub seconds: f64,
    /// The program's observable output, compared against the validity reference.
    pub output: Vec<u8>,
}

/// Capability implemented once per benchmark family.
pub trait BenchmarkAdapter {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    /// Binds the adapter to `target`.
    ///
    /// Fails with [`crate::Error::UnknownTarget`] or [`crate::Error::TargetMetadata`]; the
    /// previous binding is kept in that case.
    fn select_target(&mut self, target: &str) -> Result<()>;

    /// How many rounds of the target's inner loop approximate one second of wall time for
    /// the given input.
    fn default_repetition_count(&self, input: u32) -> Result<u32>;

    /// Builds the artifact for the given concrete compiler flags.
    ///
    /// `parallel` allows the build to use several jobs.
    fn prepare(&mut self, flags: &[String], parallel: bool) -> Result<()>;

    /// Executes the prepared artifact once.
    fn run(&mut self, input: u32, rounds: u32) -> Result<RunOutput>;

    /// Removes build byproducts. Safe to call repeatedly and before any `prepare`.
    fn cleanup(&mut self) -> Result<()>;
}

impl<A: BenchmarkAdapter + ?Sized> BenchmarkAdapter for Box<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn select_target(&mut self, target: &str) -> Result<()> {
        (**self).select_target(target)
    }

    fn default_repetition_count(&self, input: u32) -> Result<u32> {
        (**self).default_repetition_count(input)
    }

    fn prepare(&mut self, flags: &[String], parallel: bool) -> Result<()> {
        (**self).prepare(flags, parallel)
    }

    fn run(&mut self, input: u32, rounds: u32) -> Result<RunOutput> {
        (**self).run(input, rounds)
    }

    fn cleanup(&mut self) -> Result<()> {
        (**self).cleanup()
    }
}
