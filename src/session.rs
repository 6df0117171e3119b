//! Measurement sessions.
//!
//! A [`Session`] binds one adapter to one target and turns noisy runs of a configuration
//! into a single runtime:
//!
//! ```text
//! UNPREPARED -> PREPARED -> MEASURING -> STABLE | ESCALATED -> REPORTED
//!                   \____________\______-> FAILED
//! ```
//!
//! Runs are strictly sequential. Two sessions must never share a target's build directory.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, info_span, warn};

use crate::adapter::{BenchmarkAdapter, RunOutput};
use crate::error::{Error, Result};
use crate::flags::{Configuration, FlagCatalog, FlagSubset};
use crate::harness::{Iterations, MeasurementSetup};
use crate::ids::IdGenerator;
use crate::stats::{is_stable, mean, relative_std, remove_outliers};

/// Fewest runs auto mode performs before judging stability.
pub const AUTO_MIN_RUNS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Unprepared,
    Prepared,
    Measuring,
    Stable,
    Escalated,
    Reported,
    Failed,
}

/// Digest of the output captured at the baseline configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidityReference {
    pub baseline: Configuration,
    pub input: u32,
    digest: [u8; 32],
}

impl ValidityReference {
    fn capture(baseline: Configuration, input: u32, output: &[u8]) -> Self {
        Self {
            baseline,
            input,
            digest: Sha256::digest(output).into(),
        }
    }

    pub fn matches(&self, output: &[u8]) -> bool {
        let digest: [u8; 32] = Sha256::digest(output).into();
        digest == self.digest
    }

    pub fn digest_hex(&self) -> String {
        hex(&self.digest)
    }
}

impl fmt::Debug for ValidityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidityReference")
            .field("baseline", &self.baseline)
            .field("input", &self.input)
            .field("digest", &self.digest_hex())
            .finish()
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// The measured runtime of one configuration together with the evidence behind it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub configuration: Configuration,
    /// Mean of the outlier-filtered samples, in seconds.
    pub value: f64,
    /// Raw samples in run order, in seconds.
    pub samples: Vec<f64>,
    /// Number of samples that survived outlier filtering.
    pub kept: usize,
    /// Relative standard deviation of the kept samples, if defined.
    pub relative_std: Option<f64>,
    /// Auto mode hit its escalation cap before the batch became stable.
    pub low_confidence: bool,
    /// Inner-loop rounds per run.
    pub rounds: u32,
}

struct Batch {
    samples: Vec<f64>,
    last_output: Vec<u8>,
    low_confidence: bool,
}

pub struct Session<A> {
    id: u64,
    adapter: A,
    catalog: FlagCatalog,
    setup: MeasurementSetup,
    rounds: u32,
    reference: Option<ValidityReference>,
    state: SessionState,
    // Set when a failed retarget could not restore the previous binding.
    detached: bool,
}

impl<A: fmt::Debug> fmt::Debug for Session<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("adapter", &self.adapter)
            .field("setup", &self.setup)
            .field("rounds", &self.rounds)
            .field("reference", &self.reference)
            .field("state", &self.state)
            .finish()
    }
}

impl<A: BenchmarkAdapter> Session<A> {
    /// Validates `setup`, binds the adapter to its target and reads the target's default
    /// repetition count.
    pub fn new(
        mut adapter: A,
        catalog: FlagCatalog,
        setup: MeasurementSetup,
        ids: &IdGenerator,
    ) -> Result<Self> {
        setup.validate()?;
        catalog.check_subset(&setup.flag_subset)?;
        adapter.select_target(&setup.target)?;
        let rounds = adapter.default_repetition_count(setup.input)?;
        Ok(Self {
            id: ids.next_id(),
            adapter,
            catalog,
            setup,
            rounds,
            reference: None,
            state: SessionState::Unprepared,
            detached: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn setup(&self) -> &MeasurementSetup {
        &self.setup
    }

    pub fn catalog(&self) -> &FlagCatalog {
        &self.catalog
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Inner-loop rounds each run executes.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn validity_reference(&self) -> Option<&ValidityReference> {
        self.reference.as_ref()
    }

    pub fn validity_check_enabled(&self) -> bool {
        self.reference.is_some()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// Switches to another target.
    ///
    /// Postconditions on success: the repetition count is the new target's default and
    /// validity checking is off. On failure the adapter is bound back to the previous target
    /// and the session keeps its target, round count and validity reference. If that rebind
    /// fails too, validity checking is off and measuring is refused until a retarget succeeds.
    pub fn set_target(&mut self, target: &str) -> Result<()> {
        let switched = self
            .adapter
            .select_target(target)
            .and_then(|()| self.adapter.default_repetition_count(self.setup.input));
        let rounds = match switched {
            Ok(rounds) => rounds,
            Err(e) => {
                if let Err(rebind) = self.adapter.select_target(&self.setup.target) {
                    warn!(
                        session = self.id,
                        bench = %self.setup.target,
                        error = %rebind,
                        "cannot rebind the previous target"
                    );
                    self.reference = None;
                    self.detached = true;
                    self.state = SessionState::Failed;
                }
                return Err(e);
            }
        };
        self.setup.target = target.to_string();
        self.rounds = rounds;
        self.reference = None;
        self.detached = false;
        self.state = SessionState::Unprepared;
        Ok(())
    }

    /// Switches to another input.
    ///
    /// Postconditions on success: the repetition count is the target's default for the new
    /// input, and a previously active validity check has been re-established by capturing a
    /// new reference under the new input. If reading the repetition count fails nothing
    /// changes; if re-capturing the reference fails validity checking is off.
    pub fn set_input(&mut self, input: u32) -> Result<()> {
        self.check_attached()?;
        let rounds = self.adapter.default_repetition_count(input)?;
        self.setup.input = input;
        self.rounds = rounds;
        self.state = SessionState::Unprepared;
        if self.reference.take().is_some() {
            self.prepare_validity_check()?;
        }
        Ok(())
    }

    pub fn set_iterations(&mut self, iterations: Iterations) -> Result<()> {
        let mut setup = self.setup.clone();
        setup.iterations = iterations;
        setup.validate()?;
        self.setup = setup;
        Ok(())
    }

    /// Replaces the flag subset. The validity reference stays valid because the baseline
    /// it was captured at does not depend on later subsets.
    pub fn set_flag_subset(&mut self, subset: FlagSubset) -> Result<()> {
        self.catalog.check_subset(&subset)?;
        self.setup.flag_subset = subset;
        Ok(())
    }

    /// Captures the validity reference at the maximum-optimisation baseline (every subset
    /// flag enabled) with a single run, then checks every later run against it until the
    /// target or input changes. The iteration setting is restored afterwards.
    pub fn prepare_validity_check(&mut self) -> Result<()> {
        let baseline = Configuration::all(&self.setup.flag_subset);
        self.prepare_validity_check_at(baseline)
    }

    /// Like [`Session::prepare_validity_check`], with an explicit baseline configuration.
    pub fn prepare_validity_check_at(&mut self, baseline: Configuration) -> Result<()> {
        baseline.check_within(&self.setup.flag_subset)?;

        let previous = self.reference.take();
        let saved = self.setup.iterations;
        self.setup.iterations = Iterations::Fixed(std::num::NonZeroU32::MIN);
        let batch = self.collect(&baseline);
        self.setup.iterations = saved;

        match batch {
            Ok(batch) => {
                let reference =
                    ValidityReference::capture(baseline, self.setup.input, &batch.last_output);
                info!(
                    session = self.id,
                    bench = %self.setup.target,
                    digest = %reference.digest_hex(),
                    "validity reference captured"
                );
                self.reference = Some(reference);
                self.state = SessionState::Reported;
                Ok(())
            }
            Err(e) => {
                self.reference = previous;
                Err(e)
            }
        }
    }

    /// Measures `configuration` and returns its runtime in seconds.
    pub fn measure(&mut self, configuration: &Configuration) -> Result<f64> {
        self.observe(configuration).map(|o| o.value)
    }

    /// Measures `configuration` and returns the runtime with its supporting samples.
    pub fn observe(&mut self, configuration: &Configuration) -> Result<Observation> {
        configuration.check_within(&self.setup.flag_subset)?;

        let span = info_span!(
            "measure",
            session = self.id,
            bench = %self.setup.target,
            configuration = %configuration
        );
        let _guard = span.enter();

        let batch = self.collect(configuration)?;

        let mut kept = remove_outliers(&batch.samples, self.setup.outlier_percentile);
        if kept.is_empty() {
            warn!("outlier filter rejected every sample, reporting the unfiltered mean");
            kept = batch.samples.clone();
        }
        let value = mean(&kept).unwrap_or(f64::NAN);
        let rel = relative_std(&kept);

        self.state = SessionState::Reported;
        info!(
            value,
            runs = batch.samples.len(),
            kept = kept.len(),
            relative_std = rel,
            low_confidence = batch.low_confidence,
            "measured"
        );

        Ok(Observation {
            configuration: configuration.clone(),
            value,
            kept: kept.len(),
            samples: batch.samples,
            relative_std: rel,
            low_confidence: batch.low_confidence,
            rounds: self.rounds,
        })
    }

    /// Releases build artifacts and drops the validity reference. Safe to call repeatedly.
    pub fn cleanup(&mut self) -> Result<()> {
        self.adapter.cleanup()?;
        self.reference = None;
        self.state = SessionState::Unprepared;
        Ok(())
    }

    fn fail<T>(&mut self, error: Error) -> Result<T> {
        self.state = SessionState::Failed;
        Err(error)
    }

    fn check_attached(&self) -> Result<()> {
        if self.detached {
            return Err(Error::InvalidSetup(format!(
                "session {} lost its target binding, set a target first",
                self.id
            )));
        }
        Ok(())
    }

    fn collect(&mut self, configuration: &Configuration) -> Result<Batch> {
        self.check_attached()?;
        let flags = self.catalog.resolve(configuration, &self.setup.flag_subset)?;
        if let Err(e) = self.adapter.prepare(&flags, self.setup.parallel) {
            return self.fail(e);
        }
        self.state = SessionState::Prepared;

        let (limit, auto) = match self.setup.iterations {
            Iterations::Fixed(n) => (n.get() as usize, false),
            Iterations::Auto => match self.setup.escalation_cap {
                Some(cap) => (cap.get() as usize, true),
                None => {
                    return self.fail(Error::InvalidSetup(
                        "auto iterations need an explicit escalation cap".to_string(),
                    ))
                }
            },
        };

        self.state = SessionState::Measuring;
        let mut samples = Vec::with_capacity(limit.min(64));
        let mut last_output = Vec::new();
        loop {
            let run = self.adapter.run(self.setup.input, self.rounds);
            let RunOutput { seconds, output } = match run {
                Ok(out) => out,
                Err(e) => return self.fail(e),
            };
            debug!(run = samples.len(), seconds, "run finished");

            if let Some(reference) = &self.reference {
                if !reference.matches(&output) {
                    let error = Error::OutputValidation {
                        target: self.setup.target.clone(),
                        configuration: configuration.to_string(),
                        expected: reference.digest_hex(),
                        actual: hex(&Sha256::digest(&output)),
                    };
                    return self.fail(error);
                }
            }
            samples.push(seconds);
            last_output = output;

            if !auto {
                if samples.len() >= limit {
                    self.state = SessionState::Stable;
                    return Ok(Batch {
                        samples,
                        last_output,
                        low_confidence: false,
                    });
                }
                continue;
            }

            if samples.len() >= AUTO_MIN_RUNS.min(limit) {
                let filtered = remove_outliers(&samples, self.setup.outlier_percentile);
                if let Some(stability) = is_stable(&filtered, self.setup.max_relative_std) {
                    if stability.stable {
                        debug!(
                            runs = samples.len(),
                            relative_std = stability.relative_std,
                            "stable"
                        );
                        self.state = SessionState::Stable;
                        return Ok(Batch {
                            samples,
                            last_output,
                            low_confidence: false,
                        });
                    }
                }
            }

            if samples.len() >= limit {
                let filtered = remove_outliers(&samples, self.setup.outlier_percentile);
                warn!(
                    runs = samples.len(),
                    relative_std = relative_std(&filtered),
                    max_relative_std = self.setup.max_relative_std,
                    "escalation cap reached before the batch became stable"
                );
                self.state = SessionState::Escalated;
                return Ok(Batch {
                    samples,
                    last_output,
                    low_confidence: true,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SyntheticAdapter;
    use crate::harness::Profile;
    use std::collections::VecDeque;
    use std::num::NonZeroU32;

    /// Adapter with scripted durations, outputs and failures.
    #[derive(Debug, Default)]
    struct MockAdapter {
        durations: VecDeque<f64>,
        steady: f64,
        outputs: VecDeque<Vec<u8>>,
        steady_output: Vec<u8>,
        fail_build: bool,
        missing_metadata: Vec<String>,
        rejected_targets: Vec<String>,
        rounds_per_input: Vec<(u32, u32)>,
        target: Option<String>,
        prepared: Vec<Vec<String>>,
        runs: usize,
        cleanups: usize,
    }

    impl MockAdapter {
        fn steady(seconds: f64) -> Self {
            Self {
                steady: seconds,
                steady_output: b"ok".to_vec(),
                ..Default::default()
            }
        }

        fn scripted(durations: &[f64], steady: f64) -> Self {
            Self {
                durations: durations.iter().copied().collect(),
                ..Self::steady(steady)
            }
        }
    }

    impl BenchmarkAdapter for MockAdapter {
        fn name(&self) -> &str {
            "mock"
        }

        fn select_target(&mut self, target: &str) -> Result<()> {
            if target == "unknown" || self.rejected_targets.iter().any(|t| t == target) {
                return Err(Error::UnknownTarget(target.to_string()));
            }
            self.target = Some(target.to_string());
            Ok(())
        }

        fn default_repetition_count(&self, input: u32) -> Result<u32> {
            let target = self.target.clone().unwrap_or_default();
            if self.missing_metadata.contains(&target) {
                return Err(Error::TargetMetadata {
                    target,
                    reason: "missing".to_string(),
                });
            }
            Ok(self
                .rounds_per_input
                .iter()
                .find(|(i, _)| *i == input)
                .map(|(_, r)| *r)
                .unwrap_or(1))
        }

        fn prepare(&mut self, flags: &[String], _parallel: bool) -> Result<()> {
            if self.fail_build {
                return Err(Error::Build {
                    target: self.target.clone().unwrap_or_default(),
                    message: "undefined reference to `main'".to_string(),
                });
            }
            self.prepared.push(flags.to_vec());
            Ok(())
        }

        fn run(&mut self, _input: u32, _rounds: u32) -> Result<RunOutput> {
            self.runs += 1;
            Ok(RunOutput {
                seconds: self.durations.pop_front().unwrap_or(self.steady),
                output: self
                    .outputs
                    .pop_front()
                    .unwrap_or_else(|| self.steady_output.clone()),
            })
        }

        fn cleanup(&mut self) -> Result<()> {
            self.cleanups += 1;
            Ok(())
        }
    }

    fn catalog() -> FlagCatalog {
        FlagCatalog {
            base_level: "-O2".to_string(),
            flags: ["gcse", "dce", "peel-loops", "tree-pre"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn setup(iterations: Iterations, cap: Option<u32>) -> MeasurementSetup {
        let mut setup = MeasurementSetup::new("bitcount", Profile::Quick, FlagSubset::first(3));
        setup.iterations = iterations;
        setup.escalation_cap = cap.and_then(NonZeroU32::new);
        setup
    }

    fn session(adapter: MockAdapter, setup: MeasurementSetup) -> Session<MockAdapter> {
        Session::new(adapter, catalog(), setup, &IdGenerator::new()).unwrap()
    }

    #[test]
    fn test_fixed_iterations_run_exactly_n_times() {
        let mut s = session(MockAdapter::steady(0.5), setup(Iterations::fixed(4).unwrap(), None));
        let obs = s.observe(&Configuration::new([0, 2])).unwrap();
        assert_eq!(obs.samples.len(), 4);
        assert_eq!(obs.value, 0.5);
        assert!(!obs.low_confidence);
        assert_eq!(s.adapter().runs, 4);
        assert_eq!(s.state(), SessionState::Reported);
        assert_eq!(
            s.adapter().prepared[0],
            vec!["-O2", "-fgcse", "-fno-dce", "-fpeel-loops"]
        );
    }

    #[test]
    fn test_reported_value_ignores_spike() {
        let adapter = MockAdapter::scripted(&[1.0, 1.0, 1.0, 1.0, 100.0], 1.0);
        let mut s = session(adapter, setup(Iterations::fixed(5).unwrap(), None));
        let obs = s.observe(&Configuration::none()).unwrap();
        assert_eq!(obs.value, 1.0);
        assert_eq!(obs.kept, 4);
        assert_eq!(obs.relative_std, Some(0.0));
    }

    #[test]
    fn test_auto_escalates_until_stable() {
        let adapter = MockAdapter::scripted(&[1.0, 2.0, 1.0, 2.0], 1.0);
        let mut s = session(adapter, setup(Iterations::Auto, Some(20)));
        let obs = s.observe(&Configuration::none()).unwrap();

        // The two slow runs only stand out as outliers once eight samples are in.
        assert_eq!(obs.samples.len(), 8);
        assert_eq!(s.adapter().runs, 8);
        assert_eq!(obs.value, 1.0);
        assert!(!obs.low_confidence);
        assert!(obs.relative_std.unwrap() <= 0.05);
    }

    #[test]
    fn test_auto_stops_at_cap_with_low_confidence() {
        let noisy: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { 2.0 }).collect();
        let adapter = MockAdapter::scripted(&noisy, 1.0);
        let mut s = session(adapter, setup(Iterations::Auto, Some(10)));
        let obs = s.observe(&Configuration::none()).unwrap();

        assert_eq!(obs.samples.len(), 10);
        assert_eq!(s.adapter().runs, 10);
        assert!(obs.low_confidence);
        assert!((obs.value - 1.5).abs() < 1e-12);
        assert_eq!(s.state(), SessionState::Reported);
    }

    #[test]
    fn test_auto_needs_minimum_runs() {
        let mut s = session(MockAdapter::steady(2.0), setup(Iterations::Auto, Some(10)));
        let obs = s.observe(&Configuration::none()).unwrap();
        assert_eq!(obs.samples.len(), AUTO_MIN_RUNS);
    }

    #[test]
    fn test_out_of_range_configuration_does_no_work() {
        let mut s = session(MockAdapter::steady(1.0), setup(Iterations::fixed(2).unwrap(), None));
        let err = s.measure(&Configuration::new([1, 3])).unwrap_err();
        assert!(matches!(err, Error::ConfigurationOutOfRange { flag: 3, .. }));
        assert!(s.adapter().prepared.is_empty());
        assert_eq!(s.adapter().runs, 0);
        assert_eq!(s.state(), SessionState::Unprepared);
    }

    #[test]
    fn test_build_error_is_not_retried() {
        let adapter = MockAdapter {
            fail_build: true,
            ..MockAdapter::steady(1.0)
        };
        let mut s = session(adapter, setup(Iterations::Auto, Some(10)));
        let err = s.measure(&Configuration::none()).unwrap_err();
        assert!(err.is_build());
        assert!(!err.is_output_validation());
        assert_eq!(s.adapter().runs, 0);
        assert_eq!(s.state(), SessionState::Failed);
    }

    #[test]
    fn test_validity_mismatch_is_distinct_error() {
        let adapter = MockAdapter {
            outputs: VecDeque::from(vec![b"golden".to_vec(), b"garbage".to_vec()]),
            ..MockAdapter::steady(1.0)
        };
        let mut s = session(adapter, setup(Iterations::fixed(3).unwrap(), None));
        s.prepare_validity_check().unwrap();

        assert!(s.validity_check_enabled());
        assert_eq!(s.adapter().runs, 1);
        assert_eq!(s.adapter().prepared[0], vec!["-O2", "-fgcse", "-fdce", "-fpeel-loops"]);
        assert_eq!(s.setup().iterations, Iterations::fixed(3).unwrap());

        let err = s.measure(&Configuration::new([0])).unwrap_err();
        assert!(err.is_output_validation());
        assert!(!err.is_build());
        assert_eq!(s.state(), SessionState::Failed);

        // The reference and the iteration count survive the failed call.
        assert!(s.validity_check_enabled());
        assert_eq!(s.setup().iterations, Iterations::fixed(3).unwrap());
    }

    #[test]
    fn test_matching_output_passes_validity_check() {
        let mut s = session(MockAdapter::steady(1.0), setup(Iterations::fixed(3).unwrap(), None));
        s.prepare_validity_check().unwrap();
        assert_eq!(s.measure(&Configuration::new([1])).unwrap(), 1.0);
        assert_eq!(s.adapter().runs, 4);
    }

    #[test]
    fn test_failed_capture_keeps_previous_reference() {
        let mut s = session(MockAdapter::steady(1.0), setup(Iterations::fixed(2).unwrap(), None));
        s.prepare_validity_check().unwrap();
        let before = s.validity_reference().cloned();

        s.adapter_mut().fail_build = true;
        assert!(s.prepare_validity_check().unwrap_err().is_build());
        assert_eq!(s.validity_reference().cloned(), before);
        assert_eq!(s.setup().iterations, Iterations::fixed(2).unwrap());
    }

    #[test]
    fn test_set_target_resets_rounds_and_validity() {
        let adapter = MockAdapter {
            rounds_per_input: vec![(1, 12)],
            ..MockAdapter::steady(1.0)
        };
        let mut s = session(adapter, setup(Iterations::fixed(1).unwrap(), None));
        assert_eq!(s.rounds(), 12);
        s.prepare_validity_check().unwrap();

        s.adapter_mut().rounds_per_input = vec![(1, 30)];
        s.set_target("gsm").unwrap();
        assert_eq!(s.rounds(), 30);
        assert_eq!(s.setup().target, "gsm");
        assert!(!s.validity_check_enabled());
    }

    #[test]
    fn test_set_target_fails_fast_on_metadata() {
        let adapter = MockAdapter {
            missing_metadata: vec!["gsm".to_string()],
            ..MockAdapter::steady(1.0)
        };
        let mut s = session(adapter, setup(Iterations::fixed(1).unwrap(), None));
        assert!(matches!(
            s.set_target("gsm"),
            Err(Error::TargetMetadata { .. })
        ));
        assert!(matches!(s.set_target("unknown"), Err(Error::UnknownTarget(_))));
    }

    #[test]
    fn test_failed_set_target_keeps_previous_target() {
        let adapter = MockAdapter {
            missing_metadata: vec!["gsm".to_string()],
            rounds_per_input: vec![(1, 12)],
            ..MockAdapter::steady(1.0)
        };
        let mut s = session(adapter, setup(Iterations::fixed(2).unwrap(), None));
        s.prepare_validity_check().unwrap();
        let reference = s.validity_reference().cloned();

        assert!(s.set_target("gsm").is_err());
        assert_eq!(s.setup().target, "bitcount");
        assert_eq!(s.rounds(), 12);
        assert_eq!(s.adapter().target.as_deref(), Some("bitcount"));
        assert_eq!(s.validity_reference().cloned(), reference);

        // Measuring still targets the previous benchmark with its own round count.
        let obs = s.observe(&Configuration::new([0])).unwrap();
        assert_eq!(obs.rounds, 12);
        assert_eq!(obs.samples.len(), 2);
    }

    #[test]
    fn test_failed_rebind_refuses_to_measure() {
        let adapter = MockAdapter {
            missing_metadata: vec!["gsm".to_string()],
            ..MockAdapter::steady(1.0)
        };
        let mut s = session(adapter, setup(Iterations::fixed(1).unwrap(), None));
        s.prepare_validity_check().unwrap();
        s.adapter_mut().rejected_targets = vec!["bitcount".to_string()];

        assert!(matches!(
            s.set_target("gsm"),
            Err(Error::TargetMetadata { .. })
        ));
        assert_eq!(s.state(), SessionState::Failed);
        assert!(!s.validity_check_enabled());
        let runs = s.adapter().runs;
        assert!(matches!(
            s.measure(&Configuration::none()),
            Err(Error::InvalidSetup(_))
        ));
        assert!(s.set_input(2).is_err());
        assert_eq!(s.adapter().runs, runs);

        s.set_target("susan").unwrap();
        assert_eq!(s.measure(&Configuration::none()).unwrap(), 1.0);
    }

    #[test]
    fn test_synthetic_failed_set_target_keeps_measuring() {
        let mut adapter = SyntheticAdapter::new(5);
        adapter.spike_rate = 0.0;
        adapter.broken_targets = vec!["gsm".to_string()];
        let mut s = Session::new(
            adapter,
            catalog(),
            setup(Iterations::fixed(3).unwrap(), None),
            &IdGenerator::new(),
        )
        .unwrap();
        let before = s.measure(&Configuration::new([1])).unwrap();
        let rounds = s.rounds();

        assert!(s.set_target("gsm").is_err());
        assert_eq!(s.setup().target, "bitcount");
        assert_eq!(s.rounds(), rounds);
        let after = s.measure(&Configuration::new([1])).unwrap();
        assert!((after - before).abs() / before < 0.5);
    }

    #[test]
    fn test_set_input_recaptures_reference() {
        let adapter = MockAdapter {
            rounds_per_input: vec![(1, 4), (2, 9)],
            outputs: VecDeque::from(vec![b"input one".to_vec(), b"input two".to_vec()]),
            ..MockAdapter::steady(1.0)
        };
        let mut s = session(adapter, setup(Iterations::fixed(2).unwrap(), None));
        s.prepare_validity_check().unwrap();
        let first = s.validity_reference().unwrap().digest_hex();

        s.set_input(2).unwrap();
        assert_eq!(s.rounds(), 9);
        assert_eq!(s.setup().input, 2);
        let second = s.validity_reference().unwrap();
        assert_eq!(second.input, 2);
        assert_ne!(second.digest_hex(), first);
        assert_eq!(s.adapter().runs, 2);
    }

    #[test]
    fn test_set_input_without_validity_does_not_run() {
        let mut s = session(MockAdapter::steady(1.0), setup(Iterations::fixed(2).unwrap(), None));
        s.set_input(3).unwrap();
        assert_eq!(s.adapter().runs, 0);
        assert!(!s.validity_check_enabled());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let mut s = session(MockAdapter::steady(1.0), setup(Iterations::fixed(1).unwrap(), None));
        s.cleanup().unwrap();
        s.prepare_validity_check().unwrap();
        s.cleanup().unwrap();
        s.cleanup().unwrap();
        assert_eq!(s.adapter().cleanups, 3);
        assert!(!s.validity_check_enabled());
        assert_eq!(s.state(), SessionState::Unprepared);
    }

    #[test]
    fn test_new_rejects_invalid_setup() {
        let err = Session::new(
            MockAdapter::steady(1.0),
            catalog(),
            setup(Iterations::Auto, None),
            &IdGenerator::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSetup(_)));

        let mut too_wide = setup(Iterations::fixed(1).unwrap(), None);
        too_wide.flag_subset = FlagSubset::first(9);
        let ids = IdGenerator::new();
        assert!(Session::new(MockAdapter::steady(1.0), catalog(), too_wide, &ids).is_err());
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        let ids = IdGenerator::new();
        let one = || setup(Iterations::fixed(1).unwrap(), None);
        let a = Session::new(MockAdapter::steady(1.0), catalog(), one(), &ids).unwrap();
        let b = Session::new(MockAdapter::steady(1.0), catalog(), one(), &ids).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_synthetic_miscompile_detected() {
        let mut adapter = SyntheticAdapter::new(11);
        adapter.miscompiling_flag = Some("dce".to_string());
        let mut setup = setup(Iterations::fixed(3).unwrap(), None);
        setup.flag_subset = FlagSubset::new([0, 1]);
        let mut s = Session::new(adapter, catalog(), setup, &IdGenerator::new()).unwrap();

        // Golden output comes from a build with `dce` off; enabling it must be caught.
        s.prepare_validity_check_at(Configuration::new([0])).unwrap();
        assert!(s.measure(&Configuration::new([0])).is_ok());
        assert!(s.measure(&Configuration::none()).is_ok());
        assert!(s
            .measure(&Configuration::new([0, 1]))
            .unwrap_err()
            .is_output_validation());
        assert!(s
            .measure(&Configuration::new([1]))
            .unwrap_err()
            .is_output_validation());
    }

    #[test]
    fn test_synthetic_auto_session_converges() {
        let mut adapter = SyntheticAdapter::new(42);
        adapter.noise = 0.01;
        adapter.spike_rate = 0.1;
        let mut s = Session::new(
            adapter,
            catalog(),
            setup(Iterations::Auto, Some(50)),
            &IdGenerator::new(),
        )
        .unwrap();
        let obs = s.observe(&Configuration::new([0, 1, 2])).unwrap();
        assert!(obs.samples.len() <= 50);
        assert!(!obs.low_confidence);
        assert!(obs.relative_std.unwrap() <= 0.05);
    }
}
