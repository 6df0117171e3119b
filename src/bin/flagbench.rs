use clap::{Parser, Subcommand, ValueEnum};
use flagbench::adapter::cbench::{self, BENCHMARKS, DEFAULT_BENCHMARK};
use flagbench::adapter::{BenchmarkAdapter, CBenchAdapter, Compiler, CompilerKind, SyntheticAdapter};
use flagbench::export;
use flagbench::flags::{GCC10_GREEDY_BEST, GCC10_INDIVIDUAL_BEST};
use flagbench::schema::{FlagBenchReport, Measurement, RunMeta, SCHEMA_VERSION};
use flagbench::{
    most_diverse_subset, AdapterFamily, Configuration, Error, FlagCatalog, FlagSubset, IdGenerator,
    Iterations, MeasurementSetup, Profile, ProgressParallel, Result, Session, WorkerPool,
};
use std::fs;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProfileArg {
    Quick,
    Full,
}

impl From<ProfileArg> for Profile {
    fn from(v: ProfileArg) -> Self {
        match v {
            ProfileArg::Quick => Profile::Quick,
            ProfileArg::Full => Profile::Full,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum SubsetArg {
    Indices(Vec<usize>),
    GreedyBest(usize),
    IndividualBest(usize),
}

impl SubsetArg {
    fn resolve(&self) -> Result<FlagSubset> {
        match self {
            SubsetArg::Indices(indices) => Ok(FlagSubset::new(indices.iter().copied())),
            SubsetArg::GreedyBest(n) => FlagSubset::best(&GCC10_GREEDY_BEST, *n),
            SubsetArg::IndividualBest(n) => FlagSubset::best(&GCC10_INDIVIDUAL_BEST, *n),
        }
    }
}

impl FromStr for SubsetArg {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let count = |n: &str| {
            n.trim()
                .parse::<usize>()
                .map_err(|_| Error::InvalidArgument(format!("'{n}' is not a flag count")))
        };
        if let Some(n) = s.strip_prefix("best:") {
            return Ok(SubsetArg::GreedyBest(count(n)?));
        }
        if let Some(n) = s.strip_prefix("individual:") {
            return Ok(SubsetArg::IndividualBest(count(n)?));
        }
        s.split(',')
            .map(|tok| {
                tok.trim()
                    .parse::<usize>()
                    .map_err(|_| Error::InvalidArgument(format!("'{tok}' is not a flag index")))
            })
            .collect::<Result<Vec<_>>>()
            .map(SubsetArg::Indices)
    }
}

/// Sweeps enumerate `2^n` configurations; keep `n` small enough to finish.
const MAX_SWEEP_FLAGS: usize = 20;

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure one configuration of one benchmark.
    Measure {
        #[arg(long, value_name = "NAME")]
        bench: Option<String>,

        /// Enabled flag indices (catalogue positions), comma separated.
        #[arg(long, value_delimiter = ',', conflicts_with = "mask")]
        enable: Vec<usize>,

        /// Enabled flags as a bit mask over the flag subset (bit i switches subset[i]).
        #[arg(long)]
        mask: Option<u64>,

        /// Capture the output at the all-on baseline and check the run against it.
        #[arg(long, default_value_t = false)]
        validate: bool,
    },

    /// Measure every configuration of the flag subset, for each benchmark.
    ///
    /// Benchmarks run in parallel, one session per benchmark.
    Sweep {
        /// Benchmarks to sweep; all known benchmarks if omitted.
        #[arg(
            long = "bench",
            value_name = "NAME",
            num_args = 1..,
            action = clap::ArgAction::Append
        )]
        benches: Vec<String>,

        /// Directory receiving one `<bench>.txt` column of runtimes per benchmark, indexed by mask.
        #[arg(long, value_name = "DIR")]
        table_dir: Option<PathBuf>,

        /// Skip configurations whose output differs from the all-on baseline.
        #[arg(long, default_value_t = false)]
        validate: bool,
    },

    /// Measure the baseline on several inputs and pick the `k` most diverse.
    SelectInputs {
        #[arg(long, value_name = "NAME")]
        bench: Option<String>,

        /// Candidate inputs, comma separated.
        #[arg(long, value_delimiter = ',', default_value = "1,2,3,4,5,6,7,8,9,10")]
        inputs: Vec<u32>,

        #[arg(long, default_value_t = 3)]
        k: usize,
    },

    /// Print the known benchmarks and the flag catalogue.
    List,
}

#[derive(Parser, Debug)]
#[command(name = "flagbench")]
#[command(about = "Stable runtime measurements of compiler flag configurations (JSON output)")]
struct Args {
    #[arg(long, value_enum, default_value_t = ProfileArg::Quick, global = true)]
    profile: ProfileArg,

    /// Seed of the synthetic family.
    #[arg(long, default_value_t = 0, global = true)]
    seed: u64,

    /// Where to write the JSON report. If omitted, prints to stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = AdapterFamily::Cbench, global = true)]
    family: AdapterFamily,

    /// Directory holding the cBench benchmark directories.
    #[arg(long, value_name = "DIR", default_value = "cBench", global = true)]
    cbench_root: PathBuf,

    #[arg(long, value_enum, default_value_t = CompilerKind::Gcc, global = true)]
    compiler: CompilerKind,

    /// Compiler executable; defaults to the kind's usual name on `PATH`.
    #[arg(long, value_name = "PATH", global = true)]
    compiler_path: Option<PathBuf>,

    /// Build through the benchmark makefiles instead of calling the compiler directly.
    #[arg(long, default_value_t = false, global = true)]
    use_make: bool,

    /// Flag catalogue file, one flag per line. Defaults to the built-in GCC 10 list.
    #[arg(long, value_name = "FILE", global = true)]
    flags_file: Option<PathBuf>,

    /// Optimisation level the flags are toggled on top of.
    #[arg(long, default_value = "-O3", allow_hyphen_values = true, global = true)]
    base_level: String,

    /// Size of the flag subset (the first N catalogue flags).
    #[arg(long, default_value_t = 5, global = true)]
    n_flags: usize,

    /// Flag subset, overrides `--n-flags`: catalogue indices (`3,7,12`), or the first N
    /// flags of a GCC 10 ranking (`best:N`, `individual:N`).
    #[arg(long, value_name = "SPEC", global = true)]
    subset: Option<SubsetArg>,

    /// Measurement setup file (JSON). Individual options below override it.
    #[arg(long, value_name = "FILE", global = true)]
    setup: Option<PathBuf>,

    /// Runs per measurement, or `-1`/`auto` to run until stable.
    #[arg(long, allow_hyphen_values = true, global = true)]
    iterations: Option<Iterations>,

    /// Escalation cap for auto iterations.
    #[arg(long, global = true)]
    cap: Option<u32>,

    #[arg(long, global = true)]
    max_std: Option<f64>,

    #[arg(long, global = true)]
    percentile: Option<f64>,

    #[arg(long, global = true)]
    input: Option<u32>,

    /// Let the build use parallel jobs.
    #[arg(long, default_value_t = false, global = true)]
    parallel_build: bool,

    /// Worker threads for sweeps; defaults to the number of cores.
    #[arg(long, global = true)]
    jobs: Option<usize>,

    #[arg(long, default_value_t = false, global = true)]
    progress: bool,

    #[command(subcommand)]
    cmd: Command,
}

impl Args {
    fn catalog(&self) -> Result<FlagCatalog> {
        match &self.flags_file {
            Some(path) => FlagCatalog::from_file(path, self.base_level.clone()),
            None => Ok(FlagCatalog {
                base_level: self.base_level.clone(),
                ..FlagCatalog::gcc10()
            }),
        }
    }

    fn setup(&self, target: &str) -> Result<MeasurementSetup> {
        let mut setup = match &self.setup {
            Some(path) => {
                let mut setup = MeasurementSetup::load(path)?;
                setup.target = target.to_string();
                setup
            }
            None => {
                let subset = match &self.subset {
                    Some(spec) => spec.resolve()?,
                    None => FlagSubset::first(self.n_flags),
                };
                MeasurementSetup::new(target, self.profile.into(), subset)
            }
        };
        if let Some(iterations) = self.iterations {
            setup.iterations = iterations;
        }
        if let Some(cap) = self.cap {
            setup.escalation_cap = NonZeroU32::new(cap);
        }
        if let Some(max_std) = self.max_std {
            setup.max_relative_std = max_std;
        }
        if let Some(percentile) = self.percentile {
            setup.outlier_percentile = percentile;
        }
        if let Some(input) = self.input {
            setup.input = input;
        }
        setup.parallel |= self.parallel_build;
        setup.validate()?;
        Ok(setup)
    }

    fn adapter(&self) -> Box<dyn BenchmarkAdapter> {
        match self.family {
            AdapterFamily::Cbench => {
                let compiler = match &self.compiler_path {
                    Some(path) => Compiler::with_path(self.compiler, path),
                    None => Compiler::new(self.compiler),
                };
                Box::new(CBenchAdapter::new(&self.cbench_root, compiler).use_make(self.use_make))
            }
            AdapterFamily::Synthetic => Box::new(SyntheticAdapter::new(self.seed)),
        }
    }

    fn session(
        &self,
        target: &str,
        ids: &IdGenerator,
    ) -> Result<Session<Box<dyn BenchmarkAdapter>>> {
        Session::new(self.adapter(), self.catalog()?, self.setup(target)?, ids)
    }
}

fn now_utc_rfc3339() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("unix:{secs}")
}

fn git_sha_short() -> Option<String> {
    // Best-effort: read from environment set by CI/build scripts.
    std::env::var("GIT_SHA")
        .ok()
        .or_else(|| std::env::var("GITHUB_SHA").ok())
        .map(|s| s.chars().take(12).collect())
}

fn observe(
    session: &mut Session<Box<dyn BenchmarkAdapter>>,
    configuration: &Configuration,
) -> Result<Measurement> {
    let flags = session
        .catalog()
        .resolve(configuration, &session.setup().flag_subset)?;
    let observation = session.observe(configuration)?;
    let setup = session.setup();
    Ok(Measurement::from_observation(
        session.id(),
        &setup.target,
        setup.input,
        flags,
        observation,
    ))
}

fn measure(
    args: &Args,
    ids: &IdGenerator,
    bench: &str,
    enable: &[usize],
    mask: Option<u64>,
    validate: bool,
) -> Result<Measurement> {
    let mut session = args.session(bench, ids)?;
    let configuration = match mask {
        Some(mask) => Configuration::from_mask(mask, &session.setup().flag_subset)?,
        None => Configuration::new(enable.iter().copied()),
    };
    let result = (|| -> Result<Measurement> {
        if validate {
            session.prepare_validity_check()?;
        }
        observe(&mut session, &configuration)
    })();
    let cleaned = session.cleanup();
    let measurement = result?;
    cleaned?;
    Ok(measurement)
}

fn sweep_bench(
    args: &Args,
    ids: &IdGenerator,
    bench: &str,
    validate: bool,
) -> Result<(Vec<Measurement>, Vec<f64>)> {
    let mut session = args.session(bench, ids)?;
    let subset = session.setup().flag_subset.clone();
    if subset.len() > MAX_SWEEP_FLAGS {
        return Err(Error::InvalidArgument(format!(
            "a sweep over {} flags is too large (at most {MAX_SWEEP_FLAGS})",
            subset.len()
        )));
    }

    let result = (|| -> Result<(Vec<Measurement>, Vec<f64>)> {
        if validate {
            session.prepare_validity_check()?;
        }
        let mut measurements = Vec::new();
        let mut values = Vec::with_capacity(1 << subset.len());
        for mask in 0..(1u64 << subset.len()) {
            let configuration = Configuration::from_mask(mask, &subset)?;
            match observe(&mut session, &configuration) {
                Ok(m) => {
                    values.push(m.value_s);
                    measurements.push(m);
                }
                Err(e) if e.is_output_validation() => {
                    warn!(
                        bench,
                        configuration = %configuration,
                        "output diverged, configuration skipped"
                    );
                    values.push(f64::NAN);
                }
                Err(e) => return Err(e),
            }
        }
        Ok((measurements, values))
    })();
    let cleaned = session.cleanup();
    let swept = result?;
    cleaned?;
    Ok(swept)
}

fn select_inputs(
    args: &Args,
    ids: &IdGenerator,
    bench: &str,
    inputs: &[u32],
    k: usize,
) -> Result<Vec<Measurement>> {
    let mut session = args.session(bench, ids)?;
    let baseline = Configuration::all(&session.setup().flag_subset);

    let result = (|| -> Result<Vec<Measurement>> {
        let mut measurements = Vec::with_capacity(inputs.len());
        for &input in inputs {
            session.set_input(input)?;
            measurements.push(observe(&mut session, &baseline)?);
        }
        Ok(measurements)
    })();
    let cleaned = session.cleanup();
    let mut measurements = result?;
    cleaned?;

    let values: Vec<f64> = measurements.iter().map(|m| m.value_s).collect();
    let chosen = most_diverse_subset(&values, k)?;
    for (i, m) in measurements.iter_mut().enumerate() {
        m.extra = serde_json::json!({ "selected": chosen.contains(&i) });
    }
    let picked: Vec<u32> = chosen.iter().map(|&i| inputs[i]).collect();
    info!(bench, inputs = ?picked, "selected inputs");
    eprintln!("Selected inputs for {bench}: {picked:?}");
    Ok(measurements)
}

fn list(args: &Args) -> Result<()> {
    println!("Benchmarks:");
    for (name, dir) in BENCHMARKS {
        println!("  {name:<12} {}", args.cbench_root.join(dir).display());
    }
    let catalog = args.catalog()?;
    println!("Flags (on top of {}):", catalog.base_level);
    for (i, flag) in catalog.flags.iter().enumerate() {
        println!("  {i:>3} -f{flag}");
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let ids = IdGenerator::new();
    let mut measurements = Vec::new();

    match &args.cmd {
        Command::Measure {
            bench,
            enable,
            mask,
            validate,
        } => {
            let bench = bench.as_deref().unwrap_or(DEFAULT_BENCHMARK);
            measurements.push(measure(&args, &ids, bench, enable, *mask, *validate)?);
        }
        Command::Sweep {
            benches,
            table_dir,
            validate,
        } => {
            let benches: Vec<String> = if benches.is_empty() {
                BENCHMARKS.iter().map(|(name, _)| name.to_string()).collect()
            } else {
                benches.clone()
            };
            for bench in &benches {
                if args.family == AdapterFamily::Cbench && cbench::benchmark_dir(bench).is_none() {
                    return Err(Error::UnknownTarget(bench.clone()));
                }
            }

            let pool = WorkerPool::new(args.jobs);
            let runner = ProgressParallel::new(pool, args.progress).with_label("sweep");
            let swept = runner.try_map(benches.clone(), |bench| {
                sweep_bench(&args, &ids, &bench, *validate)
            })?;
            eprintln!(
                "Swept {} benchmarks ({} tasks completed)",
                benches.len(),
                runner.completed()
            );

            if let Some(dir) = table_dir {
                fs::create_dir_all(dir)?;
            }
            for (bench, (bench_measurements, values)) in benches.iter().zip(swept) {
                if let Some(dir) = table_dir {
                    let path = dir.join(format!("{bench}.txt"));
                    export::save_column(&path, &values)?;
                    eprintln!("Wrote {}", path.display());
                }
                measurements.extend(bench_measurements);
            }
        }
        Command::SelectInputs { bench, inputs, k } => {
            let bench = bench.as_deref().unwrap_or(DEFAULT_BENCHMARK);
            measurements.extend(select_inputs(&args, &ids, bench, inputs, *k)?);
        }
        Command::List => return list(&args),
    }

    let profile: Profile = args.profile.into();
    let report = FlagBenchReport {
        run: RunMeta {
            schema_version: SCHEMA_VERSION,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            profile: profile.as_str().to_string(),
            adapter: args.family.as_str().to_string(),
            seed: args.seed,
            timestamp_utc: now_utc_rfc3339(),
            git_sha: git_sha_short(),
        },
        measurements,
    };

    let json = serde_json::to_string_pretty(&report)?;
    if let Some(out) = &args.out {
        fs::write(out, json)?;
    } else {
        println!("{json}");
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
