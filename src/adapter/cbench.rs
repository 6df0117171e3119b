//! Support for the cBench benchmark suite.
//!
//! Each benchmark lives in its own `src` directory containing per-compiler makefiles
//! (`Makefile.<suffix>`), a `__run <dataset> <rounds>` script that times the program with
//! `time`, and a `_ccc_info_datasets` table describing the available datasets.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;

use clap::ValueEnum;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{BenchmarkAdapter, RunOutput};
use crate::error::{Error, Result};

/// Benchmarks of the suite that build and measure reliably, with their source directory
/// relative to the suite root.
pub const BENCHMARKS: &[(&str, &str)] = &[
    ("bitcount", "automotive_bitcount/src"),
    ("qsort1", "automotive_qsort1/src"),
    ("susan_c", "automotive_susan_c/src"),
    ("susan_e", "automotive_susan_e/src"),
    ("susan_s", "automotive_susan_s/src"),
    ("bzip2d", "bzip2d/src"),
    ("bzip2e", "bzip2e/src"),
    ("jpeg_c", "consumer_jpeg_c/src"),
    ("jpeg_d", "consumer_jpeg_d/src"),
    ("lame", "consumer_lame/src"),
    ("tiff2bw", "consumer_tiff2bw/src"),
    ("tiff2rgba", "consumer_tiff2rgba/src"),
    ("tiffdither", "consumer_tiffdither/src"),
    ("tiffmedian", "consumer_tiffmedian/src"),
    ("dijkstra", "network_dijkstra/src"),
    ("patricia", "network_patricia/src"),
    ("rsynth", "office_rsynth/src"),
    ("blowfish_d", "security_blowfish_d/src"),
    ("blowfish_e", "security_blowfish_e/src"),
    ("rijndael_e", "security_rijndael_e/src"),
    ("adpcm_c", "telecom_adpcm_c/src"),
    ("adpcm_d", "telecom_adpcm_d/src"),
    ("CRC32", "telecom_CRC32/src"),
    ("gsm", "telecom_gsm/src"),
];

pub const DEFAULT_BENCHMARK: &str = "bitcount";

const DATASETS_FILE: &str = "_ccc_info_datasets";
const ARTIFACT: &str = "a.out";
const OUTPUT_FILE: &str = "ftmp_out";

/// Source directory of a benchmark, relative to the suite root.
pub fn benchmark_dir(name: &str) -> Option<&'static str> {
    BENCHMARKS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, dir)| *dir)
}

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum CompilerKind {
    #[default]
    Gcc,
    Clang,
}

impl CompilerKind {
    /// Suffix of the suite's per-compiler makefile.
    pub fn makefile_suffix(&self) -> &'static str {
        match self {
            CompilerKind::Gcc => "gcc",
            CompilerKind::Clang => "llvm",
        }
    }

    pub fn default_executable(&self) -> &'static str {
        match self {
            CompilerKind::Gcc => "gcc",
            CompilerKind::Clang => "clang",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compiler {
    pub kind: CompilerKind,
    pub path: PathBuf,
}

impl Compiler {
    pub fn new(kind: CompilerKind) -> Self {
        Self {
            kind,
            path: PathBuf::from(kind.default_executable()),
        }
    }

    pub fn with_path(kind: CompilerKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

#[derive(Debug)]
pub struct CBenchAdapter {
    root: PathBuf,
    compiler: Compiler,
    use_make: bool,
    target: Option<(String, PathBuf)>,
}

impl CBenchAdapter {
    /// `root` is the directory holding the suite's benchmark directories.
    pub fn new(root: impl Into<PathBuf>, compiler: Compiler) -> Self {
        Self {
            root: root.into(),
            compiler,
            use_make: false,
            target: None,
        }
    }

    /// Build through the benchmark's makefile instead of invoking the compiler directly.
    pub fn use_make(mut self, use_make: bool) -> Self {
        self.use_make = use_make;
        self
    }

    pub fn src_dir(&self) -> Option<&Path> {
        self.target.as_ref().map(|(_, dir)| dir.as_path())
    }

    fn bound(&self) -> Result<(&str, &Path)> {
        self.target
            .as_ref()
            .map(|(name, dir)| (name.as_str(), dir.as_path()))
            .ok_or_else(|| Error::InvalidSetup("no cBench target selected".to_string()))
    }

    fn build_error(target: &str, what: &str, output: &Output) -> Error {
        Error::Build {
            target: target.to_string(),
            message: format!(
                "{what} exited with {}: {}",
                output.status,
                tail(&String::from_utf8_lossy(&output.stderr), 20)
            ),
        }
    }
}

impl BenchmarkAdapter for CBenchAdapter {
    fn name(&self) -> &str {
        "cbench"
    }

    fn select_target(&mut self, target: &str) -> Result<()> {
        let rel = benchmark_dir(target).ok_or_else(|| Error::UnknownTarget(target.to_string()))?;
        let dir = self.root.join(rel);
        if !dir.is_dir() {
            return Err(Error::TargetMetadata {
                target: target.to_string(),
                reason: format!("source directory {} does not exist", dir.display()),
            });
        }
        self.target = Some((target.to_string(), dir));
        Ok(())
    }

    fn default_repetition_count(&self, input: u32) -> Result<u32> {
        let (name, dir) = self.bound()?;
        let path = dir.join(DATASETS_FILE);
        let text = fs::read_to_string(&path).map_err(|e| Error::TargetMetadata {
            target: name.to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;
        let rounds = parse_dataset_rounds(&text, input).map_err(|reason| Error::TargetMetadata {
            target: name.to_string(),
            reason,
        })?;
        match rounds {
            // One execution should take roughly a second.
            Some(rounds) => Ok((rounds / 10).max(1)),
            None => {
                warn!(bench = name, input, "dataset not listed in {DATASETS_FILE}, using 1 round");
                Ok(1)
            }
        }
    }

    fn prepare(&mut self, flags: &[String], parallel: bool) -> Result<()> {
        let (name, dir) = self.bound()?;
        let generic = dir.join("Makefile");
        let specific = dir.join(format!("Makefile.{}", self.compiler.kind.makefile_suffix()));
        fs::copy(&specific, &generic).map_err(|e| Error::Build {
            target: name.to_string(),
            message: format!("cannot install {}: {e}", specific.display()),
        })?;

        if self.use_make {
            let mut cmd = Command::new("make");
            cmd.current_dir(dir)
                .arg(format!("ZCC={}", self.compiler.path.display()))
                .arg(format!("CCC_OPTS={}", flags.join(" ")));
            if parallel {
                cmd.arg("-j");
            }
            debug!(bench = name, ?flags, "building with make");
            let output = cmd.output().map_err(|e| Error::Build {
                target: name.to_string(),
                message: format!("cannot spawn make: {e}"),
            })?;
            if !output.status.success() {
                return Err(Self::build_error(name, "make", &output));
            }
            return Ok(());
        }

        let makefile = fs::read_to_string(&specific)?;
        let mut extra = vec!["-lm".to_string()];
        extra.extend(scrape_makefile_flags(&makefile));

        let sources = c_sources(dir)?;
        if sources.is_empty() {
            return Err(Error::Build {
                target: name.to_string(),
                message: format!("no C sources in {}", dir.display()),
            });
        }

        debug!(bench = name, ?flags, sources = sources.len(), "compiling");
        let output = Command::new(&self.compiler.path)
            .current_dir(dir)
            .args(flags)
            .args(&sources)
            .arg("-o")
            .arg(ARTIFACT)
            .args(&extra)
            .output()
            .map_err(|e| Error::Build {
                target: name.to_string(),
                message: format!("cannot spawn {}: {e}", self.compiler.path.display()),
            })?;
        if !output.status.success() {
            return Err(Self::build_error(name, "compiler", &output));
        }
        Ok(())
    }

    fn run(&mut self, input: u32, rounds: u32) -> Result<RunOutput> {
        let (name, dir) = self.bound()?;

        // A run that writes no output file must not inherit the previous run's.
        match fs::remove_file(dir.join(OUTPUT_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let start = Instant::now();
        let output = Command::new("./__run")
            .current_dir(dir)
            .arg(input.to_string())
            .arg(rounds.to_string())
            .output()
            .map_err(|e| Error::Run {
                target: name.to_string(),
                message: format!("cannot spawn __run: {e}"),
            })?;
        let wall = start.elapsed().as_secs_f64();
        if !output.status.success() {
            return Err(Error::Run {
                target: name.to_string(),
                message: format!(
                    "__run exited with {}: {}",
                    output.status,
                    tail(&String::from_utf8_lossy(&output.stderr), 20)
                ),
            });
        }

        // `time` reports on stderr.
        let stderr = String::from_utf8_lossy(&output.stderr);
        let total = parse_real_time(&stderr).unwrap_or_else(|| {
            debug!(bench = name, "no `real` line in __run output, using wall clock");
            wall
        });

        let program_output = match fs::read(dir.join(OUTPUT_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => output.stdout,
            Err(e) => return Err(e.into()),
        };

        Ok(RunOutput {
            seconds: total / f64::from(rounds.max(1)),
            output: program_output,
        })
    }

    fn cleanup(&mut self) -> Result<()> {
        let Some((name, dir)) = self.target.as_ref() else {
            return Ok(());
        };

        match Command::new("make").current_dir(dir).arg("clean").output() {
            Ok(out) if !out.status.success() => {
                debug!(bench = %name, status = %out.status, "make clean failed");
            }
            Ok(_) => {}
            Err(e) => debug!(bench = %name, %e, "cannot spawn make clean"),
        }

        let mut leftovers = vec![dir.join(ARTIFACT), dir.join(OUTPUT_FILE)];
        for entry in WalkDir::new(dir).max_depth(1) {
            let entry = entry.map_err(io::Error::other)?;
            if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "o") {
                leftovers.push(entry.path().to_path_buf());
            }
        }
        for path in leftovers {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Looks up the loop-wrap round count of `dataset`.
///
/// The table starts with the number of datasets, followed by four-line records: a
/// separator, the dataset id, its command line and its round count.
fn parse_dataset_rounds(text: &str, dataset: u32) -> std::result::Result<Option<u32>, String> {
    let mut lines = text.lines();
    let header = lines.next().ok_or("empty dataset table")?;
    header
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad dataset count '{}': {e}", header.trim()))?;

    while lines.next().is_some() {
        let (Some(id), Some(_cmdline), Some(rounds)) = (lines.next(), lines.next(), lines.next())
        else {
            break;
        };
        let id: u32 = id
            .trim()
            .parse()
            .map_err(|e| format!("bad dataset id '{}': {e}", id.trim()))?;
        if id == dataset {
            return rounds
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| format!("bad round count '{}': {e}", rounds.trim()));
        }
    }
    Ok(None)
}

/// Collects the include, define and library flags of the makefile's `all:` rule.
fn scrape_makefile_flags(makefile: &str) -> Vec<String> {
    let mut in_all = false;
    let mut flags = Vec::new();
    for line in makefile.lines().map(str::trim) {
        if line.starts_with("all:") {
            in_all = true;
        } else if line.starts_with("clean:") {
            in_all = false;
        } else if in_all {
            flags.extend(
                line.split_whitespace()
                    .filter(|tok| ["-I", "-D", "-l"].iter().any(|p| tok.starts_with(p)))
                    .map(str::to_string),
            );
        }
    }
    flags
}

fn c_sources(dir: &Path) -> Result<Vec<String>> {
    let mut sources = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "c") {
            sources.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    sources.sort();
    Ok(sources)
}

/// Parses the `real` line of `time` output, e.g. `real\t1m2.500s` or `real 62.50`.
fn parse_real_time(stderr: &str) -> Option<f64> {
    let line = stderr.lines().rev().find(|l| l.trim_start().starts_with("real"))?;
    let value = line.trim_start().strip_prefix("real")?.trim();
    match value.split_once('m') {
        Some((minutes, seconds)) => {
            let minutes: f64 = minutes.trim().parse().ok()?;
            let seconds: f64 = seconds.trim().strip_suffix('s').unwrap_or(seconds).parse().ok()?;
            Some(minutes * 60.0 + seconds)
        }
        None => value.strip_suffix('s').unwrap_or(value).parse().ok(),
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
