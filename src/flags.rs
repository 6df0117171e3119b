//! Compiler flag configurations.
//!
//! A [`Configuration`] is the set of catalogue indices that are switched on. Only flags in
//! the session's [`FlagSubset`] may be toggled; every subset flag that is not switched on is
//! explicitly disabled when the configuration is resolved, so equal configurations always
//! resolve to the same flag list.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Optimisation flags GCC 10 enables across `-O1`, `-O2` and `-O3`, without the `-f` prefix.
///
/// Grouped by the level that first enables them. The orderings below index into this list.
pub const GCC10_FLAGS: &[&str] = &[
    "auto-inc-dec",
    "branch-count-reg",
    "combine-stack-adjustments",
    "compare-elim",
    "cprop-registers",
    "dce",
    "defer-pop",
    "delayed-branch",
    "dse",
    "forward-propagate",
    "guess-branch-probability",
    "if-conversion",
    "if-conversion2",
    "inline-functions-called-once",
    "ipa-profile",
    "ipa-pure-const",
    "ipa-reference",
    "ipa-reference-addressable",
    "merge-constants",
    "move-loop-invariants",
    "omit-frame-pointer",
    "reorder-blocks",
    "shrink-wrap",
    "shrink-wrap-separate",
    "split-wide-types",
    "ssa-backprop",
    "ssa-phiopt",
    "tree-bit-ccp",
    "tree-ccp",
    "tree-ch",
    "tree-coalesce-vars",
    "tree-copy-prop",
    "tree-dce",
    "tree-dominator-opts",
    "tree-dse",
    "tree-forwprop",
    "tree-fre",
    "tree-phiprop",
    "tree-pta",
    "tree-scev-cprop",
    "tree-sink",
    "tree-slsr",
    "tree-sra",
    "tree-ter",
    "unit-at-a-time",
    "ivopts",
    "tree-loop-im",
    "align-functions",
    "align-jumps",
    "align-labels",
    "align-loops",
    "caller-saves",
    "code-hoisting",
    "crossjumping",
    "cse-follow-jumps",
    "cse-skip-blocks",
    "delete-null-pointer-checks",
    "devirtualize",
    "devirtualize-speculatively",
    "expensive-optimizations",
    "finite-loops",
    "gcse",
    "gcse-lm",
    "hoist-adjacent-loads",
    "inline-functions",
    "inline-small-functions",
    "indirect-inlining",
    "ipa-bit-cp",
    "ipa-cp",
    "ipa-icf",
    "ipa-ra",
    "ipa-sra",
    "ipa-vrp",
    "isolate-erroneous-paths-dereference",
    "lra-remat",
    "optimize-sibling-calls",
    "optimize-strlen",
    "partial-inlining",
    "peephole2",
    "reorder-blocks-and-partition",
    "reorder-functions",
    "rerun-cse-after-loop",
    "schedule-insns",
    "schedule-insns2",
    "sched-interblock",
    "sched-spec",
    "store-merging",
    "strict-aliasing",
    "thread-jumps",
    "tree-builtin-call-dce",
    "tree-pre",
    "tree-switch-conversion",
    "tree-tail-merge",
    "tree-vrp",
    "gcse-after-reload",
    "ipa-cp-clone",
    "loop-interchange",
    "loop-unroll-and-jam",
    "peel-loops",
    "predictive-commoning",
    "split-loops",
    "split-paths",
    "tree-loop-distribution",
    "tree-loop-distribute-patterns",
    "tree-loop-vectorize",
    "tree-partial-pre",
    "tree-slp-vectorize",
    "unswitch-loops",
    "vect-cost-model",
    "version-loops-for-strides",
];

/// Catalogue indices ordered by greedy forward selection on the default cBench setup:
/// each flag is the one that improved the runtime most given the flags before it.
pub const GCC10_GREEDY_BEST: [usize; 110] = [
    21, 31, 58, 46, 59, 44, 25, 103, 65, 18, 62, 33, 77, 11, 96, 102, 16, 39, 78, 61, 55, 84,
    41, 63, 94, 53, 83, 70, 52, 36, 73, 89, 12, 104, 48, 34, 13, 38, 7, 91, 40, 8, 43, 49, 60,
    56, 4, 109, 0, 108, 15, 45, 28, 90, 51, 26, 87, 50, 6, 30, 22, 88, 105, 97, 66, 72, 69, 17,
    79, 5, 80, 20, 10, 85, 101, 71, 75, 2, 57, 98, 3, 74, 92, 32, 54, 93, 35, 47, 86, 27, 9, 67,
    100, 23, 29, 42, 76, 81, 19, 95, 64, 68, 82, 24, 107, 37, 99, 14, 106, 1,
];

/// Catalogue indices ordered by the runtime gain of each flag measured on its own.
pub const GCC10_INDIVIDUAL_BEST: [usize; 110] = [
    21, 44, 52, 3, 29, 1, 18, 49, 96, 37, 16, 107, 15, 24, 45, 65, 74, 84, 92, 2, 32, 36, 39, 47,
    50, 51, 56, 64, 66, 71, 81, 98, 101, 103, 108, 5, 7, 8, 13, 14, 17, 19, 33, 43, 48, 54, 61,
    62, 75, 78, 80, 85, 89, 106, 22, 25, 31, 34, 38, 40, 53, 57, 67, 68, 69, 70, 72, 73, 77, 83,
    90, 93, 94, 100, 109, 0, 4, 10, 11, 12, 20, 26, 30, 41, 42, 59, 63, 79, 91, 95, 97, 99, 102,
    104, 9, 23, 28, 35, 55, 60, 76, 82, 87, 88, 105, 6, 27, 46, 58, 86,
];

/// Default flag ordering for subsets of the GCC 10 catalogue.
pub const GCC10_BEST: &[usize] = &GCC10_GREEDY_BEST;

/// The catalogue indices a session may toggle, in set-function order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagSubset(Vec<usize>);

impl FlagSubset {
    /// Builds a subset, dropping duplicates while keeping first-seen order.
    pub fn new(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut seen = BTreeSet::new();
        Self(indices.into_iter().filter(|i| seen.insert(*i)).collect())
    }

    /// The first `n` catalogue flags.
    pub fn first(n: usize) -> Self {
        Self((0..n).collect())
    }

    /// The first `n` flags of a ranked ordering such as [`GCC10_BEST`].
    pub fn best(ranking: &[usize], n: usize) -> Result<Self> {
        if n > ranking.len() {
            return Err(Error::InvalidArgument(format!(
                "cannot take {n} flags from a ranking of {}",
                ranking.len()
            )));
        }
        Ok(Self::new(ranking[..n].iter().copied()))
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, flag: usize) -> bool {
        self.0.contains(&flag)
    }
}

/// A set of enabled flags, identified by catalogue index.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeSet<usize>);

impl Configuration {
    pub fn new(enabled: impl IntoIterator<Item = usize>) -> Self {
        Self(enabled.into_iter().collect())
    }

    /// No subset flag enabled.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every subset flag enabled: the maximum-optimisation baseline.
    pub fn all(subset: &FlagSubset) -> Self {
        Self::new(subset.indices().iter().copied())
    }

    /// Set-function view: `bits[i]` switches `subset[i]`.
    pub fn from_indicator(bits: &[bool], subset: &FlagSubset) -> Result<Self> {
        if bits.len() != subset.len() {
            return Err(Error::InvalidArgument(format!(
                "indicator has {} entries but the flag subset has {}",
                bits.len(),
                subset.len()
            )));
        }
        Ok(Self::new(
            bits.iter()
                .zip(subset.indices())
                .filter(|(on, _)| **on)
                .map(|(_, flag)| *flag),
        ))
    }

    /// Set-function view of a bit mask: bit `i` switches `subset[i]`.
    pub fn from_mask(mask: u64, subset: &FlagSubset) -> Result<Self> {
        if subset.len() < 64 && mask >> subset.len() != 0 {
            return Err(Error::InvalidArgument(format!(
                "mask {mask:#x} has bits beyond the {} subset flags",
                subset.len()
            )));
        }
        Ok(Self::new(
            subset
                .indices()
                .iter()
                .enumerate()
                .filter(|(bit, _)| *bit < 64 && mask & (1u64 << bit) != 0)
                .map(|(_, flag)| *flag),
        ))
    }

    pub fn enabled(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn is_enabled(&self, flag: usize) -> bool {
        self.0.contains(&flag)
    }

    /// Fails with [`Error::ConfigurationOutOfRange`] on the first enabled flag outside `subset`.
    pub fn check_within(&self, subset: &FlagSubset) -> Result<()> {
        match self.enabled().find(|flag| !subset.contains(*flag)) {
            Some(flag) => Err(Error::ConfigurationOutOfRange {
                flag,
                allowed: subset.indices().to_vec(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, flag) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{flag}")?;
        }
        write!(f, "}}")
    }
}

/// Maps catalogue indices to compiler flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagCatalog {
    /// Optimisation level the toggled flags are applied on top of.
    pub base_level: String,
    /// Flag names without the `-f` / `-fno-` prefix.
    pub flags: Vec<String>,
}

impl Default for FlagCatalog {
    fn default() -> Self {
        Self::gcc10()
    }
}

impl FlagCatalog {
    pub fn gcc10() -> Self {
        Self {
            base_level: "-O3".to_string(),
            flags: GCC10_FLAGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Loads one flag per line; blank lines and `#` comments are skipped and a leading
    /// `-f` is stripped.
    pub fn from_file<P: AsRef<Path>>(path: P, base_level: impl Into<String>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let flags = text
            .lines()
            .map(|l| l.split('#').next().unwrap_or("").trim())
            .filter(|l| !l.is_empty())
            .map(|l| l.strip_prefix("-f").unwrap_or(l).to_string())
            .collect();
        Ok(Self {
            base_level: base_level.into(),
            flags,
        })
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.flags.get(index).map(String::as_str)
    }

    /// Checks that every subset index names a catalogue flag.
    pub fn check_subset(&self, subset: &FlagSubset) -> Result<()> {
        match subset.indices().iter().find(|&&i| i >= self.flags.len()) {
            Some(i) => Err(Error::InvalidSetup(format!(
                "flag subset refers to flag {i} but the catalogue has {} flags",
                self.flags.len()
            ))),
            None => Ok(()),
        }
    }

    /// Concrete command-line flags for a configuration: the base level, then `-f<flag>` or
    /// `-fno-<flag>` for each subset flag in subset order.
    pub fn resolve(
        &self,
        configuration: &Configuration,
        subset: &FlagSubset,
    ) -> Result<Vec<String>> {
        configuration.check_within(subset)?;
        self.check_subset(subset)?;

        let mut out = Vec::with_capacity(subset.len() + 1);
        if !self.base_level.is_empty() {
            out.push(self.base_level.clone());
        }
        for &i in subset.indices() {
            let name = &self.flags[i];
            if configuration.is_enabled(i) {
                out.push(format!("-f{name}"));
            } else {
                out.push(format!("-fno-{name}"));
            }
        }
        Ok(out)
    }
}
