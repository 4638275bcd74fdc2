use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::process::Command;
use tracing::{info, warn};

/// Yields every node-failure subset up to cardinality `m`, smallest
/// cardinality first and lexicographic within a cardinality. Each item is a
/// strictly increasing index sequence in `[0, n)`.
pub struct FailurePatternIter {
    n: usize,
    m: usize,
    current: Vec<usize>,
    done: bool,
}

impl FailurePatternIter {
    pub fn new(n: usize, m: usize) -> Self {
        Self {
            n,
            m,
            current: vec![0],
            done: m == 0 || m > n,
        }
    }
}

impl Iterator for FailurePatternIter {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        let item = self.current.clone();
        let f = self.current.len();
        let mut i = f;
        loop {
            if i == 0 {
                // current cardinality exhausted
                if f == self.m {
                    self.done = true;
                } else {
                    self.current = (0..f + 1).collect();
                }
                break;
            }
            i -= 1;
            if self.current[i] < self.n - (f - i) {
                self.current[i] += 1;
                for j in i + 1..f {
                    self.current[j] = self.current[j - 1] + 1;
                }
                break;
            }
        }
        Some(item)
    }
}

/// Total trial count: sum of C(n, f) for f = 1..=m.
pub fn pattern_count(n: usize, m: usize) -> u64 {
    (1..=m).map(|f| binomial(n, f)).sum()
}

fn binomial(n: usize, f: usize) -> u64 {
    // exact for the node counts this harness sees: each partial product of
    // i+1 consecutive integers is divisible by (i+1)!
    let mut acc = 1u64;
    for i in 0..f {
        acc = acc * (n - i) as u64 / (i + 1) as u64;
    }
    acc
}

/// One recovery-check trial against a simulated failed-node set. Pass/fail
/// is the trial's own exit behavior; the enumerator never re-validates.
pub trait RecoveryTrial {
    fn run(&self, pattern: &[usize], packet_size: u64) -> Result<bool>;
}

/// Invokes the external check binary as `<program> <packet_size> <idx...>`.
pub struct CheckBinaryTrial {
    pub program: PathBuf,
}

impl RecoveryTrial for CheckBinaryTrial {
    fn run(&self, pattern: &[usize], packet_size: u64) -> Result<bool> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(packet_size.to_string());
        for idx in pattern {
            cmd.arg(idx.to_string());
        }
        let status = cmd.status()?;
        Ok(status.success())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnumerationSummary {
    pub trials: u64,
    pub failures: u64,
}

/// Runs one trial per failure pattern, strictly sequentially. A failed or
/// unspawnable trial is counted and logged but never halts enumeration;
/// exhaustive coverage wins over early termination.
pub fn enumerate_failures(
    n: usize,
    k: usize,
    packet_size: u64,
    trial: &dyn RecoveryTrial,
) -> Result<EnumerationSummary> {
    if k == 0 || n <= k {
        return Err(anyhow!("need n > k >= 1 (got n={}, k={})", n, k));
    }
    let m = n - k;
    info!(n, k, m, expected_trials = pattern_count(n, m), "enumerating failure patterns");
    let mut summary = EnumerationSummary::default();
    let mut cardinality = 0usize;
    for pattern in FailurePatternIter::new(n, m) {
        if pattern.len() != cardinality {
            cardinality = pattern.len();
            info!(num_failures = cardinality, "next failure cardinality");
        }
        summary.trials += 1;
        match trial.run(&pattern, packet_size) {
            Ok(true) => {}
            Ok(false) => {
                summary.failures += 1;
                warn!(?pattern, "recovery trial reported failure");
            }
            Err(err) => {
                summary.failures += 1;
                warn!(?pattern, error = %err, "recovery trial could not run");
            }
        }
    }
    info!(
        trials = summary.trials,
        failures = summary.failures,
        "failure enumeration complete"
    );
    Ok(summary)
}
