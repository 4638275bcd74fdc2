use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A parsed coding-scheme identifier of the form `FAMILY_n_k[_sub...]`,
/// e.g. `RSCONV_9_6` or `ETRSConv_9_6_18`. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodingScheme {
    pub id: String,
    pub family: String,
    /// Total nodes.
    pub n: usize,
    /// Data nodes.
    pub k: usize,
    /// Scheme-specific sub-parameters, in identifier order.
    pub sub: Vec<u32>,
}

impl CodingScheme {
    /// Tolerable simultaneous failures, m = n - k.
    pub fn fault_tolerance(&self) -> usize {
        self.n - self.k
    }
}

impl FromStr for CodingScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('_').collect();
        if parts.len() < 3 || parts[0].is_empty() {
            return Err(anyhow!(
                "invalid scheme id '{}': expected FAMILY_n_k[_sub...]",
                s
            ));
        }
        let n: usize = parts[1]
            .parse()
            .map_err(|_| anyhow!("invalid scheme id '{}': n must be an integer", s))?;
        let k: usize = parts[2]
            .parse()
            .map_err(|_| anyhow!("invalid scheme id '{}': k must be an integer", s))?;
        if k == 0 || n <= k {
            return Err(anyhow!(
                "invalid scheme id '{}': need n > k >= 1 (got n={}, k={})",
                s,
                n,
                k
            ));
        }
        let sub = parts[3..]
            .iter()
            .map(|p| {
                p.parse::<u32>()
                    .map_err(|_| anyhow!("invalid scheme id '{}': bad sub-parameter '{}'", s, p))
            })
            .collect::<Result<Vec<u32>>>()?;
        Ok(CodingScheme {
            id: s.to_string(),
            family: parts[0].to_string(),
            n,
            k,
            sub,
        })
    }
}

/// Fixed pauses that let asynchronous remote effects become observable
/// before the next phase queries cluster state. All in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettleDelays {
    pub after_restart_ms: u64,
    pub after_write_ms: u64,
    pub before_locate_ms: u64,
    pub after_delete_ms: u64,
    pub before_verify_ms: u64,
    pub between_reads_ms: u64,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            after_restart_ms: 2000,
            after_write_ms: 1000,
            before_locate_ms: 2000,
            after_delete_ms: 2000,
            before_verify_ms: 3000,
            between_reads_ms: 1000,
        }
    }
}

impl SettleDelays {
    /// All-zero delays, for tests and dry runs.
    pub fn none() -> Self {
        Self {
            after_restart_ms: 0,
            after_write_ms: 0,
            before_locate_ms: 0,
            after_delete_ms: 0,
            before_verify_ms: 0,
            between_reads_ms: 0,
        }
    }
}

/// Bounded retry for the block-location query. Placement metadata becomes
/// queryable asynchronously relative to the write completing, so a single
/// query cannot be trusted; exhausting the budget is surfaced as an explicit
/// gave-up error instead of hanging.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Host that runs the coordinator and the start/stop scripts.
    pub control_host: String,
    /// Remote project directory holding env.sh / start.sh / stop.sh.
    pub project_dir: String,
    /// Remote glob of the on-disk block store directories on data nodes.
    pub block_store_glob: String,
    /// Remote path of the coordinator log, copied next to each result.
    /// Empty disables the copy.
    #[serde(default)]
    pub coordinator_log: String,
    /// Hosts the parallel stripe writer fans out over, one worker each.
    #[serde(default)]
    pub client_hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Storage client binary invoked for write/read operations.
    pub binary: PathBuf,
    /// Per-node input file handed to every write.
    pub input_file: String,
    pub input_size_mb: u64,
    /// Prefix of the per-node object names written during encode.
    pub object_prefix: String,
    /// Scratch name the read operation materializes into.
    pub read_output: String,
    /// Local worker log scanned for the repair breakdown records.
    pub worker_log: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchConfig {
    /// Read/repair trials per node during the decode phase.
    pub repeat_time: usize,
    /// Erasure-coding packet size in bytes.
    pub packet_size: u64,
    #[serde(default)]
    pub settle: SettleDelays,
    #[serde(default)]
    pub locate_retry: RetryPolicy,
}

/// The whole experiment configuration, constructed once at the entry point
/// and passed by reference into the orchestrator and enumerator. There is no
/// ambient global state.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    pub cluster: ClusterConfig,
    pub client: ClientConfig,
    pub bench: BenchConfig,
    /// Scheme catalog iterated by `bench all`.
    #[serde(default)]
    pub schemes: Vec<String>,
    pub results_dir: PathBuf,
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ExperimentConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        if config.bench.repeat_time == 0 {
            return Err(anyhow!("bench.repeat_time must be at least 1"));
        }
        Ok(config)
    }
}

pub const CONFIG_TEMPLATE: &str = "\
# ecbench experiment configuration
cluster:
  control_host: namenode
  project_dir: /home/ec/openec
  block_store_glob: \"~/hadoop/dfs/data/current/BP*/current/finalized/*/*\"
  coordinator_log: /home/ec/openec/coor_output
  client_hosts: [dn1, dn2, dn3]
client:
  binary: ./OECClient
  input_file: input_384
  input_size_mb: 384
  object_prefix: /bench_
  read_output: read_out
  worker_log: agent_output
bench:
  repeat_time: 10
  packet_size: 1048576
  settle:
    after_restart_ms: 2000
    after_write_ms: 1000
    before_locate_ms: 2000
    after_delete_ms: 2000
    before_verify_ms: 3000
    between_reads_ms: 1000
  locate_retry:
    max_attempts: 30
    backoff_ms: 1000
schemes:
  - RSCONV_9_6
  - ETRSConv_9_6_2
  - ETRSConv_9_6_3
results_dir: exp_result
";
