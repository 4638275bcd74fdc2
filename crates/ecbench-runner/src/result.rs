use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// All timings gathered for one failed node over a full cycle: one encode
/// duration from the initial write, then `repeat_time`-long lists for the
/// degraded reads and the three repair sub-phases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRepairRecord {
    pub encode: f64,
    pub decode: Vec<f64>,
    pub load: Vec<f64>,
    pub compute: Vec<f64>,
    pub writeback: Vec<f64>,
}

/// Per-node records keyed by node index. A BTreeMap keeps the JSON output
/// in stable node order.
pub type SchemeResult = BTreeMap<usize, NodeRepairRecord>;

/// Writes one directory per scheme under the results root, each holding
/// `result.json`, `manifest.json` and copies of the relevant logs. Running
/// the same scheme again overwrites the previous cycle's files.
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn scheme_dir(&self, scheme_id: &str) -> PathBuf {
        self.root.join(scheme_id)
    }

    /// Persists the records plus a run manifest. Returns the scheme directory.
    pub fn persist(
        &self,
        scheme_id: &str,
        nodes: &SchemeResult,
        manifest: &serde_json::Value,
    ) -> Result<PathBuf> {
        let dir = self.scheme_dir(scheme_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating result dir {}", dir.display()))?;

        let result_bytes = serde_json::to_vec_pretty(nodes)?;
        atomic_write(&dir.join("result.json"), &result_bytes)?;
        let manifest_bytes = serde_json::to_vec_pretty(manifest)?;
        atomic_write(&dir.join("manifest.json"), &manifest_bytes)?;

        info!(scheme = scheme_id, dir = %dir.display(), "results persisted");
        Ok(dir)
    }

    /// Best-effort copy of the local worker log next to the results. Losing
    /// the copy degrades diagnostics, never the measurement.
    pub fn copy_worker_log(&self, scheme_id: &str, src: &Path) {
        let dest = self.scheme_dir(scheme_id).join("worker.log");
        if let Err(err) = fs::copy(src, &dest) {
            warn!(src = %src.display(), error = %err, "worker log copy failed");
        }
    }

    /// Best-effort fetch of the coordinator log from the control host.
    /// An empty remote path disables the fetch entirely.
    pub fn fetch_coordinator_log(&self, scheme_id: &str, host: &str, remote_path: &str) {
        if remote_path.is_empty() {
            return;
        }
        let dest = self.scheme_dir(scheme_id).join("coordinator.log");
        let fetched = Command::new("scp")
            .arg(format!("{}:{}", host, remote_path))
            .arg(&dest)
            .status();
        match fetched {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(%host, %status, "coordinator log fetch failed"),
            Err(err) => warn!(%host, error = %err, "coordinator log fetch failed"),
        }
    }
}

pub fn run_manifest(
    scheme_id: &str,
    n: usize,
    k: usize,
    repeat_time: usize,
    packet_size: u64,
) -> serde_json::Value {
    serde_json::json!({
        "scheme": scheme_id,
        "n": n,
        "k": k,
        "repeat_time": repeat_time,
        "packet_size": packet_size,
        "created_at": Utc::now().to_rfc3339(),
    })
}

/// Write-to-temp then rename, with fsyncs on the file and its directory,
/// so a crash mid-write never leaves a truncated result behind.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    let name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_string_lossy();
    let tmp = parent.join(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));

    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    let file = fs::File::open(&tmp)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming into {}", path.display()))?;
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}
