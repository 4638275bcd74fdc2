use anyhow::{anyhow, Result};
use std::process::Command;
use std::time::Instant;
use tracing::info;

use crate::config::ClusterConfig;

/// Control surface of the live cluster. The harness assumes exclusive access
/// for the duration of a cycle; both calls block until the remote scripts
/// return.
pub trait ClusterControl {
    fn restart(&self) -> Result<()>;
    fn reset_data(&self) -> Result<()>;
}

/// Drives the cluster start/stop scripts on the control host over ssh.
pub struct SshClusterControl {
    control_host: String,
    project_dir: String,
}

impl SshClusterControl {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            control_host: config.control_host.clone(),
            project_dir: config.project_dir.clone(),
        }
    }
}

impl ClusterControl for SshClusterControl {
    fn restart(&self) -> Result<()> {
        info!(host = %self.control_host, "restarting the whole cluster");
        let start = Instant::now();
        run_remote(
            &self.control_host,
            &format!("cd {}; sh env.sh && sh start.sh", self.project_dir),
        )?;
        info!(
            elapsed_s = start.elapsed().as_secs_f64(),
            "cluster restart finished"
        );
        Ok(())
    }

    fn reset_data(&self) -> Result<()> {
        info!(host = %self.control_host, "resetting cluster data");
        run_remote(
            &self.control_host,
            &format!("cd {}; sh stop.sh && sh clear.sh", self.project_dir),
        )
    }
}

/// Runs one shell script on a remote host, blocking until it exits.
pub(crate) fn run_remote(host: &str, script: &str) -> Result<()> {
    let status = Command::new("ssh").arg(host).arg(script).status()?;
    if !status.success() {
        return Err(anyhow!(
            "remote command on {} exited with {}",
            host,
            status
        ));
    }
    Ok(())
}
