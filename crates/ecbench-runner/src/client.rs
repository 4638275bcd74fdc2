use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;

use crate::cluster::run_remote;
use crate::config::{ClientConfig, ClusterConfig};

/// Physical placement of one written object's block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocation {
    pub node_addr: String,
    pub block_id: String,
}

/// Placement metadata becomes queryable asynchronously relative to the write
/// completing, so a query can legitimately come back empty-handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateOutcome {
    Located(BlockLocation),
    Pending,
}

/// Operations against the storage system. Write and read return the client's
/// textual report verbatim; duration extraction is the caller's concern
/// (see `report`).
pub trait StorageClient {
    fn write(
        &self,
        input: &str,
        object: &str,
        scheme_id: &str,
        mode: &str,
        size_mb: u64,
    ) -> Result<String>;
    fn read(&self, object: &str, output: &str) -> Result<String>;
    fn list_corrupt(&self) -> Result<Vec<String>>;
    fn locate(&self, object: &str) -> Result<LocateOutcome>;
    fn delete_block(&self, location: &BlockLocation) -> Result<()>;
}

/// Shells out to the OpenEC client binary and to `hdfs fsck`, mirroring how
/// the operations are driven by hand on the control host.
pub struct OecStorageClient {
    binary: PathBuf,
    block_store_glob: String,
}

impl OecStorageClient {
    pub fn new(client: &ClientConfig, cluster: &ClusterConfig) -> Self {
        Self {
            binary: client.binary.clone(),
            block_store_glob: cluster.block_store_glob.clone(),
        }
    }

    fn client_report(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .with_context(|| format!("spawning {}", self.binary.display()))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl StorageClient for OecStorageClient {
    fn write(
        &self,
        input: &str,
        object: &str,
        scheme_id: &str,
        mode: &str,
        size_mb: u64,
    ) -> Result<String> {
        let size = size_mb.to_string();
        self.client_report(&["write", input, object, scheme_id, mode, &size])
    }

    fn read(&self, object: &str, output: &str) -> Result<String> {
        self.client_report(&["read", object, output])
    }

    fn list_corrupt(&self) -> Result<Vec<String>> {
        let output = Command::new("hdfs")
            .args(["fsck", "-list-corruptfileblocks"])
            .output()
            .context("spawning hdfs fsck")?;
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(parse_corrupt_listing(&text))
    }

    fn locate(&self, object: &str) -> Result<LocateOutcome> {
        let output = Command::new("hdfs")
            .args(["fsck", object, "-files", "-blocks", "-locations"])
            .output()
            .context("spawning hdfs fsck")?;
        let text = String::from_utf8_lossy(&output.stdout);
        for line in text.lines().filter(|l| l.contains("Datanode")) {
            if let Some(location) = parse_location_line(line) {
                return Ok(LocateOutcome::Located(location));
            }
        }
        Ok(LocateOutcome::Pending)
    }

    fn delete_block(&self, location: &BlockLocation) -> Result<()> {
        run_remote(
            &location.node_addr,
            &format!("rm {}/blk_{}*", self.block_store_glob, location.block_id),
        )
    }
}

/// Extracts `(node address, block id)` from one fsck block-location line.
/// The block id sits between `blk_` and `len=`; the address inside
/// `WithStorage[...]`, before the storage id and without the port.
pub fn parse_location_line(line: &str) -> Option<BlockLocation> {
    let blk_start = line.find("blk_")? + "blk_".len();
    let len_off = line[blk_start..].find("len=")?;
    let block_meta = line[blk_start..blk_start + len_off].trim();
    let block_id = block_meta.split('_').next()?.to_string();
    if block_id.is_empty() {
        return None;
    }
    let ws_start = line.find("WithStorage[")? + "WithStorage[".len();
    let ds_off = line[ws_start..].find(",DS")?;
    let node_addr = line[ws_start..ws_start + ds_off].split(':').next()?.to_string();
    if node_addr.is_empty() {
        return None;
    }
    Some(BlockLocation {
        node_addr,
        block_id,
    })
}

pub fn parse_corrupt_listing(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.contains("blk_"))
        .map(|line| line.trim().to_string())
        .collect()
}
