//! The full measurement cycle for one coding scheme: restart, encode,
//! inject node failures by deleting one block per node, verify the cluster
//! sees the damage, drive repeated degraded reads, then join the worker-log
//! breakdown onto the per-node timings and persist everything.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::client::{BlockLocation, LocateOutcome, StorageClient};
use crate::cluster::ClusterControl;
use crate::config::{CodingScheme, ExperimentConfig};
use crate::report::{self, BreakdownLists};
use crate::result::{run_manifest, NodeRepairRecord, ResultStore, SchemeResult};

pub struct Orchestrator<'a> {
    config: &'a ExperimentConfig,
    cluster: &'a dyn ClusterControl,
    client: &'a dyn StorageClient,
    store: ResultStore,
}

#[derive(Debug)]
pub struct SchemeRunReport {
    pub scheme: String,
    pub result_dir: PathBuf,
    pub elapsed: Duration,
    pub nodes: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a ExperimentConfig,
        cluster: &'a dyn ClusterControl,
        client: &'a dyn StorageClient,
    ) -> Self {
        let store = ResultStore::new(config.results_dir.clone());
        Self {
            config,
            cluster,
            client,
            store,
        }
    }

    /// Runs every scheme in the configured catalog, in order. One scheme's
    /// cycle failing stops the batch; partial cycles are not comparable.
    pub fn run_all(&self) -> Result<Vec<SchemeRunReport>> {
        let mut reports = Vec::with_capacity(self.config.schemes.len());
        for scheme_id in &self.config.schemes {
            reports.push(self.run_scheme(scheme_id)?);
        }
        Ok(reports)
    }

    pub fn run_scheme(&self, scheme_id: &str) -> Result<SchemeRunReport> {
        let scheme: CodingScheme = scheme_id.parse()?;
        let settle = &self.config.bench.settle;
        let repeat = self.config.bench.repeat_time;
        let started = Instant::now();
        info!(scheme = scheme_id, n = scheme.n, k = scheme.k, "starting measurement cycle");

        // fresh cluster per scheme; a failed restart degrades the baseline
        // but the cycle still runs against whatever state is up
        if let Err(err) = self.cluster.reset_data() {
            warn!(error = %err, "cluster data reset failed");
        }
        if let Err(err) = self.cluster.restart() {
            warn!(error = %err, "cluster restart failed");
        }
        pause(settle.after_restart_ms);

        let mut nodes: SchemeResult = SchemeResult::new();
        for node in 0..scheme.n {
            let mut record = NodeRepairRecord::default();
            record.encode = self.encode_node(&scheme, node);
            nodes.insert(node, record);
            pause(settle.after_write_ms);
        }

        for node in 0..scheme.n {
            pause(settle.before_locate_ms);
            match self.locate_with_retry(node) {
                Ok(location) => {
                    if let Err(err) = self.client.delete_block(&location) {
                        warn!(node, block = %location.block_id, error = %err, "block delete failed");
                    }
                }
                Err(err) => {
                    error!(node, error = %err, "skipping failure injection for node");
                }
            }
            pause(settle.after_delete_ms);
        }

        pause(settle.before_verify_ms);
        match self.client.list_corrupt() {
            Ok(corrupt) if corrupt.is_empty() => {
                warn!("cluster reports no corrupt blocks after injection");
            }
            Ok(corrupt) => info!(corrupt = corrupt.len(), "cluster sees the injected damage"),
            Err(err) => warn!(error = %err, "corrupt-block listing failed"),
        }

        for node in 0..scheme.n {
            let decode = self.decode_node(node, repeat, settle.between_reads_ms);
            if let Some(record) = nodes.get_mut(&node) {
                record.decode = decode;
            }
        }

        let breakdowns = self.load_breakdowns();
        if !breakdowns.matches_round_robin(scheme.n, repeat) {
            warn!(
                nodes = scheme.n,
                repeat,
                load = breakdowns.load.len(),
                compute = breakdowns.compute.len(),
                writeback = breakdowns.writeback.len(),
                "worker log record counts do not match the read order; breakdown may be misattributed"
            );
        }
        for (node, record) in nodes.iter_mut() {
            record.load = report::node_slice(&breakdowns.load, *node, repeat);
            record.compute = report::node_slice(&breakdowns.compute, *node, repeat);
            record.writeback = report::node_slice(&breakdowns.writeback, *node, repeat);
        }

        let manifest = run_manifest(
            scheme_id,
            scheme.n,
            scheme.k,
            repeat,
            self.config.bench.packet_size,
        );
        let result_dir = self.store.persist(scheme_id, &nodes, &manifest)?;
        self.store
            .copy_worker_log(scheme_id, &self.config.client.worker_log);
        self.store.fetch_coordinator_log(
            scheme_id,
            &self.config.cluster.control_host,
            &self.config.cluster.coordinator_log,
        );

        let elapsed = started.elapsed();
        info!(
            scheme = scheme_id,
            elapsed_s = elapsed.as_secs_f64(),
            dir = %result_dir.display(),
            "measurement cycle complete"
        );
        Ok(SchemeRunReport {
            scheme: scheme_id.to_string(),
            result_dir,
            elapsed,
            nodes: scheme.n,
        })
    }

    /// Writes node `i`'s object and extracts the encode duration. A failed
    /// write or unparseable report records the 0.0 sentinel so the cycle
    /// keeps its per-node shape.
    fn encode_node(&self, scheme: &CodingScheme, node: usize) -> f64 {
        let object = self.object_name(node);
        let report_text = match self.client.write(
            &self.config.client.input_file,
            &object,
            &scheme.id,
            "online",
            self.config.client.input_size_mb,
        ) {
            Ok(text) => text,
            Err(err) => {
                warn!(node, %object, error = %err, "write failed");
                return 0.0;
            }
        };
        match report::parse_write_report(&report_text) {
            Ok(duration) => {
                info!(node, %object, duration, "object written");
                duration
            }
            Err(err) => {
                warn!(node, %object, error = %err, "unparseable write report");
                0.0
            }
        }
    }

    /// Repeated degraded reads of node `i`'s object. Each failed read or
    /// unparseable report contributes a 0.0 trial in its position.
    fn decode_node(&self, node: usize, repeat: usize, between_ms: u64) -> Vec<f64> {
        let object = self.read_object_name(node);
        let mut decode = Vec::with_capacity(repeat);
        for trial in 0..repeat {
            let duration = match self
                .client
                .read(&object, &self.config.client.read_output)
            {
                Ok(text) => match report::parse_read_report(&text) {
                    Ok(duration) => duration,
                    Err(err) => {
                        warn!(node, trial, error = %err, "unparseable read report");
                        0.0
                    }
                },
                Err(err) => {
                    warn!(node, trial, error = %err, "read failed");
                    0.0
                }
            };
            decode.push(duration);
            pause(between_ms);
        }
        decode
    }

    /// Bounded locate loop. `Pending` and transient errors both consume an
    /// attempt; exhausting the budget is an explicit error, not a hang.
    fn locate_with_retry(&self, node: usize) -> Result<BlockLocation> {
        let object = self.stored_object_name(node);
        let retry = &self.config.bench.locate_retry;
        for attempt in 1..=retry.max_attempts {
            match self.client.locate(&object) {
                Ok(LocateOutcome::Located(location)) => {
                    info!(node, %object, node_addr = %location.node_addr, block = %location.block_id, "block located");
                    return Ok(location);
                }
                Ok(LocateOutcome::Pending) => {
                    info!(node, %object, attempt, "placement not visible yet");
                }
                Err(err) => {
                    warn!(node, %object, attempt, error = %err, "locate query failed");
                }
            }
            pause(retry.backoff_ms);
        }
        Err(anyhow::anyhow!(
            "gave up locating {} after {} attempts",
            object,
            retry.max_attempts
        ))
    }

    fn load_breakdowns(&self) -> BreakdownLists {
        let path = &self.config.client.worker_log;
        match fs::read_to_string(path)
            .with_context(|| format!("reading worker log {}", path.display()))
        {
            Ok(text) => report::scan_worker_log(&text),
            Err(err) => {
                warn!(error = %err, "worker log unavailable, breakdown lists empty");
                BreakdownLists::default()
            }
        }
    }

    fn object_name(&self, node: usize) -> String {
        format!("{}{}", self.config.client.object_prefix, node)
    }

    /// Name the object carries inside the block namespace once stored.
    fn stored_object_name(&self, node: usize) -> String {
        format!("{0}{1}_oecobj_{1}", self.config.client.object_prefix, node)
    }

    /// Name the degraded read targets, addressing the damaged sub-object.
    fn read_object_name(&self, node: usize) -> String {
        format!("{0}{1}_{1}", self.config.client.object_prefix, node)
    }
}

pub(crate) fn pause(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BenchConfig, ClientConfig, ClusterConfig, RetryPolicy, SettleDelays,
    };
    use anyhow::anyhow;
    use chrono::Utc;
    use std::path::Path;
    use std::sync::Mutex;

    fn test_config(schemes: Vec<String>, worker_log: PathBuf) -> ExperimentConfig {
        let scratch = std::env::temp_dir().join(format!(
            "ecbench-bench-{}-{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ExperimentConfig {
            cluster: ClusterConfig {
                control_host: "nn".to_string(),
                project_dir: "/opt/ec".to_string(),
                block_store_glob: "/data".to_string(),
                coordinator_log: String::new(),
                client_hosts: vec!["dn1".to_string()],
            },
            client: ClientConfig {
                binary: PathBuf::from("./client"),
                input_file: "input".to_string(),
                input_size_mb: 1,
                object_prefix: "/t_".to_string(),
                read_output: "out".to_string(),
                worker_log,
            },
            bench: BenchConfig {
                repeat_time: 10,
                packet_size: 1048576,
                settle: SettleDelays::none(),
                locate_retry: RetryPolicy {
                    max_attempts: 3,
                    backoff_ms: 0,
                },
            },
            schemes,
            results_dir: scratch,
        }
    }

    struct FakeCluster {
        restarts: Mutex<usize>,
    }

    impl ClusterControl for FakeCluster {
        fn restart(&self) -> Result<()> {
            *self.restarts.lock().unwrap() += 1;
            Ok(())
        }

        fn reset_data(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeClientState {
        writes: Vec<String>,
        reads: Vec<String>,
        deletes: Vec<BlockLocation>,
        locate_calls: usize,
    }

    struct FakeClient {
        state: Mutex<FakeClientState>,
        locate_always_pending: bool,
        bad_read_for: Option<(String, usize)>,
    }

    impl FakeClient {
        fn new() -> Self {
            Self {
                state: Mutex::new(FakeClientState::default()),
                locate_always_pending: false,
                bad_read_for: None,
            }
        }
    }

    impl StorageClient for FakeClient {
        fn write(
            &self,
            _input: &str,
            object: &str,
            _scheme_id: &str,
            _mode: &str,
            _size_mb: u64,
        ) -> Result<String> {
            self.state.lock().unwrap().writes.push(object.to_string());
            Ok("writing\nwrite duration: 1.5\n".to_string())
        }

        fn read(&self, object: &str, _output: &str) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            state.reads.push(object.to_string());
            let nth = state.reads.iter().filter(|o| *o == object).count() - 1;
            if let Some((bad_object, bad_trial)) = &self.bad_read_for {
                if object == bad_object && nth == *bad_trial {
                    return Ok("reading\nbroken\nno timing here\n".to_string());
                }
            }
            Ok("reading\nstripe assembled\nread duration: 0.5\n".to_string())
        }

        fn list_corrupt(&self) -> Result<Vec<String>> {
            Ok(vec!["blk_1".to_string()])
        }

        fn locate(&self, object: &str) -> Result<LocateOutcome> {
            let mut state = self.state.lock().unwrap();
            state.locate_calls += 1;
            if self.locate_always_pending {
                return Ok(LocateOutcome::Pending);
            }
            Ok(LocateOutcome::Located(BlockLocation {
                node_addr: "10.0.0.1".to_string(),
                block_id: format!("blk-for-{}", object),
            }))
        }

        fn delete_block(&self, location: &BlockLocation) -> Result<()> {
            self.state.lock().unwrap().deletes.push(location.clone());
            Ok(())
        }
    }

    fn worker_log_file(nodes: usize, repeat: usize) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "ecbench-worker-{}-{}.log",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let mut text = String::new();
        for i in 0..nodes * repeat {
            text.push_str(&format!("repair load = {}\n", i as f64 * 0.01));
            text.push_str(&format!("repair compute = {}\n", i as f64 * 0.02));
            text.push_str(&format!("repair writeback = {}\n", i as f64 * 0.03));
        }
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn full_cycle_covers_every_node_and_persists() {
        let config = test_config(vec!["RSCONV_9_6".to_string()], worker_log_file(9, 10));
        let cluster = FakeCluster {
            restarts: Mutex::new(0),
        };
        let client = FakeClient::new();
        let orchestrator = Orchestrator::new(&config, &cluster, &client);

        let report = orchestrator.run_scheme("RSCONV_9_6").unwrap();
        assert_eq!(report.nodes, 9);
        assert_eq!(*cluster.restarts.lock().unwrap(), 1);

        let state = client.state.lock().unwrap();
        assert_eq!(state.writes.len(), 9);
        assert_eq!(state.writes[0], "/t_0");
        assert_eq!(state.deletes.len(), 9);
        assert_eq!(state.deletes[3].block_id, "blk-for-/t_3_oecobj_3");
        assert_eq!(state.reads.len(), 90);
        assert_eq!(state.reads[0], "/t_0_0");
        drop(state);

        let raw = fs::read_to_string(report.result_dir.join("result.json")).unwrap();
        let back: SchemeResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.len(), 9);
        for node in 0..9 {
            let record = &back[&node];
            assert_eq!(record.encode, 1.5);
            assert_eq!(record.decode, vec![0.5; 10]);
            assert_eq!(record.load.len(), 10);
            assert_eq!(record.compute.len(), 10);
            assert_eq!(record.writeback.len(), 10);
        }
        // node 2's chunk starts at flat index 20
        assert!((back[&2].load[0] - 0.20).abs() < 1e-9);
        assert!(report.result_dir.join("manifest.json").exists());
    }

    #[test]
    fn malformed_read_report_leaves_a_sentinel_in_place() {
        let config = test_config(vec![], worker_log_file(6, 10));
        let cluster = FakeCluster {
            restarts: Mutex::new(0),
        };
        let mut client = FakeClient::new();
        client.bad_read_for = Some(("/t_4_4".to_string(), 7));
        let orchestrator = Orchestrator::new(&config, &cluster, &client);

        let report = orchestrator.run_scheme("RSCONV_6_4").unwrap();
        let raw = fs::read_to_string(report.result_dir.join("result.json")).unwrap();
        let back: SchemeResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(back[&4].decode[7], 0.0);
        assert_eq!(back[&4].decode[6], 0.5);
        assert_eq!(back[&3].decode, vec![0.5; 10]);
    }

    #[test]
    fn locate_exhaustion_skips_injection_but_completes_the_cycle() {
        let config = test_config(vec![], worker_log_file(6, 10));
        let cluster = FakeCluster {
            restarts: Mutex::new(0),
        };
        let mut client = FakeClient::new();
        client.locate_always_pending = true;
        let orchestrator = Orchestrator::new(&config, &cluster, &client);

        let report = orchestrator.run_scheme("RSCONV_6_4").unwrap();
        let state = client.state.lock().unwrap();
        assert_eq!(state.locate_calls, 6 * 3); // max_attempts per node
        assert!(state.deletes.is_empty());
        drop(state);
        assert!(report.result_dir.join("result.json").exists());
    }

    #[test]
    fn run_all_walks_the_catalog_in_order() {
        let config = test_config(
            vec!["RSCONV_6_4".to_string(), "RSCONV_9_6".to_string()],
            worker_log_file(9, 10),
        );
        let cluster = FakeCluster {
            restarts: Mutex::new(0),
        };
        let client = FakeClient::new();
        let orchestrator = Orchestrator::new(&config, &cluster, &client);

        let reports = orchestrator.run_all().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].scheme, "RSCONV_6_4");
        assert_eq!(reports[1].scheme, "RSCONV_9_6");
        assert_eq!(*cluster.restarts.lock().unwrap(), 2);
        assert!(Path::new(&config.results_dir).join("RSCONV_6_4").exists());
        assert!(Path::new(&config.results_dir).join("RSCONV_9_6").exists());
    }

    struct FailingCluster;

    impl ClusterControl for FailingCluster {
        fn restart(&self) -> Result<()> {
            Err(anyhow!("ssh: connection refused"))
        }

        fn reset_data(&self) -> Result<()> {
            Err(anyhow!("ssh: connection refused"))
        }
    }

    #[test]
    fn unreachable_cluster_scripts_degrade_but_do_not_abort() {
        let config = test_config(vec![], worker_log_file(6, 10));
        let client = FakeClient::new();
        let orchestrator = Orchestrator::new(&config, &FailingCluster, &client);
        assert!(orchestrator.run_scheme("RSCONV_6_4").is_ok());
    }
}
