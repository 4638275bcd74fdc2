use anyhow::{anyhow, Result};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::cluster::{run_remote, ClusterControl};
use crate::config::{CodingScheme, ExperimentConfig};

/// One stripe-write assignment: which stripe, written where, by which client
/// host. Indices are unique and cover exactly the requested stripe count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeJob {
    pub index: usize,
    pub dest: String,
    pub client_host: String,
}

/// The single operation a stripe worker performs. `Sync` because one
/// implementation is shared by all worker threads.
pub trait StripeWrite: Sync {
    fn write_stripe(&self, job: &StripeJob) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub host: String,
    pub completed: usize,
    /// (stripe index, error message) for each failed write in this worker's
    /// sequence. Failures never halt the remaining writes.
    pub failures: Vec<(usize, String)>,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One aggregate wall-clock duration for the whole batch.
    pub elapsed: Duration,
    pub workers: Vec<WorkerOutcome>,
}

impl BatchOutcome {
    pub fn total_completed(&self) -> usize {
        self.workers.iter().map(|w| w.completed).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.workers.iter().map(|w| w.failures.len()).sum()
    }
}

/// Destination naming convention for batch-written stripes.
pub fn stripe_name(k: usize, m: usize, packet_size: u64, index: usize) -> String {
    format!("/RS-{}-{}-{}-{}", k, m, packet_size / 1024, index)
}

/// Deterministic round-robin partition: stripe `i` goes to worker `i % W`.
pub fn partition_stripes(
    num_stripes: usize,
    hosts: &[String],
    name: impl Fn(usize) -> String,
) -> Vec<Vec<StripeJob>> {
    let mut partitions: Vec<Vec<StripeJob>> = hosts.iter().map(|_| Vec::new()).collect();
    for index in 0..num_stripes {
        let worker = index % hosts.len();
        partitions[worker].push(StripeJob {
            index,
            dest: name(index),
            client_host: hosts[worker].clone(),
        });
    }
    partitions
}

/// Fans the partitions out over one thread per worker. Each worker runs its
/// assigned sequence strictly in order; the partition itself is the only
/// shared state and it is read-only. Blocks until every worker is done.
pub fn write_stripes<C: StripeWrite + ?Sized>(
    client: &C,
    partitions: &[Vec<StripeJob>],
) -> BatchOutcome {
    let start = Instant::now();
    let workers = thread::scope(|scope| {
        let handles: Vec<_> = partitions
            .iter()
            .map(|jobs| {
                scope.spawn(move || {
                    let host = jobs
                        .first()
                        .map(|j| j.client_host.clone())
                        .unwrap_or_default();
                    let mut completed = 0usize;
                    let mut failures = Vec::new();
                    for job in jobs {
                        match client.write_stripe(job) {
                            Ok(()) => completed += 1,
                            Err(err) => {
                                warn!(
                                    stripe = job.index,
                                    host = %job.client_host,
                                    error = %err,
                                    "stripe write failed"
                                );
                                failures.push((job.index, err.to_string()));
                            }
                        }
                    }
                    WorkerOutcome {
                        host,
                        completed,
                        failures,
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .zip(partitions)
            .map(|(handle, jobs)| {
                handle.join().unwrap_or_else(|_| WorkerOutcome {
                    host: jobs
                        .first()
                        .map(|j| j.client_host.clone())
                        .unwrap_or_default(),
                    completed: 0,
                    failures: jobs
                        .iter()
                        .map(|j| (j.index, "worker thread panicked".to_string()))
                        .collect(),
                })
            })
            .collect::<Vec<_>>()
    });
    let elapsed = start.elapsed();
    let outcome = BatchOutcome { elapsed, workers };
    info!(
        completed = outcome.total_completed(),
        failed = outcome.total_failures(),
        elapsed_s = elapsed.as_secs_f64(),
        "stripe batch finished"
    );
    outcome
}

/// Concurrent encode fan-out: optional cluster reset, then one batch of
/// `num_stripes` writes partitioned over the configured client hosts.
pub fn encode_batch(
    config: &ExperimentConfig,
    scheme: &CodingScheme,
    num_stripes: usize,
    cluster: &dyn ClusterControl,
    writer: &dyn StripeWrite,
    reset: bool,
) -> Result<BatchOutcome> {
    if config.cluster.client_hosts.is_empty() {
        return Err(anyhow!("no client hosts configured for stripe fan-out"));
    }
    if reset {
        if let Err(err) = cluster.reset_data() {
            warn!(error = %err, "cluster data reset failed");
        }
        if let Err(err) = cluster.restart() {
            warn!(error = %err, "cluster restart failed");
        }
        crate::bench::pause(config.bench.settle.after_restart_ms);
    }
    let m = scheme.fault_tolerance();
    let partitions = partition_stripes(num_stripes, &config.cluster.client_hosts, |i| {
        stripe_name(scheme.k, m, config.bench.packet_size, i)
    });
    info!(
        scheme = %scheme.id,
        stripes = num_stripes,
        workers = partitions.len(),
        "starting stripe fan-out"
    );
    Ok(write_stripes(writer, &partitions))
}

/// Runs each write on the job's client host over ssh, from the project
/// directory where the client binary lives.
pub struct RemoteStripeWriter {
    pub project_dir: String,
    pub input_file: String,
    pub input_size_mb: u64,
    pub scheme_id: String,
}

impl RemoteStripeWriter {
    pub fn new(config: &ExperimentConfig, scheme: &CodingScheme) -> Self {
        Self {
            project_dir: config.cluster.project_dir.clone(),
            input_file: config.client.input_file.clone(),
            input_size_mb: config.client.input_size_mb,
            scheme_id: scheme.id.clone(),
        }
    }
}

impl StripeWrite for RemoteStripeWriter {
    fn write_stripe(&self, job: &StripeJob) -> Result<()> {
        run_remote(
            &job.client_host,
            &format!(
                "cd {}; ./OECClient write {} {} {} online {}",
                self.project_dir, self.input_file, job.dest, self.scheme_id, self.input_size_mb
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    fn hosts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("dn{}", i)).collect()
    }

    #[test]
    fn round_robin_partition_for_three_workers_seven_stripes() {
        let partitions = partition_stripes(7, &hosts(3), |i| format!("/s{}", i));
        let indices = |w: usize| -> Vec<usize> { partitions[w].iter().map(|j| j.index).collect() };
        assert_eq!(indices(0), vec![0, 3, 6]);
        assert_eq!(indices(1), vec![1, 4]);
        assert_eq!(indices(2), vec![2, 5]);
        assert_eq!(partitions[0][0].client_host, "dn1");
        assert_eq!(partitions[2][1].client_host, "dn3");
    }

    #[test]
    fn partition_covers_every_stripe_exactly_once() {
        let partitions = partition_stripes(23, &hosts(4), |i| format!("/s{}", i));
        let mut seen = BTreeSet::new();
        for jobs in &partitions {
            for job in jobs {
                assert!(seen.insert(job.index), "stripe {} assigned twice", job.index);
            }
        }
        assert_eq!(seen, (0..23).collect::<BTreeSet<_>>());
    }

    #[test]
    fn stripe_names_follow_the_batch_convention() {
        assert_eq!(stripe_name(6, 3, 1048576, 4), "/RS-6-3-1024-4");
    }

    struct RecordingWriter {
        written: Mutex<Vec<usize>>,
        fail_on: Option<usize>,
    }

    impl StripeWrite for RecordingWriter {
        fn write_stripe(&self, job: &StripeJob) -> Result<()> {
            if self.fail_on == Some(job.index) {
                return Err(anyhow!("injected write failure"));
            }
            self.written.lock().unwrap().push(job.index);
            Ok(())
        }
    }

    #[test]
    fn batch_blocks_until_all_workers_finish() {
        let writer = RecordingWriter {
            written: Mutex::new(Vec::new()),
            fail_on: None,
        };
        let partitions = partition_stripes(7, &hosts(3), |i| format!("/s{}", i));
        let outcome = write_stripes(&writer, &partitions);
        assert_eq!(outcome.total_completed(), 7);
        assert_eq!(outcome.total_failures(), 0);
        assert_eq!(outcome.workers.len(), 3);
        let written: BTreeSet<usize> = writer.written.lock().unwrap().iter().copied().collect();
        assert_eq!(written, (0..7).collect::<BTreeSet<_>>());
    }

    #[test]
    fn one_failed_write_does_not_halt_its_worker() {
        let writer = RecordingWriter {
            written: Mutex::new(Vec::new()),
            fail_on: Some(0),
        };
        // stripe 0 and 2 belong to the same single worker
        let partitions = partition_stripes(3, &hosts(1), |i| format!("/s{}", i));
        let outcome = write_stripes(&writer, &partitions);
        assert_eq!(outcome.total_completed(), 2);
        assert_eq!(outcome.workers[0].failures.len(), 1);
        assert_eq!(outcome.workers[0].failures[0].0, 0);
        let written = writer.written.lock().unwrap().clone();
        assert_eq!(written, vec![1, 2]);
    }
}
