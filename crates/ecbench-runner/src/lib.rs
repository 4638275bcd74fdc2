//! Fault-injection and recovery benchmarking for an erasure-coded storage
//! cluster: exhaustive failure-pattern enumeration, a repair measurement
//! cycle per coding scheme, and a parallel stripe writer for bulk encodes.

pub mod bench;
pub mod client;
pub mod cluster;
pub mod config;
pub mod enumerate;
pub mod report;
pub mod result;
pub mod stripes;

pub use bench::{Orchestrator, SchemeRunReport};
pub use client::{OecStorageClient, StorageClient};
pub use cluster::{ClusterControl, SshClusterControl};
pub use config::{CodingScheme, ExperimentConfig};
pub use enumerate::{enumerate_failures, pattern_count, CheckBinaryTrial, EnumerationSummary};
pub use stripes::{encode_batch, BatchOutcome, RemoteStripeWriter};
