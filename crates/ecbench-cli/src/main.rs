use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ecbench_runner::config::{CodingScheme, ExperimentConfig, CONFIG_TEMPLATE};
use ecbench_runner::enumerate::{enumerate_failures, CheckBinaryTrial};
use ecbench_runner::stripes::{encode_batch, RemoteStripeWriter};
use ecbench_runner::{OecStorageClient, Orchestrator, SshClusterControl};

#[derive(Parser)]
#[command(name = "ecbench", about = "Repair benchmarks for erasure-coded storage clusters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full measurement cycle for one scheme, or `all` for the catalog
    Bench {
        /// Scheme id (e.g. RSCONV_9_6) or `all`
        scheme: String,
        #[arg(long, default_value = "ecbench.yaml")]
        config: PathBuf,
    },
    /// Exhaustively check recovery for every failure pattern up to n - k nodes
    Enumerate {
        /// Total nodes per stripe
        nodes: usize,
        /// Data nodes per stripe
        data_nodes: usize,
        /// Packet size in bytes handed to each trial
        packet_size: u64,
        /// Recovery-check binary invoked per pattern
        #[arg(long)]
        program: PathBuf,
    },
    /// Write a batch of stripes concurrently across the client hosts
    Stripes {
        /// Scheme id the stripes are encoded under
        scheme: String,
        #[arg(long)]
        num_stripes: usize,
        #[arg(long, default_value = "ecbench.yaml")]
        config: PathBuf,
        /// Keep the cluster's current data instead of resetting first
        #[arg(long)]
        skip_reset: bool,
    },
    /// Write a starter configuration file
    Init {
        #[arg(long, default_value = "ecbench.yaml")]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Bench { scheme, config } => bench(&scheme, &config),
        Commands::Enumerate {
            nodes,
            data_nodes,
            packet_size,
            program,
        } => enumerate(nodes, data_nodes, packet_size, program),
        Commands::Stripes {
            scheme,
            num_stripes,
            config,
            skip_reset,
        } => stripes(&scheme, num_stripes, &config, skip_reset),
        Commands::Init { path, force } => init(&path, force),
    }
}

fn bench(scheme: &str, config_path: &PathBuf) -> Result<()> {
    let config = ExperimentConfig::load(config_path)?;
    let cluster = SshClusterControl::new(&config.cluster);
    let client = OecStorageClient::new(&config.client, &config.cluster);
    let orchestrator = Orchestrator::new(&config, &cluster, &client);

    let reports = if scheme == "all" {
        if config.schemes.is_empty() {
            return Err(anyhow!("`bench all` needs a non-empty scheme catalog"));
        }
        orchestrator.run_all()?
    } else {
        vec![orchestrator.run_scheme(scheme)?]
    };

    for report in &reports {
        println!("scheme: {}", report.scheme);
        println!("nodes: {}", report.nodes);
        println!("elapsed: {:.1}s", report.elapsed.as_secs_f64());
        println!("results: {}", report.result_dir.display());
    }
    Ok(())
}

fn enumerate(nodes: usize, data_nodes: usize, packet_size: u64, program: PathBuf) -> Result<()> {
    let trial = CheckBinaryTrial { program };
    let summary = enumerate_failures(nodes, data_nodes, packet_size, &trial)?;
    println!("trials: {}", summary.trials);
    println!("failures: {}", summary.failures);
    if summary.failures > 0 {
        return Err(anyhow!("{} failure pattern(s) did not recover", summary.failures));
    }
    Ok(())
}

fn stripes(scheme_id: &str, num_stripes: usize, config_path: &PathBuf, skip_reset: bool) -> Result<()> {
    let config = ExperimentConfig::load(config_path)?;
    let scheme: CodingScheme = scheme_id.parse()?;
    let cluster = SshClusterControl::new(&config.cluster);
    let writer = RemoteStripeWriter::new(&config, &scheme);

    let outcome = encode_batch(&config, &scheme, num_stripes, &cluster, &writer, !skip_reset)?;
    println!("stripes written: {}", outcome.total_completed());
    println!("stripes failed: {}", outcome.total_failures());
    println!("elapsed: {:.1}s", outcome.elapsed.as_secs_f64());
    for worker in &outcome.workers {
        println!(
            "worker {}: {} written, {} failed",
            worker.host,
            worker.completed,
            worker.failures.len()
        );
    }
    if outcome.total_failures() > 0 {
        return Err(anyhow!("{} stripe write(s) failed", outcome.total_failures()));
    }
    Ok(())
}

fn init(path: &PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    std::fs::write(path, CONFIG_TEMPLATE)?;
    println!("config written: {}", path.display());
    Ok(())
}
