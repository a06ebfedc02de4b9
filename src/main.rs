use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use sysanomaly_agent::collector::ProcSource;
use sysanomaly_agent::config::Config;
use sysanomaly_agent::pipeline::Pipeline;
use sysanomaly_agent::shutdown::ShutdownCoordinator;
use sysanomaly_agent::storage::FilePersister;

const DEFAULT_CONFIG: &str = "/etc/sysanomaly-agent/config.toml";

#[derive(Parser, Debug)]
#[command(name = "sysanomaly-agent", about = "Host CPU/memory anomaly sampler")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Override the output file path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Validate config and exit
    #[arg(long)]
    check: bool,

    /// Print version and exit
    #[arg(short, long)]
    version: bool,
}

#[tokio::main(worker_threads = 2)]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("sysanomaly-agent {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!("Configuration is valid.");
        return ExitCode::SUCCESS;
    }

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hostname = %config.agent.hostname,
        "Starting sysanomaly agent"
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Incomplete shutdown: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.config.exists() || cli.config != Path::new(DEFAULT_CONFIG) {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    if let Some(ref output) = cli.output {
        config.output.path = output.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(&config.agent.log_level)
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

async fn run(config: Config) -> Result<()> {
    let source = ProcSource::new(&config.agent.proc_root);
    let persister = FilePersister::from_config(&config.output)
        .with_context(|| format!("Failed to open output {}", config.output.path.display()))?;

    let shutdown = ShutdownCoordinator::new();
    let signals = shutdown.listen_for_signals();

    let result = Pipeline::new(&config, source, persister).run(&shutdown).await;
    signals.abort();

    let report = result?;
    if report.sampler.degraded {
        warn!("Metric source was degraded at shutdown");
    }
    info!(
        ticks = report.sampler.ticks,
        records = report.sampler.records,
        persisted = report.drain.persisted,
        degraded_episodes = report.sampler.degraded_episodes,
        "Exiting"
    );
    Ok(())
}
