//! reloadkit: runtime configuration engine.
//!
//! ```text
//! reloadkit run   --descriptor /etc/reloadkit/reloadkit.json [overrides]
//! reloadkit check ./app.json
//! ```
//!
//! `run` reads the bootstrap descriptor, builds every enabled component from
//! the origin's first snapshot and keeps them in sync with the origin until
//! SIGINT/SIGTERM. `check` decodes and validates a configuration file
//! without starting anything.

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use reloadkit::config::bootstrap::DEFAULT_DESCRIPTOR_PATH;
use reloadkit::config::loader::load_config;
use reloadkit::config::validation::validate_config;
use reloadkit::config::{ConfigFormat, RuntimeOverrides};
use reloadkit::lifecycle::signals::shutdown_signal;
use reloadkit::lifecycle::Bootstrap;
use reloadkit::observability::{logging, metrics};
use reloadkit::pipeline::DEFAULT_QUEUE_DEPTH;
use reloadkit::ComponentKind;

#[derive(Parser)]
#[command(name = "reloadkit")]
#[command(
    about = "Watch a configuration origin and keep service clients in sync",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine until interrupted
    Run(RunArgs),
    /// Decode and validate a configuration file
    Check {
        /// Configuration file to check
        file: PathBuf,

        #[arg(long, default_value = "json")]
        format: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Bootstrap descriptor path
    #[arg(short, long, default_value = DEFAULT_DESCRIPTOR_PATH)]
    descriptor: PathBuf,

    /// Override the log destination (console, stdout, stderr, file)
    #[arg(long)]
    log: Option<String>,

    /// Override the log format (text, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Override the log level
    #[arg(long)]
    log_level: Option<String>,

    /// Override the service listen port
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Seconds between file origin polls
    #[arg(long, default_value_t = 10)]
    poll_interval_secs: u64,

    /// Event queue depth
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,

    /// Expose Prometheus metrics on this address
    #[arg(long)]
    metrics_address: Option<SocketAddr>,
}

impl RunArgs {
    fn overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            log: self.log.clone().unwrap_or_default(),
            log_format: self.log_format.clone().unwrap_or_default(),
            log_level: self.log_level.clone().unwrap_or_default(),
            port: self.port,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Check { file, format } => check(file, &format),
    }
}

async fn run(args: RunArgs) -> Result<(), Box<dyn Error>> {
    logging::init(logging::DEFAULT_DIRECTIVE);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "reloadkit starting");

    if let Some(addr) = args.metrics_address {
        metrics::init_metrics(addr);
    }

    let overrides = args.overrides();
    if !overrides.is_empty() {
        tracing::info!(?overrides, "Runtime overrides active");
    }

    let handle = Bootstrap::from_path(&args.descriptor)?
        .with_overrides(overrides)
        .with_poll_interval(Duration::from_secs(args.poll_interval_secs.max(1)))
        .with_queue_depth(args.queue_depth)
        .with_hook(|event, report| match (event.snapshot(), report) {
            (Some(snapshot), Some(report)) => tracing::info!(
                revision = snapshot.revision(),
                report = %report,
                "Configuration applied"
            ),
            _ => tracing::debug!(event = event.label(), "Change event observed"),
        })
        .start()
        .await?;
    let registry = Arc::clone(handle.registry());

    shutdown_signal().await;
    handle.cancel();
    handle.join().await;
    registry.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn check(file: PathBuf, format: &str) -> Result<(), Box<dyn Error>> {
    let config = load_config(&file, &ConfigFormat::parse(format))?;

    println!("{}: ok", file.display());
    for kind in ComponentKind::ALL {
        let status = if kind.enabled_in(&config) { "enabled" } else { "disabled" };
        println!("  {:<18} {}", kind.as_str(), status);
    }
    if config.broker.enable_pub || config.broker.enable_sub {
        println!("  {:<18} {} topic(s)", "broker", config.broker.subscribe_topics.len());
    }

    let issues = validate_config(&config);
    if !issues.is_empty() {
        println!("issues:");
        for issue in &issues {
            println!("  {}", issue);
        }
    }
    Ok(())
}
