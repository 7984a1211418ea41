use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use seed_plant::config::{AppConfig, DEFAULT_CONFIG_FILE};
use seed_plant::runner::Runner;
use seed_plant::stats::RunStats;
use seed_plant::utils::format::format_bytes;
use seed_plant::{logging, panic_hook};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "SEED_PLANT_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory for rolling log files (overrides the config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log filter directive, e.g. "seed_plant=debug"
    #[arg(long)]
    log_filter: Option<String>,

    /// Validate the configuration, print the plan and exit
    #[arg(long)]
    dry_run: bool,

    /// Run a single drain pass without producing plots
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    config.validate().context("Invalid configuration")?;

    let log_dir = args.log_dir.clone().or_else(|| config.logging.dir.clone());
    let filter = args
        .log_filter
        .clone()
        .unwrap_or_else(|| config.logging.filter.clone());
    let _guard =
        logging::init_logging(log_dir.as_deref(), &filter).context("Failed to initialize logging")?;
    panic_hook::install(log_dir.as_deref());

    if args.dry_run {
        print_plan(&config, args.once);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Interrupt received, finishing in-flight work");
            cancel.cancel();
        });
    }
    if let Some(dir) = &log_dir {
        logging::start_retention_cleanup(
            dir.clone(),
            config.logging.retention_days,
            cancel.child_token(),
        );
    }

    let stats = Arc::new(RunStats::new());
    info!(started_at = %stats.started_at(), "Starting Seed & Plant");

    let runner = Runner::from_config(&config, args.once, Arc::clone(&stats));
    let outcome = runner.run(&cancel).await;
    info!(reason = ?outcome.reason, "Stopped");

    stats.log_summary();
    cancel.cancel();
    Ok(())
}

/// Completes on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_plan(config: &AppConfig, once: bool) {
    println!("Sources:");
    for source in &config.sources {
        println!("  {} (*.{})", source.display(), config.plot_extension);
    }
    println!(
        "Destinations{}:",
        if config.shuffle_destinations {
            " (shuffled each pass)"
        } else {
            ""
        }
    );
    for destination in config.destination_list() {
        let space = destination
            .space_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "unavailable".to_string());
        println!("  {} -> {} [free space: {}]", destination, destination.address(), space);
    }

    let transfer = &config.transfer;
    match transfer.io_priority() {
        Some(priority) => println!(
            "Transfer: {} via ionice {}",
            transfer.program,
            priority.ionice_args().join(" ")
        ),
        None => println!("Transfer: {}", transfer.program),
    }
    if let Some(limit) = transfer.bwlimit {
        println!("  Bandwidth limit: {} KiB/s", limit);
    }

    let generator = &config.generator;
    if once || !generator.enabled {
        println!("Generator: disabled");
    } else {
        println!(
            "Generator: {} {} x{} (compression {}) into {}, needs {} free",
            generator.program,
            generator.mode,
            generator.batch_size,
            generator.compression_level,
            generator.output_dir.display(),
            format_bytes(generator.required_staging_bytes())
        );
    }
    println!(
        "Timing: short {}s, long {}s, settle {}s",
        config.timing.short_backoff_secs,
        config.timing.long_backoff_secs,
        config.timing.settle_delay_secs
    );
}
