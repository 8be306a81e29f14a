//! Nexus — loader entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Register enabled services, discover units, load everything
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Wait for shutdown, then stop everything in reverse start order

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nexus_loader::bootstrap::logger;
use nexus_loader::builtin;
use nexus_loader::core::{config, error::AppError};
use nexus_loader::loader::{Host, LoaderSettings, Orchestrator};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    let force_cli_level = args.log_level.is_some();

    logger::init(effective_log_level, force_cli_level, config.log_file.as_deref())?;

    info!(
        bot_name = %config.bot_name,
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        health_check_interval_secs = config.health_check_interval.as_secs(),
        "config loaded"
    );

    // Shared shutdown token — Ctrl-C cancels it, units may watch it.
    let shutdown = CancellationToken::new();
    let host = Host::with_shutdown(config.bot_name.clone(), shutdown.clone());
    info!(boot_id = %host.boot_id, "host ready — loading units");

    let mut orchestrator = Orchestrator::new(builtin::catalog(), LoaderSettings::from_config(&config));
    builtin::register_services(&mut orchestrator, &config)?;

    // load_all has already torn down whatever started if this fails.
    let plan = orchestrator.load_all(&host).await?;

    print_startup_summary(&orchestrator, &plan.order).await;

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    shutdown.cancelled().await;

    let report = orchestrator.stop_all().await;
    for (name, e) in &report.failures {
        error!(service = %name, error = %e, "failed to stop cleanly");
    }
    if report.is_clean() {
        info!(stopped = report.stopped.len(), "shutdown complete");
    } else {
        warn!(
            stopped = report.stopped.len(),
            failed = report.failures.len(),
            "shutdown finished with errors"
        );
    }
    Ok(())
}

async fn print_startup_summary(orchestrator: &Orchestrator, order: &[String]) {
    let health = orchestrator.health_check().await;
    let healthy = health.values().filter(|h| h.is_healthy()).count();

    for (name, report) in &health {
        info!(
            name = %name,
            status = %report.status,
            message = %report.message,
            "health"
        );
    }
    info!(units = ?order, healthy, total = health.len(), "boot complete — press Ctrl-C to stop");
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: nexus [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    CliArgs { log_level: logger::level_for_verbosity(verbosity), config_path }
}
