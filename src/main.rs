//! SignalHub relay binary
//!
//! Serves peers over WebSocket and HTTP long polling until Ctrl+C, then
//! closes every client and flushes pending cross-process batches.

use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use signalhub::cli::{Cli, Commands, ConfigSubcommand};
use signalhub::config::{self, RelayConfig};
use signalhub::error::{Error, Result};
use signalhub::logging::{self, LogGuards};
use signalhub::relay::{self, Relay};
use signalhub::server::Server;
use signalhub::version;

/// Time allowed for listeners to finish in-flight requests
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        Commands::Run { .. } => {}
    }

    let Commands::Run { config: config_path } = cli.command else {
        return Ok(());
    };

    let config = match RelayConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // The guards must be kept alive for the lifetime of the program
    let _log_guards: LogGuards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        protocol = version::protocol_version(),
        "Starting SignalHub"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().max(1))
        .thread_name("signalhub")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    if let Err(e) = runtime.block_on(run_relay(config)) {
        error!(error = %e.format_for_log(), "Relay failed");
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
    Ok(())
}

/// Run the relay until Ctrl+C or a listener failure
async fn run_relay(config: RelayConfig) -> Result<()> {
    info!(
        bind = ?config.server.bind,
        backend = ?config.directory.backend,
        compaction = config.server.compaction_enabled,
        "Configuration loaded"
    );

    let store = relay::open_store(&config.directory).await?;
    let relay = Relay::start(config.clone(), store);

    let server = match Server::bind(&config.server.bind, relay.app_state()).await {
        Ok(server) => server,
        Err(e) => {
            relay.shutdown().await;
            return Err(e);
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut serving = tokio::spawn(server.serve(stop_rx));

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    let outcome = tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Shutdown signal received");
            Ok(())
        }
        result = &mut serving => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(Error::Internal(format!("Server task failed: {}", e))),
        },
    };

    let _ = stop_tx.send(true);
    // closing clients releases held polls so listeners can drain
    relay.shutdown().await;

    if !serving.is_finished() && tokio::time::timeout(SHUTDOWN_GRACE, &mut serving).await.is_err() {
        warn!("Listeners did not stop in time");
        serving.abort();
    }

    info!("SignalHub stopped");
    outcome
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = RelayConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => match RelayConfig::load(config.as_deref()) {
            Ok(_) => {
                println!("Configuration is valid.");
            }
            Err(e) => {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
        },
    }

    Ok(())
}
