use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use xids_core::error::ExitStatus;
use xids_daemon::cli::DaemonCli;
use xids_daemon::orchestrator::{self, Orchestrator};
use xids_daemon::{logging, metrics_server};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = DaemonCli::parse();

    // Logging is not up yet: configuration errors go to stderr.
    let config = match cli.load_config().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("xids-daemon: {e}");
            return e.exit_status().into();
        }
    };

    if cli.validate {
        let checked = if cli.dry_run {
            Ok(())
        } else {
            config.validate_interface()
        };
        return match checked {
            Ok(()) => {
                println!("configuration OK");
                ExitStatus::Ok.into()
            }
            Err(e) => {
                eprintln!("xids-daemon: {e}");
                e.exit_status().into()
            }
        };
    }

    if let Err(e) = logging::init_tracing(&config.general) {
        eprintln!("xids-daemon: {e:#}");
        return ExitStatus::Failure.into();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        device = %config.interface.device,
        queue = config.interface.queue,
        dry_run = cli.dry_run,
        "xids-daemon starting"
    );

    if config.metrics.enabled {
        if let Err(e) = metrics_server::install_metrics_recorder(&config.metrics) {
            tracing::error!(error = %e, "failed to start metrics exporter");
            return ExitStatus::Failure.into();
        }
    }

    let orchestrator = match Orchestrator::new(config, cli.dry_run) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return e.exit_status().into();
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match orchestrator::wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "failed to install signal handlers"),
            }
            shutdown.cancel();
        }
    });

    match orchestrator.run(shutdown).await {
        Ok(summary) => {
            tracing::info!(
                signatures = summary.signatures,
                states = summary.states,
                entries = summary.written,
                failed_entries = summary.failed,
                rx_packets = summary.datapath.map(|s| s.rx_packets),
                tx_packets = summary.datapath.map(|s| s.tx_packets),
                "xids-daemon shut down"
            );
            ExitStatus::Ok.into()
        }
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_status().code(), "xids-daemon failed");
            e.exit_status().into()
        }
    }
}
