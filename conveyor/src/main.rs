use clap::Parser;
use conveyor::config::Config;
use packages::filename::normalize_filename;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;

#[derive(Parser)]
#[command(name = "conveyor", version)]
enum CliCommand {
    /// Serve artifact redirects and project documentation.
    Run {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Print the comparison key of each artifact filename.
    Normalize {
        #[arg(required = true)]
        filenames: Vec<String>,
    },
}

fn main() -> ExitCode {
    match CliCommand::parse() {
        CliCommand::Run { config } => run(config),
        CliCommand::Normalize { filenames } => {
            for filename in filenames {
                println!("{filename}\t{}", normalize_filename(&filename));
            }
            ExitCode::SUCCESS
        }
    }
}

fn run(config_path: Option<PathBuf>) -> ExitCode {
    let config = match Config::load(config_path.as_deref(), |name| std::env::var(name).ok()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _telemetry = match conveyor::telemetry::init(config.logging.as_ref(), config.metrics.as_ref())
    {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Could not initialize telemetry: {e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Could not start runtime");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        endpoint = %config.endpoint,
        bucket = %config.docs_bucket,
        "Starting conveyor"
    );
    match runtime.block_on(conveyor::run(config, shutdown_signal())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Conveyor stopped");
            ExitCode::FAILURE
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
