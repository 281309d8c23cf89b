//! Switchyard - entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use switchyard::{AppConfig, AppError};
use switchyard_server::{ShutdownReport, ShutdownSignal};
use switchyard_telemetry::init_logging;

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("switchyard {}", switchyard::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Switchyard - binary RPC, HTTP+JSON and reflection on one port

USAGE:
    switchyard [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to TOML configuration file
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES (also read from .env):
    PORT                   Listen port (default: 8080)
    LOG_LEVEL              debug, info, warn, error or a filter directive (default: debug)
    LOG_FORMAT             pretty or json (default: pretty)
    API_PREFIX             Mount prefix of the JSON bridge (default: /api/v1)
    STATIC_DIR             Directory served for unmatched paths
    SHUTDOWN_TIMEOUT_SECS  Drain deadline in seconds (default: 5)

EXAMPLES:
    switchyard --config /etc/switchyard.toml
    PORT=9000 LOG_FORMAT=json switchyard
"
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match start(args).await {
        Ok(report) => {
            for timeout in &report.timeouts {
                tracing::warn!(error = %timeout, "Shutdown was forced");
            }
            tracing::info!("Server shutdown");
            ExitCode::SUCCESS
        }
        // logging is not up yet
        Err(e) if e.is_pre_logging() => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
        Err(AppError::Serve(e)) => {
            tracing::error!(error = %e, "Failed to serve");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            ExitCode::FAILURE
        }
    }
}

async fn start(args: Args) -> Result<ShutdownReport, AppError> {
    let config = AppConfig::load(args.config.as_deref())?;
    init_logging(&config.log_config())?;

    tracing::info!(version = switchyard::VERSION, "Starting switchyard");

    let shutdown = ShutdownSignal::with_os_signals().map_err(AppError::Signals)?;
    switchyard::run(&config, shutdown).await
}
