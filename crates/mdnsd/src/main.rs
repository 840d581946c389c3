// # mdnsd - Container hostname publisher
//
// Thin integration layer: everything that decides what gets published lives
// in mdns-core. This binary is responsible for:
// 1. Reading configuration from the command line and `MDNS_*` variables
// 2. Initializing logging and the runtime
// 3. Registering the container source and name service
// 4. Running the scan engine until SIGTERM/SIGINT/SIGQUIT
//
// ## Example
//
// ```bash
// export MDNS_TTL=120
// export MDNS_DOMAINS="nas.local printer.local"
//
// mdnsd --reset --verbose
// ```

mod cli;
mod logfile;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use mdns_core::engine::EngineEvent;
use mdns_core::{ComponentRegistry, MdnsConfig, ScanEngine};
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::FmtSubscriber;

use cli::Cli;
use logfile::WatchedFile;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum MdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<MdnsExitCode> for ExitCode {
    fn from(code: MdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return MdnsExitCode::CleanShutdown.into();
        }
        Err(e) => {
            let _ = e.print();
            return MdnsExitCode::ConfigError.into();
        }
    };

    let verbose = cli.verbose;
    let daemon = cli.daemon;
    let log_file = cli.log.clone();

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return MdnsExitCode::ConfigError.into();
        }
    };

    // Flushes buffered log lines when main returns.
    let _log_guard = match init_logging(verbose, log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return MdnsExitCode::ConfigError.into();
        }
    };

    info!("Starting mdnsd");
    if daemon {
        info!("Daemon mode requested; staying in the foreground, detaching is up to the service manager");
    }
    info!(
        "Configuration loaded: ttl={}s wait={}s reset={} force={} disabled={} static={}",
        config.publish.ttl_secs,
        config.publish.wait_secs,
        config.publish.reset,
        config.publish.force,
        !config.publish.enabled_by_default,
        config.static_domains.len()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return MdnsExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let (mut engine, events) = match build_engine(config) {
            Ok(built) => built,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return MdnsExitCode::ConfigError;
            }
        };

        tokio::spawn(log_events(events));

        match engine.run().await {
            Ok(()) => {
                info!("mdnsd stopped");
                MdnsExitCode::CleanShutdown
            }
            Err(e) => {
                error!("Daemon error: {}", e);
                MdnsExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Install the global tracing subscriber
///
/// Verbose mode logs every publish and withdraw decision at DEBUG; otherwise
/// only warnings (conflicts, collisions) and errors are shown. A log file gets
/// plain text without ANSI colors, written from a background thread, and is
/// reopened when it is rotated away.
///
/// # Returns
///
/// The guard of the background writer when logging to a file.
fn init_logging(verbose: bool, log_file: Option<&std::path::Path>) -> Result<Option<WorkerGuard>> {
    let level = if verbose { Level::DEBUG } else { Level::WARN };

    match log_file {
        Some(path) => {
            let file = WatchedFile::open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);

            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(writer)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
            Ok(Some(guard))
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
            Ok(None)
        }
    }
}

/// Create the configured components and the engine
fn build_engine(config: MdnsConfig) -> Result<(ScanEngine, mpsc::Receiver<EngineEvent>)> {
    let registry = ComponentRegistry::new();

    #[cfg(feature = "docker")]
    mdns_source_docker::register(&registry);

    #[cfg(feature = "avahi")]
    mdns_publisher_avahi::register(&registry);

    debug!(
        "Registered sources: {:?}, name services: {:?}",
        registry.list_sources(),
        registry.list_name_services()
    );

    let source = registry.create_source(&config.source)?;
    let service = registry.create_name_service(&config.name_service)?;

    Ok(ScanEngine::new(source, service, config)?)
}

/// Drain engine events into the log
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        debug!("Engine event: {:?}", event);
    }
}
