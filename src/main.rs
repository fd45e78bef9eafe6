use clap::Parser;
use notepurge::cleanup::{CleanupOptions, CleanupRunner};
use notepurge::config::{Config, ConfigOverrides};
use notepurge::error::{ErrorRecovery, NotepurgeError};
use notepurge::events::EventBus;
use notepurge::misskey::MisskeyClient;
use notepurge::reporter::spawn_console_reporter;
use notepurge::retry::RetryPolicy;
use std::path::PathBuf;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "notepurge")]
#[command(about = "Unpins and deletes every note of a Misskey account")]
#[command(version)]
struct Cli {
    /// Path to configuration file (can also be set via NOTEPURGE_CONFIG env var)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Misskey host, e.g. misskey.io (overrides config and environment)
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// API access token (overrides config and environment)
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,

    /// Only list what would be unpinned and deleted
    #[arg(long)]
    dry_run: bool,

    /// Maximum requests per call while rate limited
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Enable verbose logging (equivalent to --log-level debug)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Get config path from CLI arg or NOTEPURGE_CONFIG environment variable
    fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| std::env::var("NOTEPURGE_CONFIG").ok().map(PathBuf::from))
    }

    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            token: self.token.clone(),
            max_attempts: self.max_retries,
        }
    }
}

/// Initialize structured logging with proper error handling
fn init_logging(config: &Config, cli: &Cli) -> Result<(), NotepurgeError> {
    let configured = config.logging().level;
    let log_level = if cli.verbose {
        "debug"
    } else if let Some(ref level) = cli.log_level {
        level.as_str()
    } else {
        configured.as_deref().unwrap_or("info")
    };

    let _level = match log_level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => {
            return Err(NotepurgeError::InvalidData(format!(
                "Invalid log level: {log_level}. Valid levels are: error, warn, info, debug, trace"
            )));
        }
    };

    // RUST_LOG wins when set
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| NotepurgeError::InvalidData(format!("Failed to create log filter: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    debug!("Logging initialized with level: {}", log_level);
    Ok(())
}

/// Log a terminal error at a level matching its kind
fn handle_error(error: &NotepurgeError) {
    match error {
        NotepurgeError::Config(_) => {
            error!("{}", error);
            error!("Please check your configuration file, environment variables and options");
        }
        NotepurgeError::Misskey(_) => {
            error!("{}", error);
            if ErrorRecovery::is_authentication_failure(error) {
                error!("The server rejected the token");
                error!("It needs the write:account and write:notes permissions");
            } else if ErrorRecovery::is_recoverable(error) {
                info!("The failure is temporary, running again continues the cleanup");
            }
        }
        NotepurgeError::Interrupted => {
            warn!("Stopped before the cleanup finished");
        }
        _ => {
            error!("Application error: {}", error);
            debug!("Error details: {:?}", error);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), NotepurgeError> {
    let cli = Cli::parse();

    let config = match Config::load(cli.config_path(), cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            // Initialize basic logging for configuration errors
            tracing_subscriber::fmt().init();
            let error = NotepurgeError::Config(e);
            handle_error(&error);
            return Err(error);
        }
    };

    if let Err(e) = init_logging(&config, &cli) {
        eprintln!("Failed to initialize logging: {e}");
        return Err(e);
    }

    info!("Starting Notepurge v{}", env!("CARGO_PKG_VERSION"));
    debug!("Configuration file path: {:?}", cli.config_path());
    info!("Misskey host: {}", config.misskey.host);
    if cli.dry_run {
        info!("Dry run: no note will be unpinned or deleted");
    }

    match run_application(config, cli.dry_run).await {
        Ok(()) => Ok(()),
        Err(e) => {
            handle_error(&e);
            Err(e)
        }
    }
}

/// Wire client, runner and reporter together and perform one run
async fn run_application(config: Config, dry_run: bool) -> Result<(), NotepurgeError> {
    let retry_policy = RetryPolicy::from(&config.retry());
    debug!("Retry policy: {:?}", retry_policy);
    let client = MisskeyClient::new(config.misskey.clone(), retry_policy)?;

    let events = EventBus::default();
    let reporter = spawn_console_reporter(events.subscribe());
    let runner = CleanupRunner::new(CleanupOptions { dry_run }, events);

    let result = tokio::select! {
        result = runner.run(&client) => result.map(|report| {
            debug!("Processed {} pages", report.progress.pages);
        }),
        _ = shutdown_signal() => Err(NotepurgeError::Interrupted),
    };

    // Dropping the runner closes the event bus and lets the reporter finish
    drop(runner);
    let view = reporter.await?;
    if let Some(line) = view.progress_line() {
        debug!("{}", line);
    }

    result
}

/// Resolves on Ctrl+C (or SIGTERM on unix)
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, stopping"),
                    _ = wait_for_ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, stopping"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
