mod config;

use activation::api::{self, AppState, ServeError};
use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use shared::metrics_defs::describe_all;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Args)]
struct ConfigArgs {
    /// Path to the YAML config file.
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(Parser)]
#[command(name = "dashboard", version)]
enum CliCommand {
    /// Run the activation API and the admin listener.
    Serve(ConfigArgs),
    /// Load and validate a config file, then exit.
    CheckConfig(ConfigArgs),
}

#[derive(thiserror::Error, Debug)]
enum DashboardError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("API server failed: {0}")]
    Api(#[from] ServeError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match &cli {
        CliCommand::Serve(args) => serve(&args.config),
        CliCommand::CheckConfig(args) => check_config(&args.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn check_config(path: &Path) -> Result<(), DashboardError> {
    Config::from_file(path)?;
    println!("{} is valid", path.display());
    Ok(())
}

fn serve(path: &Path) -> Result<(), DashboardError> {
    let config = Config::from_file(path)?;
    let _sentry = init_logging(config.common.logging.as_ref());
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<(), DashboardError> {
    let state = Arc::new(AppState::from_config(&config.activation)?);

    // Readiness flips on its own after the first publish if this fails.
    if let Err(err) = state.warm_up().await {
        tracing::warn!(error = %err, "could not resolve the publish environment at startup");
    }

    let ready_state = state.clone();
    let admin = AdminService::<_, std::io::Error>::new(move || ready_state.is_ready());
    let admin_listener = &config.admin_listener;
    tracing::info!(
        host = %admin_listener.host,
        port = admin_listener.port,
        "admin listener starting"
    );

    tokio::try_join!(
        async {
            api::serve(&config.listener, state)
                .await
                .map_err(DashboardError::from)
        },
        async {
            run_http_service(&admin_listener.host, admin_listener.port, admin)
                .await
                .map_err(DashboardError::from)
        },
    )?;

    Ok(())
}

fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), DashboardError> {
    let recorder = metrics_exporter_statsd::StatsdBuilder::from(
        metrics.statsd_host.as_str(),
        metrics.statsd_port,
    )
    .build(Some("dashboard"))
    .map_err(|e| DashboardError::Metrics(e.to_string()))?;

    metrics::set_global_recorder(recorder).map_err(|e| DashboardError::Metrics(e.to_string()))?;
    describe_all(activation::metrics_defs::ALL_METRICS);
    tracing::info!(
        host = %metrics.statsd_host,
        port = metrics.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
