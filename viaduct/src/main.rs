use clap::Parser;
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_metrics;
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser)]
#[command(name = "viaduct", about = "Telemetry ingestion gateway")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "config.yaml")]
    config: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = config::Config::from_file(&cli.config)?;
    config.gateway.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Sentry wants to be initialized before the async runtime starts.
    let _sentry_guard = config.sentry_dsn().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    if let Some(metrics_config) = config.metrics() {
        install_statsd(metrics_config)?;
    }
    describe_metrics(authn::metrics_defs::ALL_METRICS);
    describe_metrics(gateway::metrics_defs::ALL_METRICS);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    tracing::info!("starting viaduct");
    runtime.block_on(gateway::run(config.gateway))?;
    Ok(())
}

fn install_statsd(config: &config::MetricsConfig) -> Result<(), Box<dyn Error>> {
    let recorder = StatsdBuilder::from(&config.statsd_host, config.statsd_port)
        .with_queue_size(5000)
        .with_buffer_size(1024)
        .build(Some("viaduct"))
        .map_err(|err| format!("failed to build statsd recorder: {err}"))?;
    metrics::set_global_recorder(recorder)
        .map_err(|err| format!("failed to install statsd recorder: {err}"))?;
    Ok(())
}
