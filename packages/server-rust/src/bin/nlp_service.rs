//! `paeon-nlp`: runs the annotation service, or annotates one document.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use paeon_core::{ClinicalPipelineFactory, ConfigResolver, Configuration, OutputFormat};
use paeon_server::engine::format_or_empty;
use paeon_server::network::NetworkConfig;
use paeon_server::{
    init_tracing, AnnotationEngine, EngineConfig, InMemoryBroker, LogFormat, NetworkModule,
    NlpService, ServiceConfig,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info, warn};

/// How long shutdown waits for outstanding deliveries.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "paeon-nlp", version, about = "Clinical text annotation service")]
struct Cli {
    /// Configuration file; bypasses the PAEON_CONFIG / home / system lookup.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log line format (text|json). Overrides `paeon.log.format`.
    #[arg(long, global = true, env = "PAEON_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the service against an in-process broker (local harness) until interrupted.
    ///
    /// Requests are taken from a broker private to this process, so nothing
    /// outside it can reach the listener. `paeon.broker`, `paeon.user` and
    /// `paeon.password` are read and logged but no external broker connection
    /// is made.
    Serve {
        /// Health endpoint port. Overrides `paeon.health.port`.
        #[arg(long)]
        health_port: Option<u16>,
    },
    /// Annotate one document from FILE (or stdin) and print the result.
    Annotate {
        /// Output format (structured|text). Overrides `paeon.output.format`.
        #[arg(long)]
        format: Option<OutputFormat>,
        file: Option<PathBuf>,
    },
}

fn resolve(resolver: &ConfigResolver, explicit: Option<&PathBuf>) -> Arc<Configuration> {
    match explicit {
        Some(path) => resolver.resolve_from(path),
        None => resolver.resolve(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The log format may come from the configuration, so resolve once before
    // the subscriber exists and again afterwards to get the resolution logged.
    let resolver = ConfigResolver::from_env();
    let mut config = ServiceConfig::from_configuration(&resolve(&resolver, cli.config.as_ref()));
    init_tracing(cli.log_format.unwrap_or(config.log_format))?;
    let resolved = resolve(&resolver, cli.config.as_ref());
    info!(path = ?resolved.path(), keys = resolved.len(), "configuration resolved");
    config = ServiceConfig::from_configuration(&resolved);

    match cli.command {
        Command::Serve { health_port } => {
            if let Some(port) = health_port {
                config.health_port = port;
            }
            serve(config).await
        }
        Command::Annotate { format, file } => {
            if let Some(format) = format {
                config.output_format = format;
            }
            annotate(&config, file).await
        }
    }
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    info!(config = ?config, "starting paeon-nlp");

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(port, "metrics exporter listening");
    }

    let broker = InMemoryBroker::new(config.channel_capacity);
    let factory = Arc::new(ClinicalPipelineFactory::new(config.pipeline.clone()));
    let service = NlpService::start(&config, &broker, factory)
        .await
        .context("failed to subscribe annotation listener")?;

    let controller = service.shutdown_controller();
    let mut network = NetworkModule::new(
        NetworkConfig::on_port(config.health_port),
        Arc::clone(&controller),
        service.engine().clone(),
    );
    network.start().await?;
    let mut shutdown_rx = controller.shutdown_receiver();
    let health = tokio::spawn(network.serve(async move {
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
    }));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    if !service.shutdown(DRAIN_TIMEOUT).await {
        warn!("stopping with deliveries still in flight");
    }
    broker.close().await;

    match health.await {
        Ok(result) => result?,
        Err(err) => error!(error = %err, "health server task failed"),
    }
    info!("paeon-nlp stopped");
    Ok(())
}

async fn annotate(config: &ServiceConfig, file: Option<PathBuf>) -> anyhow::Result<()> {
    let text = match &file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read stdin")?;
            buf
        }
    };

    let factory = Arc::new(ClinicalPipelineFactory::new(config.pipeline.clone()));
    let engine = AnnotationEngine::start(factory, EngineConfig::default()).await;

    let (body, outcome) = match engine.analyze(&text).await {
        Ok(result) => (format_or_empty(&result, config.output_format), Ok(())),
        Err(err) => {
            let body = err
                .partial_result()
                .map(|partial| format_or_empty(partial, config.output_format))
                .unwrap_or_default();
            (body, Err(anyhow::Error::new(err).context("annotation failed")))
        }
    };

    let mut stdout = tokio::io::stdout();
    stdout.write_all(body.as_bytes()).await?;
    stdout.flush().await?;
    outcome
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_help_says_broker_is_in_process() {
        let cli = Cli::command();
        let serve = cli.find_subcommand("serve").unwrap();
        let about = serve.get_about().unwrap().to_string();
        assert!(about.contains("in-process broker"));
        assert!(about.contains("local harness"));
        let long = serve.get_long_about().unwrap().to_string();
        assert!(long.contains("no external broker connection"));
    }

    #[test]
    fn serve_accepts_health_port_override() {
        let cli = Cli::try_parse_from(["paeon-nlp", "serve", "--health-port", "9000"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Serve {
                health_port: Some(9000)
            }
        ));
    }
}
