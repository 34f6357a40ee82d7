//! notify-guard command line
//!
//! `simulate` pushes sends through the full pipeline against simulated providers.
//! With `--serve-metrics` the same pipeline backs `/metrics`, `/health` and
//! `/circuits` until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use notify_guard::config::{validate_config, AppConfig, ConfigLoader, ENV_PREFIX};
use notify_guard::metrics::{
    init_tracing_with_metrics, DispatchSpan, ErrorContext, MetricsCollector, MetricsServer,
};
use notify_guard::orchestrator::SimulatedProvider;
use notify_guard::{Channel, DeliveryRequest, DispatchOutcome, Pipeline, SendRequest};
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run sends through admission, retries and simulated providers
    Simulate {
        /// TOML, YAML or JSON settings file; `NOTIFY_GUARD_*` variables override it
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "5")]
        sends: u32,

        /// Omit for requests without a tenant
        #[arg(long)]
        tenant: Option<String>,

        #[arg(long, default_value = "user-1")]
        user: String,

        #[arg(long, default_value = "orders")]
        service: String,

        #[arg(long, default_value = "sms")]
        channel: Channel,

        /// Probability that a simulated provider call fails
        #[arg(long, default_value = "0.0")]
        fail_rate: f64,

        /// Present this scope on every send
        #[arg(long)]
        elevated_scope: Option<String>,

        /// Serve metrics and breaker state for this run, then keep serving until ctrl-c
        #[arg(long)]
        serve_metrics: bool,

        /// Overrides `service.metrics_addr`
        #[arg(long)]
        metrics_addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            config,
            sends,
            tenant,
            user,
            service,
            channel,
            fail_rate,
            elevated_scope,
            serve_metrics,
            metrics_addr,
        } => {
            let config = load_config(config.as_deref())?;
            let collector = Arc::new(MetricsCollector::new());
            init_tracing_with_metrics(collector.clone(), &config.service.log_level)?;

            anyhow::ensure!(
                (0.0..=1.0).contains(&fail_rate),
                "--fail-rate must be between 0 and 1"
            );

            let pipeline = Pipeline::from_config(&config, SimulatedProvider::registry(fail_rate))
                .await
                .context("failed to build pipeline")?;

            let server = if serve_metrics && config.service.metrics_enabled {
                let addr = metrics_addr.unwrap_or_else(|| config.service.metrics_addr.clone());
                info!(%addr, "starting metrics server");
                let server =
                    MetricsServer::new(collector, addr).with_breakers(pipeline.breakers.clone());
                Some(tokio::spawn(server.serve()))
            } else {
                None
            };

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            for n in 1..=sends {
                let notification_id = format!("sim-{n}");
                let mut request = SendRequest::new(
                    tenant.as_deref(),
                    user.clone(),
                    service.clone(),
                    channel,
                    DeliveryRequest::new(notification_id.clone(), "recipient@example.test", "hello"),
                );
                if let Some(scope) = &elevated_scope {
                    request = request.with_elevated_scope(scope.clone());
                }

                let span = DispatchSpan::new(&notification_id, tenant.as_deref(), channel.as_str());
                let outcome = pipeline
                    .dispatcher
                    .dispatch(request, &cancel)
                    .instrument(span.span())
                    .await
                    .with_notification_id(&notification_id)?;

                println!("{notification_id}: {}", describe(&outcome));

                if cancel.is_cancelled() {
                    break;
                }
            }

            println!(
                "dead letters: {}, cost for {service}: {} micros",
                pipeline.audit.dead_letters().len(),
                pipeline.costs.total_for_service(&service)
            );
            for circuit in pipeline.breakers.snapshot() {
                println!(
                    "circuit {}: {:?} ({} consecutive failures)",
                    circuit.provider_id, circuit.state, circuit.consecutive_failures
                );
            }

            if let Some(server) = server {
                tokio::select! {
                    result = server => result??,
                    _ = cancel.cancelled() => info!("shutting down"),
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => ConfigLoader::from_file_with_env(path, ENV_PREFIX)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ConfigLoader::from_env()?,
    };
    validate_config(&config)?;
    Ok(config)
}

fn describe(outcome: &DispatchOutcome) -> String {
    match outcome {
        DispatchOutcome::RateLimited(rejection) => format!(
            "rate_limited ({}, retry after {}s)",
            rejection.message(),
            rejection.retry_after_secs()
        ),
        other => other.label().to_string(),
    }
}
