//! Rota Harvest - Entry Point
//!
//! Runs a single harvest cycle, or keeps cycling (optionally with the API
//! server) until interrupted.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rota_harvest::api::ApiServer;
use rota_harvest::config::LogConfig;
use rota_harvest::services::{HarvestHandle, HarvestService};
use rota_harvest::{Config, PoolStore};

/// Harvest, verify and publish public HTTP proxies
#[derive(Debug, Parser)]
#[command(name = "rota-harvest", version, about)]
struct Cli {
    /// Sync token, or `continuous` optionally followed by the token
    #[arg(num_args = 0..=2)]
    args: Vec<String>,

    /// Keep running cycles until interrupted
    #[arg(long)]
    continuous: bool,

    /// Hours between cycles in continuous mode
    #[arg(long)]
    interval_hours: Option<u64>,

    /// Serve the read-only API alongside continuous cycles
    #[arg(long)]
    serve: bool,
}

/// What the positional arguments resolve to
#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    continuous: bool,
    token: Option<String>,
}

impl Cli {
    fn invocation(&self) -> Invocation {
        let mut args = self.args.iter().map(|a| a.trim()).filter(|a| !a.is_empty());
        let mut continuous = self.continuous || self.serve;

        let token = match args.next() {
            Some("continuous") => {
                continuous = true;
                args.next()
            }
            other => other,
        };

        Invocation {
            continuous,
            token: token.map(str::to_string),
        }
    }
}

#[tokio::main]
async fn main() -> rota_harvest::Result<()> {
    let cli = Cli::parse();
    let invocation = cli.invocation();

    let mut config = Config::from_env()?;
    if let Some(token) = invocation.token {
        config.sync.token = Some(token);
    }
    if let Some(hours) = cli.interval_hours {
        config.run_interval_hours = hours;
    }
    if cli.serve {
        config.api.enabled = true;
    }

    init_tracing(&config.log);
    info!("Starting Rota Harvest");

    if config.sync.token.is_none() {
        warn!("No GitHub token given; remote sync will be skipped");
    }

    let pool = Arc::new(PoolStore::new(config.pool.clone()));
    let service = Arc::new(HarvestService::from_config(&config, pool.clone())?);
    service.load().await;

    if !invocation.continuous {
        let report = service.run_once().await?;
        info!(?report, "Harvest finished");
        return Ok(());
    }

    let (handle, shutdown) = HarvestHandle::new();

    let harvest_task = tokio::spawn({
        let service = service.clone();
        let shutdown = shutdown.clone();
        async move { service.run(shutdown).await }
    });

    let mut api_tasks = Vec::new();
    if config.api.enabled {
        let api_server = ApiServer::new(config.clone(), pool.clone());
        let api_shutdown = shutdown.clone();
        api_tasks.push(tokio::spawn(async move {
            if let Err(e) = api_server.run(api_shutdown).await {
                error!("API server error: {}", e);
            }
        }));

        let monitor_shutdown = shutdown.clone();
        let service = service.clone();
        api_tasks.push(tokio::spawn(async move {
            service.monitor(monitor_shutdown).await;
        }));

        info!("API server started on {}", config.api_addr());
    }

    shutdown_signal().await;
    info!("Shutdown signal received");
    handle.shutdown();

    let _ = harvest_task.await;
    for task in api_tasks {
        let _ = task.await;
    }

    info!("Rota Harvest stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("rota_harvest={},tower_http=info", log.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Invocation {
        let argv = std::iter::once("rota-harvest").chain(args.iter().copied());
        Cli::try_parse_from(argv).unwrap().invocation()
    }

    #[test]
    fn test_no_arguments_runs_once() {
        assert_eq!(
            parse(&[]),
            Invocation {
                continuous: false,
                token: None
            }
        );
    }

    #[test]
    fn test_token_argument() {
        assert_eq!(
            parse(&["ghp_abc"]),
            Invocation {
                continuous: false,
                token: Some("ghp_abc".to_string())
            }
        );
    }

    #[test]
    fn test_positional_continuous_form() {
        assert_eq!(
            parse(&["continuous", "ghp_abc"]),
            Invocation {
                continuous: true,
                token: Some("ghp_abc".to_string())
            }
        );
        assert_eq!(
            parse(&["continuous"]),
            Invocation {
                continuous: true,
                token: None
            }
        );
    }

    #[test]
    fn test_flags() {
        assert!(parse(&["--continuous"]).continuous);
        assert!(parse(&["--serve", "tok"]).continuous);

        let cli = Cli::try_parse_from(["rota-harvest", "--interval-hours", "2"]).unwrap();
        assert_eq!(cli.interval_hours, Some(2));
    }

    #[test]
    fn test_too_many_positionals_rejected() {
        assert!(Cli::try_parse_from(["rota-harvest", "a", "b", "c"]).is_err());
    }
}
