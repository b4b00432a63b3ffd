#[macro_use]
extern crate tracing;

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use spoa::{Agent, AgentConfig, Application, ApplicationConfig, ApplicationTable, LogSink, NullLogStore, StubEngine};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

use crate::config::{Bind, Config, ReloadOutcome};

/// Stream Processing Offload Agent: terminates SPOP connections from
/// HAProxy and runs the configured WAF applications over each request.
#[derive(Parser, Debug)]
#[command(name = "spoa-agent")]
struct Opt {
    /// Path to the TOML configuration file. Re-read whole on SIGHUP.
    #[arg(long = "config")]
    config: String,
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Builds one [`Application`] per configured app, each backed by a
/// [`StubEngine`]: no real rule-engine binding exists in this workspace, and
/// fabricating one would violate the "no vendored stubs" rule, so the same
/// scriptable double `spoa`'s own tests use stands in here too, wired with
/// `directives` otherwise unused. See DESIGN.md for the tradeoff.
fn build_applications(cfg: &Config) -> Vec<(String, Application<StubEngine>)> {
    cfg.apps
        .iter()
        .map(|app| {
            let log_sink = app.log_collection.as_ref().map(|_| LogSink::start(NullLogStore));

            let application = Application::new(
                ApplicationConfig {
                    name: app.name.clone(),
                    response_check: app.is_response_check,
                    transaction_ttl: app.transaction_ttl,
                    log_collection: app.log_collection.clone(),
                },
                StubEngine::new(),
                log_sink,
            );

            (app.name.clone(), application)
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let opt = Opt::parse();

    let mut cfg = Config::read(&opt.config).with_context(|| format!("loading {}", opt.config))?;

    let (filter, filter_handle) = reload::Layer::new(env_filter(&cfg.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("installing tracing subscriber")?;

    let table = ApplicationTable::from_apps(build_applications(&cfg));
    let agent: Agent<StubEngine> = match cfg.bind.clone() {
        Bind::Tcp(addr) => Agent::bind(addr, AgentConfig::default(), table)
            .await
            .with_context(|| format!("binding {}", cfg.bind))?,
        Bind::Unix(ref path) => Agent::bind_unix(path, AgentConfig::default(), table)
            .with_context(|| format!("binding {}", cfg.bind))?,
    };
    let agent = Arc::new(agent);

    info!(bind = %cfg.bind, "starting spoa-agent");

    let shutdown = agent.shutdown_token();
    let serve = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.serve().await })
    };

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("registering SIGHUP handler")?;
    let mut sigusr1 = signal(SignalKind::user_defined1()).context("registering SIGUSR1 handler")?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sigusr1.recv() => {
                debug!("received SIGUSR1, ignoring");
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading configuration");

                let new_cfg = match Config::read(&opt.config) {
                    Ok(new_cfg) => new_cfg,
                    Err(err) => {
                        error!(%err, "failed loading configuration, keeping previous configuration");
                        continue;
                    }
                };

                if new_cfg.log_level != cfg.log_level {
                    if let Err(err) = filter_handle.reload(env_filter(&new_cfg.log_level)) {
                        error!(%err, "failed installing new log level, keeping previous level");
                    }
                }

                if cfg.reload_outcome(&new_cfg) == ReloadOutcome::BindChangedRejected {
                    error!("changing bind is not supported yet, keeping previous configuration");
                    continue;
                }

                agent.replace_applications(build_applications(&new_cfg)).await;
                cfg = new_cfg;
            }
        }
    }

    shutdown.cancel();
    serve.await.context("agent task panicked")?;

    Ok(ExitCode::SUCCESS)
}
