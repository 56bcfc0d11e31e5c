//! Entry point: parses flags, assembles [`WgmeshConfig`] from every layer,
//! initializes logging, and drives the daemon until a termination signal
//! arrives (section 4.O, section 7).

mod cli;
mod config;
mod control;
mod dandelion_transport;
mod error;
mod identity;
mod orchestrator;
mod reload;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::Cli;
use config::WgmeshConfigBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = WgmeshConfigBuilder::new()
        .with_file(cli.config.as_deref())?
        .with_env()
        .secret(cli.secret.clone())
        .iface(cli.interface.clone())
        .listen_port(cli.listen_port)
        .introducer(Some(cli.introducer))
        .no_punching(Some(cli.no_punching))
        .force_relay(Some(cli.force_relay))
        .ipv6_disabled(Some(cli.ipv6_disabled))
        .dandelion_enabled(Some(cli.dandelion))
        .standalone_gossip(Some(cli.standalone_gossip))
        .dht_bootstrap_routers(cli.dht_bootstrap_routers())
        .base_dir(cli.base_dir.clone())
        .advertise_routes(cli.advertise_routes())
        .log_level(cli.log_level.clone())
        .build()?;

    init_tracing(&config.hot.read().await.log_level);

    let reload_path = config.fixed.base_dir.join(format!("{}.reload", config.fixed.iface));

    let daemon = orchestrator::start(config.clone()).await?;

    wait_for_shutdown(&config, &reload_path, &daemon).await;

    orchestrator::shutdown(daemon).await?;
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Blocks until SIGINT/SIGTERM, applying SIGHUP reloads in place as they
/// arrive instead of exiting.
async fn wait_for_shutdown(config: &config::WgmeshConfig, reload_path: &std::path::Path, daemon: &orchestrator::Daemon) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return,
                _ = sigterm.recv() => return,
                _ = sighup.recv() => {
                    let current = config.hot.read().await.clone();
                    if let Some(next) = reload::parse_reload_file(reload_path, &current) {
                        *config.hot.write().await = next.clone();
                        daemon.apply_hot_reload(&next).await;
                        tracing::info!("applied hot config reload");
                    }
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (config, reload_path);
        let _ = tokio::signal::ctrl_c().await;
    }
}
