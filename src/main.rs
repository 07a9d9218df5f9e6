use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use microra_api::{DebugServer, InterfaceView};
use microra_core::config::Config;
use microra_core::context::Context;
use microra_ra::advertiser::Advertiser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "microra", about = "MicroRA - IPv6 NDP router advertisement daemon")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/microra/microra.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)?;

    init_logging(&config.logging);

    info!(
        config = %cli.config.display(),
        interfaces = config.interfaces.len(),
        "starting microra"
    );

    // Metrics recorder
    let metrics = if config.debug.enabled && config.debug.prometheus {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();
    let mut views = Vec::new();

    for iface in &config.interfaces {
        let view = InterfaceView::new(&iface.name, iface.advertise);
        if !iface.advertise {
            info!(interface = %iface.name, "advertising disabled");
            views.push(view);
            continue;
        }

        let (ra_tx, ra_rx) = watch::channel(None);
        views.push(view.with_receiver(ra_rx));

        let mut advertiser = Advertiser::new(iface.clone())?.with_observer(ra_tx);
        for p in advertiser.plugins() {
            info!(interface = %iface.name, plugin = p.name(), "{}", p.describe());
        }

        let ctx = Context::new(shutdown_rx.clone());
        let name = iface.name.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = advertiser.advertise(&ctx).await {
                error!(interface = %name, "advertiser error: {e}");
            }
            advertiser.close();
        }));
    }

    if tasks.is_empty() {
        warn!("no interfaces configured to advertise");
    }

    // Start debug API
    if config.debug.enabled {
        let addr: SocketAddr = config.debug.listen.parse()?;
        let mut server = DebugServer::new(addr).with_interfaces(views);
        if let Some(handle) = metrics {
            server = server.with_metrics(handle);
        }
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.run(rx).await {
                error!("debug API error: {e}");
            }
        }));
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping advertisers...");
    let _ = shutdown_tx.send(true);

    // Wait for all tasks to finish
    for task in tasks {
        let _ = task.await;
    }

    info!("microra stopped");
    Ok(())
}

fn init_logging(config: &microra_core::config::LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .init();
        }
    }
}
