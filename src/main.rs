//! squid-forward: run one proxy or tunnel listener described by a JSON file

use std::process::ExitCode;

use squid_forward::{init_logging, ListenerConfig, ListenerMode, Proxy, Tunnel};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: squid-forward <config.json>");
        return ExitCode::from(2);
    };

    match run(&path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &str) -> squid_forward::Result<()> {
    let config = ListenerConfig::from_file(path)?;
    let port = config.port;

    match config.mode {
        ListenerMode::Proxy(proxy_config) => {
            let proxy = Proxy::with_config(proxy_config)?;
            proxy.start(port).await?;
            info!("Proxy listening on port {}", proxy.port());
            wait_for_shutdown().await;
            proxy.close().await
        }
        ListenerMode::Tunnel(tunnel_config) => {
            let tunnel = Tunnel::new(tunnel_config)?;
            tunnel.start(port).await?;
            info!("Tunnel listening on port {}", tunnel.port());
            wait_for_shutdown().await;
            tunnel.close().await
        }
    }
}

async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    }
    info!("Shutting down");
}
