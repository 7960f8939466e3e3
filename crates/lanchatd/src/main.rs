//! lanchatd: LAN chat front-end.
//!
//!   lanchatd host            advertise a chat and wait for someone to join
//!   lanchatd find            list chats advertised on the local network
//!   lanchatd join IP:PORT    join a chat directly

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use lanchat_core::{Host, LanchatConfig};

mod chat;
mod find;
mod host;
mod join;

const USAGE: &str = "usage: lanchatd <host | find | join IP:PORT>";

#[tokio::main]
async fn main() -> Result<()> {
    let written = LanchatConfig::write_default_if_missing();
    let loaded = LanchatConfig::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = written {
        tracing::warn!(error = %e, "failed to write default config");
    }
    if let Err(e) = loaded {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }

    let mut args = std::env::args().skip(1);
    let command = args.next();

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    match command.as_deref() {
        Some("host") => host::run(&config, shutdown_tx.subscribe()).await,
        Some("find") => find::run(&config, shutdown_tx.subscribe()).await,
        Some("join") => {
            let target: Host = args
                .next()
                .context(USAGE)?
                .parse()
                .context("bad join address")?;
            join::run(&config, target, shutdown_tx.subscribe()).await
        }
        _ => bail!(USAGE),
    }
}
