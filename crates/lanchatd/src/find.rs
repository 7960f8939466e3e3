//! `lanchatd find`

use std::sync::{Arc, Weak};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use lanchat_core::{Host, LanchatConfig};
use lanchat_net::{
    event_channel, resolve_all, DiscovererDelegate, DiscoveryEvent, DnsSd, MdnsSd,
    ServiceDiscoverer,
};

pub async fn run(config: &LanchatConfig, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let backend: Arc<dyn DnsSd> = Arc::new(MdnsSd::new());
    let (delegate, mut events) = event_channel::<DiscoveryEvent>();
    let mut discoverer = ServiceDiscoverer::from_config(
        backend.clone(),
        config,
        Arc::downgrade(&delegate) as Weak<dyn DiscovererDelegate>,
    );
    discoverer.start();

    let timeout = config.discovery.resolve_timeout();
    let (hosts_tx, mut resolved) = mpsc::unbounded_channel::<(u64, Vec<Host>)>();
    let mut generation = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            Some(event) = events.recv() => match event {
                DiscoveryEvent::Ready => println!("* searching for chats..."),
                DiscoveryEvent::ResultsChanged(records) => {
                    generation += 1;
                    let this = generation;
                    let backend = backend.clone();
                    let tx = hosts_tx.clone();
                    tokio::spawn(async move {
                        let hosts = resolve_all(&backend, records, timeout).await;
                        let _ = tx.send((this, hosts));
                    });
                }
                DiscoveryEvent::Failed(e) => {
                    tracing::error!(error = %e, "discovery failed");
                    println!("* discovery failed: {e}");
                }
                DiscoveryEvent::Cancelled { is_restarting: true } => {
                    tracing::debug!("discovery restarting");
                }
                DiscoveryEvent::Cancelled { is_restarting: false } => break,
            },

            Some((this, hosts)) = resolved.recv() => {
                // Older lookups may finish after newer ones.
                if this == generation {
                    print_hosts(&hosts);
                }
            }
        }
    }

    discoverer.stop();
    Ok(())
}

fn print_hosts(hosts: &[Host]) {
    if hosts.is_empty() {
        println!("* no chats found");
        return;
    }
    println!("* {} chat(s) found:", hosts.len());
    for host in hosts {
        println!("    {:<24} lanchatd join {host}", host.name);
    }
}
