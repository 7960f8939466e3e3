//! `lanchatd host`

use std::future;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use lanchat_core::LanchatConfig;
use lanchat_net::{
    event_channel, ConnectionEvent, DnsSd, InterfaceTable, ListenerDelegate, ListenerEvent,
    ListenerOptions, LocalListenerAddressResolver, MdnsSd, ServiceListener, SystemInterfaces,
    SystemPathMonitor,
};

use crate::chat::{Chat, ChatStatus};

/// Next event of the active chat, if there is one.
async fn chat_event(chat: &mut Option<Chat>) -> ConnectionEvent {
    match chat {
        Some(active) => active.next_event().await,
        None => future::pending().await,
    }
}

pub async fn run(config: &LanchatConfig, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let backend: Arc<dyn DnsSd> = Arc::new(MdnsSd::new());
    let display_name = config.identity.resolved_display_name();

    let (listener_delegate, mut listener_events) = event_channel::<ListenerEvent>();
    let mut listener = ServiceListener::new(
        backend,
        ListenerOptions::from_config(config),
        Arc::downgrade(&listener_delegate) as Weak<dyn ListenerDelegate>,
    );
    listener.start();

    let monitor = SystemPathMonitor::default();
    let interfaces: Arc<dyn InterfaceTable> = Arc::new(SystemInterfaces);
    let (endpoint_tx, mut endpoints) = mpsc::unbounded_channel();
    let mut endpoint_lookup: Option<LocalListenerAddressResolver> = None;

    let mut chat: Option<Chat> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            Some(event) = listener_events.recv() => match event {
                ListenerEvent::Ready => {
                    if let Some(previous) = endpoint_lookup.take() {
                        previous.stop();
                    }
                    let tx = endpoint_tx.clone();
                    endpoint_lookup = Some(LocalListenerAddressResolver::resolve(
                        &monitor,
                        interfaces.clone(),
                        listener.port_handle(),
                        move |result| {
                            let _ = tx.send(result);
                        },
                    ));
                }
                ListenerEvent::NewConnection(stream) => {
                    if chat.as_ref().is_some_and(|c| !c.is_over()) {
                        let peer = stream.peer_addr().ok();
                        tracing::info!(?peer, "refusing connection, chat in progress");
                        continue;
                    }
                    chat = Some(Chat::inbound(
                        stream,
                        config.network.keepalive_idle(),
                        display_name.clone(),
                    ));
                }
                ListenerEvent::Failed(e) => {
                    tracing::error!(error = %e, "listener failed");
                    println!("* hosting failed: {e}");
                }
                ListenerEvent::Cancelled { is_restarting: true } => {
                    tracing::debug!("listener restarting");
                }
                ListenerEvent::Cancelled { is_restarting: false } => break,
            },

            Some(result) = endpoints.recv() => match result {
                Ok((ip, port)) => println!("* hosting \"{display_name}\" at {ip}:{port}"),
                Err(e) => {
                    tracing::warn!(error = %e, "could not determine LAN address");
                    if let Some(port) = listener.port() {
                        println!("* hosting \"{display_name}\" on port {port}");
                    }
                }
            },

            event = chat_event(&mut chat) => {
                if let Some(active) = chat.as_mut() {
                    if active.handle(event) == ChatStatus::Ended {
                        chat = None;
                        println!("* waiting for someone to join");
                    }
                }
            }

            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) => match &chat {
                    Some(active) => active.say(&line),
                    None => println!("* nobody has joined yet"),
                },
                None => break,
            },
        }
    }

    if let Some(active) = &chat {
        active.stop();
    }
    listener.stop();
    Ok(())
}
