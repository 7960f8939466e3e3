//! `lanchatd join IP:PORT`

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use lanchat_core::{Host, LanchatConfig};

use crate::chat::{Chat, ChatStatus};

pub async fn run(
    config: &LanchatConfig,
    target: Host,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    tracing::info!(host = %target, "joining chat");
    let mut chat = Chat::outbound(
        &target,
        config.network.keepalive_idle(),
        config.identity.resolved_display_name(),
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            event = chat.next_event() => {
                if chat.handle(event) == ChatStatus::Ended {
                    break;
                }
            }
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) => chat.say(&line),
                None => break,
            },
        }
    }

    chat.stop();
    Ok(())
}
