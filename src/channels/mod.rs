//! Chat channels.
//!
//! Adapters are pluggable behind [`ChannelAdapter`]. The runtime owns
//! restarts and routes every inbound message through the [`App`].

pub mod telegram;
pub mod traits;

use crate::app::App;
use crate::channels::traits::{ChannelAdapter, ChannelInboundMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use telegram::TelegramAdapter;

const MAX_BACKOFF_SECS: u64 = 60;

/// Run `adapter` until `cancel`, answering inbound commands.
///
/// The adapter is restarted with exponential backoff when it stops or
/// fails. Each inbound message is handled on its own task so a slow chart
/// does not hold up other chats.
pub async fn run_runtime(
    adapter: Arc<dyn ChannelAdapter>,
    app: Arc<App>,
    queue_size: usize,
    cancel: CancellationToken,
) {
    let (inbound_tx, mut inbound_rx) =
        tokio::sync::mpsc::channel::<ChannelInboundMessage>(queue_size.max(8));
    info!("channel runtime started with [{}]", adapter.id());

    let mut workers: JoinSet<()> = JoinSet::new();
    {
        let adapter = Arc::clone(&adapter);
        let cancel = cancel.clone();
        workers.spawn(async move {
            let mut backoff_secs = 2u64;
            while !cancel.is_cancelled() {
                match adapter.run(inbound_tx.clone()).await {
                    Ok(()) => warn!("channel {} stopped; restarting", adapter.id()),
                    Err(err) => warn!(
                        "channel {} failed: {err}; retrying in {backoff_secs}s",
                        adapter.id()
                    ),
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                }
                backoff_secs = backoff_secs.saturating_mul(2).min(MAX_BACKOFF_SECS);
            }
        });
    }

    let mut handlers = JoinSet::new();
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = inbound_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        debug!("inbound from {} on {}", message.sender, message.channel);

        let adapter = Arc::clone(&adapter);
        let app = Arc::clone(&app);
        handlers.spawn(async move {
            let reply = app.handle_inbound(message).await;
            let target = reply.reply_target.clone();
            if let Err(err) = adapter.send(reply).await {
                warn!("reply to {target} via {} failed: {err}", adapter.id());
            }
        });
        // Reap finished handlers so the set does not grow without bound.
        while handlers.try_join_next().is_some() {}
    }

    workers.abort_all();
    handlers.abort_all();
    info!("channel runtime stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::channels::traits::{ChannelOutboundMessage, OutboundBody};
    use crate::command::HELP_TEXT;
    use crate::config::BotConfig;
    use crate::notify::tests::RecordingTransport;
    use crate::scheduler::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Emits one message, then idles; records replies.
    #[derive(Default)]
    struct ScriptedAdapter {
        replies: Mutex<Vec<ChannelOutboundMessage>>,
    }

    #[async_trait]
    impl ChannelAdapter for ScriptedAdapter {
        fn id(&self) -> &'static str {
            "scripted"
        }

        async fn send(&self, message: ChannelOutboundMessage) -> anyhow::Result<()> {
            self.replies.lock().unwrap().push(message);
            Ok(())
        }

        async fn run(&self, inbound_tx: mpsc::Sender<ChannelInboundMessage>) -> anyhow::Result<()> {
            inbound_tx
                .send(ChannelInboundMessage {
                    channel: "scripted".to_owned(),
                    sender: "7".to_owned(),
                    reply_target: "7".to_owned(),
                    text: "/help".to_owned(),
                })
                .await?;
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn health_check(&self) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn inbound_command_is_answered_on_the_same_channel() {
        let app = Arc::new(
            App::new(
                BotConfig::default(),
                Arc::new(ManualClock::new(Utc::now())),
                Arc::new(RecordingTransport::default()),
            )
            .unwrap(),
        );
        let adapter = Arc::new(ScriptedAdapter::default());
        let cancel = CancellationToken::new();
        let runtime = tokio::spawn(run_runtime(
            adapter.clone(),
            app,
            8,
            cancel.clone(),
        ));

        tokio::time::timeout(Duration::from_secs(5), async {
            while adapter.replies.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reply sent");

        let replies = adapter.replies.lock().unwrap().clone();
        assert_eq!(replies[0].reply_target, "7");
        assert_eq!(replies[0].body, OutboundBody::Text(HELP_TEXT.to_owned()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), runtime)
            .await
            .expect("runtime stops")
            .unwrap();
    }
}
