//! Pushing refresh results to configured subscribers.

use crate::channels::traits::{ChannelAdapter, ChannelOutboundMessage};
use crate::error::{BotError, Result};
use crate::query::QueryEngine;
use crate::refresh::RefreshOutcome;
use std::sync::Arc;
use tracing::{info, warn};

/// Sends a summary to every subscriber after a refresh.
#[derive(Clone)]
pub struct PushNotifier {
    transport: Arc<dyn ChannelAdapter>,
    query: QueryEngine,
    subscribers: Vec<String>,
    push_days: u32,
}

impl PushNotifier {
    pub fn new(
        transport: Arc<dyn ChannelAdapter>,
        query: QueryEngine,
        subscribers: Vec<String>,
        push_days: u32,
    ) -> Self {
        Self {
            transport,
            query,
            subscribers,
            push_days,
        }
    }

    /// The message for a refresh result, or `None` when nothing is pushed.
    ///
    /// Unchanged data and stale-probe timeouts stay quiet.
    pub fn message_for(&self, result: &Result<RefreshOutcome>) -> Option<PushMessage> {
        match result {
            Ok(RefreshOutcome::Updated { .. }) => {
                let window = self.query.recent_window(self.push_days);
                Some(PushMessage::Summary(format!("```\n{window}```")))
            }
            Ok(RefreshOutcome::Unchanged { .. }) => None,
            Err(BotError::StaleProbeTimeout { attempts }) => {
                info!("not notifying subscribers: data still stale after {attempts} probes");
                None
            }
            Err(e) => Some(PushMessage::Error(format!("error loading new data: {e}"))),
        }
    }

    /// Deliver the message for `result` to every subscriber.
    ///
    /// A failed delivery is logged and does not stop the others. Returns the
    /// number of successful deliveries.
    pub async fn after_refresh(&self, result: &Result<RefreshOutcome>) -> usize {
        let Some(message) = self.message_for(result) else {
            return 0;
        };
        let mut delivered = 0;
        for subscriber in &self.subscribers {
            let outbound = match &message {
                PushMessage::Summary(text) => ChannelOutboundMessage::markdown(subscriber, text),
                PushMessage::Error(text) => ChannelOutboundMessage::text(subscriber, text),
            };
            match self.transport.send(outbound).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "push to {subscriber} via {} failed: {e}",
                    self.transport.id()
                ),
            }
        }
        info!(
            "pushed refresh result to {delivered}/{} subscribers",
            self.subscribers.len()
        );
        delivered
    }
}

/// What gets pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    /// Markdown code block with the recent window table.
    Summary(String),
    /// Plain-text refresh failure.
    Error(String),
}
