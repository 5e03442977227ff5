use async_trait::async_trait;
use tokio::sync::mpsc;

/// Inbound message received from a chat channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInboundMessage {
    pub channel: String,
    pub sender: String,
    pub reply_target: String,
    pub text: String,
}

/// Payload of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundBody {
    Text(String),
    /// Text using the channel's Markdown dialect.
    Markdown(String),
    /// Encoded image sent as a file attachment.
    Image {
        file_name: String,
        bytes: Vec<u8>,
        caption: Option<String>,
    },
}

/// Outbound message sent to a chat destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOutboundMessage {
    pub reply_target: String,
    pub body: OutboundBody,
}

impl ChannelOutboundMessage {
    pub fn text(reply_target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            reply_target: reply_target.into(),
            body: OutboundBody::Text(text.into()),
        }
    }

    pub fn markdown(reply_target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            reply_target: reply_target.into(),
            body: OutboundBody::Markdown(text.into()),
        }
    }
}

/// Channel adapter contract. New channels only need to implement this trait.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable channel identifier (e.g. `telegram`).
    fn id(&self) -> &'static str;

    /// Deliver a message to the channel-specific target.
    async fn send(&self, message: ChannelOutboundMessage) -> anyhow::Result<()>;

    /// Receive inbound messages and forward them until the channel closes.
    async fn run(&self, inbound_tx: mpsc::Sender<ChannelInboundMessage>) -> anyhow::Result<()>;

    /// Best-effort health probe.
    async fn health_check(&self) -> anyhow::Result<bool>;
}
