//! WebSocket channel
//!
//! Bridges a producer/renderer WebSocket to the session: inbound frames are
//! decoded into transport events, state changes are pushed back out.

use axum::extract::ws::{Message, WebSocket};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use shotcheck_engine::{
    format_mismatch, Role, StateChange, TransportEvent, TransportPublisher, VerdictDetail,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, trace, warn};

/// Frame received from a channel client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundMessage {
    RefImage { name: String },
    TestImage { name: String },
    Error(ErrorFrame),
    PhxJoin { topic: String },
}

/// Producer-side failure report
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawErrorFrame")]
pub struct ErrorFrame {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub message: String,
}

/// Error frames carry the message either flat or as `error.message`
#[derive(Deserialize)]
struct RawErrorFrame {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    role: Option<Role>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl TryFrom<RawErrorFrame> for ErrorFrame {
    type Error = String;

    fn try_from(raw: RawErrorFrame) -> Result<Self, Self::Error> {
        let message = raw
            .error
            .map(|body| body.message)
            .or(raw.message)
            .filter(|message| !message.is_empty())
            .ok_or_else(|| "error frame without a message".to_string())?;
        Ok(Self {
            name: raw.name,
            role: raw.role,
            message,
        })
    }
}

impl InboundMessage {
    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Transport event carried by this frame, if any
    pub fn into_event(self) -> Option<TransportEvent> {
        match self {
            InboundMessage::RefImage { name } => {
                Some(TransportEvent::image(name, Role::Reference))
            }
            InboundMessage::TestImage { name } => Some(TransportEvent::image(name, Role::Test)),
            InboundMessage::Error(ErrorFrame {
                name,
                role,
                message,
            }) => Some(TransportEvent::Error {
                name,
                role,
                message,
            }),
            InboundMessage::PhxJoin { .. } => None,
        }
    }
}

/// Join acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinReply {
    pub event: &'static str,
    pub topic: String,
    pub status: &'static str,
}

impl JoinReply {
    pub fn new(topic: String, accepted: bool) -> Self {
        Self {
            event: "phx_reply",
            topic,
            status: if accepted { "ok" } else { "error" },
        }
    }
}

/// State change as sent to renderers
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    #[serde(flatten)]
    pub change: StateChange,

    /// Rendered diff as a `data:` URL for decided mismatches
    #[serde(rename = "diffImage", skip_serializing_if = "Option::is_none")]
    pub diff_image: Option<String>,

    /// Mismatch detail block shown under a failed breakpoint
    #[serde(rename = "mismatchText", skip_serializing_if = "Option::is_none")]
    pub mismatch_text: Option<String>,
}

impl From<StateChange> for OutboundMessage {
    fn from(change: StateChange) -> Self {
        let (diff_image, mismatch_text) = match &change {
            StateChange::BreakpointDecided {
                detail: Some(VerdictDetail::Mismatch(result)),
                ..
            } => (
                result
                    .rendered_diff_image
                    .as_deref()
                    .map(|png| format!("data:image/png;base64,{}", STANDARD.encode(png))),
                Some(format_mismatch(result)),
            ),
            _ => (None, None),
        };
        Self {
            change,
            diff_image,
            mismatch_text,
        }
    }
}

/// One connected channel client
pub struct ChannelBridge {
    topic: String,
    publisher: TransportPublisher,
    changes: broadcast::Receiver<StateChange>,
}

impl ChannelBridge {
    pub fn new(
        topic: impl Into<String>,
        publisher: TransportPublisher,
        changes: broadcast::Receiver<StateChange>,
    ) -> Self {
        Self {
            topic: topic.into(),
            publisher,
            changes,
        }
    }

    /// Serve the socket until either side closes
    pub async fn bridge(self, socket: WebSocket) -> anyhow::Result<()> {
        let (ws_write, ws_read) = socket.split();
        let (reply_tx, reply_rx) = mpsc::channel(16);

        let inbound = Self::forward_inbound(ws_read, self.topic, self.publisher, reply_tx);
        let outbound = Self::forward_outbound(self.changes, reply_rx, ws_write);

        tokio::select! {
            result = inbound => {
                if let Err(e) = result {
                    debug!("Channel inbound ended: {}", e);
                }
            }
            result = outbound => {
                if let Err(e) = result {
                    debug!("Channel outbound ended: {}", e);
                }
            }
        }

        debug!("Channel client disconnected");
        Ok(())
    }

    async fn forward_inbound(
        mut ws_read: SplitStream<WebSocket>,
        topic: String,
        publisher: TransportPublisher,
        replies: mpsc::Sender<String>,
    ) -> anyhow::Result<()> {
        while let Some(msg) = ws_read.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(_)) => {
                    warn!("Rejected binary channel frame");
                    continue;
                }
                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed by client");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
            };

            let message = match InboundMessage::parse(&text) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Rejected malformed channel frame: {}", e);
                    continue;
                }
            };
            trace!("Channel frame: {:?}", message);

            if let InboundMessage::PhxJoin { topic: requested } = &message {
                let accepted = *requested == topic;
                if !accepted {
                    warn!("Join refused for topic '{}'", requested);
                }
                let reply = serde_json::to_string(&JoinReply::new(requested.clone(), accepted))?;
                replies.send(reply).await?;
                continue;
            }

            if let Some(event) = message.into_event() {
                publisher.publish(event).await?;
            }
        }

        Ok(())
    }

    async fn forward_outbound(
        mut changes: broadcast::Receiver<StateChange>,
        mut replies: mpsc::Receiver<String>,
        mut ws_write: SplitSink<WebSocket, Message>,
    ) -> anyhow::Result<()> {
        loop {
            let text = tokio::select! {
                reply = replies.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
                change = changes.recv() => match change {
                    Ok(change) => serde_json::to_string(&OutboundMessage::from(change))?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Channel client lagged, {} state change(s) dropped", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            ws_write.send(Message::Text(text)).await?;
        }

        Ok(())
    }
}
