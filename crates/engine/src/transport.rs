//! Transport collaborator: inbound screenshot events
//!
//! The engine consumes a [`Transport`]; [`ChannelTransport`] is the in-process
//! implementation that network front ends publish into.

use crate::types::Role;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Event delivered by a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransportEvent {
    /// An image for `name` in `role` can now be fetched
    ImageAvailable { name: String, role: Role },
    /// A producer-side failure, possibly scoped to one image
    Error {
        name: Option<String>,
        role: Option<Role>,
        message: String,
    },
}

impl TransportEvent {
    pub fn image(name: impl Into<String>, role: Role) -> Self {
        TransportEvent::ImageAvailable {
            name: name.into(),
            role,
        }
    }

    pub fn error(name: Option<&str>, role: Option<Role>, message: impl Into<String>) -> Self {
        TransportEvent::Error {
            name: name.map(str::to_string),
            role,
            message: message.into(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            TransportEvent::ImageAvailable { name, .. } => Some(name),
            TransportEvent::Error { name, .. } => name.as_deref(),
        }
    }
}

/// Publish/subscribe channel the session listens on
#[async_trait]
pub trait Transport: Send {
    /// Topic this transport is bound to
    fn topic(&self) -> &str;

    /// Join the topic. Failure is reported once; the caller does not retry.
    async fn join(&mut self) -> Result<()>;

    /// Next inbound event, `None` once the channel is closed
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Sending half of a [`ChannelTransport`]
#[derive(Clone)]
pub struct TransportPublisher {
    topic: String,
    tx: mpsc::Sender<TransportEvent>,
}

impl TransportPublisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Deliver an event, waiting for queue space
    pub async fn publish(&self, event: TransportEvent) -> Result<()> {
        debug!("Publishing on '{}': {:?}", self.topic, event);
        self.tx.send(event).await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// In-memory transport backed by a bounded mpsc queue
pub struct ChannelTransport {
    topic: String,
    rx: mpsc::Receiver<TransportEvent>,
    liveness: mpsc::WeakSender<TransportEvent>,
}

impl ChannelTransport {
    /// Create a transport and its publisher for `topic`
    pub fn new(topic: impl Into<String>, capacity: usize) -> (TransportPublisher, Self) {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let liveness = tx.downgrade();
        (
            TransportPublisher {
                topic: topic.clone(),
                tx,
            },
            Self {
                topic,
                rx,
                liveness,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn join(&mut self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(Error::JoinRejected {
                topic: self.topic.clone(),
                reason: "empty topic".to_string(),
            });
        }
        if self.liveness.upgrade().is_none() {
            return Err(Error::JoinRejected {
                topic: self.topic.clone(),
                reason: "no publishers attached".to_string(),
            });
        }
        debug!("Joined '{}'", self.topic);
        Ok(())
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}
