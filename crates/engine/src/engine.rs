//! The aggregation engine
//!
//! One [`Engine`] per reporting session holds every image pair, breakpoint
//! and result group. Inbound events arrive as [`EngineEvent`] values; state
//! changes leave through a broadcast channel.

use crate::aggregator::Aggregator;
use crate::classifier::classify;
use crate::config::EngineConfig;
use crate::requestor::{Comparator, DiffOutcome, DiffRequest, DiffRequestor, PendingDiff, RequestOutcome};
use crate::transport::TransportEvent;
use crate::types::{
    Breakpoint, GroupVerdict, ImagePair, ReportSnapshot, Role, StateChange, Verdict, VerdictDetail,
};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Typed input to the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ImageAvailable {
        name: String,
        role: Role,
    },
    DiffCompleted {
        name: String,
        outcome: DiffOutcome,
    },
    TransportError {
        name: Option<String>,
        role: Option<Role>,
        message: String,
    },
}

impl From<TransportEvent> for EngineEvent {
    fn from(event: TransportEvent) -> Self {
        match event {
            TransportEvent::ImageAvailable { name, role } => {
                EngineEvent::ImageAvailable { name, role }
            }
            TransportEvent::Error {
                name,
                role,
                message,
            } => EngineEvent::TransportError {
                name,
                role,
                message,
            },
        }
    }
}

/// Session-scoped report state
pub struct Engine {
    session_id: Uuid,
    config: EngineConfig,
    pairs: HashMap<String, ImagePair>,
    requestor: DiffRequestor,
    aggregator: Aggregator,
    notifier: broadcast::Sender<StateChange>,
}

impl Engine {
    /// Create an engine for a new session
    pub fn new(config: EngineConfig, comparator: Arc<dyn Comparator>) -> Result<Self> {
        config.validate()?;
        let (notifier, _) = broadcast::channel(config.notify_capacity);
        let aggregator = Aggregator::new(
            config.groups.clone(),
            config.errored_policy,
            notifier.clone(),
        );

        Ok(Self {
            session_id: Uuid::new_v4(),
            config,
            pairs: HashMap::new(),
            requestor: DiffRequestor::new(comparator),
            aggregator,
            notifier,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receive every state change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.notifier.subscribe()
    }

    pub(crate) fn notifier(&self) -> broadcast::Sender<StateChange> {
        self.notifier.clone()
    }

    /// Route one event. Returns a comparison the caller must drive, if the
    /// event started one.
    pub fn dispatch(&mut self, event: EngineEvent) -> Option<PendingDiff> {
        match event {
            EngineEvent::ImageAvailable { name, role } => self.on_image_available(&name, role),
            EngineEvent::DiffCompleted { name, outcome } => {
                self.on_diff_complete(&name, outcome);
                None
            }
            EngineEvent::TransportError {
                name,
                role,
                message,
            } => {
                self.on_transport_error(name.as_deref(), role, &message);
                None
            }
        }
    }

    /// An image for `name` in `role` arrived.
    ///
    /// The first time both roles are present a comparison is started and
    /// returned. Later deliveries for the same name return `None`.
    pub fn on_image_available(&mut self, name: &str, role: Role) -> Option<PendingDiff> {
        debug!("Image available: {} ({})", name, role);
        let image = self.config.images.resolve(name, role);
        self.aggregator.touch(name);

        let pair = self
            .pairs
            .entry(name.to_string())
            .or_insert_with(|| ImagePair::new(name));
        pair.mark(image.clone());
        let _ = self.notifier.send(StateChange::ImageAvailable {
            name: name.to_string(),
            role,
            image,
        });

        if !pair.is_complete() || pair.requested {
            return None;
        }
        if let Some(verdict) = self.aggregator.verdict(name) {
            debug!("Not comparing '{}': already {}", name, verdict);
            return None;
        }

        let (Some(reference), Some(test)) = (pair.reference.clone(), pair.test.clone()) else {
            return None;
        };
        pair.requested = true;

        match self.requestor.request(DiffRequest {
            name: name.to_string(),
            reference,
            test,
        }) {
            RequestOutcome::Started(pending) => Some(pending),
            RequestOutcome::Joined(_) | RequestOutcome::AlreadyCompleted => None,
        }
    }

    /// A comparison finished. Returns whether a verdict was recorded.
    pub fn on_diff_complete(&mut self, name: &str, outcome: DiffOutcome) -> bool {
        self.requestor.complete(name);
        match outcome {
            Ok(result) => {
                if !result.has_consistent_image() {
                    warn!("Diff for '{}' has an inconsistent diff image", name);
                }
                let (verdict, detail) = classify(&result);
                self.aggregator.set_verdict(name, verdict, detail)
            }
            Err(failure) => {
                error!("{}", failure);
                self.aggregator.set_verdict(
                    name,
                    Verdict::Errored,
                    Some(VerdictDetail::Error(failure.message)),
                )
            }
        }
    }

    /// A transport-level error arrived.
    ///
    /// Only an error scoped to both a name and a role is applied to a
    /// breakpoint; anything else is a diagnostic.
    pub fn on_transport_error(
        &mut self,
        name: Option<&str>,
        role: Option<Role>,
        message: &str,
    ) -> bool {
        match (name, role) {
            (Some(name), Some(role)) => {
                warn!("Transport error for {} ({}): {}", name, role, message);
                self.aggregator.set_verdict(
                    name,
                    Verdict::Errored,
                    Some(VerdictDetail::Error(message.to_string())),
                )
            }
            _ => {
                error!(
                    "Unscoped transport error (name: {:?}, role: {:?}): {}",
                    name, role, message
                );
                let _ = self.notifier.send(StateChange::Diagnostic {
                    message: message.to_string(),
                });
                false
            }
        }
    }

    /// Record a verdict directly; first write wins
    pub fn set_verdict(
        &mut self,
        name: &str,
        verdict: Verdict,
        detail: Option<VerdictDetail>,
    ) -> bool {
        self.aggregator.set_verdict(name, verdict, detail)
    }

    pub fn group_verdict(&self, group: &str) -> Option<GroupVerdict> {
        self.aggregator.group_verdict(group)
    }

    pub fn breakpoint(&self, name: &str) -> Option<&Breakpoint> {
        self.aggregator.breakpoint(name)
    }

    pub fn pair(&self, name: &str) -> Option<&ImagePair> {
        self.pairs.get(name)
    }

    pub fn in_flight(&self) -> usize {
        self.requestor.in_flight_count()
    }

    /// Encoded diff image of a failed breakpoint
    pub fn diff_image(&self, name: &str) -> Option<Vec<u8>> {
        match self.breakpoint(name)?.detail.as_ref()? {
            VerdictDetail::Mismatch(result) => result.rendered_diff_image.clone(),
            VerdictDetail::Error(_) => None,
        }
    }

    pub fn snapshot(&self) -> ReportSnapshot {
        let (groups, ungrouped) = self.aggregator.reports();
        ReportSnapshot {
            session_id: self.session_id.to_string(),
            groups,
            ungrouped,
            taken_at: Utc::now(),
        }
    }

    /// Start over: drop pairs, verdicts and outstanding comparisons
    pub fn reset(&mut self) {
        debug!("Resetting session {}", self.session_id);
        self.pairs.clear();
        self.requestor.reset();
        self.aggregator.reset();
        let _ = self.notifier.send(StateChange::Reset);
    }
}
