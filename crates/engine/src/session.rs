//! Session driver
//!
//! A [`Session`] owns its [`Engine`] on a single task. Transport events,
//! comparison completions and handle commands are all processed on that
//! task in arrival order, so engine state needs no locking.

use crate::config::EngineConfig;
use crate::engine::{Engine, EngineEvent};
use crate::requestor::{Comparator, DiffOutcome, PendingDiff};
use crate::transport::{Transport, TransportEvent};
use crate::types::{GroupVerdict, ReportSnapshot, StateChange};
use crate::Result;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

enum Command {
    Snapshot(oneshot::Sender<ReportSnapshot>),
    GroupVerdict(String, oneshot::Sender<Option<GroupVerdict>>),
    DiffImage(String, oneshot::Sender<Option<Vec<u8>>>),
    Reset(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable access to a running session
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    commands: mpsc::Sender<Command>,
    notifier: broadcast::Sender<StateChange>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// State changes emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.notifier.subscribe()
    }

    pub async fn snapshot(&self) -> Result<ReportSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot(tx)).await?;
        Ok(rx.await?)
    }

    pub async fn group_verdict(&self, group: &str) -> Result<Option<GroupVerdict>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::GroupVerdict(group.to_string(), tx))
            .await?;
        Ok(rx.await?)
    }

    pub async fn diff_image(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::DiffImage(name.to_string(), tx))
            .await?;
        Ok(rx.await?)
    }

    /// Clear all verdicts and drop outstanding comparisons
    pub async fn reset(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Reset(tx)).await?;
        Ok(rx.await?)
    }

    /// Stop the session; pending comparisons are abandoned
    pub async fn shutdown(&self) -> Result<()> {
        self.commands.send(Command::Shutdown).await?;
        Ok(())
    }
}

/// Event loop around one engine
pub struct Session {
    engine: Engine,
    commands: mpsc::Receiver<Command>,
    pending: FuturesUnordered<BoxFuture<'static, (String, DiffOutcome)>>,
}

impl Session {
    /// Create a session and the handle used to query it
    pub fn new(
        config: EngineConfig,
        comparator: Arc<dyn Comparator>,
    ) -> Result<(Self, SessionHandle)> {
        let engine = Engine::new(config, comparator)?;
        let (tx, rx) = mpsc::channel(engine.config().command_capacity);
        let handle = SessionHandle {
            session_id: engine.session_id(),
            commands: tx,
            notifier: engine.notifier(),
        };
        Ok((
            Self {
                engine,
                commands: rx,
                pending: FuturesUnordered::new(),
            },
            handle,
        ))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Drive the session until the transport closes and every running
    /// comparison has reported, or until shutdown is requested.
    ///
    /// A failed join is logged and not retried; whatever the transport
    /// still delivers is processed.
    pub async fn run<T: Transport>(mut self, mut transport: T) -> ReportSnapshot {
        match transport.join().await {
            Ok(()) => info!("Joined '{}' successfully", transport.topic()),
            Err(e) => warn!("Unable to join '{}': {}", transport.topic(), e),
        }

        let mut transport_open = true;
        let mut commands_open = true;

        loop {
            if !transport_open && self.pending.is_empty() {
                debug!("Transport closed and no comparisons pending");
                break;
            }

            tokio::select! {
                event = transport.recv(), if transport_open => match event {
                    Some(event) => self.handle_transport(event),
                    None => {
                        info!("Transport '{}' closed", transport.topic());
                        transport_open = false;
                    }
                },
                Some((name, outcome)) = self.pending.next(), if !self.pending.is_empty() => {
                    self.engine.dispatch(EngineEvent::DiffCompleted { name, outcome });
                }
                command = self.commands.recv(), if commands_open => match command {
                    Some(Command::Shutdown) => {
                        info!(
                            "Session {} shutting down with {} comparison(s) pending",
                            self.engine.session_id(),
                            self.pending.len()
                        );
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => commands_open = false,
                },
            }
        }

        self.engine.snapshot()
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match EngineEvent::from(event) {
            EngineEvent::ImageAvailable { name, role } => {
                if let Some(pending) = self.engine.on_image_available(&name, role) {
                    self.track(name, pending);
                }
            }
            other => {
                self.engine.dispatch(other);
            }
        }
    }

    fn track(&mut self, name: String, pending: PendingDiff) {
        self.pending
            .push(pending.map(move |outcome| (name, outcome)).boxed());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Snapshot(reply) => {
                let _ = reply.send(self.engine.snapshot());
            }
            Command::GroupVerdict(group, reply) => {
                let _ = reply.send(self.engine.group_verdict(&group));
            }
            Command::DiffImage(name, reply) => {
                let _ = reply.send(self.engine.diff_image(&name));
            }
            Command::Reset(reply) => {
                // Comparisons from before the reset must not land afterwards.
                self.pending = FuturesUnordered::new();
                self.engine.reset();
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use crate::types::{DiffResult, ImageRef, ResultGroupSpec, Role, Verdict};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Holds every comparison until released
    struct GatedComparator {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Comparator for GatedComparator {
        async fn compare(&self, _reference: &ImageRef, _test: &ImageRef) -> Result<DiffResult> {
            self.gate.notified().await;
            Ok(DiffResult::identical())
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::default().with_groups(vec![ResultGroupSpec {
            id: "home".to_string(),
            breakpoints: vec!["hero".to_string()],
        }])
    }

    #[tokio::test]
    async fn test_run_waits_for_pending_comparisons() {
        let gate = Arc::new(Notify::new());
        let (session, handle) =
            Session::new(config(), Arc::new(GatedComparator { gate: gate.clone() })).unwrap();
        let (publisher, transport) = ChannelTransport::new("screenshots:test", 8);
        let mut changes = handle.subscribe();

        let task = tokio::spawn(session.run(transport));
        publisher
            .publish(TransportEvent::image("hero", Role::Reference))
            .await
            .unwrap();
        publisher
            .publish(TransportEvent::image("hero", Role::Test))
            .await
            .unwrap();
        drop(publisher);

        // Both images announced before the comparison is released
        for _ in 0..2 {
            assert!(matches!(
                changes.recv().await.unwrap(),
                StateChange::ImageAvailable { .. }
            ));
        }
        gate.notify_one();

        let report = task.await.unwrap();
        assert_eq!(report.groups[0].verdict, GroupVerdict::Passed);
        assert_eq!(report.count(Verdict::Passed), 1);
    }

    #[tokio::test]
    async fn test_handle_queries_and_shutdown() {
        let gate = Arc::new(Notify::new());
        let (session, handle) =
            Session::new(config(), Arc::new(GatedComparator { gate })).unwrap();
        let (publisher, transport) = ChannelTransport::new("screenshots:test", 8);
        let mut changes = handle.subscribe();
        let task = tokio::spawn(session.run(transport));

        publisher
            .publish(TransportEvent::error(Some("hero"), Some(Role::Test), "timeout"))
            .await
            .unwrap();
        assert!(matches!(
            changes.recv().await.unwrap(),
            StateChange::BreakpointDecided {
                verdict: Verdict::Errored,
                ..
            }
        ));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(
            snapshot.groups[0].breakpoints[0].verdict,
            Some(Verdict::Errored)
        );
        assert_eq!(
            handle.group_verdict("home").await.unwrap(),
            Some(GroupVerdict::Pending)
        );
        assert_eq!(handle.diff_image("hero").await.unwrap(), None);

        handle.reset().await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.count(Verdict::Errored), 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle.snapshot().await.is_err());
        drop(publisher);
    }

    #[test]
    fn test_zero_command_capacity_rejected() {
        let config = EngineConfig {
            command_capacity: 0,
            ..EngineConfig::default()
        };
        let result = Session::new(
            config,
            Arc::new(GatedComparator {
                gate: Arc::new(Notify::new()),
            }),
        );
        assert!(matches!(result, Err(crate::Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_failed_join_still_drains_events() {
        let (session, handle) = Session::new(
            config(),
            Arc::new(GatedComparator {
                gate: Arc::new(Notify::new()),
            }),
        )
        .unwrap();
        let (_publisher, transport) = ChannelTransport::new("", 8);
        let task = tokio::spawn(session.run(transport));
        handle.shutdown().await.unwrap();
        let report = task.await.unwrap();
        assert_eq!(report.groups[0].verdict, GroupVerdict::Pending);
    }
}
