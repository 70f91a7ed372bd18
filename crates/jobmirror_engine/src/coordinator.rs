//! The coordinator task and the handle upstream code talks to.

use crate::engine::{CycleReport, EngineStats, SyncEngine};
use crate::error::{EngineError, EngineResult};
use crate::health::ConnectionEvent;
use crate::registry::EntityRegistry;
use jobmirror_model::{Fingerprint, JobSource};
use jobmirror_store::JobStore;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace};

/// A message for the coordinator task.
pub enum Notification {
    /// A job appeared upstream.
    Added(Arc<dyn JobSource>),
    /// A job was removed upstream.
    Removed(Fingerprint),
    /// Jobs changed upstream.
    BulkUpdated(Vec<Arc<dyn JobSource>>),
    /// A job's data moved.
    Relocated {
        /// The moved job.
        job: Arc<dyn JobSource>,
        /// Its new save location.
        new_path: String,
    },
    /// Run a commit cycle now and report it.
    Commit(oneshot::Sender<Option<CycleReport>>),
    /// Correct the store and stop.
    Shutdown,
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::Added(job) => {
                f.debug_tuple("Added").field(&job.fingerprint()).finish()
            }
            Notification::Removed(fp) => f.debug_tuple("Removed").field(fp).finish(),
            Notification::BulkUpdated(jobs) => {
                f.debug_tuple("BulkUpdated").field(&jobs.len()).finish()
            }
            Notification::Relocated { job, new_path } => f
                .debug_struct("Relocated")
                .field("job", &job.fingerprint())
                .field("new_path", new_path)
                .finish(),
            Notification::Commit(_) => f.write_str("Commit"),
            Notification::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Cloneable entry point for upstream notifications.
///
/// Methods never touch the store or the registry. Every call is forwarded
/// as a message, so the coordinator applies them in the order they were
/// made. The `blocking_*` variants are for threads outside the
/// runtime and panic if called from async code.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<Notification>,
    registry: Arc<EntityRegistry>,
}

impl EngineHandle {
    /// Reports a new job.
    pub async fn added(&self, job: Arc<dyn JobSource>) -> EngineResult<()> {
        self.send(Notification::Added(job)).await
    }

    /// Reports a removed job.
    pub async fn removed(&self, fingerprint: Fingerprint) -> EngineResult<()> {
        self.send(Notification::Removed(fingerprint)).await
    }

    /// Reports changed jobs.
    pub async fn bulk_updated(&self, jobs: Vec<Arc<dyn JobSource>>) -> EngineResult<()> {
        self.send(Notification::BulkUpdated(jobs)).await
    }

    /// Reports a moved job.
    pub async fn relocated(&self, job: Arc<dyn JobSource>, new_path: String) -> EngineResult<()> {
        self.send(Notification::Relocated { job, new_path }).await
    }

    /// Runs a commit cycle now.
    ///
    /// Returns `None` if the fire was coalesced into a running cycle.
    pub async fn commit(&self) -> EngineResult<Option<CycleReport>> {
        let (reply, response) = oneshot::channel();
        self.send(Notification::Commit(reply)).await?;
        response.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Blocking form of [`EngineHandle::added`].
    pub fn blocking_added(&self, job: Arc<dyn JobSource>) -> EngineResult<()> {
        self.blocking_send(Notification::Added(job))
    }

    /// Blocking form of [`EngineHandle::removed`].
    pub fn blocking_removed(&self, fingerprint: Fingerprint) -> EngineResult<()> {
        self.blocking_send(Notification::Removed(fingerprint))
    }

    /// Blocking form of [`EngineHandle::bulk_updated`].
    pub fn blocking_bulk_updated(&self, jobs: Vec<Arc<dyn JobSource>>) -> EngineResult<()> {
        self.blocking_send(Notification::BulkUpdated(jobs))
    }

    /// Blocking form of [`EngineHandle::relocated`].
    pub fn blocking_relocated(&self, job: Arc<dyn JobSource>, new_path: String) -> EngineResult<()> {
        self.blocking_send(Notification::Relocated { job, new_path })
    }

    /// Asks the coordinator to stop after the exit-time correction.
    ///
    /// Use [`MirrorService::shutdown`] to wait for the final statistics.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.send(Notification::Shutdown).await
    }

    /// Number of jobs waiting for their first commit.
    ///
    /// Jobs still queued as notifications are not counted.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    async fn send(&self, notification: Notification) -> EngineResult<()> {
        self.sender
            .send(notification)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    fn blocking_send(&self, notification: Notification) -> EngineResult<()> {
        self.sender
            .blocking_send(notification)
            .map_err(|_| EngineError::ChannelClosed)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("pending", &self.registry.len())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// A running coordinator task.
#[derive(Debug)]
pub struct MirrorService {
    handle: EngineHandle,
    events: broadcast::Receiver<ConnectionEvent>,
    task: JoinHandle<EngineStats>,
}

impl MirrorService {
    /// Moves `engine` into a new coordinator task on the current runtime.
    pub fn spawn<S: JobStore + 'static>(engine: SyncEngine<S>) -> Self {
        let (sender, receiver) = mpsc::channel(engine.config().channel_capacity);
        let handle = EngineHandle {
            sender,
            registry: Arc::clone(engine.registry()),
        };
        let events = engine.subscribe_connection();
        let task = tokio::spawn(run(engine, receiver));
        Self {
            handle,
            events,
            task,
        }
    }

    /// A handle for upstream notifications.
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Subscribes to store connection transitions.
    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.resubscribe()
    }

    /// Stops the coordinator after its current work and the exit-time
    /// correction, and returns the final statistics.
    pub async fn shutdown(self) -> EngineResult<EngineStats> {
        // Already stopped if this fails; the join below reports why.
        let _ = self.handle.sender.send(Notification::Shutdown).await;
        self.task
            .await
            .map_err(|err| EngineError::TaskFailed(err.to_string()))
    }
}

async fn run<S: JobStore>(
    mut engine: SyncEngine<S>,
    mut receiver: mpsc::Receiver<Notification>,
) -> EngineStats {
    let mut next_fire = Instant::now() + engine.scheduler().interval();
    debug!("coordinator started");

    loop {
        tokio::select! {
            // Queued notifications go first so a burst of adds shares one cycle.
            biased;

            message = receiver.recv() => {
                let Some(message) = message else {
                    info!("all engine handles dropped");
                    break;
                };
                trace!(?message, "notification");
                match message {
                    Notification::Added(job) => {
                        // Under backoff the timer keeps its pace.
                        if engine.on_added(job)
                            && engine.config().commit_on_added
                            && engine.scheduler().consecutive_failures() == 0
                        {
                            next_fire = Instant::now();
                        }
                    }
                    Notification::Removed(fingerprint) => engine.on_removed(fingerprint),
                    Notification::BulkUpdated(jobs) => engine.on_bulk_updated(&jobs),
                    Notification::Relocated { job, new_path } => engine.on_relocated(job, new_path),
                    Notification::Commit(reply) => {
                        let report = engine.fire();
                        next_fire = Instant::now() + engine.scheduler().interval();
                        let _ = reply.send(report);
                    }
                    Notification::Shutdown => break,
                }
            }
            _ = sleep_until(next_fire) => {
                engine.fire();
                next_fire = Instant::now() + engine.scheduler().interval();
            }
        }
    }

    if let Err(err) = engine.correct_on_exit() {
        error!("exit correction failed: {err}");
    }
    info!("coordinator stopped");
    engine.stats()
}
