//! Connection lifecycle around one replica
//!
//! One background task per book. The task is the book's only writer and
//! reacts to four inputs, polled in this priority order:
//!
//! 1. commands (`Stop`, `Resync`) from the [`SupervisorHandle`];
//! 2. the inactivity deadline;
//! 3. out-of-band subscription errors;
//! 4. diff events, applied one at a time in delivery order.
//!
//! State flow: `Syncing -> Streaming -> Reconnecting -> Syncing ...`, ending
//! in `Stopped` on request, when the handle is dropped, or when snapshot
//! retries run out. The diff subscription is opened at the start of
//! `Syncing` so events published while the snapshot is in flight queue up in
//! the channel; those already covered by the snapshot are discarded as stale.
//! A sequence gap goes back to `Syncing` on the same subscription.
//!
//! Every snapshot fetch runs inside a `select!` that also watches commands
//! and is bounded by `snapshot_timeout`, so a stalled venue never keeps the
//! task from stopping.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Duration, Instant};
use tracing::{error, info, warn};
use types::ids::MarketId;

use crate::backoff::ExponentialBackoff;
use crate::config::SupervisorConfig;
use crate::metrics::SyncMetrics;
use crate::source::{DiffSource, DiffSubscription, SnapshotSource, SourceError};
use crate::sync::{BookHandle, DiffOutcome, SyncController, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Stopped,
    /// Subscribing and loading a snapshot.
    Syncing,
    /// Applying diffs.
    Streaming,
    /// Tearing down a dead or failed subscription before resyncing.
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Resync,
    Stop,
}

/// Why a streaming session ended.
#[derive(Debug)]
enum SessionEnd {
    Stop,
    ResyncRequested,
    /// Sequence gap; resync while keeping the subscription open.
    Gap(DiffSubscription),
    Reconnect(String),
}

/// Control surface of a running supervisor.
///
/// Dropping every clone of the handle's command sender stops the task the
/// same way [`SupervisorHandle::stop`] does, minus the wait.
pub struct SupervisorHandle {
    book: BookHandle,
    metrics: Arc<SyncMetrics>,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisorHandle {
    /// Read access to the replica.
    pub fn book(&self) -> &BookHandle {
        &self.book
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Ask for a full resync. Returns `false` if the supervisor has stopped
    /// or its queue is full.
    pub fn request_resync(&self) -> bool {
        self.commands.try_send(Command::Resync).is_ok()
    }

    /// Stop the supervisor and wait for its task to finish. Safe to call
    /// repeatedly.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        // Fails only if the task already exited
        let _ = self.commands.send(Command::Stop).await;

        if let Err(e) = task.await {
            error!(symbol = %self.book.symbol(), error = %e, "supervisor task panicked");
        }
    }
}

/// Owns the sync loop for one symbol.
pub struct ConnectionSupervisor {
    sync: SyncController,
    diffs: Arc<dyn DiffSource>,
    config: SupervisorConfig,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionSupervisor {
    /// Start supervising `symbol` on the current tokio runtime.
    pub fn spawn(
        symbol: MarketId,
        snapshots: Arc<dyn SnapshotSource>,
        diffs: Arc<dyn DiffSource>,
        config: SupervisorConfig,
    ) -> SupervisorHandle {
        let book = BookHandle::new(symbol);
        let metrics = Arc::new(SyncMetrics::new());
        let sync = SyncController::new(book.clone(), snapshots, metrics.clone());

        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Syncing);

        let supervisor = Self {
            sync,
            diffs,
            config,
            commands: command_rx,
            state: state_tx,
        };
        let task = tokio::spawn(supervisor.run());

        SupervisorHandle {
            book,
            metrics,
            commands: command_tx,
            state: state_rx,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(mut self) {
        let symbol = self.sync.symbol().clone();
        let mut backoff = ExponentialBackoff::from_policy(&self.config.retry);
        let mut failures: u32 = 0;
        let mut resume: Option<DiffSubscription> = None;

        info!(symbol = %symbol, "supervisor started");

        loop {
            self.set_state(ConnectionState::Syncing);

            let subscription = match self.establish(resume.take()).await {
                Ok(Some(subscription)) => subscription,
                Ok(None) => break,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if self.config.retry.exhausted(failures) {
                        error!(symbol = %symbol, attempts = failures, error = %e, "sync attempts exhausted, stopping");
                        break;
                    }

                    let delay = backoff.next_delay();
                    warn!(
                        symbol = %symbol,
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "sync failed, retrying"
                    );
                    if !self.wait(delay).await {
                        break;
                    }
                    continue;
                }
            };

            failures = 0;
            backoff.reset();
            self.set_state(ConnectionState::Streaming);

            match self.stream(subscription).await {
                SessionEnd::Stop => break,
                SessionEnd::Gap(subscription) => resume = Some(subscription),
                SessionEnd::ResyncRequested => {
                    info!(symbol = %symbol, "resync requested");
                    self.sync.invalidate().await;
                    self.diffs.unsubscribe().await;
                }
                SessionEnd::Reconnect(reason) => {
                    self.sync.invalidate().await;
                    self.sync.metrics().record_reconnect();
                    self.set_state(ConnectionState::Reconnecting);
                    self.diffs.unsubscribe().await;

                    let delay = backoff.next_delay();
                    warn!(
                        symbol = %symbol,
                        reason = %reason,
                        delay_ms = delay.as_millis() as u64,
                        "connection lost, reconnecting"
                    );
                    if !self.wait(delay).await {
                        break;
                    }
                }
            }
        }

        self.diffs.unsubscribe().await;
        self.sync.release().await;
        self.set_state(ConnectionState::Stopped);
        info!(symbol = %symbol, "supervisor stopped");
    }

    /// Subscribe (unless `resume` carries a live subscription), then load a
    /// snapshot. `Ok(None)` means stop was requested meanwhile.
    async fn establish(
        &mut self,
        resume: Option<DiffSubscription>,
    ) -> Result<Option<DiffSubscription>, SyncError> {
        let attempt = Self::subscribe_and_init(
            &self.sync,
            self.diffs.as_ref(),
            resume,
            self.config.snapshot_timeout,
        );
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    // Already syncing
                    Some(Command::Resync) => continue,
                    Some(Command::Stop) | None => return Ok(None),
                },

                result = &mut attempt => return result.map(Some),
            }
        }
    }

    async fn subscribe_and_init(
        sync: &SyncController,
        diffs: &dyn DiffSource,
        resume: Option<DiffSubscription>,
        limit: Duration,
    ) -> Result<DiffSubscription, SyncError> {
        let subscription = match resume {
            Some(subscription) => subscription,
            None => diffs.subscribe(sync.symbol()).await?,
        };

        let loaded = match timeout(limit, sync.init()).await {
            Ok(result) => result,
            Err(_) => {
                sync.metrics().record_snapshot_failure();
                warn!(
                    symbol = %sync.symbol(),
                    timeout_ms = limit.as_millis() as u64,
                    "snapshot fetch timed out"
                );
                Err(SyncError::SnapshotTimeout(limit))
            }
        };

        match loaded {
            Ok(_) => Ok(subscription),
            Err(e) => {
                drop(subscription);
                diffs.unsubscribe().await;
                Err(e)
            }
        }
    }

    async fn stream(&mut self, mut subscription: DiffSubscription) -> SessionEnd {
        let idle = self.config.inactivity_timeout;
        let mut deadline = Instant::now() + idle;
        let mut errors_open = true;

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Resync) => return SessionEnd::ResyncRequested,
                    Some(Command::Stop) | None => return SessionEnd::Stop,
                },

                _ = sleep_until(deadline) => {
                    self.sync.metrics().record_inactivity_timeout();
                    warn!(
                        symbol = %self.sync.symbol(),
                        timeout_ms = idle.as_millis() as u64,
                        "no diff events within inactivity timeout"
                    );
                    return SessionEnd::Reconnect("inactivity timeout".to_string());
                }

                error = subscription.errors.recv(), if errors_open => match error {
                    Some(e) => {
                        warn!(symbol = %self.sync.symbol(), error = %e, "subscription error");
                        return SessionEnd::Reconnect(e.to_string());
                    }
                    None => errors_open = false,
                },

                event = subscription.events.recv() => {
                    let Some(event) = event else {
                        return SessionEnd::Reconnect(SourceError::Closed.to_string());
                    };
                    deadline = Instant::now() + idle;

                    if let DiffOutcome::Gap { .. } = self.sync.apply_without_resync(&event).await {
                        return SessionEnd::Gap(subscription);
                    }
                }
            }
        }
    }

    /// Sleep for `delay`, returning `false` if stop was requested meanwhile.
    /// A resync request cuts the wait short.
    async fn wait(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;

            command = self.commands.recv() => !matches!(command, Some(Command::Stop) | None),
            _ = sleep(delay) => true,
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(symbol = %self.sync.symbol(), from = ?previous, to = ?next, "state transition");
        }
    }
}
