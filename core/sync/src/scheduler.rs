//! Refresh scheduling - manual and periodic modes.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use rox_common::{Error, Result};

use crate::state::RefreshResult;

/// When refresh cycles run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefreshMode {
    /// Only on request.
    #[default]
    Manual,
    /// On request and at a fixed interval, starting immediately.
    Periodic { interval: Duration },
}

impl RefreshMode {
    /// Tick period; a zero interval never ticks.
    fn interval(&self) -> Option<Duration> {
        match self {
            RefreshMode::Manual => None,
            RefreshMode::Periodic { interval } if interval.is_zero() => None,
            RefreshMode::Periodic { interval } => Some(*interval),
        }
    }
}

type Responder = oneshot::Sender<Result<RefreshResult>>;

/// Requests refreshes from a running [`RefreshSchedulerHandle`].
///
/// Dropping the scheduler stops the background loop once its current
/// refresh finishes.
pub struct RefreshScheduler {
    mode: Arc<RwLock<RefreshMode>>,
    request_tx: mpsc::Sender<Responder>,
    shutdown: CancellationToken,
}

impl RefreshScheduler {
    /// Create a scheduler and the handle that runs its loop.
    pub fn new(mode: RefreshMode) -> (Self, RefreshSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(16);
        let mode = Arc::new(RwLock::new(mode));
        let shutdown = CancellationToken::new();

        let scheduler = Self {
            mode: mode.clone(),
            request_tx,
            shutdown: shutdown.clone(),
        };
        let handle = RefreshSchedulerHandle {
            mode,
            request_rx,
            shutdown,
        };
        (scheduler, handle)
    }

    /// Request a refresh and wait for its result.
    ///
    /// # Errors
    /// - `Error::Cancelled` if the scheduler loop is not running
    /// - whatever the refresh itself returned
    pub async fn request_refresh(&self) -> Result<RefreshResult> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(response_tx)
            .await
            .map_err(|_| Error::Cancelled)?;
        response_rx.await.map_err(|_| Error::Cancelled)?
    }

    pub async fn set_mode(&self, mode: RefreshMode) {
        *self.mode.write().await = mode;
    }

    pub async fn mode(&self) -> RefreshMode {
        self.mode.read().await.clone()
    }

    /// Stop the scheduler loop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Runs the scheduler loop.
pub struct RefreshSchedulerHandle {
    mode: Arc<RwLock<RefreshMode>>,
    request_rx: mpsc::Receiver<Responder>,
    shutdown: CancellationToken,
}

impl RefreshSchedulerHandle {
    /// Run the scheduler loop until shutdown.
    ///
    /// This should be spawned in a tokio task. `refresh` is called for every
    /// request and every periodic tick, one at a time. Periodic failures are
    /// logged; a tick that finds a cycle already running is skipped.
    pub async fn run<F, Fut>(mut self, refresh: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<RefreshResult>>,
    {
        let mut current = self.mode.read().await.clone();
        let mut ticker = Self::ticker(&current);

        info!(mode = ?current, "Refresh scheduler started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }

                request = self.request_rx.recv() => {
                    let Some(responder) = request else {
                        break;
                    };
                    debug!("Processing refresh request");
                    let _ = responder.send(refresh().await);
                }

                _ = Self::wait_for_tick(&mut ticker) => {
                    match refresh().await {
                        Ok(result) => {
                            debug!(
                                added = result.added,
                                updated = result.updated,
                                deleted = result.deleted,
                                "Periodic refresh completed"
                            );
                        }
                        Err(Error::CycleInProgress(state)) => {
                            debug!(%state, "Periodic refresh skipped");
                        }
                        Err(e) => {
                            error!("Periodic refresh failed: {}", e);
                        }
                    }
                }
            }

            let mode = self.mode.read().await.clone();
            if mode != current {
                debug!(mode = ?mode, "Refresh mode changed");
                ticker = Self::ticker(&mode);
                current = mode;
            }
        }

        info!("Refresh scheduler stopped");
    }

    fn ticker(mode: &RefreshMode) -> Option<Interval> {
        mode.interval().map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        })
    }

    async fn wait_for_tick(ticker: &mut Option<Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
