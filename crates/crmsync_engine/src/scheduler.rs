//! Background drivers: a periodic reconciliation loop and a thread that
//! feeds local store notifications to the engine.

use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::local::{LocalEvent, LocalStore};
use crate::remote::RemoteAccess;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Runs a reconciliation pass on a fixed interval.
///
/// Passes run on tokio's blocking pool since they block on remote calls.
/// The first pass starts immediately.
pub struct SyncScheduler {
    shutdown: watch::Sender<bool>,
    cancel: Box<dyn Fn() + Send + Sync>,
    handle: JoinHandle<u64>,
}

impl SyncScheduler {
    /// Starts the loop on the current tokio runtime.
    pub fn spawn<R, L>(engine: Arc<SyncEngine<R, L>>, interval: Duration) -> Self
    where
        R: RemoteAccess + 'static,
        L: LocalStore + 'static,
    {
        let (shutdown, mut stop) = watch::channel(false);
        let worker = Arc::clone(&engine);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut completed = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let engine = Arc::clone(&worker);
                        match tokio::task::spawn_blocking(move || engine.reconcile()).await {
                            Ok(Ok(report)) => {
                                completed += 1;
                                debug!(pass = completed, duration = ?report.duration, "scheduled pass finished");
                            }
                            Ok(Err(SyncError::Cancelled)) => break,
                            // The engine has already logged the failure; the
                            // next tick retries.
                            Ok(Err(_)) => {}
                            Err(err) => {
                                error!(error = %err, "reconciliation task panicked");
                                break;
                            }
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(passes = completed, "sync scheduler stopped");
            completed
        });

        Self {
            shutdown,
            cancel: Box::new(move || engine.cancel()),
            handle,
        }
    }

    /// Starts the loop if the engine's configuration sets an interval.
    pub fn from_config<R, L>(engine: Arc<SyncEngine<R, L>>) -> Option<Self>
    where
        R: RemoteAccess + 'static,
        L: LocalStore + 'static,
    {
        let interval = engine.config().sync_interval?;
        Some(Self::spawn(engine, interval))
    }

    /// Cancels the running pass, stops the loop and waits for it.
    ///
    /// Returns the number of passes that completed. The engine stays
    /// cancelled until [`SyncEngine::reset_cancel`] is called.
    pub async fn shutdown(self) -> u64 {
        (self.cancel)();
        let _ = self.shutdown.send(true);
        match self.handle.await {
            Ok(completed) => completed,
            Err(err) => {
                error!(error = %err, "sync scheduler task failed");
                0
            }
        }
    }
}

const PUMP_POLL: Duration = Duration::from_millis(50);

/// A thread delivering local store notifications to the engine in order.
pub struct EventPump {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<u64>,
}

impl EventPump {
    /// Starts draining `events` into [`SyncEngine::handle_event`].
    pub fn spawn<R, L>(engine: Arc<SyncEngine<R, L>>, events: Receiver<LocalEvent>) -> io::Result<Self>
    where
        R: RemoteAccess + 'static,
        L: LocalStore + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("crmsync-events".into())
            .spawn(move || {
                let mut handled = 0u64;
                loop {
                    match events.recv_timeout(PUMP_POLL) {
                        Ok(event) => {
                            let outcome = engine.handle_event(&event);
                            debug!(?event, ?outcome, "handled local notification");
                            handled += 1;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if stop_flag.load(Ordering::SeqCst) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                handled
            })?;
        Ok(Self { stop, handle })
    }

    /// Handles the notifications already queued, then stops the thread.
    ///
    /// Returns the number of notifications handled.
    pub fn stop(self) -> u64 {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.join() {
            Ok(handled) => handled,
            Err(_) => {
                warn!("event pump thread panicked");
                0
            }
        }
    }
}
