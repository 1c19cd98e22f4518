//! Periodic poll cycle of a device.
//!
//! A cycle runs the device's reconciliation and drives availability from its
//! outcome. Cycles never overlap; the `syncing` flag is the guard rather than
//! a lock because overlapping only happens at suspension points.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::availability::AvailabilityStateMachine;
use super::error::Result;

/// Poll interval used in debug mode, regardless of device settings.
pub const DEBUG_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Something the scheduler can poll.
#[async_trait]
pub trait SyncTarget: Send + Sync + 'static {
    fn scheduler(&self) -> &SyncScheduler;

    /// Configured interval between cycles.
    fn sync_interval(&self) -> Duration;

    async fn reconcile(&self) -> Result<()>;
}

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SyncScheduler {
    device_id: String,
    debug: bool,
    availability: Arc<AvailabilityStateMachine>,

    /// A cycle is in flight
    syncing: AtomicBool,

    /// Cleared for good when the device goes away
    should_sync: AtomicBool,

    timer: Mutex<Option<Timer>>,
}

/// Clears the in-flight flag however the cycle ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncScheduler {
    pub fn new(device_id: String, debug: bool, availability: Arc<AvailabilityStateMachine>) -> Self {
        Self {
            device_id,
            debug,
            availability,
            syncing: AtomicBool::new(false),
            should_sync: AtomicBool::new(true),
            timer: Mutex::new(None),
        }
    }

    pub fn interval(&self, configured: Duration) -> Duration {
        if self.debug {
            DEBUG_SYNC_INTERVAL
        } else {
            configured
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Start the poll loop. The first cycle runs immediately.
    ///
    /// Returns `false` without doing anything if the loop is already running
    /// or the scheduler has been stopped.
    pub fn start<T: SyncTarget>(&self, target: &Arc<T>) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.should_sync.load(Ordering::Acquire) {
            return false;
        }
        if timer.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        info!("[{}] Starting sync loop", self.device_id);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::downgrade(target), cancel.clone()));
        *timer = Some(Timer { cancel, handle });
        true
    }

    /// Run one cycle unless the scheduler is stopped or a cycle is already
    /// in flight. Returns whether a cycle ran.
    pub async fn sync<T: SyncTarget + ?Sized>(&self, target: &T) -> bool {
        if !self.should_sync.load(Ordering::Acquire) {
            return false;
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[{}] Sync already in progress, skipping", self.device_id);
            return false;
        }

        let result = {
            let _in_flight = InFlight(&self.syncing);
            debug!("[{}] Syncing", self.device_id);
            target.reconcile().await
        };

        match result {
            Ok(()) => {
                self.availability.available().await;
            }
            Err(e) => {
                warn!("[{}] {}", self.device_id, e);
                self.availability.unavailable(e.to_string()).await;
            }
        }
        true
    }

    /// Stop scheduling further cycles. A cycle already in flight finishes
    /// but does not reschedule.
    pub fn stop(&self) {
        self.should_sync.store(false, Ordering::Release);
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            debug!("[{}] Cancelling sync timer", self.device_id);
            timer.cancel.cancel();
        }
    }
}

async fn run_loop<T: SyncTarget>(target: Weak<T>, cancel: CancellationToken) {
    loop {
        // The device owns the scheduler; stop once it is gone
        let Some(strong) = target.upgrade() else {
            break;
        };
        let scheduler = strong.scheduler();
        scheduler.sync(&*strong).await;
        if cancel.is_cancelled() {
            break;
        }

        let interval = scheduler.interval(strong.sync_interval());
        debug!(
            "[{}] Next sync in {}s",
            scheduler.device_id,
            interval.as_secs()
        );
        drop(strong);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
