//! Per-capability debouncing of write requests.
//!
//! Requests for the same capability that arrive within the window of each
//! other collapse into one pending entry holding the most recent value. The
//! window restarts on every request; once it elapses without a new request
//! the entry settles and every coalesced caller is answered with the result
//! of the single execution.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::capability::Capability;
use super::capability::CapabilityValue;

/// Window within which repeated writes to one capability are coalesced.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

struct Pending<R> {
    value: CapabilityValue,
    deadline: Instant,
    waiters: Vec<oneshot::Sender<R>>,
}

/// A settled batch: the value to act upon and everyone waiting for it.
pub struct Settled<R> {
    pub value: CapabilityValue,
    waiters: Vec<oneshot::Sender<R>>,
}

impl<R: Clone> Settled<R> {
    pub fn coalesced(&self) -> usize {
        self.waiters.len()
    }

    /// Answer every coalesced caller.
    pub fn resolve(self, result: R) {
        for waiter in self.waiters {
            // The caller may have given up waiting
            let _ = waiter.send(result.clone());
        }
    }
}

pub struct Debouncer<R> {
    window: Duration,
    slots: Mutex<HashMap<Capability, Pending<R>>>,
}

impl<R: Clone> Debouncer<R> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a value for `capability`.
    ///
    /// Returns the receiver for the eventual result, and `true` if this call
    /// opened a new window. The caller that opened the window must drive it
    /// with [`settle`](Self::settle).
    pub fn submit(
        &self,
        capability: Capability,
        value: CapabilityValue,
    ) -> (oneshot::Receiver<R>, bool) {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + self.window;
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

        match slots.get_mut(&capability) {
            Some(pending) => {
                pending.value = value;
                pending.deadline = deadline;
                pending.waiters.push(tx);
                (rx, false)
            }
            None => {
                slots.insert(
                    capability,
                    Pending {
                        value,
                        deadline,
                        waiters: vec![tx],
                    },
                );
                (rx, true)
            }
        }
    }

    /// Wait until the window for `capability` elapses without new requests.
    pub async fn settle(&self, capability: Capability) -> Option<Settled<R>> {
        loop {
            let deadline = self
                .slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&capability)?
                .deadline;

            tokio::time::sleep_until(deadline).await;

            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let elapsed = slots
                .get(&capability)
                .map(|p| p.deadline <= Instant::now())?;
            if elapsed {
                let pending = slots.remove(&capability)?;
                return Some(Settled {
                    value: pending.value,
                    waiters: pending.waiters,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_submit_opens_window() {
        let debouncer: Debouncer<u32> = Debouncer::new(DEBOUNCE_WINDOW);

        let (_, first) = debouncer.submit(Capability::HolidayMode, true.into());
        let (_, second) = debouncer.submit(Capability::HolidayMode, false.into());
        let (_, other) = debouncer.submit(Capability::ShowerTimer, true.into());

        assert!(first);
        assert!(!second);
        assert!(other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_with_last_value() {
        let debouncer: Debouncer<u32> = Debouncer::new(DEBOUNCE_WINDOW);

        let (rx1, _) = debouncer.submit(Capability::TargetTemperature, 19.0.into());
        tokio::time::advance(Duration::from_millis(200)).await;
        let (rx2, _) = debouncer.submit(Capability::TargetTemperature, 20.0.into());
        tokio::time::advance(Duration::from_millis(200)).await;
        let (rx3, _) = debouncer.submit(Capability::TargetTemperature, 21.0.into());

        let start = Instant::now();
        let settled = debouncer.settle(Capability::TargetTemperature).await.unwrap();
        assert!(start.elapsed() >= DEBOUNCE_WINDOW);
        assert_eq!(settled.value, CapabilityValue::Number(21.0));
        assert_eq!(settled.coalesced(), 3);

        settled.resolve(7);
        assert_eq!(rx1.await.unwrap(), 7);
        assert_eq!(rx2.await.unwrap(), 7);
        assert_eq!(rx3.await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reopens_after_settling() {
        let debouncer: Debouncer<u32> = Debouncer::new(DEBOUNCE_WINDOW);

        debouncer.submit(Capability::ShowerTime, 10.0.into());
        debouncer.settle(Capability::ShowerTime).await.unwrap();

        let (_, opened) = debouncer.submit(Capability::ShowerTime, 20.0.into());
        assert!(opened);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_without_pending_returns_none() {
        let debouncer: Debouncer<u32> = Debouncer::new(DEBOUNCE_WINDOW);
        assert!(debouncer.settle(Capability::FireplaceMode).await.is_none());
    }
}
