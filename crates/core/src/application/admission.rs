// Admission Gate - bounded-concurrency control
//
// A counter of free slots plus two level-triggered signals: "not_full"
// (at least one slot free) and "empty" (fully idle). Callers await either
// condition without polling; there is no queue, so excess demand simply
// waits here. Signal updates happen under the counter lock, before any
// waiter resumes.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Gate bounding the number of concurrently executing request tasks.
pub struct AdmissionGate {
    max: usize,
    available: Mutex<usize>,
    not_full: watch::Sender<bool>,
    empty: watch::Sender<bool>,
}

impl AdmissionGate {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        let (not_full, _) = watch::channel(true);
        let (empty, _) = watch::channel(true);
        Self {
            max,
            available: Mutex::new(max),
            not_full,
            empty,
        }
    }

    /// Take a slot, waiting cooperatively while the gate is saturated.
    ///
    /// Consumes an `Arc` handle (clone one in) so the returned permit can
    /// give the slot back on drop, whatever the outcome of the admitted
    /// task.
    pub async fn acquire(self: Arc<Self>) -> AdmissionPermit {
        let mut not_full = self.not_full.subscribe();
        loop {
            {
                let mut available = self.available.lock().unwrap();
                if *available > 0 {
                    *available -= 1;
                    if *available == 0 {
                        self.not_full.send_replace(false);
                    }
                    self.empty.send_replace(false);
                    drop(available);
                    return AdmissionPermit { gate: self };
                }
            }
            let _ = not_full.wait_for(|free| *free).await;
        }
    }

    fn release(&self) {
        let mut available = self.available.lock().unwrap();
        *available = (*available + 1).min(self.max);
        if *available == self.max {
            self.empty.send_replace(true);
        }
        self.not_full.send_replace(true);
    }

    /// Wait until every slot has been released. Shutdown support.
    pub async fn drain(&self) {
        let mut empty = self.empty.subscribe();
        let _ = empty.wait_for(|idle| *idle).await;
    }

    pub fn in_flight(&self) -> usize {
        self.max - *self.available.lock().unwrap()
    }

    /// Whether an `acquire` call would block right now.
    pub fn is_saturated(&self) -> bool {
        !*self.not_full.borrow()
    }

    pub fn max_slots(&self) -> usize {
        self.max
    }
}

/// RAII admission slot.
pub struct AdmissionPermit {
    gate: Arc<AdmissionGate>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
