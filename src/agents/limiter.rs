//! Counting semaphore used to bound concurrent provider requests
//!
//! Slots released while callers are queued are handed directly to the oldest
//! waiter, so the free count never bounces up and down during a hand-off. A
//! non-queueing semaphore refuses immediately instead of waiting, which is
//! how "only one of these at a time, skip the rest" is expressed.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

/// FIFO counting semaphore
pub struct Semaphore {
    capacity: usize,
    queueing: bool,
    state: Mutex<SemaphoreState>,
}

struct SemaphoreState {
    available: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl Semaphore {
    /// Create a semaphore with `capacity` slots.
    ///
    /// With `queueing` set, `acquire` waits for a slot; otherwise it fails
    /// straight away when none is free.
    pub fn new(capacity: usize, queueing: bool) -> Self {
        Self {
            capacity,
            queueing,
            state: Mutex::new(SemaphoreState {
                available: capacity,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Maximum number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.lock().available
    }

    /// Take a slot. Returns `false` only for a non-queueing semaphore with no
    /// free slot.
    ///
    /// Dropping the returned future while it waits gives up the place in the
    /// queue; a slot that was already handed over is passed on.
    pub async fn acquire(&self) -> bool {
        let receiver = {
            let mut state = self.lock();
            if state.available > 0 {
                state.available -= 1;
                return true;
            }
            if !self.queueing {
                return false;
            }
            // Waiters that gave up are otherwise only cleared by `release`
            state.waiters.retain(|waiter| !waiter.is_closed());
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            receiver
        };

        let mut pending = PendingAcquire {
            semaphore: self,
            receiver: Some(receiver),
        };
        pending.wait().await
    }

    /// Acquire a slot that is released again when the permit is dropped
    pub async fn permit(&self) -> Option<Permit<'_>> {
        if self.acquire().await {
            Some(Permit { semaphore: self })
        } else {
            None
        }
    }

    /// Return a slot, waking the oldest waiter if there is one.
    ///
    /// Releases beyond capacity are ignored.
    pub fn release(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            // A closed receiver means that waiter gave up; try the next one
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.available = (state.available + 1).min(self.capacity);
    }

    fn lock(&self) -> MutexGuard<'_, SemaphoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Semaphore")
            .field("capacity", &self.capacity)
            .field("queueing", &self.queueing)
            .field("available", &state.available)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

/// A held slot; released on drop
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

struct PendingAcquire<'a> {
    semaphore: &'a Semaphore,
    receiver: Option<oneshot::Receiver<()>>,
}

impl PendingAcquire<'_> {
    async fn wait(&mut self) -> bool {
        let Some(receiver) = self.receiver.as_mut() else {
            return false;
        };
        let granted = receiver.await.is_ok();
        self.receiver = None;
        granted
    }
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if receiver.try_recv().is_ok() {
                self.semaphore.release();
            }
        }
    }
}
