use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

/// Hands out arrival-rate iterations to a bounded worker pool.
///
/// The ticker calls [`ArrivalPacer::update_due`] with the number of iterations that became due;
/// each one either goes to a free worker, grows the allocation (up to `max_vus`), or is dropped.
/// Nothing is queued beyond what the allocated workers can start immediately.
#[derive(Debug)]
pub(crate) struct ArrivalPacer {
    pending: AtomicU64,
    busy: AtomicU64,
    allocated: AtomicU64,
    max_vus: u64,

    dispatched_total: AtomicU64,
    dropped_total: AtomicU64,

    done: AtomicBool,
    notify: Notify,
}

impl ArrivalPacer {
    pub(crate) fn new(pre_allocated_vus: u64, max_vus: u64) -> Self {
        Self {
            pending: AtomicU64::new(0),
            busy: AtomicU64::new(0),
            allocated: AtomicU64::new(pre_allocated_vus.min(max_vus)),
            max_vus,
            dispatched_total: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            done: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Stops the pool. Iterations dispatched but not yet claimed are discarded.
    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
        self.pending.store(0, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn dispatched_total(&self) -> u64 {
        self.dispatched_total.load(Ordering::Relaxed)
    }

    pub(crate) fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Dispatches `due` new iterations. Returns how many were dropped because the pool is
    /// exhausted.
    pub(crate) fn update_due(&self, due: u64) -> u64 {
        if due == 0 {
            return 0;
        }

        let allocated = self.allocated.load(Ordering::Relaxed);
        let in_use = self
            .busy
            .load(Ordering::Acquire)
            .saturating_add(self.pending.load(Ordering::Acquire));
        let free = allocated.saturating_sub(in_use);

        let mut take = due.min(free);
        let mut rest = due - take;

        if rest != 0 && allocated < self.max_vus {
            let grow = rest.min(self.max_vus - allocated);
            self.allocated.fetch_add(grow, Ordering::Relaxed);
            take += grow;
            rest -= grow;
        }

        if take != 0 {
            self.pending.fetch_add(take, Ordering::AcqRel);
            self.dispatched_total.fetch_add(take, Ordering::Relaxed);
            self.notify.notify_waiters();
        }
        if rest != 0 {
            self.dropped_total.fetch_add(rest, Ordering::Relaxed);
        }
        rest
    }

    fn try_claim(&self) -> bool {
        // Count as busy first so the ticker never sees a free slot that is being taken.
        self.busy.fetch_add(1, Ordering::AcqRel);
        let mut cur = self.pending.load(Ordering::Acquire);
        while cur != 0 {
            match self.pending.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        self.busy.fetch_sub(1, Ordering::AcqRel);
        false
    }

    /// Waits for the next dispatched iteration. Returns `false` once the pacer is done.
    pub(crate) async fn claim_next(&self) -> bool {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_done() {
                return false;
            }
            if self.try_claim() {
                return true;
            }

            notified.await;
        }
    }

    /// Marks a claimed iteration as finished.
    pub(crate) fn release(&self) {
        self.busy.fetch_sub(1, Ordering::AcqRel);
    }
}
