//! Reentrant transaction dispatcher.

use crate::config::EnvironmentConfig;
use crate::error::{EngineError, EngineResult};
use crate::txn::descriptor::TransactionDescriptor;
use crate::types::ThreadToken;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::debug;

/// Admits transactions onto the engine under a fixed permit budget.
///
/// The dispatcher arbitrates between shared transactions (one permit
/// each) and exclusive transactions (every permit not already held by
/// the requesting thread). Acquisition is reentrant: a thread that
/// already holds permits may open further transactions until it has
/// exhausted the budget, and an exclusive acquire only takes the
/// permits the thread does not yet own, so the holder observes
/// exclusivity across all of its own open transactions.
///
/// ## Fairness
///
/// Every waiter draws a monotonically increasing ticket and joins the
/// regular wait queue at the tail. Releases broadcast on a condition
/// variable; a woken waiter proceeds only when its ticket heads its
/// queue and the budget satisfies its request, which yields FIFO
/// admission within each queue.
///
/// An exclusive waiter that reaches the head of the regular queue with
/// an unmet budget moves itself to a second, exclusive-only queue and
/// broadcasts, letting shared traffic drain past it while keeping its
/// original ticket. The waiter is admitted as soon as the budget frees
/// up and its ticket heads the exclusive queue.
pub struct TransactionDispatcher {
    capacity: usize,
    state: Mutex<DispatchState>,
    wakeup: Condvar,
}

struct DispatchState {
    /// Permits currently charged. Invariant: `acquired <= capacity`.
    acquired: usize,
    /// Next ticket to hand out.
    next_ticket: u64,
    /// Permits held per thread; entry absent means zero.
    thread_permits: HashMap<ThreadToken, usize>,
    /// Tickets of waiters admitted in FIFO order.
    regular_queue: BTreeSet<u64>,
    /// Tickets of exclusive waiters that gave up their regular slot.
    exclusive_queue: BTreeSet<u64>,
}

impl DispatchState {
    fn draw_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn held_by(&self, thread: ThreadToken) -> usize {
        self.thread_permits.get(&thread).copied().unwrap_or(0)
    }

    fn queue(&mut self, exclusive: bool) -> &mut BTreeSet<u64> {
        if exclusive {
            &mut self.exclusive_queue
        } else {
            &mut self.regular_queue
        }
    }

    fn is_head(&self, exclusive: bool, ticket: u64) -> bool {
        let queue = if exclusive {
            &self.exclusive_queue
        } else {
            &self.regular_queue
        };
        queue.first() == Some(&ticket)
    }
}

impl TransactionDispatcher {
    /// Creates a dispatcher with the given permit budget.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "max_simultaneous_transactions < 1");
        Self {
            capacity,
            state: Mutex::new(DispatchState {
                acquired: 0,
                next_ticket: 0,
                thread_permits: HashMap::new(),
                regular_queue: BTreeSet::new(),
                exclusive_queue: BTreeSet::new(),
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Returns the permit budget this dispatcher was built with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of permits not currently charged.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.capacity - self.state.lock().acquired
    }

    /// Returns the number of waiters in the regular queue.
    #[must_use]
    pub fn acquirer_count(&self) -> usize {
        self.state.lock().regular_queue.len()
    }

    /// Returns the number of waiters in the exclusive queue.
    #[must_use]
    pub fn exclusive_acquirer_count(&self) -> usize {
        self.state.lock().exclusive_queue.len()
    }

    /// Acquires a single shared permit for `thread`, blocking until the
    /// budget admits it in FIFO order.
    ///
    /// Acquisition is reentrant with respect to permits the thread
    /// already holds.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ThreadPermitsExhausted`] if the thread
    /// already holds every permit.
    pub fn acquire_shared(&self, thread: ThreadToken) -> EngineResult<()> {
        let mut state = self.state.lock();
        let held = self.permits_to_acquire(&state, thread)?;
        if state.acquired == self.capacity || !state.regular_queue.is_empty() {
            let ticket = state.draw_ticket();
            state.regular_queue.insert(ticket);
            loop {
                self.wakeup.wait(&mut state);
                if state.acquired < self.capacity && state.is_head(false, ticket) {
                    break;
                }
            }
            state.regular_queue.remove(&ticket);
        }
        state.acquired += 1;
        state.thread_permits.insert(thread, held + 1);
        Ok(())
    }

    /// Acquires every permit not already held by `thread`, blocking
    /// until the budget admits it.
    ///
    /// Returns the number of permits charged.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ThreadPermitsExhausted`] if the thread
    /// already holds every permit.
    pub fn acquire_exclusive(&self, thread: ThreadToken) -> EngineResult<usize> {
        let mut state = self.state.lock();
        let held = self.permits_to_acquire(&state, thread)?;
        let wanted = self.capacity - held;
        if state.acquired > self.capacity - wanted || !state.regular_queue.is_empty() {
            let ticket = state.draw_ticket();
            let mut promoted = false;
            state.regular_queue.insert(ticket);
            loop {
                self.wakeup.wait(&mut state);
                if !state.is_head(promoted, ticket) {
                    continue;
                }
                if state.acquired <= self.capacity - wanted {
                    break;
                }
                // The budget does not admit this waiter in its fair
                // turn: move it to the exclusive queue so shared
                // traffic can drain past it.
                if !promoted {
                    self.wakeup.notify_all();
                    state.regular_queue.remove(&ticket);
                    promoted = true;
                    state.exclusive_queue.insert(ticket);
                    debug!(ticket, "promoted exclusive waiter");
                }
            }
            state.queue(promoted).remove(&ticket);
        }
        state.acquired += wanted;
        state.thread_permits.insert(thread, held + wanted);
        Ok(wanted)
    }

    /// Attempts to acquire every permit not already held by `thread`,
    /// waiting at most `timeout`.
    ///
    /// Returns the number of permits charged, or `0` when the wait
    /// timed out or another exclusive waiter is already queued.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ThreadPermitsExhausted`] if the thread
    /// already holds every permit.
    pub fn try_acquire_exclusive(
        &self,
        thread: ThreadToken,
        timeout: Duration,
    ) -> EngineResult<usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let held = self.permits_to_acquire(&state, thread)?;
        let wanted = self.capacity - held;
        if state.acquired > self.capacity - wanted || !state.regular_queue.is_empty() {
            let ticket = state.draw_ticket();
            let mut promoted = false;
            state.regular_queue.insert(ticket);
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let _ = self.wakeup.wait_for(&mut state, remaining);
                if state.is_head(promoted, ticket) {
                    if state.acquired <= self.capacity - wanted {
                        break;
                    }
                    // Only shuffle into the exclusive queue when it is
                    // empty; contention with another exclusive waiter
                    // means this acquisition cannot succeed.
                    if !promoted {
                        self.wakeup.notify_all();
                        state.regular_queue.remove(&ticket);
                        if !state.exclusive_queue.is_empty() {
                            return Ok(0);
                        }
                        promoted = true;
                        state.exclusive_queue.insert(ticket);
                        debug!(ticket, "promoted exclusive waiter");
                    }
                }
                if Instant::now() >= deadline {
                    self.wakeup.notify_all();
                    state.queue(promoted).remove(&ticket);
                    debug!(ticket, ?timeout, "exclusive acquisition timed out");
                    return Ok(0);
                }
            }
            state.queue(promoted).remove(&ticket);
        }
        state.acquired += wanted;
        state.thread_permits.insert(thread, held + wanted);
        Ok(wanted)
    }

    /// Returns `permits` acquired by `thread`, waking all waiters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PermitOverRelease`] if `permits` exceeds
    /// what the thread holds.
    pub fn release(&self, thread: ThreadToken, permits: usize) -> EngineResult<()> {
        let mut state = self.state.lock();
        let held = state.held_by(thread);
        if permits > held {
            return Err(EngineError::PermitOverRelease {
                held,
                released: permits,
            });
        }
        state.acquired -= permits;
        let remaining = held - permits;
        if remaining == 0 {
            state.thread_permits.remove(&thread);
        } else {
            state.thread_permits.insert(thread, remaining);
        }
        self.wakeup.notify_all();
        Ok(())
    }

    /// Admits a transaction according to its descriptor and the
    /// environment configuration, recording the charged permits on the
    /// descriptor.
    ///
    /// An exclusive transaction that was created exclusive (and is not
    /// a GC transaction) waits for the full budget. Any other exclusive
    /// transaction tries a bounded exclusive acquire and downgrades to
    /// shared when it fails.
    ///
    /// # Errors
    ///
    /// Propagates permit accounting errors from the underlying
    /// acquires.
    pub fn acquire_transaction<T>(&self, txn: &mut T, config: &EnvironmentConfig) -> EngineResult<()>
    where
        T: TransactionDescriptor + ?Sized,
    {
        let thread = txn.creating_thread();
        if txn.is_exclusive() {
            let gc = txn.is_gc_transaction();
            if txn.was_created_exclusive() && !gc {
                let permits = self.acquire_exclusive(thread)?;
                txn.set_acquired_permits(permits);
                return Ok(());
            }
            let timeout = if gc {
                config.gc_transaction_acquire_timeout
            } else {
                config.txn_replay_timeout
            };
            let permits = self.try_acquire_exclusive(thread, timeout)?;
            if permits > 0 {
                txn.set_acquired_permits(permits);
                return Ok(());
            }
            txn.set_exclusive(false);
        }
        self.acquire_shared(thread)?;
        txn.set_acquired_permits(1);
        Ok(())
    }

    /// Releases the permits recorded on a transaction descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PermitOverRelease`] if the descriptor
    /// records more permits than its thread holds.
    pub fn release_transaction<T>(&self, txn: &T) -> EngineResult<()>
    where
        T: TransactionDescriptor + ?Sized,
    {
        self.release(txn.creating_thread(), txn.acquired_permits())
    }

    fn permits_to_acquire(&self, state: &DispatchState, thread: ThreadToken) -> EngineResult<usize> {
        let held = state.held_by(thread);
        if held == self.capacity {
            return Err(EngineError::ThreadPermitsExhausted);
        }
        Ok(held)
    }
}

impl std::fmt::Debug for TransactionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransactionDispatcher")
            .field("capacity", &self.capacity)
            .field("acquired", &state.acquired)
            .field("regular_waiters", &state.regular_queue.len())
            .field("exclusive_waiters", &state.exclusive_queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn token(id: u64) -> ThreadToken {
        ThreadToken::new(id)
    }

    #[test]
    #[should_panic(expected = "max_simultaneous_transactions < 1")]
    fn zero_capacity_is_rejected() {
        let _ = TransactionDispatcher::new(0);
    }

    #[test]
    fn shared_acquire_and_release() {
        let d = TransactionDispatcher::new(4);
        assert_eq!(d.available_permits(), 4);

        d.acquire_shared(token(1)).unwrap();
        d.acquire_shared(token(2)).unwrap();
        assert_eq!(d.available_permits(), 2);

        d.release(token(1), 1).unwrap();
        d.release(token(2), 1).unwrap();
        assert_eq!(d.available_permits(), 4);
    }

    #[test]
    fn shared_acquire_is_reentrant() {
        let d = TransactionDispatcher::new(3);
        let t = token(1);
        d.acquire_shared(t).unwrap();
        d.acquire_shared(t).unwrap();
        d.acquire_shared(t).unwrap();
        assert_eq!(d.available_permits(), 0);

        // The thread has exhausted the budget for itself.
        assert!(matches!(
            d.acquire_shared(t),
            Err(EngineError::ThreadPermitsExhausted)
        ));

        d.release(t, 3).unwrap();
        assert_eq!(d.available_permits(), 3);
    }

    #[test]
    fn exclusive_takes_remaining_budget_reentrantly() {
        let d = TransactionDispatcher::new(2);
        let t = token(1);
        d.acquire_shared(t).unwrap();
        let granted = d.acquire_exclusive(t).unwrap();
        assert_eq!(granted, 1);
        assert_eq!(d.available_permits(), 0);

        d.release(t, 2).unwrap();
        assert_eq!(d.available_permits(), 2);
    }

    #[test]
    fn exclusive_on_idle_dispatcher_takes_everything() {
        let d = TransactionDispatcher::new(8);
        let granted = d.acquire_exclusive(token(1)).unwrap();
        assert_eq!(granted, 8);
        d.release(token(1), 8).unwrap();
    }

    #[test]
    fn over_release_is_an_error() {
        let d = TransactionDispatcher::new(2);
        d.acquire_shared(token(1)).unwrap();
        let err = d.release(token(1), 2).unwrap_err();
        assert!(matches!(
            err,
            EngineError::PermitOverRelease {
                held: 1,
                released: 2
            }
        ));
    }

    #[test]
    fn release_for_unknown_thread_is_an_error() {
        let d = TransactionDispatcher::new(2);
        assert!(d.release(token(42), 1).is_err());
    }

    #[test]
    fn try_exclusive_times_out_under_shared_load() {
        let d = TransactionDispatcher::new(2);
        d.acquire_shared(token(1)).unwrap();
        d.acquire_shared(token(2)).unwrap();

        let granted = d
            .try_acquire_exclusive(token(3), Duration::from_millis(20))
            .unwrap();
        assert_eq!(granted, 0);
        // The timed-out waiter must have removed its ticket.
        assert_eq!(d.acquirer_count(), 0);
        assert_eq!(d.exclusive_acquirer_count(), 0);
    }

    #[test]
    fn try_exclusive_succeeds_on_idle_dispatcher() {
        let d = TransactionDispatcher::new(4);
        let granted = d
            .try_acquire_exclusive(token(1), Duration::from_millis(10))
            .unwrap();
        assert_eq!(granted, 4);
        d.release(token(1), 4).unwrap();
    }

    #[test]
    fn exclusive_waits_for_shared_holders() {
        let d = Arc::new(TransactionDispatcher::new(4));
        for id in 1..=3 {
            d.acquire_shared(token(id)).unwrap();
        }

        let waiter = {
            let d = Arc::clone(&d);
            thread::spawn(move || d.acquire_exclusive(token(10)).unwrap())
        };

        // Give the waiter time to enqueue, then drain the shared
        // holders one by one.
        while d.acquirer_count() + d.exclusive_acquirer_count() == 0 {
            thread::yield_now();
        }
        for id in 1..=3 {
            d.release(token(id), 1).unwrap();
        }

        let granted = waiter.join().unwrap();
        assert_eq!(granted, 4);
        assert_eq!(d.available_permits(), 0);
        d.release(token(10), 4).unwrap();
    }

    #[test]
    fn shared_waiters_are_admitted_in_fifo_order() {
        let d = Arc::new(TransactionDispatcher::new(1));
        d.acquire_shared(token(100)).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for id in 0..4u64 {
            let enqueued = d.acquirer_count();
            let d_clone = Arc::clone(&d);
            let order = Arc::clone(&order);
            waiters.push(thread::spawn(move || {
                d_clone.acquire_shared(token(id)).unwrap();
                order.lock().push(id);
                d_clone.release(token(id), 1).unwrap();
            }));
            // Wait until this waiter has joined the queue so the
            // enqueue order is deterministic.
            while d.acquirer_count() <= enqueued {
                thread::yield_now();
            }
        }

        d.release(token(100), 1).unwrap();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn promoted_exclusive_lets_shared_drain_then_runs() {
        // One shared holder, then an exclusive waiter, then another
        // shared waiter. The exclusive promotes out of the regular
        // queue, the late shared waiter runs against it, and the
        // exclusive is admitted once everything drains.
        let d = Arc::new(TransactionDispatcher::new(2));
        d.acquire_shared(token(1)).unwrap();
        d.acquire_shared(token(2)).unwrap();

        let exclusive = {
            let d = Arc::clone(&d);
            thread::spawn(move || d.acquire_exclusive(token(10)).unwrap())
        };
        while d.acquirer_count() == 0 {
            thread::yield_now();
        }

        // Freeing one permit wakes the exclusive waiter, which cannot
        // run yet and promotes itself.
        d.release(token(1), 1).unwrap();
        while d.exclusive_acquirer_count() == 0 {
            thread::yield_now();
        }
        assert_eq!(d.acquirer_count(), 0);

        // A late shared waiter is admitted against the promoted
        // exclusive because a permit is free and the regular queue is
        // empty.
        d.acquire_shared(token(3)).unwrap();

        d.release(token(2), 1).unwrap();
        d.release(token(3), 1).unwrap();

        let granted = exclusive.join().unwrap();
        assert_eq!(granted, 2);
        d.release(token(10), 2).unwrap();
        assert_eq!(d.available_permits(), 2);
    }

    #[test]
    fn try_exclusive_refuses_contended_exclusive_queue() {
        let d = Arc::new(TransactionDispatcher::new(2));
        d.acquire_shared(token(1)).unwrap();
        d.acquire_shared(token(2)).unwrap();

        // Park a blocking exclusive waiter and let it promote.
        let exclusive = {
            let d = Arc::clone(&d);
            thread::spawn(move || d.acquire_exclusive(token(10)).unwrap())
        };
        while d.acquirer_count() == 0 {
            thread::yield_now();
        }
        d.release(token(1), 1).unwrap();
        while d.exclusive_acquirer_count() == 0 {
            thread::yield_now();
        }

        // A bounded exclusive acquire must refuse to queue behind it.
        let granted = d
            .try_acquire_exclusive(token(20), Duration::from_millis(10))
            .unwrap();
        assert_eq!(granted, 0);

        d.release(token(2), 1).unwrap();
        assert_eq!(exclusive.join().unwrap(), 2);
        d.release(token(10), 2).unwrap();
    }

    #[test]
    fn permit_accounting_stays_within_bounds_under_contention() {
        let d = Arc::new(TransactionDispatcher::new(3));
        let mut workers = Vec::new();
        for id in 0..6u64 {
            let d = Arc::clone(&d);
            workers.push(thread::spawn(move || {
                for round in 0..50 {
                    if (id + round) % 5 == 0 {
                        let granted = d.acquire_exclusive(token(id)).unwrap();
                        assert!(granted <= 3);
                        assert_eq!(d.available_permits(), 0);
                        d.release(token(id), granted).unwrap();
                    } else {
                        d.acquire_shared(token(id)).unwrap();
                        // Never more than capacity charged.
                        assert!(d.available_permits() <= 2);
                        d.release(token(id), 1).unwrap();
                    }
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(d.available_permits(), 3);
        assert_eq!(d.acquirer_count(), 0);
        assert_eq!(d.exclusive_acquirer_count(), 0);
    }
}
