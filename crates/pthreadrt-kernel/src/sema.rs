//! Weighted counting semaphores.
//!
//! Units are handed off at signal time: whenever the count changes, queued
//! waiters are granted in queue order for as long as the head's request fits.
//! A head that asks for more than is available blocks everyone behind it, so
//! a large request (a writer taking every unit) is never overtaken by later
//! small ones.
//!
//! [`Semaphore::wait_notify`] runs a caller-supplied callback after the
//! caller is queued and before it sleeps. Anything released from inside the
//! callback happens strictly after the caller can be granted units.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{KernelError, KernelResult};
use crate::thread::{self, Interrupt};

/// Order in which blocked waiters are queued.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOrder {
    /// Arrival order.
    #[default]
    Fifo,
    /// Most urgent priority first, arrival order within a level.
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Granted,
    Canceled,
    Deleted,
}

impl Resolution {
    fn into_result(self) -> KernelResult<()> {
        match self {
            Self::Granted => Ok(()),
            Self::Canceled => Err(KernelError::WaitCancel),
            Self::Deleted => Err(KernelError::WaitDelete),
        }
    }
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    need: i64,
    priority: u8,
}

#[derive(Debug, Default)]
struct SemaState {
    count: i64,
    queue: VecDeque<Waiter>,
    resolved: HashMap<u64, Resolution>,
    next_ticket: u64,
    deleted: bool,
}

impl SemaState {
    fn enqueue(&mut self, need: i64, priority: u8, order: QueueOrder) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let waiter = Waiter {
            ticket,
            need,
            priority,
        };
        match order {
            QueueOrder::Fifo => self.queue.push_back(waiter),
            QueueOrder::Priority => {
                let at = self
                    .queue
                    .iter()
                    .position(|w| w.priority > priority)
                    .unwrap_or(self.queue.len());
                self.queue.insert(at, waiter);
            }
        }
        ticket
    }

    /// Grants units to the head of the queue while they fit.
    fn dispatch(&mut self) -> bool {
        let mut granted = false;
        while let Some(head) = self.queue.front() {
            if head.need > self.count {
                break;
            }
            self.count -= head.need;
            let ticket = head.ticket;
            self.queue.pop_front();
            self.resolved.insert(ticket, Resolution::Granted);
            granted = true;
        }
        granted
    }

    fn withdraw(&mut self, ticket: u64) {
        self.queue.retain(|w| w.ticket != ticket);
    }

    fn resolve_all(&mut self, resolution: Resolution) -> usize {
        let n = self.queue.len();
        for waiter in self.queue.drain(..) {
            self.resolved.insert(waiter.ticket, resolution);
        }
        n
    }
}

struct SemaShared {
    order: QueueOrder,
    init: i64,
    max: i64,
    state: Mutex<SemaState>,
    cv: Condvar,
}

impl Interrupt for SemaShared {
    fn interrupt(&self) {
        let _state = self.state.lock();
        self.cv.notify_all();
    }
}

/// Handle to a kernel semaphore. Clones refer to the same semaphore.
#[derive(Clone)]
pub struct Semaphore {
    shared: Arc<SemaShared>,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Semaphore")
            .field("count", &state.count)
            .field("max", &self.shared.max)
            .field("waiting", &state.queue.len())
            .finish()
    }
}

impl Semaphore {
    pub fn new(init: i64, max: i64, order: QueueOrder) -> KernelResult<Self> {
        if max <= 0 || init < 0 || init > max {
            return Err(KernelError::IllegalCount);
        }
        Ok(Self {
            shared: Arc::new(SemaShared {
                order,
                init,
                max,
                state: Mutex::new(SemaState {
                    count: init,
                    ..SemaState::default()
                }),
                cv: Condvar::new(),
            }),
        })
    }

    #[must_use]
    pub fn max(&self) -> i64 {
        self.shared.max
    }

    /// Units currently available.
    #[must_use]
    pub fn count(&self) -> i64 {
        self.shared.state.lock().count
    }

    /// Threads currently queued.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn wait(&self, need: i64, timeout: Option<Duration>) -> KernelResult<()> {
        self.wait_notify(need, timeout, || {})
    }

    /// Waits for `need` units. `on_queued` runs exactly once, after the
    /// caller has entered the queue, unless the call fails before queuing
    /// (bad count, deleted semaphore, deleted caller).
    ///
    /// A `timeout` of zero still queues and runs the callback, then gives up
    /// if the units were not granted at once.
    pub fn wait_notify<F: FnOnce()>(
        &self,
        need: i64,
        timeout: Option<Duration>,
        on_queued: F,
    ) -> KernelResult<()> {
        if need <= 0 || need > self.shared.max {
            return Err(KernelError::IllegalCount);
        }
        let me = thread::current();
        if me.is_killed() {
            return Err(KernelError::ThreadDeleted);
        }
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        let ticket = {
            let mut state = self.shared.state.lock();
            if state.deleted {
                return Err(KernelError::UnknownObject);
            }
            let ticket = state.enqueue(need, me.priority(), self.shared.order);
            if state.dispatch() {
                self.shared.cv.notify_all();
            }
            ticket
        };

        on_queued();

        let _blocked = me.block_on(Arc::clone(&self.shared) as Arc<dyn Interrupt>);
        let mut state = self.shared.state.lock();
        loop {
            if let Some(resolution) = state.resolved.remove(&ticket) {
                return resolution.into_result();
            }
            if me.is_killed() {
                state.withdraw(ticket);
                if state.dispatch() {
                    self.shared.cv.notify_all();
                }
                return Err(KernelError::ThreadDeleted);
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    state.withdraw(ticket);
                    if state.dispatch() {
                        self.shared.cv.notify_all();
                    }
                    return Err(KernelError::WaitTimeout);
                }
                Some(deadline) => {
                    let _ = self.shared.cv.wait_until(&mut state, deadline);
                }
                None => self.shared.cv.wait(&mut state),
            }
        }
    }

    /// Takes `need` units without blocking. Fails while anyone is queued.
    pub fn poll(&self, need: i64) -> KernelResult<()> {
        if need <= 0 || need > self.shared.max {
            return Err(KernelError::IllegalCount);
        }
        let mut state = self.shared.state.lock();
        if state.deleted {
            return Err(KernelError::UnknownObject);
        }
        if state.queue.is_empty() && state.count >= need {
            state.count -= need;
            Ok(())
        } else {
            Err(KernelError::SemaZero)
        }
    }

    /// Returns `n` units.
    pub fn signal(&self, n: i64) -> KernelResult<()> {
        if n <= 0 {
            return Err(KernelError::IllegalCount);
        }
        let mut state = self.shared.state.lock();
        if state.deleted {
            return Err(KernelError::UnknownObject);
        }
        if state.count + n > self.shared.max {
            return Err(KernelError::IllegalCount);
        }
        state.count += n;
        if state.dispatch() {
            self.shared.cv.notify_all();
        }
        Ok(())
    }

    /// Releases every waiter with [`KernelError::WaitCancel`] and resets the
    /// count to `count`, or to the initial count when `None`. Returns how
    /// many waiters were released.
    pub fn cancel(&self, count: Option<i64>) -> KernelResult<usize> {
        let count = count.unwrap_or(self.shared.init);
        if count < 0 || count > self.shared.max {
            return Err(KernelError::IllegalCount);
        }
        let mut state = self.shared.state.lock();
        if state.deleted {
            return Err(KernelError::UnknownObject);
        }
        let released = state.resolve_all(Resolution::Canceled);
        state.count = count;
        self.shared.cv.notify_all();
        Ok(released)
    }

    /// Deletes the semaphore; waiters see [`KernelError::WaitDelete`].
    pub fn delete(&self) -> KernelResult<()> {
        let mut state = self.shared.state.lock();
        if state.deleted {
            return Err(KernelError::UnknownObject);
        }
        state.deleted = true;
        state.resolve_all(Resolution::Deleted);
        self.shared.cv.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_counts() {
        assert!(Semaphore::new(2, 1, QueueOrder::Fifo).is_err());
        assert!(Semaphore::new(-1, 1, QueueOrder::Fifo).is_err());
        let sema = Semaphore::new(1, 1, QueueOrder::Fifo).unwrap();
        assert_eq!(sema.signal(1), Err(KernelError::IllegalCount));
        assert_eq!(sema.wait(2, None), Err(KernelError::IllegalCount));
    }

    #[test]
    fn poll_and_signal() {
        let sema = Semaphore::new(1, 1, QueueOrder::Fifo).unwrap();
        sema.poll(1).unwrap();
        assert_eq!(sema.poll(1), Err(KernelError::SemaZero));
        sema.signal(1).unwrap();
        assert_eq!(sema.count(), 1);
    }

    #[test]
    fn zero_timeout_runs_callback_then_times_out() {
        let sema = Semaphore::new(0, 1, QueueOrder::Fifo).unwrap();
        let mut ran = false;
        let res = sema.wait_notify(1, Some(Duration::ZERO), || ran = true);
        assert!(ran);
        assert_eq!(res, Err(KernelError::WaitTimeout));
        assert_eq!(sema.waiting(), 0);
    }

    #[test]
    fn callback_runs_after_queuing() {
        let sema = Semaphore::new(0, 4, QueueOrder::Fifo).unwrap();
        let observer = sema.clone();
        let mut seen = 0;
        let res = sema.wait_notify(1, Some(Duration::from_secs(5)), || {
            seen = observer.waiting();
            observer.signal(1).unwrap();
        });
        assert_eq!(res, Ok(()));
        assert_eq!(seen, 1);
        assert_eq!(sema.count(), 0);
    }

    #[test]
    fn queued_large_request_blocks_later_small_ones() {
        let sema = Semaphore::new(3, 4, QueueOrder::Fifo).unwrap();
        let big = sema.clone();
        let handle = std::thread::spawn(move || big.wait(4, Some(Duration::from_secs(5))));
        while sema.waiting() == 0 {
            std::thread::yield_now();
        }
        // A unit is free, but the queued request for four comes first.
        assert_eq!(sema.poll(1), Err(KernelError::SemaZero));
        sema.signal(1).unwrap();
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert_eq!(sema.count(), 0);
    }

    #[test]
    fn timed_out_head_lets_queue_advance() {
        let sema = Semaphore::new(1, 4, QueueOrder::Fifo).unwrap();
        let big = sema.clone();
        let head = std::thread::spawn(move || big.wait(4, Some(Duration::from_millis(50))));
        while sema.waiting() == 0 {
            std::thread::yield_now();
        }
        let small = sema.clone();
        let tail = std::thread::spawn(move || small.wait(1, Some(Duration::from_secs(5))));
        assert_eq!(head.join().unwrap(), Err(KernelError::WaitTimeout));
        assert_eq!(tail.join().unwrap(), Ok(()));
    }

    #[test]
    fn cancel_and_delete_release_waiters() {
        let sema = Semaphore::new(0, 1, QueueOrder::Fifo).unwrap();
        let waiter = sema.clone();
        let handle = std::thread::spawn(move || waiter.wait(1, None));
        while sema.waiting() == 0 {
            std::thread::yield_now();
        }
        assert_eq!(sema.cancel(None), Ok(1));
        assert_eq!(handle.join().unwrap(), Err(KernelError::WaitCancel));

        let waiter = sema.clone();
        let handle = std::thread::spawn(move || waiter.wait(1, None));
        while sema.waiting() == 0 {
            std::thread::yield_now();
        }
        sema.delete().unwrap();
        assert_eq!(handle.join().unwrap(), Err(KernelError::WaitDelete));
        assert_eq!(sema.signal(1), Err(KernelError::UnknownObject));
    }

    #[test]
    fn priority_queue_orders_by_urgency() {
        let sema = Semaphore::new(0, 2, QueueOrder::Priority).unwrap();
        let mut state = sema.shared.state.lock();
        state.enqueue(1, 90, QueueOrder::Priority);
        state.enqueue(1, 20, QueueOrder::Priority);
        state.enqueue(1, 90, QueueOrder::Priority);
        let order: Vec<u8> = state.queue.iter().map(|w| w.priority).collect();
        assert_eq!(order, vec![20, 90, 90]);
        assert_eq!(state.queue[1].ticket, 0);
    }
}
