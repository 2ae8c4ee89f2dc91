//! Ready queue: FIFO of admitted processes.
//!
//! Multiple producers (the REPL, the batch producer, quantum requeues) push;
//! only the dispatcher pops. A condition variable lets the dispatcher block
//! between passes and still react promptly to new work.

use crate::process::Process;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Mutex-protected FIFO with a wakeup condition for the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    inner: Mutex<VecDeque<Arc<Process>>>,
    available: Condvar,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<Process>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the tail and wake the dispatcher.
    pub(crate) fn push(&self, process: Arc<Process>) {
        self.lock().push_back(process);
        self.available.notify_one();
    }

    /// Pop the head, if any.
    pub(crate) fn pop(&self) -> Option<Arc<Process>> {
        self.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn contains(&self, process: &Arc<Process>) -> bool {
        self.lock().iter().any(|p| Arc::ptr_eq(p, process))
    }

    /// Block until the queue is non-empty or `timeout` elapses.
    ///
    /// The timeout only makes termination responsive; the caller runs its
    /// dispatch pass either way.
    pub(crate) fn wait_for_work(&self, timeout: Duration) {
        let queue = self.lock();
        if queue.is_empty() {
            let _ = self
                .available
                .wait_timeout(queue, timeout)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wake every waiter (used on shutdown).
    pub(crate) fn notify_all(&self) {
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::ReadyQueue;
    use crate::process::Process;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn pops_in_fifo_order() {
        let queue = ReadyQueue::new();
        let (a, b) = (Arc::new(Process::new("a", 0)), Arc::new(Process::new("b", 0)));
        queue.push(Arc::clone(&a));
        queue.push(Arc::clone(&b));

        assert!(Arc::ptr_eq(&queue.pop().unwrap(), &a));
        assert!(Arc::ptr_eq(&queue.pop().unwrap(), &b));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn requeue_lands_at_the_tail() {
        let queue = ReadyQueue::new();
        let (a, b) = (Arc::new(Process::new("a", 0)), Arc::new(Process::new("b", 0)));
        queue.push(Arc::clone(&a));
        queue.push(Arc::clone(&b));

        let expired = queue.pop().unwrap();
        queue.push(expired);

        assert!(Arc::ptr_eq(&queue.pop().unwrap(), &b));
        assert!(Arc::ptr_eq(&queue.pop().unwrap(), &a));
    }

    #[test]
    fn wait_for_work_times_out_on_an_empty_queue() {
        let queue = ReadyQueue::new();
        // Must return; the assertion is that this does not hang.
        queue.wait_for_work(Duration::from_millis(1));
        assert_eq!(queue.len(), 0);
    }
}
