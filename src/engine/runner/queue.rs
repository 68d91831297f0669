use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

/// Pending run requests, drained by a single worker.
///
/// A request for a binding that is already waiting in the queue is dropped,
/// so a burst of changes to the same files results in one run. A request
/// arriving while the same binding is running is kept, since the run in
/// progress may have read the files before they changed.
#[derive(Debug, Default)]
pub(crate) struct RunQueue {
    state: Mutex<State>,
    ready: Condvar,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<usize>,
    closed: bool,
}

impl RunQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueues a run of the binding at `index`. Returns `false` when the
    /// request was coalesced with one already pending.
    pub(crate) fn push(&self, index: usize) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.closed || state.pending.contains(&index) {
            return false;
        }

        state.pending.push_back(index);
        self.ready.notify_one();
        true
    }

    /// Blocks until a request is available. Returns `None` once the queue is
    /// closed and empty.
    pub(crate) fn pop(&self) -> Option<usize> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if let Some(index) = state.pending.pop_front() {
                return Some(index);
            }

            if state.closed {
                return None;
            }

            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        self.ready.notify_all();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_coalesces_pending_requests() {
        let queue = RunQueue::new();

        assert!(queue.push(0));
        assert!(!queue.push(0));
        assert!(queue.push(1));
        assert!(!queue.push(0));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(0));
        // The binding is no longer pending, so it can be queued again.
        assert!(queue.push(0));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(0));
    }

    #[test]
    fn test_close_wakes_worker() {
        let queue = Arc::new(RunQueue::new());

        let worker = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(index) = queue.pop() {
                    seen.push(index);
                }
                seen
            })
        };

        queue.push(3);
        queue.close();
        assert!(!queue.push(4));

        let seen = worker.join().unwrap();
        // Requests queued before closing are still drained.
        assert_eq!(seen, vec![3]);
    }
}
