//! Queue of synchronous-lane work flushed from a host microtask.
//!
//! Sync updates dispatched during one tick enqueue at most one callback per
//! root, and the whole queue is drained by the next microtask. Callbacks
//! queued while a flush is running are picked up by the same flush.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

type SyncCallback = Box<dyn FnOnce()>;

#[derive(Default)]
pub(crate) struct SyncTaskQueue {
    queue: RefCell<VecDeque<SyncCallback>>,
    flushing: Cell<bool>,
}

impl SyncTaskQueue {
    pub(crate) fn schedule(&self, callback: SyncCallback) {
        self.queue.borrow_mut().push_back(callback);
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Run queued callbacks until the queue is empty. A nested call made from
    /// inside a callback returns immediately.
    pub(crate) fn flush(&self) {
        if self.flushing.replace(true) {
            cov_mark::hit!(nested_sync_flush_ignored);
            return;
        }
        let _reset = FlushingGuard(&self.flushing);
        loop {
            let Some(callback) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            callback();
        }
    }
}

struct FlushingGuard<'a>(&'a Cell<bool>);

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[test]
    fn flush_runs_callbacks_queued_during_flush() {
        let queue = Rc::new(SyncTaskQueue::default());
        let log = Rc::new(RefCell::new(Vec::new()));

        let (inner_queue, inner_log) = (queue.clone(), log.clone());
        queue.schedule(Box::new(move || {
            inner_log.borrow_mut().push(1);
            let log = inner_log.clone();
            inner_queue.schedule(Box::new(move || log.borrow_mut().push(2)));
        }));
        queue.flush();

        assert_eq!(*log.borrow(), vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn nested_flush_is_ignored() {
        cov_mark::check!(nested_sync_flush_ignored);
        let queue = Rc::new(SyncTaskQueue::default());
        let inner = queue.clone();
        queue.schedule(Box::new(move || inner.flush()));
        queue.flush();
        assert!(queue.is_empty());
    }
}
