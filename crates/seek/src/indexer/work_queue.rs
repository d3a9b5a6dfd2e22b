//! Work-queue coordinator for the parallel directory crawl.
//!
//! The subtle part of a recursive walk is that "queue empty" is not
//! "walk finished": the last worker holding a directory may still push
//! its subdirectories. Completion therefore requires the queue to be
//! empty *and* `busy_workers == 0` at the same observation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// How long an idle worker sleeps before re-checking the queue.
const IDLE_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
struct QueueState<T> {
    items: VecDeque<T>,
    total_workers: usize,
    busy_workers: usize,
    completed: bool,
}

/// A multi-producer/multi-consumer directory queue with explicit
/// busy-worker accounting.
#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                total_workers: 0,
                busy_workers: 0,
                completed: false,
            }),
        }
    }

    /// Adds one item. Workers may enqueue while processing.
    pub fn enqueue(&self, item: T) {
        let mut state = self.lock();
        state.items.push_back(item);
    }

    /// Adds a batch of items.
    pub fn enqueue_many(&self, items: impl IntoIterator<Item = T>) {
        let mut state = self.lock();
        state.items.extend(items);
    }

    /// Registers a worker. Call once per worker thread on entry.
    pub fn add_worker(&self) {
        let mut state = self.lock();
        state.total_workers += 1;
    }

    /// Unregisters a worker. Call once per worker thread on exit.
    pub fn remove_worker(&self) {
        let mut state = self.lock();
        state.total_workers = state.total_workers.saturating_sub(1);
    }

    /// Blocks until an item is available or the crawl is complete.
    ///
    /// Returns `None` only when the queue is empty and no worker is
    /// still busy, so nothing can produce more work.
    pub fn dequeue_for_worker(&self) -> Option<T> {
        loop {
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    state.busy_workers += 1;
                    return Some(item);
                }
                if state.busy_workers == 0 {
                    state.completed = true;
                    return None;
                }
            }
            thread::sleep(IDLE_WAIT);
        }
    }

    /// Marks the current worker's item as processed. Must be called
    /// exactly once per successful `dequeue_for_worker`.
    pub fn worker_finished_item(&self) {
        let mut state = self.lock();
        state.busy_workers = state.busy_workers.saturating_sub(1);
    }

    /// True once a worker has observed the termination condition.
    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    /// Items currently waiting.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        // A poisoned coordinator cannot be recovered mid-crawl; the
        // indexer treats a panicked worker as fatal anyway.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn empty_queue_with_no_busy_workers_completes() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        queue.add_worker();
        assert_eq!(queue.dequeue_for_worker(), None);
        assert!(queue.is_completed());
        queue.remove_worker();
    }

    #[test]
    fn single_worker_drains_nested_enqueues() {
        let queue = WorkQueue::new();
        queue.enqueue(3u32);

        queue.add_worker();
        let mut seen = Vec::new();
        while let Some(depth) = queue.dequeue_for_worker() {
            seen.push(depth);
            if depth > 0 {
                // Children discovered while the item is being processed.
                queue.enqueue(depth - 1);
            }
            queue.worker_finished_item();
        }
        queue.remove_worker();

        assert_eq!(seen, vec![3, 2, 1, 0]);
    }

    #[test]
    fn workers_do_not_exit_while_a_producer_is_busy() {
        // A synthetic tree: item (id, fanout). Each item enqueues
        // `fanout` children with fanout - 1. Every worker must observe
        // every item exactly once across threads.
        let queue: Arc<WorkQueue<(u64, u32)>> = Arc::new(WorkQueue::new());
        queue.enqueue((1, 4));
        let processed = Arc::new(AtomicUsize::new(0));
        let ids = Arc::new(Mutex::new(HashSet::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            let processed = processed.clone();
            let ids = ids.clone();
            handles.push(thread::spawn(move || {
                queue.add_worker();
                while let Some((id, fanout)) = queue.dequeue_for_worker() {
                    assert!(ids.lock().unwrap().insert(id), "item {id} seen twice");
                    for child in 0..fanout {
                        queue.enqueue((id * 10 + child as u64 + 1, fanout - 1));
                    }
                    // Simulate slow directory processing so other workers
                    // observe an empty queue while this one is busy.
                    thread::sleep(Duration::from_micros(200));
                    processed.fetch_add(1, Ordering::SeqCst);
                    queue.worker_finished_item();
                }
                queue.remove_worker();
            }));
        }
        for handle in handles {
            handle.join().expect("worker panicked");
        }

        // Tree node count for fanout 4 at the root: 1 + 4 + 4*3 + 4*3*2 + 4*3*2*1 = 65.
        assert_eq!(processed.load(Ordering::SeqCst), 65);
        assert!(queue.is_completed());
        assert!(queue.is_empty());
    }
}
