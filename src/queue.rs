//! # Thread-safe max-priority queue of pending tasks.
//!
//! A mutex-guarded binary heap keyed by [`Priority`]. The priority is read
//! **once** at enqueue time; later changes to the task are ignored. Among
//! equal priorities the queue happens to pop in enqueue order (a monotonic
//! sequence number breaks ties), but callers must not rely on it.
//!
//! ## Rules
//! - [`PriorityQueue::dequeue`] on an empty queue returns `None` without
//!   blocking.
//! - Enqueue and dequeue are `O(log n)`.

use std::collections::BinaryHeap;
use std::sync::Mutex;

use crate::tasks::{Priority, Task};

struct Entry {
    task: Task,
    priority: Priority,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap on priority; earlier seq wins ties.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

/// Mutex-guarded max-heap of `(task, priority)` pairs.
#[derive(Default)]
pub struct PriorityQueue {
    state: Mutex<State>,
}

impl PriorityQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `task`, capturing its priority at this instant.
    pub fn enqueue(&self, task: Task) {
        let priority = task.priority();
        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            task,
            priority,
            seq,
        });
    }

    /// Removes and returns a highest-priority task, or `None` when empty.
    pub fn dequeue(&self) -> Option<Task> {
        self.state.lock().unwrap().heap.pop().map(|e| e.task)
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Task;

    fn noop(name: &str, priority: Priority) -> Task {
        Task::builder(name)
            .with_priority(priority)
            .with_job(|_ctx| async { Ok(()) })
            .build()
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let q = PriorityQueue::new();
        assert!(q.dequeue().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn highest_priority_first() {
        let q = PriorityQueue::new();
        q.enqueue(noop("low-1", Priority::Low));
        q.enqueue(noop("low-2", Priority::Low));
        q.enqueue(noop("high", Priority::High));
        q.enqueue(noop("normal", Priority::Normal));

        assert_eq!(q.len(), 4);
        assert_eq!(q.dequeue().unwrap().name(), "high");
        assert_eq!(q.dequeue().unwrap().name(), "normal");

        let rest: Vec<String> = std::iter::from_fn(|| q.dequeue())
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|n| n.starts_with("low")));
    }

    #[test]
    fn priority_is_captured_at_enqueue() {
        let q = PriorityQueue::new();
        // Dequeue must reflect the priority at enqueue time even though the
        // entry stores it separately from the task.
        q.enqueue(noop("a", Priority::High));
        q.enqueue(noop("b", Priority::Low));
        assert_eq!(q.dequeue().unwrap().name(), "a");
        assert_eq!(q.dequeue().unwrap().name(), "b");
    }

    #[test]
    fn heap_order_holds_under_interleaving() {
        let q = PriorityQueue::new();
        q.enqueue(noop("n1", Priority::Normal));
        q.enqueue(noop("h1", Priority::High));
        assert_eq!(q.dequeue().unwrap().name(), "h1");
        q.enqueue(noop("h2", Priority::High));
        q.enqueue(noop("l1", Priority::Low));
        assert_eq!(q.dequeue().unwrap().name(), "h2");
        assert_eq!(q.dequeue().unwrap().name(), "n1");
        assert_eq!(q.dequeue().unwrap().name(), "l1");
        assert!(q.dequeue().is_none());
    }
}
