//! Indexed min-heap of idle-connection deadlines.
//!
//! Expires quiet connections in O(log n) without a dedicated timer thread:
//! the reactor calls [`HeapTimer::next_tick_ms`] once per loop iteration and
//! feeds the result straight into the readiness notifier's poll timeout.
//!
//! Ported from a min-heap-plus-index-map design (sift-up/down update the
//! id->index map on every swap so arbitrary ids can be adjusted or cancelled
//! in O(log n), not just the root).

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Callback invoked when a timer node expires or is explicitly resolved via
/// [`HeapTimer::do_work`].
pub type TimeoutCallback = Box<dyn FnOnce() + Send>;

struct TimerNode {
    id: u64,
    deadline: Instant,
    cb: TimeoutCallback,
}

/// An indexed min-heap of `(id, deadline, callback)` triples.
///
/// Invariants:
/// - for every node at index `i` with children `2i+1, 2i+2`,
///   `deadline(i) <= deadline(child)`;
/// - `index_of[id]` is always the node's current position in `heap`;
/// - each id appears at most once.
#[derive(Default)]
pub struct HeapTimer {
    heap: Vec<TimerNode>,
    index_of: HashMap<u64, usize>,
}

impl HeapTimer {
    /// Creates an empty timer wheel.
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            index_of: HashMap::new(),
        }
    }

    /// `true` if no ids are currently tracked.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Inserts a new id (or re-times an existing one) with a deadline of
    /// `now + timeout`. Tie-breaking between equal deadlines is unspecified.
    pub fn add(&mut self, id: u64, timeout: Duration, cb: TimeoutCallback) {
        if let Some(&i) = self.index_of.get(&id) {
            self.heap[i].deadline = Instant::now() + timeout;
            self.heap[i].cb = cb;
            if !self.sift_down(i) {
                self.sift_up(i);
            }
            return;
        }

        let i = self.heap.len();
        self.index_of.insert(id, i);
        self.heap.push(TimerNode {
            id,
            deadline: Instant::now() + timeout,
            cb,
        });
        self.sift_up(i);
    }

    /// Re-times an existing id to `now + timeout`. No-op (well, a panic in
    /// debug builds is *not* raised — callers should check) if the id is
    /// absent; matches the common "extend the idle window" case, so this
    /// always sifts down.
    pub fn adjust(&mut self, id: u64, timeout: Duration) {
        let Some(&i) = self.index_of.get(&id) else {
            return;
        };
        self.heap[i].deadline = Instant::now() + timeout;
        self.sift_down(i);
    }

    /// Invokes `id`'s callback immediately and removes it. A missing id is a
    /// silent no-op (it may have already expired via [`HeapTimer::tick`]).
    pub fn do_work(&mut self, id: u64) {
        let Some(&i) = self.index_of.get(&id) else {
            return;
        };
        let node = self.remove_at(i);
        (node.cb)();
    }

    /// Removes `id` without invoking its callback.
    pub fn cancel(&mut self, id: u64) {
        if let Some(&i) = self.index_of.get(&id) {
            self.remove_at(i);
        }
    }

    /// Expires every node whose deadline has passed, in non-decreasing
    /// deadline order, invoking each callback synchronously on the caller.
    /// Stops at the first non-expired root or when the heap is empty.
    pub fn tick(&mut self) {
        let now = Instant::now();
        while let Some(front) = self.heap.first() {
            if front.deadline > now {
                break;
            }
            let node = self.remove_at(0);
            (node.cb)();
        }
    }

    /// Ticks, then returns milliseconds until the new root's deadline, or
    /// `-1` if the heap is empty. Negative remainders are clamped to `0`.
    pub fn next_tick_ms(&mut self) -> i64 {
        self.tick();
        match self.heap.first() {
            None => -1,
            Some(front) => {
                let now = Instant::now();
                if front.deadline <= now {
                    0
                } else {
                    (front.deadline - now).as_millis() as i64
                }
            }
        }
    }

    fn remove_at(&mut self, index: usize) -> TimerNode {
        let last = self.heap.len() - 1;
        self.swap(index, last);
        let node = self.heap.pop().expect("heap non-empty on remove");
        self.index_of.remove(&node.id);
        if index < last {
            if !self.sift_down(index) {
                self.sift_up(index);
            }
        }
        node
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index_of.insert(self.heap[i].id, i);
        self.index_of.insert(self.heap[j].id, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].deadline <= self.heap[i].deadline {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Returns `true` if the node actually moved down.
    fn sift_down(&mut self, index: usize) -> bool {
        let n = self.heap.len();
        let mut i = index;
        loop {
            let mut smallest = i;
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            if left < n && self.heap[left].deadline < self.heap[smallest].deadline {
                smallest = left;
            }
            if right < n && self.heap[right].deadline < self.heap[smallest].deadline {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
        i > index
    }

    #[cfg(test)]
    fn assert_heap_property(&self) {
        for i in 0..self.heap.len() {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            if left < self.heap.len() {
                assert!(self.heap[i].deadline <= self.heap[left].deadline);
            }
            if right < self.heap.len() {
                assert!(self.heap[i].deadline <= self.heap[right].deadline);
            }
            assert_eq!(self.index_of[&self.heap[i].id], i);
        }
    }
}

impl std::fmt::Debug for HeapTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapTimer")
            .field("len", &self.heap.len())
            .finish()
    }
}
