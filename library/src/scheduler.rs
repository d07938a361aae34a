//! Cooperative timer queue.
//!
//! Timers carry a task value instead of a closure; whoever owns the queue
//! drains due tasks with [`TimerQueue::pop_due`] and dispatches them. Only one
//! task runs at a time, so state touched by tasks never needs locking.

use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

#[derive(Debug)]
pub struct TimerQueue<T> {
    next_seq: u64,
    /// (due_ms, seq) -> task. `seq` breaks ties in scheduling order.
    timers: BTreeMap<(u64, u64), T>,
    due_by_handle: HashMap<TimerHandle, u64>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            timers: BTreeMap::new(),
            due_by_handle: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, task: T, delay_ms: u64, now_ms: u64) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let due = now_ms.saturating_add(delay_ms);
        self.timers.insert((due, seq), task);
        let handle = TimerHandle(seq);
        self.due_by_handle.insert(handle, due);
        handle
    }

    /// Cancels a pending timer. Returns the task if it had not fired yet.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        let due = self.due_by_handle.remove(&handle)?;
        self.timers.remove(&(due, handle.0))
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.due_by_handle.contains_key(&handle)
    }

    /// Removes and returns every task due at or before `now_ms`, earliest first.
    pub fn pop_due(&mut self, now_ms: u64) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(entry) = self.timers.first_entry() {
            let (at, seq) = *entry.key();
            if at > now_ms {
                break;
            }
            due.push(entry.remove());
            self.due_by_handle.remove(&TimerHandle(seq));
        }
        due
    }

    pub fn next_due(&self) -> Option<u64> {
        self.timers.keys().next().map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn clear(&mut self) {
        self.timers.clear();
        self.due_by_handle.clear();
    }
}
