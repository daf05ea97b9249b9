//! A priority queue of simulation events sorted by time.
//!
//! `Queue<T>` stores items of type `T` (called plans) ordered by `f64` time. `Context` uses it
//! to hold the step callbacks scheduled by the simulation driver. Plans scheduled for the same
//! time run in insertion order.
//!
//! Adding and retrieving a plan are *O*(log(*n*)).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

pub struct Queue<T> {
    queue: BinaryHeap<Entry<T>>,
    plan_counter: u64,
}

impl<T> Queue<T> {
    #[must_use]
    pub fn new() -> Queue<T> {
        Queue {
            queue: BinaryHeap::new(),
            plan_counter: 0,
        }
    }

    pub fn add_plan(&mut self, time: f64, data: T) {
        let id = self.plan_counter;
        self.queue.push(Entry { time, id, data });
        self.plan_counter += 1;
    }

    /// Removes and returns the earliest plan, if any.
    pub fn get_next_plan(&mut self) -> Option<Plan<T>> {
        self.queue.pop().map(|entry| Plan {
            time: entry.time,
            data: entry.data,
        })
    }

    /// Drops every pending plan.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct Entry<T> {
    time: f64,
    id: u64,
    data: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Reversed so that `BinaryHeap` pops the earliest time, then the lowest id, first.
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.id.cmp(&other.id))
            .reverse()
    }
}

pub struct Plan<T> {
    pub time: f64,
    pub data: T,
}
