//! The event calendar: a deque of fixed-width time buckets, each
//! holding actions in insertion order. `pop_next` always returns the
//! earliest action in the earliest non-empty bucket, trimming empty
//! leading buckets as it goes.

use crate::molecule::MoleculeId;
use std::collections::VecDeque;

/// One scheduled unit of work.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Action {
    /// Diffuse-step event for one molecule, due at `time`.
    Diffuse { molecule: MoleculeId, time: f64 },
    /// A previously scheduled unimolecular reaction, due at `time`.
    Unimolecular { molecule: MoleculeId, time: f64 },
}

impl Action {
    pub fn time(&self) -> f64 {
        match *self {
            Action::Diffuse { time, .. } => time,
            Action::Unimolecular { time, .. } => time,
        }
    }
}

/// Bucketed time queue. Bucket `i` (relative to `base_bucket`) covers
/// `[i*bucket_width, (i+1)*bucket_width)`; within a bucket, actions stay
/// in the order they were inserted.
pub struct Calendar {
    bucket_width: f64,
    base_bucket: u64,
    buckets: VecDeque<Vec<Action>>,
}

impl Calendar {
    pub fn new(bucket_width: f64) -> Self {
        Self {
            bucket_width,
            base_bucket: 0,
            buckets: VecDeque::new(),
        }
    }

    fn bucket_of(&self, time: f64) -> u64 {
        (time / self.bucket_width).floor().max(0.0) as u64
    }

    /// Inserts `action` into the bucket for its own `time()`.
    pub fn insert(&mut self, action: Action) {
        let bucket = self.bucket_of(action.time());
        if self.buckets.is_empty() {
            self.base_bucket = bucket;
        }
        if bucket < self.base_bucket {
            // Earlier than anything seen so far: grow the front.
            let shift = (self.base_bucket - bucket) as usize;
            for _ in 0..shift {
                self.buckets.push_front(Vec::new());
            }
            self.base_bucket = bucket;
        }
        let offset = (bucket - self.base_bucket) as usize;
        while self.buckets.len() <= offset {
            self.buckets.push_back(Vec::new());
        }
        self.buckets[offset].push(action);
    }

    /// Removes and returns the earliest action in the earliest
    /// non-empty bucket, FIFO within that bucket. Trims exhausted
    /// leading buckets.
    pub fn pop_next(&mut self) -> Option<Action> {
        while let Some(front) = self.buckets.front_mut() {
            if front.is_empty() {
                self.buckets.pop_front();
                self.base_bucket += 1;
                continue;
            }
            return Some(front.remove(0));
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }
}

/// FIFO queue of actions due within the timestep currently being
/// processed: freshly spawned products and unimolecular reactions that
/// fall inside the window. Ordered by insertion, not by time.
#[derive(Default)]
pub struct InEventQueue {
    queue: VecDeque<Action>,
}

impl InEventQueue {
    pub fn push(&mut self, action: Action) {
        self.queue.push_back(action);
    }

    pub fn pop(&mut self) -> Option<Action> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
