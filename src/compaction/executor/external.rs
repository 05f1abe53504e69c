// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! A named queue of external compaction job offers, drained by remote
//! compactor processes through [`ExternalCompactionExecutor::reserve`].

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BinaryHeap},
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Mutex, Weak,
    },
};

use crate::{
    compaction::{compactable::Compactable, planner::CompactionJob},
    types::Extent,
};

struct JobOffer {
    seq: u64,
    priority: u32,
    tablet: Weak<dyn Compactable>,
    job: CompactionJob,
}

impl PartialEq for JobOffer {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for JobOffer {}

impl Ord for JobOffer {
    fn cmp(&self, other: &Self) -> Ordering {
        // Highest priority first; among equal priorities, earliest submitted
        // (smallest seq) first. `BinaryHeap` is a max-heap, so FIFO tie-break
        // requires reversing the seq comparison.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for JobOffer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A job handed back by [`ExternalCompactionExecutor::reserve`].
pub struct ReservedJob {
    pub extent: Extent,
    pub job: CompactionJob,
}

/// Aggregated queue depth by priority, for remote discovery (`summarize`).
pub type QueueSummary = BTreeMap<u32, usize>;

#[derive(Default)]
pub struct ExternalCompactionExecutor {
    heap: Mutex<BinaryHeap<JobOffer>>,
    next_seq: AtomicU64,
}

impl ExternalCompactionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a job offer. Callable from any thread.
    pub fn submit(&self, priority: u32, tablet: Weak<dyn Compactable>, job: CompactionJob) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.heap.lock().unwrap().push(JobOffer {
            seq,
            priority,
            tablet,
            job,
        });
    }

    /// Dequeue the highest-priority offer whose priority is `>= min_priority`
    /// and whose tablet is still live, discarding any higher-priority offers
    /// found dead along the way. Returns `None` without mutating the queue
    /// further once the highest remaining priority falls below
    /// `min_priority` (nothing lower would qualify either).
    pub fn reserve(&self, min_priority: u32) -> Option<ReservedJob> {
        let mut heap = self.heap.lock().unwrap();
        loop {
            let is_dead = match heap.peek() {
                Some(top) => top.tablet.upgrade().is_none(),
                None => return None,
            };
            if is_dead {
                heap.pop();
                continue;
            }
            if heap.peek().unwrap().priority < min_priority {
                return None;
            }
            let offer = heap.pop().unwrap();
            let extent = offer.job.extent.clone();
            return Some(ReservedJob {
                extent,
                job: offer.job,
            });
        }
    }

    /// Aggregated queue-depth-by-priority, pruning dead tablets first.
    pub fn summarize(&self) -> QueueSummary {
        let mut heap = self.heap.lock().unwrap();
        heap.retain(|offer| offer.tablet.upgrade().is_some());

        let mut summary = QueueSummary::new();
        for offer in heap.iter() {
            *summary.entry(offer.priority).or_insert(0) += 1;
        }
        summary
    }

    pub fn queued(&self) -> usize {
        self.heap.lock().unwrap().len()
    }
}
