// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! In-process worker group backing one named internal executor of a
//! [`CompactionService`](crate::compaction::service::CompactionService).
//!
//! Mirrors the host repository's `OngoingTaskLimit`/`MemoryLimit` gating
//! idiom (atomic counters plus a permit-bearing gate) rather than a
//! hand-rolled thread pool.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use log::debug;
use tokio::{sync::Semaphore, task::JoinHandle};

/// A named, bounded-concurrency worker group. Jobs beyond the configured
/// thread count queue behind a semaphore rather than being rejected.
pub struct InternalExecutor {
    name: String,
    semaphore: Arc<Semaphore>,
    num_threads: AtomicUsize,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
    handles: std::sync::Mutex<Vec<(Arc<AtomicBool>, JoinHandle<()>)>>,
}

impl InternalExecutor {
    pub fn new(name: impl Into<String>, num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(num_threads)),
            num_threads: AtomicUsize::new(num_threads),
            queued: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicBool::new(false)),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    /// Change the worker count in place. Growing adds permits immediately;
    /// shrinking forgets permits not currently handed out, so in-flight jobs
    /// are never preempted.
    pub fn resize(&self, num_threads: usize) {
        let num_threads = num_threads.max(1);
        let previous = self.num_threads.swap(num_threads, Ordering::SeqCst);
        match num_threads.cmp(&previous) {
            std::cmp::Ordering::Greater => self.semaphore.add_permits(num_threads - previous),
            std::cmp::Ordering::Less => {
                self.semaphore.forget_permits(previous - num_threads);
            }
            std::cmp::Ordering::Equal => {}
        }
    }

    /// Queue `job` to run as soon as a worker slot is free.
    pub fn submit<F, Fut>(&self, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::Relaxed) {
            debug!("internal executor '{}' is stopped, dropping job", self.name);
            return;
        }

        self.queued.fetch_add(1, Ordering::SeqCst);
        let semaphore = self.semaphore.clone();
        let queued = self.queued.clone();
        let running = self.running.clone();
        let stopped = self.stopped.clone();
        let started = Arc::new(AtomicBool::new(false));
        let started_flag = started.clone();

        let handle = tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            queued.fetch_sub(1, Ordering::SeqCst);
            if stopped.load(Ordering::Relaxed) {
                return;
            }
            // Once this flips, the job is past the point `stop()` can safely
            // abort it; it must be left to finish.
            started_flag.store(true, Ordering::SeqCst);
            running.fetch_add(1, Ordering::SeqCst);
            job().await;
            running.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });

        let mut handles = self.handles.lock().unwrap();
        handles.retain(|(_, h)| !h.is_finished());
        handles.push((started, handle));
    }

    /// Idempotent. Prevents new jobs from starting and aborts any job that
    /// has not yet acquired a worker slot; jobs already running (or already
    /// past the point of acquiring one) are left to finish.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles = self.handles.lock().unwrap();
        for (started, handle) in handles.iter() {
            if !started.load(Ordering::SeqCst) && !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    #[tokio::test]
    async fn test_submit_runs_job() {
        let executor = InternalExecutor::new("e1", 2);
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        executor.submit(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(executor.running(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_drops_new_jobs() {
        let executor = InternalExecutor::new("e1", 1);
        executor.stop();
        executor.stop();

        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        executor.submit(move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_lets_running_job_finish() {
        let executor = Arc::new(InternalExecutor::new("e1", 1));
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        executor.submit(move || async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            c.fetch_add(1, Ordering::SeqCst);
        });

        // Give the job a chance to acquire its permit and start running
        // before we stop the executor.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(executor.running(), 1);

        executor.stop();
        tokio::time::sleep(std::time::Duration::from_millis(70)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(executor.running(), 0);
    }
}
