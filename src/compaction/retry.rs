// Copyright 2022 CeresDB Project Authors. Licensed under Apache-2.0.

//! Exponential, capped, log-throttled backoff for the main scheduling loop.

use std::time::Duration;

use log::error;

/// Backoff state for a single run of consecutive failures. A fresh instance
/// is created once the loop completes an iteration without error (see
/// [`RetryPolicy::reset`]).
pub struct RetryPolicy {
    wait: Duration,
    increment: Duration,
    max_wait: Duration,
    factor: f64,
    log_interval: Duration,
    last_logged: Option<std::time::Instant>,
}

impl RetryPolicy {
    /// `increment` also seeds the initial wait.
    pub fn new(increment: Duration, max_wait: Duration) -> Self {
        Self {
            wait: increment,
            increment,
            max_wait,
            factor: 1.07,
            log_interval: Duration::from_secs(60),
            last_logged: None,
        }
    }

    pub fn has_backed_off(&self) -> bool {
        self.last_logged.is_some()
    }

    /// Log (at most once per minute) and sleep for the current wait, then
    /// grow the wait multiplicatively, capped at `max_wait`.
    pub async fn back_off(&mut self, context: &str) {
        let should_log = match self.last_logged {
            None => true,
            Some(t) => t.elapsed() >= self.log_interval,
        };
        if should_log {
            error!(
                "compaction manager main loop failing, backing off {:?}, context:{}",
                self.wait, context
            );
            self.last_logged = Some(std::time::Instant::now());
        }

        tokio::time::sleep(self.wait).await;

        let grown = self.wait.mul_f64(self.factor) + self.increment;
        self.wait = std::cmp::min(grown, self.max_wait);
    }

    pub fn reset(&mut self) {
        self.wait = self.increment;
        self.last_logged = None;
    }
}
