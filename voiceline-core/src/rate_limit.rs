//! Sliding-window rate limiting for the text-injection control path.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A sliding-window request limiter.
///
/// Tracks request timestamps over a fixed window; a request is admitted only
/// while the window holds fewer than `max_requests` entries.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: VecDeque::new(),
        }
    }

    /// Per-minute convenience constructor.
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Try to admit a request at `now`. On success the request is recorded;
    /// on refusal the returned duration says how long until a slot frees up.
    pub fn try_admit(&mut self, now: Instant) -> Result<(), Duration> {
        self.prune(now);
        if self.hits.len() < self.max_requests {
            self.hits.push_back(now);
            return Ok(());
        }
        // The oldest hit leaving the window frees the next slot.
        let retry_after = match self.hits.front() {
            Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
            None => Duration::ZERO,
        };
        Err(retry_after)
    }

    /// Number of requests currently inside the window.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.hits.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.hits.front() {
            if now.duration_since(*front) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}
