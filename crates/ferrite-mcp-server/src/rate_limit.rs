//! Per-session token bucket rate limiting. Refills lazily on each
//! consumption attempt — there is no background timer ticking the bucket,
//! so an idle session costs nothing between requests.

use std::time::Instant;

/// `capacity, tokens, last_refill, rate` — capacity defaults to `2 * rate`
/// so a session that has been idle can briefly burst above its steady-state
/// rate before settling back to it.
#[derive(Debug, Clone)]
pub struct RateBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
    rate_per_sec: f64,
}

impl RateBucket {
    pub fn new(rate_per_sec: f64) -> Self {
        let capacity = rate_per_sec * 2.0;
        Self {
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
            rate_per_sec,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Attempt to consume one token. Refills first, based on elapsed time
    /// since the last attempt. Returns `true` if a token was available.
    pub fn try_consume(&mut self) -> bool {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Milliseconds until at least one token will be available, for a
    /// `Retry-After`-style hint. Purely informational — the bucket itself
    /// refills continuously, not in discrete steps.
    pub fn retry_after_ms(&self) -> u64 {
        if self.tokens >= 1.0 {
            return 0;
        }
        let deficit = 1.0 - self.tokens;
        ((deficit / self.rate_per_sec) * 1000.0).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn capacity_is_double_rate() {
        let bucket = RateBucket::new(10.0);
        assert_eq!(bucket.capacity, 20.0);
        assert_eq!(bucket.tokens, 20.0);
    }

    #[test]
    fn consumes_down_to_zero_then_refuses() {
        let mut bucket = RateBucket::new(1.0);
        // capacity 2.0: two immediate consumes succeed, third fails.
        assert!(bucket.try_consume());
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume());
    }

    #[test]
    fn refills_over_time() {
        let mut bucket = RateBucket::new(1000.0);
        for _ in 0..2000 {
            bucket.try_consume();
        }
        assert!(!bucket.try_consume());
        sleep(Duration::from_millis(5));
        assert!(bucket.try_consume());
    }
}
