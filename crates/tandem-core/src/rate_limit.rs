use std::time::Duration;

use tokio::time::Instant;

/// Token bucket for per-connection inbound frame limits. Over-limit frames
/// are dropped by the caller; the connection stays open.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    /// Tokens added per second.
    rate: f64,
    available: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    /// A full bucket holding `capacity` tokens and refilling `rate` per second.
    pub fn new(capacity: f64, rate: f64) -> Self {
        Self {
            capacity,
            rate,
            available: capacity,
            refilled_at: Instant::now(),
        }
    }

    /// A one-second burst at `rate` per second.
    pub fn per_second(rate: f64) -> Self {
        Self::new(rate, rate)
    }

    /// Take one token if one is available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill(Instant::now());
        if self.available < 1.0 {
            return false;
        }
        self.available -= 1.0;
        true
    }

    fn refill(&mut self, now: Instant) {
        let elapsed: Duration = now.saturating_duration_since(self.refilled_at);
        self.available = self
            .capacity
            .min(self.available + elapsed.as_secs_f64() * self.rate);
        self.refilled_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity() {
        let mut bucket = TokenBucket::per_second(5.0);
        assert_eq!((0..8).filter(|_| bucket.try_acquire()).count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_never_refills() {
        let mut bucket = TokenBucket::new(2.0, 0.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_proportional_and_capped() {
        let mut bucket = TokenBucket::new(2.0, 10.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!((0..5).filter(|_| bucket.try_acquire()).count(), 2);
    }
}
