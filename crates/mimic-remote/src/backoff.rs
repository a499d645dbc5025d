use std::time::Duration;

/// Reconnect delay that doubles on every failure up to a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        let cap = cap.max(base);
        Self {
            base,
            cap,
            current: base,
        }
    }

    pub fn from_secs(base: u64, cap: u64) -> Self {
        Self::new(Duration::from_secs(base), Duration::from_secs(cap))
    }

    /// The delay to wait now. The following call returns twice as much, capped.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.checked_mul(2).unwrap_or(self.cap).min(self.cap);
        delay
    }

    /// Back to the base delay, after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_cap() {
        let mut b = Backoff::from_secs(5, 30);
        let delays: Vec<u64> = (0..5).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30]);
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut b = Backoff::from_secs(5, 300);
        b.next_delay();
        b.next_delay();
        assert_eq!(b.current(), Duration::from_secs(20));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(5));
        assert_eq!(b.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_huge_cap_saturates_instead_of_overflowing() {
        let mut b = Backoff::from_secs(5, u64::MAX);
        for _ in 0..100 {
            b.next_delay();
        }
        assert_eq!(b.current(), Duration::from_secs(u64::MAX));
        assert_eq!(b.next_delay(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_cap_below_base_uses_base() {
        let mut b = Backoff::from_secs(10, 2);
        assert_eq!(b.next_delay(), Duration::from_secs(10));
        assert_eq!(b.next_delay(), Duration::from_secs(10));
    }
}
