use tokio::time::Duration;

/// Bounded exponential backoff between reconcile attempts.
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    remaining: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, attempts: u32) -> Self {
        Self {
            next: min,
            max,
            remaining: attempts,
        }
    }

    /// The delay before the next attempt, or `None` once attempts are
    /// exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        Some(delay)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5), 5);
        let delays = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect::<Vec<_>>();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn exhausts() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(1), 0);
        assert_eq!(backoff.next_delay(), None);
    }
}
