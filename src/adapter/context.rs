//! Deadline-bearing call context

use std::time::Duration;
use tokio::time::Instant;

/// Carries the deadline every remote call must respect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context with no deadline
    pub fn background() -> Self {
        Self { deadline: None }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// A context whose deadline is the earlier of ours and `now + limit`
    pub fn narrowed(&self, limit: Duration) -> Self {
        let capped = Instant::now() + limit;
        let deadline = match self.deadline {
            Some(d) if d < capped => d,
            _ => capped,
        };
        Self::with_deadline(deadline)
    }

    /// Deadline to wait against, falling back to `now + default` when unbounded
    pub fn effective_deadline(&self, default: Duration) -> Instant {
        self.deadline.unwrap_or_else(|| Instant::now() + default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_background_never_expires() {
        let ctx = CallContext::background();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!ctx.is_expired());
        assert_eq!(ctx.remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires() {
        let ctx = CallContext::with_timeout(Duration::from_secs(2));
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_narrowed_keeps_earlier_deadline() {
        let ctx = CallContext::with_timeout(Duration::from_secs(10));

        let tighter = ctx.narrowed(Duration::from_secs(3));
        assert_eq!(tighter.remaining(), Some(Duration::from_secs(3)));

        let looser = ctx.narrowed(Duration::from_secs(60));
        assert_eq!(looser.deadline(), ctx.deadline());
    }
}
