use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Returned by `acquire` when the breaker short-circuits a call without
/// attempting it.
#[derive(Debug, Clone, Copy, Error)]
#[error("circuit breaker open, retry in {retry_after:?}")]
pub struct CircuitOpen {
    pub retry_after: Duration,
}

/// Gate around calls to one destination. One instance is shared by the
/// connection check and every batch load of a job; a single task owns
/// mutation.
///
/// Closed counts consecutive failures and opens at the threshold. Open
/// rejects every call until the cooldown elapses, then admits exactly one
/// half-open probe. A successful probe closes the breaker and resets the
/// cooldown; a failed probe reopens it with the cooldown doubled, up to a
/// cap.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    base_open_duration: Duration,
    max_open_duration: Duration,
    state: CircuitState,
    consecutive_failures: u32,
    open_duration: Duration,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            base_open_duration: open_duration,
            max_open_duration: open_duration.saturating_mul(8),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            open_duration,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Asks permission to attempt a call. While open, returns the remaining
    /// cooldown instead of attempting anything; once the cooldown elapses
    /// the first acquire becomes the single half-open probe.
    pub fn acquire(&mut self) -> Result<(), CircuitOpen> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.open_duration {
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    info!("Circuit half-open, probing destination.");
                    Ok(())
                } else {
                    Err(CircuitOpen {
                        retry_after: self.open_duration - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Err(CircuitOpen {
                        retry_after: self.open_duration,
                    })
                } else {
                    self.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!("Circuit closed after successful probe.");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.open_duration = self.base_open_duration;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.open_duration =
                    (self.open_duration.saturating_mul(2)).min(self.max_open_duration);
                self.trip();
                warn!(
                    open_ms = self.open_duration.as_millis() as u64,
                    "Probe failed, circuit reopened with increased cooldown."
                );
            }
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.trip();
                    warn!(
                        failures = self.consecutive_failures,
                        open_ms = self.open_duration.as_millis() as u64,
                        "Circuit opened."
                    );
                }
            }
            // No calls are attempted while open, so nothing to count.
            CircuitState::Open => {}
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.probe_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_exactly_threshold_failures() {
        let mut cb = breaker();

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.acquire().is_ok());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_count() {
        let mut cb = breaker();

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn allows_exactly_one_probe_after_cooldown() {
        let mut cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cb.acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.acquire().is_err());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_with_doubled_cooldown() {
        let mut cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.acquire().is_ok());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        let err = cb.acquire().unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_growth_is_capped() {
        let mut cb = CircuitBreaker::new(1, Duration::from_secs(10));

        for _ in 0..6 {
            cb.record_failure();
            tokio::time::advance(Duration::from_secs(1000)).await;
            assert!(cb.acquire().is_ok());
        }
        cb.record_failure();

        tokio::time::advance(Duration::from_secs(79)).await;
        let err = cb.acquire().unwrap_err();
        assert!(err.retry_after <= Duration::from_secs(1));
    }
}
