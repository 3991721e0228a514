//! Circuit breaker guarding the downstream execution dispatcher.
//!
//! Three states: closed, open, half-open. Only 5xx, 408, and transport
//! timeouts count as failures; other 4xx responses are successes for breaker
//! accounting. In `open`, dispatch is rejected without making the call. After
//! the open duration elapses a single half-open probe is allowed; its outcome
//! decides the next state.

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    open_duration: Duration,
    state: Mutex<State>,
}

/// Whether a dispatch outcome counts as a breaker failure. `None` means the
/// call never produced a status (timeout or transport error).
pub fn is_breaker_failure(status: Option<u16>) -> bool {
    match status {
        None => true,
        Some(s) => s >= 500 || s == 408,
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            open_duration,
            state: Mutex::new(State::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Whether a dispatch may proceed right now. Transitions open → half-open
    /// when the open duration has elapsed; at most one half-open probe is
    /// admitted at a time.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            State::Closed { .. } => true,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.open_duration {
                    *state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    info!("circuit breaker half-open, probing");
                    true
                } else {
                    false
                }
            }
            State::HalfOpen {
                ref mut probe_in_flight,
            } => {
                if *probe_in_flight {
                    false
                } else {
                    *probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if !matches!(*state, State::Closed { consecutive_failures: 0 }) {
            info!("circuit breaker closed");
        }
        *state = State::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match *state {
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    warn!(failures, "circuit breaker opened");
                    *state = State::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    *state = State::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            State::HalfOpen { .. } => {
                warn!("half-open probe failed, circuit breaker re-opened");
                *state = State::Open {
                    opened_at: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), State::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn five_consecutive_failures_open_the_breaker() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(60));

        for _ in 0..5 {
            assert!(cb.try_acquire());
            cb.record_failure();
        }
        assert!(cb.is_open());
        assert!(!cb.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn a_success_resets_the_failure_count() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(60));

        for _ in 0..4 {
            cb.record_failure();
        }
        cb.record_success();
        for _ in 0..4 {
            cb.record_failure();
        }
        assert!(!cb.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_recovers_on_success() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            cb.record_failure();
        }
        assert!(!cb.try_acquire());

        tokio::time::advance(Duration::from_secs(61)).await;

        // First call after the window is the probe; a second is rejected
        // while the probe is in flight.
        assert!(cb.try_acquire());
        assert!(!cb.try_acquire());

        cb.record_success();
        assert!(cb.try_acquire());
        assert!(!cb.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.try_acquire());
        cb.record_failure();

        assert!(cb.is_open());
        assert!(!cb.try_acquire());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.try_acquire());
    }

    #[test]
    fn failure_classification() {
        assert!(is_breaker_failure(None));
        assert!(is_breaker_failure(Some(408)));
        assert!(is_breaker_failure(Some(500)));
        assert!(is_breaker_failure(Some(503)));
        assert!(!is_breaker_failure(Some(200)));
        assert!(!is_breaker_failure(Some(400)));
        assert!(!is_breaker_failure(Some(404)));
        assert!(!is_breaker_failure(Some(429)));
    }
}
