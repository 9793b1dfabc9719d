use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Circuit breaker around calls to the messaging provider.
///
/// CLOSED counts consecutive failures and trips OPEN at the threshold. While
/// OPEN and within the cooldown, calls fail fast with `AppError::CircuitOpen`
/// without invoking the operation. After the cooldown the breaker moves to
/// HALF_OPEN and admits exactly one trial call; success closes the breaker,
/// failure re-opens it and restarts the cooldown clock.
///
/// State is process-local and in-memory. On restart the worst case is a brief
/// burst of real calls before re-tripping, which is acceptable.
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            failure_threshold,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Run `operation` through the breaker. The operation's own error is
    /// returned untouched on failure; a tripped breaker yields
    /// `AppError::CircuitOpen` without calling the operation at all.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.try_acquire()?;

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    fn try_acquire(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!("Circuit breaker half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(AppError::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => {
                // Only one trial call is allowed through at a time.
                if inner.trial_in_flight {
                    Err(AppError::CircuitOpen)
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state != BreakerState::Closed {
            tracing::info!("Circuit breaker closed after successful call");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                tracing::warn!("Circuit breaker re-opened after failed trial call");
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        "Circuit breaker opened after {} consecutive failures",
                        inner.consecutive_failures
                    );
                }
            }
        }
    }
}
