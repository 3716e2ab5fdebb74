use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards post-commit publishing: once the broker keeps failing, further
// publishes are skipped outright instead of piling up timeouts.
//
// Closed   - calls pass through, consecutive failures are counted
// Open     - calls are rejected until `open_for` has elapsed
// HalfOpen - trial calls; enough successes close, any failure reopens
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call
    pub open_for: Duration,
    /// Trial successes needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_for: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Tracker {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

impl Tracker {
    fn transition(&mut self, to: CircuitState) {
        if self.state != to {
            tracing::info!(from = %self.state, to = %to, "Circuit breaker state change");
        }
        self.state = to;
        self.successes = 0;
        match to {
            CircuitState::Open => self.opened_at = Some(Instant::now()),
            CircuitState::Closed => {
                self.failures = 0;
                self.opened_at = None;
            }
            CircuitState::HalfOpen => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    tracker: Arc<Mutex<Tracker>>,
    config: CircuitBreakerConfig,
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "Circuit breaker is open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error> std::error::Error for CircuitBreakerError<E> {}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(Tracker {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            })),
            config,
        }
    }

    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.admit::<E>().await?;

        match operation.await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(error) => {
                self.on_failure().await;
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut tracker = self.tracker.lock().await;
        if tracker.state != CircuitState::Open {
            return Ok(());
        }

        let cooled_down = tracker
            .opened_at
            .map(|opened| opened.elapsed() >= self.config.open_for)
            .unwrap_or(true);
        if cooled_down {
            tracker.transition(CircuitState::HalfOpen);
            Ok(())
        } else {
            Err(CircuitBreakerError::CircuitOpen)
        }
    }

    async fn on_success(&self) {
        let mut tracker = self.tracker.lock().await;
        match tracker.state {
            CircuitState::HalfOpen => {
                tracker.successes += 1;
                if tracker.successes >= self.config.success_threshold {
                    tracker.transition(CircuitState::Closed);
                }
            }
            _ => tracker.failures = 0,
        }
    }

    async fn on_failure(&self) {
        let mut tracker = self.tracker.lock().await;
        tracker.failures += 1;
        match tracker.state {
            CircuitState::Closed if tracker.failures >= self.config.failure_threshold => {
                tracing::warn!(failures = tracker.failures, "Opening circuit breaker");
                tracker.transition(CircuitState::Open);
            }
            CircuitState::HalfOpen => tracker.transition(CircuitState::Open),
            _ => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.tracker.lock().await.state
    }

    pub async fn reset(&self) {
        self.tracker.lock().await.transition(CircuitState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(open_for: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            open_for,
            success_threshold: 1,
        })
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(Duration::from_secs(60));

        for _ in 0..2 {
            assert!(cb.call(async { Err::<(), _>("broker down") }).await.is_err());
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        let rejected = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(rejected, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(Duration::from_secs(60));

        let _ = cb.call(async { Err::<(), _>("blip") }).await;
        let _ = cb.call(async { Ok::<_, &str>(()) }).await;
        let _ = cb.call(async { Err::<(), _>("blip") }).await;

        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_closes_circuit() {
        let cb = breaker(Duration::from_millis(20));
        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>("broker down") }).await;
        }

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(Duration::from_millis(20));
        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>("broker down") }).await;
        }

        tokio::time::sleep(Duration::from_millis(40)).await;

        let _ = cb.call(async { Err::<(), _>("still down") }).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        cb.reset().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }
}
