//! Circuit breaker guarding the transport.
//!
//! # State Machine
//!
//! ```text
//!   ┌──────────┐          ┌──────────┐          ┌──────────┐
//!   │  CLOSED  │ ───────► │   OPEN   │ ───────► │HALF-OPEN │
//!   │ (normal) │ failures │ (reject) │  timeout │  (probe) │
//!   └──────────┘          └──────────┘          └──────────┘
//!         ▲                                           │
//!         └───────────────────────────────────────────┘
//!                        successes
//! ```

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - publishes pass through.
    Closed,
    /// Circuit is open - publishes are rejected immediately.
    Open,
    /// Probing whether the transport recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures before opening the circuit.
    pub failure_threshold: u32,
    /// Successes in half-open before closing.
    pub success_threshold: u32,
    /// Time before an open circuit allows a probe.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// A single circuit guarding one downstream (here: the bus).
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
            config,
        }
    }

    /// Current state (open circuits lazily flip to half-open here once the
    /// timeout elapsed).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a publish attempt should proceed.
    #[must_use]
    pub fn should_allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed_enough = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.open_timeout);
                if elapsed_enough {
                    info!("Circuit breaker transitioning to half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a transport acknowledgment.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    info!(
                        successes = inner.half_open_successes,
                        "Circuit breaker closing after successful probes"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a transport failure. `permanent` failures open the circuit
    /// immediately; transient ones count toward the threshold.
    pub fn record_failure(&self, permanent: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        let over_threshold = inner.failure_count >= self.config.failure_threshold;
        match inner.state {
            CircuitState::Closed if permanent || over_threshold => {
                warn!(
                    failures = inner.failure_count,
                    permanent, "Circuit breaker opening"
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker probe failed, reopening");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
            }
            _ => {}
        }
    }
}
