//! Three-state circuit breaker guarding calls to the upstream fetcher
//! (spec §4.5). Process-local: counters are shared across concurrent
//! callers in this process and updated under a single mutex.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    phase: BreakerPhase,
    failures: u32,
    opened_at: Option<Instant>,
    /// Guards the single probe admitted while half-open; cleared back to
    /// `false` the moment that probe's outcome is recorded.
    half_open_probe_in_flight: bool,
}

pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

/// What a caller should do, decided at the moment it asks to proceed.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    /// Proceed and call the wrapped fetcher.
    Proceed,
    /// Breaker is open; do not call the fetcher.
    Reject,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                phase: BreakerPhase::Closed,
                failures: 0,
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
            config,
        }
    }

    pub fn phase(&self) -> BreakerPhase {
        self.evaluate_transition();
        self.state.lock().unwrap_or_else(|e| e.into_inner()).phase
    }

    /// Re-evaluates `open -> half_open` based on elapsed cooldown. Called
    /// by `phase`/`admit` so an external reader never observes a stale
    /// `open` past the cooldown window.
    fn evaluate_transition(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.phase == BreakerPhase::Open {
            if let Some(opened_at) = state.opened_at {
                if opened_at.elapsed() >= self.config.cooldown {
                    tracing::info!("breaker: open -> half_open after cooldown");
                    state.phase = BreakerPhase::HalfOpen;
                    state.half_open_probe_in_flight = false;
                }
            }
        }
    }

    /// Asks permission to call the wrapped fetcher. In `half_open`, only
    /// the first caller to ask is admitted as the probe; later callers in
    /// the same window are rejected until the probe's outcome resolves.
    pub fn admit(&self) -> Admission {
        self.evaluate_transition();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.phase {
            BreakerPhase::Closed => Admission::Proceed,
            BreakerPhase::Open => Admission::Reject,
            BreakerPhase::HalfOpen => {
                if state.half_open_probe_in_flight {
                    Admission::Reject
                } else {
                    state.half_open_probe_in_flight = true;
                    Admission::Proceed
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.phase {
            BreakerPhase::Closed => {
                state.failures = 0;
            }
            BreakerPhase::HalfOpen => {
                tracing::info!("breaker: half_open -> closed after successful probe");
                state.phase = BreakerPhase::Closed;
                state.failures = 0;
                state.opened_at = None;
                state.half_open_probe_in_flight = false;
            }
            BreakerPhase::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.phase {
            BreakerPhase::Closed => {
                state.failures += 1;
                if state.failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = state.failures,
                        "breaker: closed -> open after threshold"
                    );
                    state.phase = BreakerPhase::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            BreakerPhase::HalfOpen => {
                tracing::warn!("breaker: half_open -> open after failed probe");
                state.phase = BreakerPhase::Open;
                state.opened_at = Some(Instant::now());
                state.half_open_probe_in_flight = false;
            }
            BreakerPhase::Open => {}
        }
    }
}
