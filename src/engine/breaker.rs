use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

const HALF_OPEN_SUCCESSES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct CircuitState {
    state: State,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Three-state circuit guarding the transport.
///
/// closed → open after `max_failures` consecutive failures; open → half-open
/// once `reset_timeout` has elapsed; half-open → closed after two consecutive
/// successes, back to open on any failure.
#[derive(Debug)]
pub struct Circuit {
    max_failures: u32,
    reset_timeout: Duration,
    state: Mutex<CircuitState>,
}

impl Circuit {
    #[must_use]
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Circuit {
            max_failures: max_failures.max(1),
            reset_timeout,
            state: Mutex::new(CircuitState {
                state: State::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// True when a call may proceed. An open circuit flips to half-open once
    /// the reset timeout has passed; until then callers are rejected without
    /// touching the transport.
    #[must_use]
    pub fn allow(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return true;
        };
        match state.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let elapsed = state
                    .opened_at
                    .map(|opened| opened.elapsed())
                    .unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    debug!("circuit half-open after {:?}", elapsed);
                    state.state = State::HalfOpen;
                    state.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Feeds the outcome of one permitted call back into the machine. The
    /// signal is the error returned by the chain, not the verification
    /// outcome.
    pub fn record(&self, success: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if success {
            match state.state {
                State::Closed => {
                    state.consecutive_failures = 0;
                }
                State::HalfOpen => {
                    state.consecutive_successes += 1;
                    if state.consecutive_successes >= HALF_OPEN_SUCCESSES {
                        debug!("circuit closed");
                        state.state = State::Closed;
                        state.consecutive_failures = 0;
                        state.opened_at = None;
                    }
                }
                State::Open => {}
            }
        } else {
            match state.state {
                State::Closed => {
                    state.consecutive_failures += 1;
                    if state.consecutive_failures >= self.max_failures {
                        warn!(
                            failures = state.consecutive_failures,
                            "circuit opened after consecutive failures"
                        );
                        state.state = State::Open;
                        state.opened_at = Some(Instant::now());
                    }
                }
                State::HalfOpen => {
                    warn!("circuit re-opened from half-open");
                    state.state = State::Open;
                    state.opened_at = Some(Instant::now());
                    state.consecutive_successes = 0;
                }
                State::Open => {}
            }
        }
    }
}
