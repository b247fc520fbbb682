//! Reconnection policy: backoff arithmetic plus the state machine that the
//! service supervisor drives from transport lifecycle and network signals.

use std::time::Duration;

use rand::RngExt;

/// Reconnect/backoff configuration.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BackoffConfig {
    pub(crate) initial_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) factor: f64,
    pub(crate) jitter: f64,
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Initial reconnect delay must be > 0".to_string());
        }
        if self.max_delay.is_zero() {
            return Err("Max reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max reconnect delay must be >= initial reconnect delay".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

pub(crate) fn calculate_backoff(config: BackoffConfig, attempt: u32) -> Duration {
    let initial = config.initial_delay.as_secs_f64();
    let max = config.max_delay.as_secs_f64();
    let exponent = config.factor.powf(f64::from(attempt));
    let base = (initial * exponent).min(max);

    if config.jitter == 0.0 {
        return Duration::from_secs_f64(base);
    }

    let mut rng = rand::rng();
    let randomized = rng.random_range(0.0..=base);
    let blended = base * (1.0 - config.jitter) + randomized * config.jitter;
    Duration::from_secs_f64(blended)
}

/// Reconnection state.
#[derive(Clone, Debug, PartialEq)]
pub enum ReconnectState {
    /// Nothing attempted yet.
    Idle,
    /// A connect attempt is in flight. `attempt` 0 is the initial connect.
    Connecting { attempt: u32 },
    /// Transport is up.
    Connected,
    /// Waiting `delay` before retry number `attempt + 1`.
    Backoff { attempt: u32, delay: Duration },
    /// Network is offline; attempts are suppressed.
    Paused,
    /// Attempt cap exhausted; the caller is in degraded mode.
    Suspended,
}

/// What the supervisor should do after feeding the policy an input.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// Start a connect attempt now.
    Connect,
    /// Sleep for the delay, then call [`ReconnectionPolicy::on_backoff_elapsed`].
    Wait(Duration),
    /// Do nothing until the next input.
    Idle,
    /// Give up and surface degraded mode.
    Suspend,
}

/// Pure reconnection state machine.
///
/// Holds no timers and performs no I/O; the caller owns both and feeds the
/// policy lifecycle inputs, executing the returned [`Decision`].
#[derive(Debug)]
pub struct ReconnectionPolicy {
    backoff: BackoffConfig,
    max_attempts: u32,
    state: ReconnectState,
    attempt: u32,
    online: bool,
}

impl ReconnectionPolicy {
    pub(crate) fn new(backoff: BackoffConfig, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts,
            state: ReconnectState::Idle,
            attempt: 0,
            online: true,
        }
    }

    /// Current state.
    pub fn state(&self) -> &ReconnectState {
        &self.state
    }

    /// Number of consecutive failed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Begin the initial connect.
    pub fn start(&mut self) -> Decision {
        if !self.online {
            self.state = ReconnectState::Paused;
            return Decision::Idle;
        }
        self.attempt = 0;
        self.state = ReconnectState::Connecting { attempt: 0 };
        Decision::Connect
    }

    /// The transport reported a successful connect.
    pub fn on_connected(&mut self) {
        self.attempt = 0;
        self.state = ReconnectState::Connected;
    }

    /// The transport reported an error or a disconnect.
    pub fn on_failure(&mut self) -> Decision {
        match self.state {
            ReconnectState::Connected | ReconnectState::Connecting { .. } => {}
            // Late failure from a transport we already stopped caring about.
            _ => return Decision::Idle,
        }

        if !self.online {
            self.state = ReconnectState::Paused;
            return Decision::Idle;
        }

        if self.attempt >= self.max_attempts {
            self.state = ReconnectState::Suspended;
            return Decision::Suspend;
        }

        let delay = calculate_backoff(self.backoff, self.attempt);
        self.state = ReconnectState::Backoff {
            attempt: self.attempt,
            delay,
        };
        Decision::Wait(delay)
    }

    /// A connect attempt failed for a reason retrying cannot fix.
    ///
    /// Suspends immediately; [`on_manual_retry`](Self::on_manual_retry) and
    /// [`on_online`](Self::on_online) still restart from attempt 0.
    pub fn on_fatal(&mut self) -> Decision {
        match self.state {
            ReconnectState::Connecting { .. } => {
                self.state = ReconnectState::Suspended;
                Decision::Suspend
            }
            _ => Decision::Idle,
        }
    }

    /// The backoff delay has elapsed.
    pub fn on_backoff_elapsed(&mut self) -> Decision {
        let ReconnectState::Backoff { attempt, .. } = self.state else {
            return Decision::Idle;
        };
        self.attempt = attempt.saturating_add(1);
        self.state = ReconnectState::Connecting {
            attempt: self.attempt,
        };
        Decision::Connect
    }

    /// The network monitor reported offline.
    pub fn on_offline(&mut self) -> Decision {
        self.online = false;
        match self.state {
            // A live transport is left alone; its eventual drop lands in Paused.
            ReconnectState::Connected => Decision::Idle,
            _ => {
                self.state = ReconnectState::Paused;
                Decision::Idle
            }
        }
    }

    /// The network monitor reported online.
    ///
    /// Failures accumulated while offline were network-caused, so the
    /// attempt counter restarts at zero.
    pub fn on_online(&mut self) -> Decision {
        self.online = true;
        match self.state {
            ReconnectState::Paused | ReconnectState::Suspended => self.restart(),
            _ => Decision::Idle,
        }
    }

    /// Explicit caller request to retry (e.g. a "tap to reconnect" action).
    pub fn on_manual_retry(&mut self) -> Decision {
        match self.state {
            ReconnectState::Suspended | ReconnectState::Backoff { .. } if self.online => {
                self.restart()
            }
            _ => Decision::Idle,
        }
    }

    /// The caller tore the connection down on purpose.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.state = ReconnectState::Idle;
    }

    fn restart(&mut self) -> Decision {
        self.attempt = 0;
        let delay = calculate_backoff(self.backoff, 0);
        self.state = ReconnectState::Backoff { attempt: 0, delay };
        Decision::Wait(delay)
    }
}
