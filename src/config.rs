//! Tunables shared by the transports, the server and the supervisor.

use std::time::Duration;

/// Wire protocol limits.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Longest accepted message line, terminator included.
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
}

/// Backoff used while a local pipe endpoint does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff: f64,
    /// Give up once this much time has passed since the first attempt.
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(30);
    pub const DEFAULT_BACKOFF: f64 = 1.5;
    pub const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(2);

    /// Fail on the first attempt.
    pub fn none() -> Self {
        Self {
            max_elapsed: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Self::DEFAULT_INITIAL_DELAY,
            backoff: Self::DEFAULT_BACKOFF,
            max_elapsed: Self::DEFAULT_MAX_ELAPSED,
        }
    }
}

pub struct SupervisorConfig;

impl SupervisorConfig {
    /// How long a terminated server may take to exit before it is killed.
    pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);
    pub const TERMINATE_POLL: Duration = Duration::from_millis(20);
    /// Interpreter used for script servers when none is given explicitly.
    pub const INTERPRETER_ENV: &'static str = "INTERFACE_PROXY_INTERPRETER";
}
