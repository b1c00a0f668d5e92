use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{error, warn};

use crate::context::LogContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between attempts. Zero retries immediately.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(3)
    }
}

/// All attempts failed. Holds the last error.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.last)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Exhausted<E> {}

/// Runs `op` until it succeeds or `policy.max_attempts` is reached.
///
/// Each failure is logged with `log`; exhaustion is logged at error and
/// returned, never panicked on. A policy of zero attempts still runs once.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    log: &LogContext,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                warn!(
                    "{}: attempt {}/{} failed: {}",
                    log, attempt, max_attempts, err
                );
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
                attempt += 1;
            }
            Err(err) => {
                error!("{}: giving up after {} attempts: {}", log, attempt, err);
                return Err(Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
        }
    }
}
