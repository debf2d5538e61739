//! Retry policy applied by [`Publisher`](super::Publisher) to every publishing attempt.
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_DELAY_STEP: Duration = Duration::from_millis(10);

/// Computes how long to wait after the given (1-based) failed attempt.
pub type DelayStrategy = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Wait the same amount of time after every failed attempt.
pub fn constant_delay(delay: Duration) -> impl Fn(u32) -> Duration + Send + Sync + Clone {
    move |_attempt| delay
}

/// Wait `step × attempt` after a failed attempt: `step` after the first one, `2 × step` after
/// the second one, etc.
pub fn linear_delay(step: Duration) -> impl Fn(u32) -> Duration + Send + Sync + Clone {
    move |attempt| step.saturating_mul(attempt)
}

/// How many times a publish is attempted and how long to wait in between.
///
/// Defaults to 10 attempts with a linear delay of 10ms × attempt.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: DelayStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, linear_delay(DEFAULT_DELAY_STEP))
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one attempt.
    pub fn new(
        max_attempts: u32,
        delay: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Arc::new(delay),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The wait after the given failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        (self.delay)(attempt)
    }

    /// Run `operation` until it succeeds or `max_attempts` is reached.
    ///
    /// `operation` receives the 1-based attempt number. The last error is returned when all
    /// attempts fail.
    pub(crate) async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay(attempt);
                    warn!(attempt, ?delay, error = %e, "Publishing attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
