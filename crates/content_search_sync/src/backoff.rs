//! A composable retry policy, applied as a plain value rather than by
//! stacking decorators the way the source system does. See `with_backoff`
//! for the call site shape: one `Backoff` around the whole pipeline pass
//! (classifying source-connection errors) and one around each sink flush
//! (classifying sink-connection errors).

use std::time::Duration;

use crate::errors::EtlError;

const DEFAULT_START_SLEEP: Duration = Duration::from_millis(100);
const DEFAULT_BORDER_SLEEP: Duration = Duration::from_secs(10);
const DEFAULT_FACTOR: u32 = 2;

/// Naive exponential backoff: `sleep *= factor` on every matched failure,
/// capped at `border_sleep`, reset to `start_sleep` on the next success.
///
/// Unlike [`sync_types`]-style jittered backoff elsewhere in the stack, this
/// one is deterministic on purpose — §8 property 7 requires the total sleep
/// across N failures to equal a closed-form sum, which jitter would make
/// untestable.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    start_sleep: Duration,
    border_sleep: Duration,
    factor: u32,
    max_retries: Option<u32>,
    sleep: Duration,
    failures: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_START_SLEEP, DEFAULT_BORDER_SLEEP, DEFAULT_FACTOR)
    }
}

impl Backoff {
    pub fn new(start_sleep: Duration, border_sleep: Duration, factor: u32) -> Self {
        Self {
            start_sleep,
            border_sleep,
            factor,
            max_retries: None,
            sleep: start_sleep,
            failures: 0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn reset(&mut self) {
        self.sleep = self.start_sleep;
        self.failures = 0;
    }

    /// Advances the policy after a matched failure and returns how long to
    /// sleep before the next attempt, or `None` if `max_retries` was just
    /// exceeded.
    fn fail(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_retries
            && self.failures >= max
        {
            return None;
        }
        self.sleep = self
            .sleep
            .saturating_mul(self.factor)
            .min(self.border_sleep);
        self.failures += 1;
        Some(self.sleep)
    }
}

/// Retries `op` under `backoff`'s policy. Only errors for which
/// `is_retriable(&e)` is true count toward the backoff; any other error
/// propagates immediately, uncounted, without sleeping.
///
/// On a configured-class error once `max_retries` is exhausted, returns
/// [`EtlError::RetriesExhausted`] wrapping the last observed error.
pub async fn with_backoff<T, F, Fut>(
    mut backoff: Backoff,
    is_retriable: impl Fn(&EtlError) -> bool,
    mut op: F,
) -> Result<T, EtlError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, EtlError>>,
{
    loop {
        match op().await {
            Ok(value) => {
                backoff.reset();
                return Ok(value);
            },
            Err(e) if is_retriable(&e) => {
                let attempts = backoff.failures() + 1;
                match backoff.fail() {
                    Some(delay) => {
                        tracing::warn!(
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying after transient error",
                        );
                        tokio::time::sleep(delay).await;
                    },
                    None => {
                        return Err(EtlError::RetriesExhausted {
                            attempts,
                            last_error: Box::new(e),
                        });
                    },
                }
            },
            Err(e) => return Err(e),
        }
    }
}
