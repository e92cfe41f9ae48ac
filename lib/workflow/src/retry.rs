//! Bounded retry with randomized back-off for numerically unstable steps.
//!
//! A failure is either a [`RunError::Unstable`] from the operation or a
//! result made entirely of non-numeric sentinels. Before retry `k` the
//! wrapper sleeps a whole number of seconds drawn uniformly from
//! `[10(k-1)+4, 10(k-1)+10]`. Any other error propagates immediately.
//!
//! When every attempt fails, [`FailureMode::Warn`] accepts the sentinel
//! result and flags it as degraded; [`FailureMode::Error`] returns the last
//! error.

use crate::interface::{Interface, PortValues, RunError};
use crate::port::{InputPort, OutputPort, PortKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Output port added to wrapped operations, `true` when the result is a
/// sentinel accepted after exhausting retries.
pub const DEGRADED_PORT: &str = "retry_degraded";

/// What to do once every attempt has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Accept the sentinel result and warn.
    #[default]
    Warn,
    /// Return the last error.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub failure_mode: FailureMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            failure_mode: FailureMode::Warn,
        }
    }
}

/// Seconds to back off before the `retry`-th retry (1-based).
#[must_use]
pub fn backoff_range(retry: u32) -> RangeInclusive<u64> {
    let base = 10 * u64::from(retry.saturating_sub(1));
    (base + 4)..=(base + 10)
}

/// Something that can block the current thread.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Result of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    /// An attempt produced a usable value.
    Success { value: T, attempts: u32 },
    /// Every attempt failed and the sentinel was accepted.
    Degraded {
        value: T,
        attempts: u32,
        last_error: Option<RunError>,
    },
}

impl<T> RetryOutcome<T> {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    #[must_use]
    pub fn into_value(self) -> T {
        match self {
            Self::Success { value, .. } | Self::Degraded { value, .. } => value,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy with the given failure mode.
    #[must_use]
    pub fn with_failure_mode(failure_mode: FailureMode) -> Self {
        Self {
            failure_mode,
            ..Self::default()
        }
    }

    /// Runs `op` until it succeeds or the retry budget is spent.
    ///
    /// `op` receives the 0-based attempt number. `is_sentinel` recognises a
    /// result that counts as a failure; `sentinel` builds the value accepted
    /// in warn mode when no attempt returned one.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable error as soon as it occurs, and the last
    /// error after exhausting retries in [`FailureMode::Error`].
    pub fn execute<T, F, P, B, S, R>(
        &self,
        mut op: F,
        is_sentinel: P,
        sentinel: B,
        sleeper: &S,
        rng: &mut R,
    ) -> Result<RetryOutcome<T>, RunError>
    where
        F: FnMut(u32) -> Result<T, RunError>,
        P: Fn(&T) -> bool,
        B: FnOnce() -> T,
        S: Sleeper + ?Sized,
        R: Rng,
    {
        let mut last_value = None;
        let mut last_error = None;
        let attempts = self.max_retries + 1;

        for attempt in 0..attempts {
            if attempt > 0 {
                let seconds = rng.gen_range(backoff_range(attempt));
                debug!(attempt, seconds, "backing off before retry");
                sleeper.sleep(Duration::from_secs(seconds));
            }

            match op(attempt) {
                Ok(value) if !is_sentinel(&value) => {
                    return Ok(RetryOutcome::Success {
                        value,
                        attempts: attempt + 1,
                    });
                }
                Ok(value) => {
                    debug!(attempt, "attempt produced only sentinel values");
                    last_value = Some(value);
                }
                Err(err) if err.is_unstable() => {
                    debug!(attempt, error = %err, "attempt failed");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        match self.failure_mode {
            FailureMode::Warn => {
                warn!(
                    attempts,
                    "giving up after retries, accepting sentinel values; the mask is likely empty or degenerate"
                );
                Ok(RetryOutcome::Degraded {
                    value: last_value.unwrap_or_else(sentinel),
                    attempts,
                    last_error,
                })
            }
            FailureMode::Error => Err(last_error.unwrap_or_else(|| RunError::Unstable {
                reason: format!("all {attempts} attempts produced only non-numeric values"),
            })),
        }
    }
}

/// Whether every array in `values` holds only nulls (NaN once serialized).
///
/// Values without any array are never sentinels.
#[must_use]
pub fn is_sentinel_values(values: &PortValues) -> bool {
    fn all_null(value: &JsonValue) -> bool {
        match value {
            JsonValue::Null => true,
            JsonValue::Array(items) => items.iter().all(all_null),
            _ => false,
        }
    }

    let mut arrays = values.values().filter(|v| v.is_array()).peekable();
    arrays.peek().is_some() && arrays.all(all_null)
}

/// Decorates an operation with a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Retrying {
    inner: Arc<dyn Interface>,
    policy: RetryPolicy,
}

impl Retrying {
    #[must_use]
    pub fn new(inner: Arc<dyn Interface>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs the wrapped operation with an explicit sleeper and RNG.
    ///
    /// # Errors
    ///
    /// See [`RetryPolicy::execute`].
    pub fn run_with<S, R>(
        &self,
        inputs: &PortValues,
        sleeper: &S,
        rng: &mut R,
    ) -> Result<PortValues, RunError>
    where
        S: Sleeper + ?Sized,
        R: Rng,
    {
        let outcome = self.policy.execute(
            |_| self.inner.run(inputs).map(Some),
            |values: &Option<PortValues>| values.as_ref().is_some_and(is_sentinel_values),
            || None,
            sleeper,
            rng,
        )?;

        let degraded = outcome.is_degraded();
        if degraded {
            warn!(interface = self.inner.name(), "retry budget exhausted");
        }
        let mut values = match outcome.into_value() {
            Some(values) => values,
            None => self.inner.sentinel_outputs(inputs)?,
        };
        values.insert(DEGRADED_PORT.to_string(), JsonValue::Bool(degraded));
        Ok(values)
    }
}

impl Interface for Retrying {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn inputs(&self) -> Vec<InputPort> {
        self.inner.inputs()
    }

    fn outputs(&self) -> Vec<OutputPort> {
        let mut outputs = self.inner.outputs();
        outputs.push(OutputPort::new(DEGRADED_PORT, PortKind::Boolean));
        outputs
    }

    fn command(&self) -> Option<&str> {
        self.inner.command()
    }

    fn parameters(&self) -> JsonValue {
        self.inner.parameters()
    }

    fn default_mem_gb(&self) -> f64 {
        self.inner.default_mem_gb()
    }

    fn sink_target(&self, inputs: &PortValues) -> Option<String> {
        self.inner.sink_target(inputs)
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        self.run_with(inputs, &ThreadSleeper, &mut rand::thread_rng())
    }

    fn sentinel_outputs(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        self.inner.sentinel_outputs(inputs)
    }
}
