// Retry - Bounded polling primitive shared by every wait in the harness
// Principle: Every wait has a ceiling; single-probe failures never escape the loop

use crate::error::HarnessError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of one probe of external state
#[derive(Debug)]
pub enum Probe<T> {
    /// Condition holds, stop polling
    Ready(T),
    /// Condition does not hold yet; the string describes what was observed
    Pending(String),
}

/// Why a bounded poll gave up
#[derive(Debug)]
pub enum PollError {
    /// Deadline passed without the condition holding
    Timeout {
        label: String,
        elapsed: Duration,
        last_observed: String,
    },
    /// A probe reported a failure that must not be waited out
    Fatal(HarnessError),
}

impl From<PollError> for HarnessError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Timeout {
                label,
                elapsed,
                last_observed,
            } => HarnessError::Assertion(format!(
                "wait for {} timed out after {:?} (last observed: {})",
                label, elapsed, last_observed
            )),
            PollError::Fatal(e) => e,
        }
    }
}

/// Poll `probe` every `interval` until it reports `Ready`, a fatal error, or
/// `timeout` elapses.
///
/// The probe always runs at least once. A probe still in flight at the deadline is
/// dropped and its result discarded. Returns as soon as the condition holds.
pub async fn poll_until<T, F, Fut>(
    label: &str,
    interval: Duration,
    timeout: Duration,
    mut probe: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, HarnessError>>,
{
    let started = Instant::now();
    let deadline = started + timeout;
    let mut last_observed = String::from("nothing");
    let mut attempts: u64 = 0;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        attempts += 1;

        // First probe gets the full budget even with a zero timeout
        let budget = if attempts == 1 && remaining.is_zero() {
            interval
        } else {
            remaining
        };

        match tokio::time::timeout(budget, probe()).await {
            Ok(Ok(Probe::Ready(value))) => {
                debug!("{} ready after {} probes", label, attempts);
                return Ok(value);
            }
            Ok(Ok(Probe::Pending(observed))) => {
                debug!("{} pending: {}", label, observed);
                last_observed = observed;
            }
            Ok(Err(e)) => return Err(PollError::Fatal(e)),
            Err(_) => {
                last_observed = format!("probe still in flight: {}", last_observed);
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(PollError::Timeout {
                label: label.to_string(),
                elapsed: started.elapsed(),
                last_observed,
            });
        }
        tokio::time::sleep(interval.min(remaining)).await;
    }
}

/// Run `op`, retrying after `backoff` while it fails with a retryable transport
/// error, at most `max_retries` extra times.
pub async fn retry_transport<T, F, Fut>(
    max_retries: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HarnessError>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && retries < max_retries => {
                retries += 1;
                debug!("transport retry {}/{}: {}", retries, max_retries, e);
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}
