//! Retry-until-satisfied polling with deadline semantics
//!
//! [`poll_until`] is the single primitive every wait in the harness goes
//! through: observe, evaluate, sleep for the interval, repeat until the
//! condition holds or the deadline passes. [`Poller`] binds it to an
//! [`ObservationSource`] for the common "one resource" and "one listing" cases.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::condition::Condition;
use crate::observe::{ObservationSource, ObservedState, ResourceKind, ResourceRef, Summarize};
use crate::Error;

/// Default time between observations (2 seconds)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default time to wait for a condition (10 minutes)
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Cadence and deadline for one wait
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollSpec {
    interval: Duration,
    timeout: Duration,
    retry_observation_errors: bool,
}

impl Default for PollSpec {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            retry_observation_errors: false,
        }
    }
}

impl PollSpec {
    /// Create a spec, rejecting zero durations and an interval longer than the timeout
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, Error> {
        if timeout.is_zero() {
            return Err(Error::validation("poll timeout must be greater than zero"));
        }
        if interval.is_zero() {
            return Err(Error::validation("poll interval must be greater than zero"));
        }
        if interval > timeout {
            return Err(Error::validation(format!(
                "poll interval {:?} exceeds timeout {:?}",
                interval, timeout
            )));
        }
        Ok(Self {
            interval,
            timeout,
            retry_observation_errors: false,
        })
    }

    /// Default interval with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, Error> {
        Self::new(DEFAULT_POLL_INTERVAL.min(timeout), timeout)
    }

    /// Keep polling through observation errors until the same deadline
    pub fn retry_observation_errors(mut self, retry: bool) -> Self {
        self.retry_observation_errors = retry;
        self
    }

    /// Time between observations
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Maximum time to wait
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether observation errors are retried instead of returned
    pub fn retries_observation_errors(&self) -> bool {
        self.retry_observation_errors
    }
}

/// Observe and evaluate until the condition holds or the spec's deadline passes.
///
/// Returns the first observation that satisfied the condition.
///
/// # Errors
/// * [`Error::Timeout`] when the deadline passes; carries the condition
///   description and a summary of the last observation
/// * Whatever `observe` returned, immediately, unless the spec retries
///   observation errors
pub async fn poll_until<S, F, Fut>(
    spec: &PollSpec,
    condition: &Condition<S>,
    mut observe: F,
) -> Result<S, Error>
where
    S: Summarize + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, Error>>,
{
    let start = Instant::now();
    let deadline = start + spec.timeout;
    // A hung observation must not hold the caller past one interval beyond the deadline
    let hard_deadline = deadline + spec.interval;
    let mut last_observed: Option<String> = None;
    let mut tick = 0u32;

    loop {
        tick += 1;

        match tokio::time::timeout_at(hard_deadline, observe()).await {
            Ok(Ok(state)) => {
                if condition.evaluate(&state) {
                    debug!(
                        condition = %condition.description(),
                        tick,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Condition satisfied"
                    );
                    return Ok(state);
                }
                let summary = state.summarize();
                trace!(condition = %condition.description(), tick, observed = %summary, "Condition not yet met");
                last_observed = Some(summary);
            }
            Ok(Err(e)) if spec.retry_observation_errors => {
                warn!(
                    condition = %condition.description(),
                    tick,
                    error = %e,
                    "Observation failed, retrying until deadline"
                );
                last_observed = Some(format!("observation error: {}", e));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::timeout(
                    condition.description(),
                    start.elapsed(),
                    last_observed.or_else(|| Some("observation did not complete".to_string())),
                ));
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::timeout(
                condition.description(),
                start.elapsed(),
                last_observed,
            ));
        }

        tokio::time::sleep_until((now + spec.interval).min(deadline)).await;
    }
}

/// Poll loops bound to an observation source
///
/// Holds no per-wait state; any number of waits may run concurrently on
/// clones of the same poller.
#[derive(Clone)]
pub struct Poller {
    source: Arc<dyn ObservationSource>,
}

impl Poller {
    /// Create a poller over the given source
    pub fn new(source: Arc<dyn ObservationSource>) -> Self {
        Self { source }
    }

    /// The underlying observation source
    pub fn source(&self) -> &Arc<dyn ObservationSource> {
        &self.source
    }

    /// Wait until a single resource exists and satisfies `condition`
    ///
    /// A missing resource counts as "not yet" rather than an error.
    pub async fn wait_for(
        &self,
        spec: &PollSpec,
        target: &ResourceRef,
        condition: &Condition<ObservedState>,
    ) -> Result<ObservedState, Error> {
        let described = Condition::new(
            format!("{} {}", target, condition.description()),
            {
                let condition = condition.clone();
                move |state: &ObservedState| condition.evaluate(state)
            },
        )
        .when_present();

        let source = self.source.as_ref();
        let state = poll_until(spec, &described, move || source.get(target)).await?;
        state.ok_or_else(|| Error::observation(target.to_string(), "resource vanished"))
    }

    /// Wait until a listing satisfies `condition`
    pub async fn wait_for_listing(
        &self,
        spec: &PollSpec,
        kind: &ResourceKind,
        namespace: &str,
        selector: Option<&str>,
        condition: &Condition<Vec<ObservedState>>,
    ) -> Result<Vec<ObservedState>, Error> {
        let described = Condition::new(
            format!("{} in {}: {}", kind, namespace, condition.description()),
            {
                let condition = condition.clone();
                move |listing: &Vec<ObservedState>| condition.evaluate(listing)
            },
        );

        let source = self.source.as_ref();
        poll_until(spec, &described, move || {
            source.list(kind, namespace, selector.map(str::to_string))
        })
        .await
    }
}
