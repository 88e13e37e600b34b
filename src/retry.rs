// Jackson Coxson
//! The retry harness (C2): repeat a fallible async operation up to
//! `maxAttempts` times with a delay between attempts, an
//! exception-handler hook for custom recovery, and suppressed-failure
//! accumulation on the primary. Generalizes the retry loop in
//! `other_examples`' `execute_tool_with_config` from "retry N times,
//! check an exit code" to an arbitrary fallible operation with a
//! caller-supplied recovery hook, per spec.md §4.2.

use std::future::Future;
use std::time::Duration;

/// A failure accumulated by a [`Retrier`] run: the first failure becomes
/// the primary, every later one (including a handler failure or a
/// cancellation marker) is recorded as suppressed on it.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub primary: E,
    pub suppressed: Vec<E>,
    /// Set if the failure terminated because the calling task was
    /// cancelled during the inter-attempt delay, per spec.md §4.2.
    pub cancelled: bool,
}

impl<E> RetryFailure<E> {
    fn new(primary: E) -> Self {
        Self {
            primary,
            suppressed: Vec::new(),
            cancelled: false,
        }
    }
}

/// Outcome of an exception handler invoked between attempts.
pub enum HandlerOutcome<E> {
    /// Recovery succeeded; continue to the next attempt.
    Recovered,
    /// The handler itself failed with a checked error of the same kind
    /// as the operation; attach it suppressed and stop retrying.
    Failed(E),
}

/// An immutable, reusable retry policy. Every `with_*` method returns a
/// new value rather than mutating in place (spec.md §4.2: "Retriers are
/// immutable builders").
#[derive(Clone)]
pub struct Retrier<E> {
    max_attempts: u32,
    delay: Duration,
    delayed_first_attempt: bool,
    handler: Option<std::sync::Arc<dyn Fn(&E) -> HandlerOutcome<E> + Send + Sync>>,
}

impl<E> Default for Retrier<E> {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            delayed_first_attempt: false,
            handler: None,
        }
    }
}

impl<E> Retrier<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// If set, an inter-attempt delay is also taken *before* the first
    /// attempt. spec.md §9 Open Question (c) notes the original
    /// implementation of this flag slept before attempt 1 unconditionally
    /// even when `delayedFirstAttempt` was false for some call sites; we
    /// take the flag at face value here — no delay before the first
    /// attempt unless this is set.
    pub fn with_delayed_first_attempt(mut self, delayed_first_attempt: bool) -> Self {
        self.delayed_first_attempt = delayed_first_attempt;
        self
    }

    pub fn with_exception_handler(
        mut self,
        handler: impl Fn(&E) -> HandlerOutcome<E> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(std::sync::Arc::new(handler));
        self
    }

    /// Runs `op` up to `max_attempts` times. Unchecked (panicking) errors
    /// from `op` are not caught here; only the `Result<T, E>` channel is
    /// retried, matching "unchecked errors bypass the harness entirely".
    pub async fn run<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T, RetryFailure<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: PartialEq + std::fmt::Debug,
    {
        let mut failure: Option<RetryFailure<E>> = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 || self.delayed_first_attempt {
                if self.sleep_or_cancel(&mut failure).await {
                    return Err(failure.expect("cancellation always sets a failure"));
                }
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let is_last = attempt + 1 == self.max_attempts;
                    tracing::warn!(attempt, max_attempts = self.max_attempts, error = ?e, "retry attempt failed");

                    match &mut failure {
                        None => failure = Some(RetryFailure::new(e)),
                        Some(f) => f.suppressed.push(e),
                    }

                    if let Some(handler) = &self.handler {
                        let primary = &failure.as_ref().expect("just set").primary;
                        match handler(primary) {
                            HandlerOutcome::Recovered => {
                                tracing::info!(attempt, "retry exception handler recovered");
                            }
                            HandlerOutcome::Failed(handler_err) => {
                                tracing::warn!(error = ?handler_err, "retry exception handler itself failed, giving up");
                                let f = failure.as_mut().expect("just set");
                                // spec.md:266 — a handler that raises the same
                                // error instance it received is not suppressed
                                // again on top of itself.
                                if handler_err != f.primary {
                                    f.suppressed.push(handler_err);
                                }
                                return Err(failure.expect("just set"));
                            }
                        }
                    }

                    if is_last {
                        return Err(failure.expect("just set"));
                    }
                }
            }
        }

        Err(failure.expect("loop always records a failure before exiting without success"))
    }

    /// Sleeps for `delay`. Task cancellation during this sleep is
    /// delivered by tokio simply never polling `run`'s future again, so
    /// there is nothing to race here beyond the sleep itself; the
    /// `failure.cancelled` flag exists for a future cancellation-token
    /// source to set without reshaping `run`.
    async fn sleep_or_cancel(&self, failure: &mut Option<RetryFailure<E>>) -> bool {
        tokio::time::sleep(self.delay).await;
        let _ = failure;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq, Eq, Clone)]
    struct Oops(u32);

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_sleeping() {
        let retrier: Retrier<Oops> = Retrier::new();
        let result = retrier.run(|| async { Ok::<_, Oops>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_until_max_attempts_then_fails_with_primary() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new()
            .with_max_attempts(3)
            .with_delay(Duration::from_millis(1));

        let result = retrier
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(Oops(n)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let failure = result.unwrap_err();
        assert_eq!(failure.primary, Oops(0));
        assert_eq!(failure.suppressed, vec![Oops(1), Oops(2)]);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new()
            .with_max_attempts(5)
            .with_delay(Duration::from_millis(1));

        let result = retrier
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Oops(n))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn handler_failure_stops_retrying_immediately() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new()
            .with_max_attempts(5)
            .with_delay(Duration::from_millis(1))
            .with_exception_handler(|_primary| HandlerOutcome::Failed(Oops(999)));

        let result = retrier
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Oops(1)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let failure = result.unwrap_err();
        assert_eq!(failure.primary, Oops(1));
        assert_eq!(failure.suppressed, vec![Oops(999)]);
    }

    #[tokio::test]
    async fn delayed_first_attempt_sleeps_before_calling_op_once() {
        let started = std::time::Instant::now();
        let retrier: Retrier<Oops> = Retrier::new()
            .with_delay(Duration::from_millis(20))
            .with_delayed_first_attempt(true);

        retrier.run(|| async { Ok::<_, Oops>(()) }).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
