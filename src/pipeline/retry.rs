//! Retry controller: per-attempt timeouts, backoff delays, caller hooks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::pipeline::{Call, Middleware};
use crate::types::Request;
use crate::{Error, Result};

/// Per-attempt time limit.
#[derive(Clone, Default)]
pub enum RetryTimeout {
    /// No limit; the attempt runs until the transport settles.
    None,
    Fixed(Duration),
    /// Attempt-dependent limit, e.g. progressively longer timeouts.
    PerAttempt(Arc<dyn Fn(u32) -> Option<Duration> + Send + Sync>),
    #[default]
    Default,
}

impl RetryTimeout {
    fn for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryTimeout::None => None,
            RetryTimeout::Fixed(limit) => Some(*limit),
            RetryTimeout::PerAttempt(f) => f(attempt),
            RetryTimeout::Default => Some(Duration::from_secs(15)),
        }
    }
}

impl std::fmt::Debug for RetryTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryTimeout::None => f.write_str("None"),
            RetryTimeout::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            RetryTimeout::PerAttempt(_) => f.write_str("PerAttempt(..)"),
            RetryTimeout::Default => f.write_str("Default"),
        }
    }
}

/// Delay before the next attempt, indexed by the attempt that just failed.
///
/// A schedule yielding `None` makes the failure terminal; a present
/// zero-length delay retries immediately. Delay lists are strictly
/// index-bounded: once the attempt number is past the end, retries stop.
#[derive(Clone)]
pub enum RetrySchedule {
    Delays(Vec<Duration>),
    Fn(Arc<dyn Fn(u32) -> Option<Duration> + Send + Sync>),
}

impl Default for RetrySchedule {
    fn default() -> Self {
        RetrySchedule::Delays(vec![Duration::from_secs(1), Duration::from_secs(3)])
    }
}

impl RetrySchedule {
    fn after(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetrySchedule::Delays(delays) => delays.get(attempt as usize).copied(),
            RetrySchedule::Fn(f) => f(attempt),
        }
    }
}

impl std::fmt::Debug for RetrySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrySchedule::Delays(d) => f.debug_tuple("Delays").field(d).finish(),
            RetrySchedule::Fn(_) => f.write_str("Fn(..)"),
        }
    }
}

/// Which failing statuses are worth another attempt.
#[derive(Clone, Default)]
pub enum RetryStatuses {
    /// Anything outside the 2xx success range.
    #[default]
    Default,
    Codes(Vec<u16>),
    Predicate(Arc<dyn Fn(u16) -> bool + Send + Sync>),
}

impl RetryStatuses {
    fn should_retry(&self, status: u16) -> bool {
        match self {
            RetryStatuses::Default => !(200..300).contains(&status),
            RetryStatuses::Codes(codes) => codes.contains(&status),
            RetryStatuses::Predicate(f) => f(status),
        }
    }
}

impl std::fmt::Debug for RetryStatuses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryStatuses::Default => f.write_str("Default"),
            RetryStatuses::Codes(c) => f.debug_tuple("Codes").field(c).finish(),
            RetryStatuses::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

enum RetrySignal {
    Force,
    Abort,
}

/// Controls handed to the before-retry hook.
///
/// Cloneable, so a hook may stash them and signal later, during the delay:
/// [`RetryControls::force_retry`] collapses the remaining delay and runs the
/// next attempt now; [`RetryControls::abort`] rejects the whole call with
/// [`Error::Aborted`]. Abort wins when both fire.
#[derive(Clone)]
pub struct RetryControls {
    tx: mpsc::UnboundedSender<RetrySignal>,
}

impl RetryControls {
    pub fn force_retry(&self) {
        let _ = self.tx.send(RetrySignal::Force);
    }

    pub fn abort(&self) {
        let _ = self.tx.send(RetrySignal::Abort);
    }
}

/// What the before-retry hook sees.
pub struct RetryMeta {
    pub attempt: u32,
    pub delay: Duration,
    pub last_error: Error,
    pub controls: RetryControls,
}

/// Hook fired synchronously before every retry wait.
pub type BeforeRetryHook = Arc<dyn Fn(RetryMeta) + Send + Sync>;

/// Retry controller configuration.
#[derive(Clone, Default)]
pub struct RetryConfig {
    pub timeout: RetryTimeout,
    pub delays: RetrySchedule,
    pub statuses: RetryStatuses,
    pub allow_mutations: bool,
    pub allow_multipart: bool,
    pub on_before_retry: Option<BeforeRetryHook>,
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: RetryTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fixed_timeout(self, limit: Duration) -> Self {
        self.with_timeout(RetryTimeout::Fixed(limit))
    }

    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = RetrySchedule::Delays(delays);
        self
    }

    pub fn with_delay_fn(
        mut self,
        f: impl Fn(u32) -> Option<Duration> + Send + Sync + 'static,
    ) -> Self {
        self.delays = RetrySchedule::Fn(Arc::new(f));
        self
    }

    pub fn with_statuses(mut self, statuses: RetryStatuses) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn with_allow_mutations(mut self, allow: bool) -> Self {
        self.allow_mutations = allow;
        self
    }

    pub fn with_allow_multipart(mut self, allow: bool) -> Self {
        self.allow_multipart = allow;
        self
    }

    pub fn with_before_retry(mut self, hook: impl Fn(RetryMeta) + Send + Sync + 'static) -> Self {
        self.on_before_retry = Some(Arc::new(hook));
        self
    }
}

/// Timeout-bounded retry policy.
///
/// Attempts are numbered from 0; attempt 0 runs immediately. Each attempt may
/// be raced against a configured time limit, with expiry producing
/// [`Error::AttemptTimeout`] and discarding whatever the in-flight call would
/// have settled to. Transport failures, attempt timeouts, and status errors
/// passing the status predicate are retry candidates; everything else,
/// aborts included, is terminal and re-raised unchanged.
pub struct RetryMiddleware {
    config: RetryConfig,
}

impl RetryMiddleware {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    fn is_retry_candidate(&self, err: &Error) -> bool {
        match err {
            Error::Transport(_) | Error::AttemptTimeout { .. } => true,
            Error::Status { status, .. } => self.config.statuses.should_retry(*status),
            _ => false,
        }
    }

    async fn attempt(&self, request: &Request, next: &Call, attempt: u32) -> Result<crate::types::Response> {
        match self.config.timeout.for_attempt(attempt) {
            Some(limit) => match tokio::time::timeout(limit, next(request.clone())).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        request = %request.id(),
                        attempt,
                        timeout_ms = limit.as_millis() as u64,
                        "attempt timed out"
                    );
                    Err(Error::AttemptTimeout {
                        timeout_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => next(request.clone()).await,
        }
    }

    /// Run the hook, then wait out the delay while listening for
    /// force-retry/abort signals.
    async fn wait_before_retry(&self, attempt: u32, delay: Duration, last_error: &Error) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(hook) = &self.config.on_before_retry {
            hook(RetryMeta {
                attempt,
                delay,
                last_error: last_error.clone(),
                controls: RetryControls { tx },
            });
        } else {
            drop(tx);
        }

        // Signals sent synchronously from inside the hook are already queued.
        let mut forced = false;
        loop {
            match rx.try_recv() {
                Ok(RetrySignal::Abort) => {
                    return Err(Error::aborted("aborted in before-retry hook"))
                }
                Ok(RetrySignal::Force) => forced = true,
                Err(_) => break,
            }
        }
        if forced {
            return Ok(());
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                signal = rx.recv() => match signal {
                    Some(RetrySignal::Abort) => {
                        return Err(Error::aborted("aborted in before-retry hook"))
                    }
                    Some(RetrySignal::Force) => return Ok(()),
                    // Hook dropped its controls; just finish the delay.
                    None => break,
                },
            }
        }
        sleep.await;
        Ok(())
    }

    async fn run(&self, request: Request, next: Call) -> Result<crate::types::Response> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(&request, &next, attempt).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !self.is_retry_candidate(&err) {
                        return Err(err);
                    }
                    let Some(delay) = self.config.delays.after(attempt) else {
                        debug!(
                            request = %request.id(),
                            attempt,
                            "delay schedule exhausted; failure is terminal"
                        );
                        return Err(err);
                    };
                    debug!(
                        request = %request.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "scheduling retry"
                    );
                    self.wait_before_retry(attempt, delay, &err).await?;
                    attempt += 1;
                }
            }
        }
    }
}

impl Middleware for RetryMiddleware {
    fn apply(self: Arc<Self>, next: Call) -> Call {
        Arc::new(move |request| {
            let this = self.clone();
            let next = next.clone();
            Box::pin(async move {
                let excluded = match &request {
                    Request::Single(op) => {
                        (op.is_mutation() && !this.config.allow_mutations)
                            || (op.is_multipart() && !this.config.allow_multipart)
                    }
                    Request::Batch(_) => false,
                };
                if excluded {
                    return next(request).await;
                }
                this.run(request, next).await
            })
        })
    }
}
