//! Bounded retries around a single remote call.

use crate::backoff::BackoffSchedule;
use crate::error::RemoteError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One remote call in flight. Created per `invoke`, dropped at its outcome.
#[derive(Debug, Clone)]
pub struct Operation {
    pub action: String,
    pub attempt: u32,
    pub last_error: Option<RemoteError>,
}

impl Operation {
    fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            attempt: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Retrying { delay: Duration },
    GaveUp,
}

/// Reported to the observer after every attempt.
#[derive(Debug)]
pub struct AttemptEvent<'a> {
    pub operation: &'a Operation,
    pub max_attempts: u32,
    pub outcome: AttemptOutcome,
}

pub type AttemptObserver = Arc<dyn Fn(&AttemptEvent<'_>) + Send + Sync>;

#[derive(Clone)]
pub struct RetryingInvoker {
    schedule: BackoffSchedule,
    observer: Option<AttemptObserver>,
}

impl std::fmt::Debug for RetryingInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingInvoker")
            .field("schedule", &self.schedule)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl RetryingInvoker {
    pub fn new(schedule: BackoffSchedule) -> Self {
        Self {
            schedule,
            observer: None,
        }
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&AttemptEvent<'_>) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Runs `call` with the default classifier ([`RemoteError::is_retryable`]).
    pub async fn invoke_default<T, F, Fut>(&self, action: &str, call: F) -> Result<T, RemoteError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.invoke(action, RemoteError::is_retryable, call).await
    }

    /// Runs `call` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the schedule's attempts are used up. `call` receives the
    /// 1-based attempt number.
    pub async fn invoke<T, F, Fut, C>(
        &self,
        action: &str,
        is_retryable: C,
        mut call: F,
    ) -> Result<T, RemoteError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
        C: Fn(&RemoteError) -> bool,
    {
        let max_attempts = self.schedule.attempts();
        let mut op = Operation::new(action);

        loop {
            op.attempt += 1;
            let err = match call(op.attempt).await {
                Ok(value) => {
                    if op.attempt > 1 {
                        debug!(action, attempt = op.attempt, "succeeded after retry");
                    }
                    self.notify(&op, max_attempts, AttemptOutcome::Succeeded);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let retryable = is_retryable(&err);
            op.last_error = Some(err);

            if !retryable {
                self.notify(&op, max_attempts, AttemptOutcome::GaveUp);
                return Err(take_error(&mut op));
            }

            if op.attempt >= max_attempts {
                self.notify(&op, max_attempts, AttemptOutcome::GaveUp);
                warn!(action, attempts = op.attempt, "retries exhausted");
                let attempts = op.attempt;
                return Err(RemoteError::RetriesExhausted {
                    action: op.action.clone(),
                    attempts,
                    last: Box::new(take_error(&mut op)),
                });
            }

            let delay = self.delay_after(&op);
            if let Some(err) = op.last_error.as_ref() {
                warn!(
                    action,
                    attempt = op.attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retryable failure: {err}"
                );
            }
            self.notify(&op, max_attempts, AttemptOutcome::Retrying { delay });
            tokio::time::sleep(delay).await;
        }
    }

    fn delay_after(&self, op: &Operation) -> Duration {
        let backoff = self.schedule.delay_for(op.attempt);
        match op.last_error.as_ref().and_then(RemoteError::retry_after) {
            Some(hint) => backoff.max(hint).min(self.schedule.max_delay()),
            None => backoff,
        }
    }

    fn notify(&self, op: &Operation, max_attempts: u32, outcome: AttemptOutcome) {
        if let Some(observer) = &self.observer {
            observer(&AttemptEvent {
                operation: op,
                max_attempts,
                outcome,
            });
        }
    }
}

fn take_error(op: &mut Operation) -> RemoteError {
    op.last_error
        .take()
        .unwrap_or_else(|| RemoteError::rejected(op.action.clone(), "no error recorded"))
}
