//! # Retryer: one logical fetch with retries, backoff and cancellation.
//!
//! [`Retryer::start`] spawns a run that drives an operation until it succeeds,
//! fails terminally, or is cancelled. The run settles exactly once: either
//! `on_success` or `on_error` fires, then the [`FetchOutcome`] resolves.
//!
//! ## Loop
//! ```text
//! loop {
//!   ├─► call operation() (a panic while building the future counts as a failure)
//!   ├─► await attempt   (cancellable; a panic while polling counts as a failure)
//!   │       ├─ Ok  ──► on_success, settle Ok, exit
//!   │       └─ Err ──► cancelled?                  ─► on_error(Canceled), exit
//!   │                  not retryable / budget spent ─► on_error(err), exit
//!   │                  otherwise:
//!   │                    ├─ delay = retry_delay(failure_count)   (count before increment)
//!   │                    ├─ failure_count += 1
//!   │                    ├─ on_fail(failure_count, err, delay)
//!   │                    └─ sleep(delay) (cancellable) → continue
//! }
//! ```
//!
//! ## Cancellation
//! [`Retryer::cancel`] runs the configured `abort` callback once (used to signal
//! the fetch function), then interrupts the in-flight attempt or the pending
//! backoff sleep. The run settles as [`FetchError::Canceled`]; no retry fires
//! after a cancel, even if the operation ignores its signal.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use tokio::{select, sync::oneshot, time};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::FetchError;
use crate::policies::RetryDelay;

type AbortFn = Box<dyn FnOnce() + Send>;

/// Callbacks and policies of one retryer run.
pub struct RetryerConfig<T> {
    /// Number of retries after the first failed attempt.
    pub retry: u32,
    /// Delay before each retry, by failure count.
    pub retry_delay: RetryDelay,
    /// Invoked once on the first [`Retryer::cancel`].
    pub abort: Option<AbortFn>,
    /// Invoked once if the run settles with data.
    pub on_success: Option<Box<dyn FnOnce(&Arc<T>) + Send>>,
    /// Invoked once if the run settles with an error.
    pub on_error: Option<Box<dyn FnOnce(&FetchError) + Send>>,
    /// Invoked for every scheduled retry: `(failure_count, error, delay)`.
    pub on_fail: Option<Box<dyn Fn(u32, &FetchError, Duration) + Send + Sync>>,
}

impl<T> Default for RetryerConfig<T> {
    fn default() -> Self {
        Self {
            retry: crate::queries::options::DEFAULT_RETRY,
            retry_delay: RetryDelay::default(),
            abort: None,
            on_success: None,
            on_error: None,
            on_fail: None,
        }
    }
}

/// Cancellation handle of a running fetch.
///
/// Cheap to clone; all clones control the same run.
#[derive(Clone)]
pub struct Retryer {
    token: CancellationToken,
    abort: Arc<Mutex<Option<AbortFn>>>,
}

impl Retryer {
    /// Spawns a run of `operation` on the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn start<T, F, Fut>(mut operation: F, config: RetryerConfig<T>) -> (Self, FetchOutcome<T>)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
        T: Send + Sync + 'static,
    {
        let RetryerConfig {
            retry,
            retry_delay,
            abort,
            on_success,
            on_error,
            on_fail,
        } = config;

        let token = CancellationToken::new();
        let run_token = token.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = drive(
                &mut operation,
                retry,
                &retry_delay,
                on_fail.as_deref(),
                &run_token,
            )
            .await;

            match &result {
                Ok(data) => {
                    if let Some(cb) = on_success {
                        cb(data);
                    }
                }
                Err(err) => {
                    if let Some(cb) = on_error {
                        cb(err);
                    }
                }
            }
            let _ = tx.send(result);
        });

        let retryer = Self {
            token,
            abort: Arc::new(Mutex::new(abort)),
        };
        (retryer, FetchOutcome { rx })
    }

    /// Requests cancellation of the run.
    ///
    /// The abort callback runs on the first call only; later calls are no-ops.
    pub fn cancel(&self) {
        let abort = self
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(abort) = abort {
            abort();
        }
        self.token.cancel();
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl std::fmt::Debug for Retryer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retryer")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

async fn drive<T, F, Fut>(
    operation: &mut F,
    retry: u32,
    retry_delay: &RetryDelay,
    on_fail: Option<&(dyn Fn(u32, &FetchError, Duration) + Send + Sync)>,
    token: &CancellationToken,
) -> Result<Arc<T>, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut failure_count: u32 = 0;

    loop {
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| operation())) {
            Ok(attempt) => {
                select! {
                    biased;
                    _ = token.cancelled() => Err(FetchError::Canceled),
                    res = AssertUnwindSafe(attempt).catch_unwind() => {
                        res.unwrap_or_else(|panic| Err(FetchError::from_panic(panic)))
                    }
                }
            }
            Err(panic) => Err(FetchError::from_panic(panic)),
        };

        let error = match outcome {
            Ok(data) => return Ok(Arc::new(data)),
            Err(error) => error,
        };

        if token.is_cancelled() {
            return Err(FetchError::Canceled);
        }
        if !error.is_retryable() || failure_count >= retry {
            trace!(failure_count, err = %error, "retry budget exhausted");
            return Err(error);
        }

        let delay = retry_delay.delay(failure_count);
        failure_count += 1;
        trace!(failure_count, ?delay, err = %error, "retry scheduled");
        if let Some(cb) = on_fail {
            cb(failure_count, &error, delay);
        }

        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        select! {
            _ = &mut sleep => {}
            _ = token.cancelled() => return Err(FetchError::Canceled),
        }
    }
}

/// Single outcome of a fetch run (all retries included).
///
/// Resolves to [`FetchError::Canceled`] if the run was torn down without settling.
#[must_use = "futures do nothing unless awaited; the fetch itself runs regardless"]
pub struct FetchOutcome<T> {
    rx: oneshot::Receiver<Result<Arc<T>, FetchError>>,
}

impl<T> Future for FetchOutcome<T> {
    type Output = Result<Arc<T>, FetchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_closed| Err(FetchError::Canceled)))
    }
}

impl<T> std::fmt::Debug for FetchOutcome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOutcome").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    type Op = Box<dyn FnMut() -> BoxFuture<'static, Result<u32, FetchError>> + Send>;

    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> Op {
        Box::new(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < failures {
                    Err(FetchError::fail(format!("attempt {n}")))
                } else {
                    Ok(n)
                }
            })
        })
    }

    struct Probe {
        success: Arc<AtomicU32>,
        error: Arc<AtomicU32>,
        delays: Arc<Mutex<Vec<Duration>>>,
    }

    fn probed(retry: u32, retry_delay: RetryDelay) -> (RetryerConfig<u32>, Probe) {
        let probe = Probe {
            success: Arc::new(AtomicU32::new(0)),
            error: Arc::new(AtomicU32::new(0)),
            delays: Arc::new(Mutex::new(Vec::new())),
        };
        let (s, e, d) = (
            probe.success.clone(),
            probe.error.clone(),
            probe.delays.clone(),
        );
        let config = RetryerConfig {
            retry,
            retry_delay,
            on_success: Some(Box::new(move |_: &Arc<u32>| {
                s.fetch_add(1, Ordering::SeqCst);
            })),
            on_error: Some(Box::new(move |_: &FetchError| {
                e.fetch_add(1, Ordering::SeqCst);
            })),
            on_fail: Some(Box::new(move |_: u32, _: &FetchError, delay: Duration| {
                d.lock().unwrap().push(delay)
            })),
            ..RetryerConfig::default()
        };
        (config, probe)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_within_retry_budget() {
        for failures in 0..=3u32 {
            let calls = Arc::new(AtomicU32::new(0));
            let (config, probe) = probed(3, RetryDelay::default());

            let (_r, outcome) = Retryer::start(flaky(failures, calls.clone()), config);
            let data = outcome.await.expect("should succeed");

            assert_eq!(*data, failures);
            assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
            assert_eq!(probe.success.load(Ordering::SeqCst), 1);
            assert_eq!(probe.error.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fails_after_budget_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let (config, probe) = probed(3, RetryDelay::default());

        let (_r, outcome) = Retryer::start(flaky(4, calls.clone()), config);
        let err = outcome.await.unwrap_err();

        assert_eq!(err, FetchError::fail("attempt 3"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(probe.success.load(Ordering::SeqCst), 0);
        assert_eq!(probe.error.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn default_delay_sequence() {
        let calls = Arc::new(AtomicU32::new(0));
        let (config, probe) = probed(3, RetryDelay::default());
        let started = Instant::now();

        let (_r, outcome) = Retryer::start(flaky(u32::MAX, calls), config);
        assert!(outcome.await.is_err());

        assert_eq!(
            *probe.delays.lock().unwrap(),
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
        assert_eq!(started.elapsed(), Duration::from_millis(7000));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retry_settles_on_first_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let (config, probe) = probed(0, RetryDelay::default());

        let (_r, outcome) = Retryer::start(flaky(1, calls.clone()), config);
        assert!(outcome.await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(probe.delays.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let op = move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(FetchError::fatal("bad request")) }
        };
        let (config, probe) = probed(3, RetryDelay::default());

        let (_r, outcome) = Retryer::start(op, config);
        assert_eq!(outcome.await.unwrap_err(), FetchError::fatal("bad request"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.error.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panics_are_treated_as_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let op: Op = Box::new(move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                panic!("sync boom");
            }
            Box::pin(async move {
                if n == 1 {
                    panic!("async boom");
                }
                Ok(n)
            })
        });
        let (config, probe) = probed(3, RetryDelay::Fixed(Duration::from_millis(10)));

        let (_r, outcome) = Retryer::start(op, config);
        assert_eq!(*outcome.await.unwrap(), 2);
        assert_eq!(probe.delays.lock().unwrap().len(), 2);
        assert_eq!(probe.success.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let aborted = Arc::new(AtomicU32::new(0));
        let (mut config, probe) = probed(3, RetryDelay::Fixed(Duration::from_secs(10)));
        let a = aborted.clone();
        config.abort = Some(Box::new(move || {
            a.fetch_add(1, Ordering::SeqCst);
        }));

        let (retryer, outcome) = Retryer::start(flaky(u32::MAX, calls.clone()), config);
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        retryer.cancel();
        retryer.cancel();
        assert!(retryer.is_cancelled());
        assert_eq!(outcome.await.unwrap_err(), FetchError::Canceled);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry after cancel");
        assert_eq!(aborted.load(Ordering::SeqCst), 1, "abort runs once");
        assert_eq!(probe.error.load(Ordering::SeqCst), 1);
        assert_eq!(probe.success.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_attempt_ignoring_its_signal() {
        let op = || async {
            time::sleep(Duration::from_secs(3600)).await;
            Ok::<u32, FetchError>(1)
        };
        let (config, probe) = probed(3, RetryDelay::default());
        let started = Instant::now();

        let (retryer, outcome) = Retryer::start(op, config);
        time::sleep(Duration::from_millis(5)).await;
        retryer.cancel();

        assert_eq!(outcome.await.unwrap_err(), FetchError::Canceled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(probe.error.load(Ordering::SeqCst), 1);
    }
}
