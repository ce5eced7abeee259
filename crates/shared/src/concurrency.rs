//! Request-scoped context and the bounded worker pool.
//!
//! The pool is intended for I/O-heavy fan-out (SSTable uploads, object
//! downloads), not CPU-bound workloads. Cancellation is best-effort:
//! items that have not started are skipped; in-flight items complete
//! unless the task itself cooperates.

use crate::{ErrorCode, ErrorEnvelope, Result};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// A correlation identifier used for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Create a new operation id, best-effort unique within this process.
    #[must_use]
    pub fn new_op_id() -> Self {
        let n = OP_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(Arc::from(format!("op_{n}").as_str()))
    }

    /// Parse a correlation identifier from user input.
    pub fn parse(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "correlation id must be non-empty",
            ));
        }
        Ok(Self(Arc::from(trimmed)))
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

static OP_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A clonable cancellation token that can be awaited.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token and wake all current and future waiters.
    pub fn cancel(&self) {
        let was_cancelled = self.inner.cancelled.swap(true, Ordering::SeqCst);
        if !was_cancelled {
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns true if the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Request-scoped context passed across boundaries.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a context with an auto-generated `op_*` id.
    #[must_use]
    pub fn new_op() -> Self {
        Self {
            correlation_id: CorrelationId::new_op_id(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Create a context with an explicit cancellation token.
    #[must_use]
    pub const fn with_cancellation(
        correlation_id: CorrelationId,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            correlation_id,
            cancellation,
        }
    }

    /// Return the correlation id.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Return a clone of the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Returns true if the request was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this request.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Await cancellation.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Return a cancellation error when cancelled.
    pub fn ensure_not_cancelled(&self, operation: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(ErrorEnvelope::cancelled("operation cancelled")
                .with_metadata("operation", operation));
        }
        Ok(())
    }
}

/// Default upload/download fan-out width.
pub const DEFAULT_POOL_WORKERS: usize = 5;

/// A bounded worker pool that maps an async function over a batch of
/// inputs with fixed concurrency and deterministic output ordering.
///
/// The caller blocks until every item has been processed or the first
/// error is observed. Workers pull items from a shared queue, so a
/// slow item never stalls the rest of the batch.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Create a pool with the given number of workers.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "worker count must be a positive number",
            ));
        }
        Ok(Self { workers })
    }

    /// Create a pool with the default width.
    #[must_use]
    pub fn with_default_width() -> Self {
        Self {
            workers: DEFAULT_POOL_WORKERS,
        }
    }

    /// Return the configured worker count.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to every input, at most `workers` at a time.
    ///
    /// Results preserve input order. The first error aborts the batch:
    /// queued items are dropped, in-flight items run to completion, and
    /// the error is returned to the caller.
    pub async fn map<TIn, TOut, F, Fut>(
        &self,
        ctx: &RequestContext,
        inputs: Vec<TIn>,
        f: F,
    ) -> Result<Vec<TOut>>
    where
        TIn: Send + 'static,
        TOut: Send + 'static,
        F: Fn(TIn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TOut>> + Send + 'static,
    {
        ctx.ensure_not_cancelled("worker_pool.map")?;

        let count = inputs.len();
        let queue: Arc<Mutex<VecDeque<(usize, TIn)>>> =
            Arc::new(Mutex::new(inputs.into_iter().enumerate().collect()));
        let f = Arc::new(f);
        let failed = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(self.workers.min(count.max(1)));
        for _ in 0..self.workers.min(count.max(1)) {
            let queue = Arc::clone(&queue);
            let f = Arc::clone(&f);
            let failed = Arc::clone(&failed);
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let mut produced: Vec<(usize, TOut)> = Vec::new();
                loop {
                    if failed.load(Ordering::SeqCst) || ctx.is_cancelled() {
                        return Ok(produced);
                    }
                    let next = {
                        let mut guard = queue.lock().map_err(|_| {
                            ErrorEnvelope::invariant(
                                ErrorCode::internal(),
                                "worker pool queue poisoned",
                            )
                        })?;
                        guard.pop_front()
                    };
                    let Some((index, item)) = next else {
                        return Ok(produced);
                    };
                    match f(item).await {
                        Ok(value) => produced.push((index, value)),
                        Err(error) => {
                            failed.store(true, Ordering::SeqCst);
                            return Err(error);
                        },
                    }
                }
            }));
        }

        let mut slots: Vec<Option<TOut>> = (0..count).map(|_| None).collect();
        let mut first_error: Option<ErrorEnvelope> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(produced)) => {
                    for (index, value) in produced {
                        if let Some(slot) = slots.get_mut(index) {
                            *slot = Some(value);
                        }
                    }
                },
                Ok(Err(error)) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                },
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error = Some(ErrorEnvelope::unexpected(
                            ErrorCode::internal(),
                            join_error.to_string(),
                            crate::ErrorClass::NonRetriable,
                        ));
                    }
                },
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }
        ctx.ensure_not_cancelled("worker_pool.map")?;

        let mut out = Vec::with_capacity(count);
        for slot in slots {
            match slot {
                Some(value) => out.push(value),
                None => {
                    return Err(ErrorEnvelope::invariant(
                        ErrorCode::internal(),
                        "worker pool lost a result slot",
                    ));
                },
            }
        }
        Ok(out)
    }
}
