//! Backpressure over an unbounded producer of asynchronous operations.
//!
//! The pipeline never caps parallelism: every submitted operation is launched
//! immediately. What it bounds is the *producer*, by handing back admission
//! handles that only resolve once the gauge (the sum of live slot sizes)
//! drops below capacity again. A producer that awaits each admission before
//! submitting more gets a natural "produce until told to wait" loop while the
//! store absorbs as many parallel requests as it can.
//!
//! The first failed operation poisons the pipeline: it transitions to CLOSED
//! with a fault and every queued waiter, later submission and the terminal
//! result observe that fault. Recovery requires an explicit [`reopen`].
//!
//! [`reopen`]: BackpressurePipeline::reopen

use crate::error::CloudError;
use crate::handle::{Handle, Promise, promise};
use crate::metrics;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closing,
    Closed,
}

struct Inner {
    capacity: usize,
    /// Sum of live slot sizes. Grows at submit, shrinks by exactly the
    /// submitted size when the operation completes, success or failure.
    gauge: usize,
    /// Number of launched operations that have not completed yet.
    unfinished: usize,
    /// Producers blocked on admission, in submission order.
    waiters: VecDeque<Promise<Result<(), CloudError>>>,
    state: State,
    /// Resolved exactly once per open/closed cycle.
    terminal: Option<Result<(), CloudError>>,
    result_promise: Option<Promise<Result<(), CloudError>>>,
    result_handle: Handle<Result<(), CloudError>>,
}

impl Inner {
    fn resolve_terminal(&mut self, outcome: Result<(), CloudError>) {
        self.terminal = Some(outcome.clone());
        if let Some(promise) = self.result_promise.take() {
            promise.resolve(outcome);
        }
    }

    fn fail(&mut self, fault: CloudError) {
        if self.state != State::Closed {
            metrics::PIPELINE_FAULTS.inc();
            self.state = State::Closed;
            self.resolve_terminal(Err(fault));
        }
    }
}

/// See the module docs. Cheap to clone; clones share the same pipeline.
#[derive(Clone)]
pub struct BackpressurePipeline {
    inner: Arc<Mutex<Inner>>,
}

impl BackpressurePipeline {
    /// `capacity` is the gauge level at which producers start to wait.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pipeline capacity must be positive");
        let (result_promise, result_handle) = promise();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                capacity,
                gauge: 0,
                unfinished: 0,
                waiters: VecDeque::new(),
                state: State::Open,
                terminal: None,
                result_promise: Some(result_promise),
                result_handle,
            })),
        }
    }

    /// Launches `op` and returns its admission handle.
    ///
    /// The handle is already resolved when the post-submit gauge is still
    /// under capacity; otherwise it resolves on a later completion (FIFO
    /// across waiting producers), or with the terminal fault if the pipeline
    /// closes first. Submitting to a CLOSING or CLOSED pipeline fails
    /// immediately and does not launch `op`.
    pub fn submit<F>(&self, size: usize, op: F) -> Handle<Result<(), CloudError>>
    where
        F: Future<Output = Result<(), CloudError>> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.state != State::Open {
            tracing::warn!(target: "cloud::pipeline", "submit on a closed pipeline");
            return Handle::resolved(Err(CloudError::PipelineClosed));
        }
        inner.gauge += size;
        inner.unfinished += 1;
        metrics::PIPELINE_INFLIGHT.add(size as i64);
        let shared = self.inner.clone();
        tokio::spawn(async move {
            let res = op.await;
            Self::op_finished(&shared, res, size);
        });
        if inner.gauge < inner.capacity {
            return Handle::resolved(Ok(()));
        }
        let (waiter, admission) = promise();
        inner.waiters.push_back(waiter);
        admission
    }

    fn op_finished(shared: &Mutex<Inner>, res: Result<(), CloudError>, size: usize) {
        let mut inner = shared.lock();
        inner.unfinished -= 1;
        inner.gauge -= size;
        metrics::PIPELINE_INFLIGHT.sub(size as i64);
        if let Err(fault) = res {
            inner.fail(fault);
        }
        if inner.state == State::Closing && inner.unfinished == 0 {
            inner.state = State::Closed;
            inner.resolve_terminal(Ok(()));
        }
        if inner.state == State::Closed {
            // Every waiter observes the terminal outcome.
            let terminal = inner.terminal.clone().expect("closed pipeline has a terminal outcome");
            while let Some(waiter) = inner.waiters.pop_front() {
                waiter.resolve(terminal.clone());
            }
        } else if inner.gauge < inner.capacity {
            while let Some(waiter) = inner.waiters.pop_front() {
                waiter.resolve(Ok(()));
            }
        }
    }

    /// Poisons the pipeline. Idempotent: only the first fault is kept.
    pub fn fail(&self, fault: CloudError) {
        self.inner.lock().fail(fault);
    }

    /// Stops accepting work and returns the terminal handle, which resolves
    /// once every launched operation has completed (immediately if none are
    /// in flight).
    pub fn close(&self) -> Handle<Result<(), CloudError>> {
        let mut inner = self.inner.lock();
        if inner.state != State::Closed {
            if inner.unfinished == 0 {
                inner.state = State::Closed;
                inner.resolve_terminal(Ok(()));
            } else {
                inner.state = State::Closing;
            }
        }
        inner.result_handle.clone()
    }

    /// Drains the pipeline, then reopens it for more work. Any fault is
    /// consumed: it is returned here and the reopened pipeline starts fresh.
    pub async fn flush(&self) -> Result<(), CloudError> {
        let res = self.close().wait().await;
        self.reopen();
        res
    }

    /// Returns a CLOSED pipeline to OPEN with a fresh terminal handle.
    ///
    /// Calling this while the pipeline is not CLOSED is a bug.
    pub fn reopen(&self) {
        let mut inner = self.inner.lock();
        assert!(inner.state == State::Closed, "reopen on a pipeline that is not closed");
        let (result_promise, result_handle) = promise();
        inner.result_promise = Some(result_promise);
        inner.result_handle = result_handle;
        inner.terminal = None;
        inner.state = State::Open;
    }

    #[cfg(test)]
    pub(crate) fn gauge(&self) -> usize {
        self.inner.lock().gauge
    }
}
