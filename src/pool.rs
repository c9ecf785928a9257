//! The fixed worker pool and the result stream it feeds.
//!
//! Workers are plain OS threads, symmetric and without domain affinity.
//! Each one loops: ask the scheduler for a job, run the policy under a
//! panic guard, evaluate the throttle, report the completion back to the
//! scheduler and publish the result into a bounded channel. The channel
//! gives the consumer backpressure over the whole engine: when it stops
//! draining, workers block on publishing and stop taking jobs.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::policy::Policy;
use crate::scheduler::{NextJob, Scheduler};
use crate::types::{panic_message, Throttle};

/// A lazy, blocking sequence of results, one per admitted input item, in
/// completion order.
///
/// Iteration blocks until a result is available or every worker has
/// exited. Dropping the stream cancels the engine: no further jobs are
/// dispatched, in-flight requests run to completion unobserved, and all
/// worker threads are joined before the drop returns.
pub struct ResultStream<R> {
    receiver: Option<Receiver<R>>,
    workers: Vec<JoinHandle<()>>,
    canceller: Box<dyn Fn() + Send>,
}

impl<R> Iterator for ResultStream<R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        self.receiver.as_ref().and_then(|rx| rx.recv().ok())
    }
}

impl<R> ResultStream<R> {
    /// Cancel the run without waiting for it to drain. Results already
    /// published can still be read; the stream then terminates.
    pub fn cancel(&self) {
        (self.canceller)();
    }
}

impl<R> Drop for ResultStream<R> {
    fn drop(&mut self) {
        (self.canceller)();
        // Disconnect the channel so workers blocked on publishing bail out.
        self.receiver = None;

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("worker thread terminated by panic during shutdown");
            }
        }
    }
}

impl<R> fmt::Debug for ResultStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("workers", &self.workers.len())
            .field("open", &self.receiver.is_some())
            .finish_non_exhaustive()
    }
}

/// Spawn the worker pool for a run and hand back its result stream.
pub(crate) fn spawn<T, P>(
    scheduler: Arc<Scheduler<T>>,
    policy: Arc<P>,
    throttle: Throttle<T>,
    threads: usize,
) -> ResultStream<P::Result>
where
    T: Send + 'static,
    P: Policy<T> + 'static,
    P::Result: 'static,
{
    let threads = threads.max(1);
    let (sender, receiver) = bounded(threads);

    let mut workers = Vec::with_capacity(threads);
    for n in 0..threads {
        let scheduler = Arc::clone(&scheduler);
        let policy = Arc::clone(&policy);
        let throttle = throttle.clone();
        let sender = sender.clone();

        let handle = thread::Builder::new()
            .name(format!("trawl-worker-{n}"))
            .spawn(move || worker_loop(&scheduler, &*policy, &throttle, &sender))
            .expect("failed to spawn worker thread");
        workers.push(handle);
    }

    let canceller = {
        let scheduler = Arc::clone(&scheduler);
        Box::new(move || scheduler.cancel())
    };

    ResultStream {
        receiver: Some(receiver),
        workers,
        canceller,
    }
}

fn worker_loop<T, P>(
    scheduler: &Scheduler<T>,
    policy: &P,
    throttle: &Throttle<T>,
    sender: &Sender<P::Result>,
) where
    T: Send,
    P: Policy<T>,
{
    loop {
        let payload = match scheduler.next_job() {
            NextJob::Job(payload) => payload,
            NextJob::Shutdown => break,
        };

        let domain = payload.domain().to_string();

        // The policy runs under a panic guard so a single poisonous item
        // cannot take the worker down; the payload is only borrowed here
        // and survives to be reported either way.
        let mut outcome = if payload.wants_network() {
            match panic::catch_unwind(AssertUnwindSafe(|| policy.execute(&payload))) {
                Ok(outcome) => Some(outcome),
                Err(caught) => Some(policy.panic_outcome(panic_message(caught.as_ref()))),
            }
        } else {
            None
        };

        // The throttle is evaluated here on the worker, never under the
        // scheduler lock. Items on the sentinel queue skip it entirely.
        let pause = if domain.is_empty() {
            Duration::ZERO
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| throttle.delay(&domain, &payload))) {
                Ok(pause) => pause,
                Err(caught) => {
                    outcome = Some(policy.panic_outcome(panic_message(caught.as_ref())));
                    Duration::ZERO
                }
            }
        };

        // Completion is reported before publishing, so scheduler capacity
        // frees up even while the consumer is slow to drain results.
        scheduler.complete(&domain, pause);

        let result = policy.assemble(payload, outcome);

        if sender.send(result).is_err() {
            // The consumer dropped the stream; wind the engine down.
            scheduler.cancel();
            break;
        }
    }
}
