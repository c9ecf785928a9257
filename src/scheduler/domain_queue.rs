use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::types::Payload;

/// The pending work of a single domain: a FIFO of payloads in input order,
/// the number of requests currently in flight and the earliest instant at
/// which the next dispatch is allowed.
///
/// The queue itself carries no locking; the scheduler owns every queue and
/// mutates them under its single lock.
pub(crate) struct DomainQueue<T> {
    domain: String,
    items: VecDeque<Payload<T>>,
    in_flight: usize,
    parallelism: usize,
    next_eligible_at: Instant,
    last_completed_at: Option<Instant>,
    arrival: u64,
    /// Whether the domain currently sits in the scheduler's ready deque
    pub(crate) in_ready: bool,
    /// Whether a live entry for the domain sits in the waiting heap
    pub(crate) in_waiting: bool,
}

impl<T> DomainQueue<T> {
    pub(crate) fn new(domain: String, parallelism: usize, arrival: u64, now: Instant) -> Self {
        Self {
            domain,
            items: VecDeque::new(),
            in_flight: 0,
            parallelism,
            next_eligible_at: now,
            last_completed_at: None,
            arrival,
            in_ready: false,
            in_waiting: false,
        }
    }

    pub(crate) const fn arrival(&self) -> u64 {
        self.arrival
    }

    pub(crate) fn enqueue(&mut self, payload: Payload<T>) {
        self.items.push_back(payload);
    }

    pub(crate) fn dequeue(&mut self) -> Option<Payload<T>> {
        self.items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) const fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub(crate) const fn next_eligible_at(&self) -> Instant {
        self.next_eligible_at
    }

    pub(crate) const fn last_completed_at(&self) -> Option<Instant> {
        self.last_completed_at
    }

    /// Whether another request may be put in flight for this domain
    pub(crate) const fn has_capacity(&self) -> bool {
        self.in_flight < self.parallelism
    }

    /// Whether the queue can hand out a job right now: it holds an item,
    /// is under its parallelism cap and its throttle window has passed.
    pub(crate) fn is_eligible(&self, now: Instant) -> bool {
        !self.items.is_empty() && self.has_capacity() && self.next_eligible_at <= now
    }

    /// Record that an item of this queue was handed to a worker.
    ///
    /// The throttle is deliberately untouched here: it separates the next
    /// dispatch from the previous completion, not from the previous
    /// dispatch, so several in-flight requests are allowed to overlap when
    /// the parallelism cap permits them.
    pub(crate) fn on_dispatch(&mut self) {
        self.in_flight += 1;
        assert!(
            self.in_flight <= self.parallelism,
            "scheduler invariant violated: domain `{}` exceeds its parallelism cap",
            self.domain
        );
    }

    /// Record a completion and arm the throttle for the next dispatch.
    pub(crate) fn on_complete(&mut self, now: Instant, throttle: Duration) {
        assert!(
            self.in_flight > 0,
            "scheduler invariant violated: completion on idle domain `{}`",
            self.domain
        );
        self.in_flight -= 1;
        self.last_completed_at = Some(now);
        self.next_eligible_at = now + throttle;
    }
}
