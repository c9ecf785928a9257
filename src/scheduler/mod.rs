//! The work-dispatch kernel.
//!
//! The scheduler is the only component with global visibility. It groups
//! admitted payloads into per-domain queues and decides which domain a
//! worker should serve next, honoring two politeness constraints at all
//! times: a domain never has more than its configured number of requests in
//! flight, and consecutive hits on a domain are separated by at least the
//! configured throttle interval (measured from completion to the next
//! dispatch).
//!
//! All state lives behind a single mutex paired with one condition
//! variable. Workers calling [`Scheduler::next_job`] block on the condvar
//! when no domain is currently eligible, with a timeout bounded by the
//! earliest throttle expiry, and are woken by completions, admissions and
//! cancellation. The scheduler itself performs no I/O and never invokes
//! caller-supplied code that could block; the one exception is the cheap
//! key extraction done while admitting input.
//!
//! Non-empty domain queues are partitioned into a ready deque (eligible
//! right now, served round-robin in domain arrival order) and a waiting
//! min-heap keyed by next eligibility instant. Heap entries may go stale
//! when a later completion pushes a domain's window further out; they are
//! discarded lazily when popped. Queues left empty by dispatch linger in
//! the index until their throttle window passes, so the interval stays
//! honored across brief emptiness, then get collected by the heap sweep.

mod domain_queue;
mod staging;

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub(crate) use domain_queue::DomainQueue;
use staging::Staging;

use crate::types::Payload;

/// Signature of the caller-supplied key extractor: derives the URL of an
/// item, or `None` when the item has none.
///
/// The extractor runs while the scheduler admits input, so it must stay
/// cheap; a panicking extractor costs the item its result content (it is
/// reported as a policy panic) but never the run.
pub type KeyFn<T> = Arc<dyn Fn(&T) -> Option<String> + Send + Sync>;

/// Scheduling knobs, resolved from the per-run options.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SchedulerConfig {
    pub(crate) domain_parallelism: usize,
    pub(crate) buffer_size: usize,
}

/// What a worker gets back when asking for work.
pub(crate) enum NextJob<T> {
    /// A payload to process, dispatched from its domain queue
    Job(Payload<T>),
    /// The engine is drained or cancelled; the worker should exit
    Shutdown,
}

/// An entry of the waiting heap: a domain that should be looked at again
/// at `at`. Ties break by insertion sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WaitEntry {
    at: Instant,
    seq: u64,
    domain: String,
}

impl Ord for WaitEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at
            .cmp(&other.at)
            .then(self.seq.cmp(&other.seq))
            .then_with(|| self.domain.cmp(&other.domain))
    }
}

impl PartialOrd for WaitEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct State<T> {
    staging: Staging<T>,
    queues: HashMap<String, DomainQueue<T>>,
    ready: VecDeque<String>,
    waiting: BinaryHeap<Reverse<WaitEntry>>,
    /// Items admitted but not yet dispatched, across all queues
    buffered: usize,
    in_flight_total: usize,
    cancelled: bool,
    arrivals: u64,
    wait_seq: u64,
}

/// The dispatch kernel shared by all workers of a run.
pub(crate) struct Scheduler<T> {
    state: Mutex<State<T>>,
    work_ready: Condvar,
    config: SchedulerConfig,
}

impl<T: Send> Scheduler<T> {
    pub(crate) fn new(
        source: Box<dyn Iterator<Item = T> + Send>,
        key: Option<KeyFn<T>>,
        config: SchedulerConfig,
    ) -> Self {
        let config = SchedulerConfig {
            domain_parallelism: config.domain_parallelism.max(1),
            buffer_size: config.buffer_size.max(1),
        };

        Self {
            state: Mutex::new(State {
                staging: Staging::new(source, key),
                queues: HashMap::new(),
                ready: VecDeque::new(),
                waiting: BinaryHeap::new(),
                buffered: 0,
                in_flight_total: 0,
                cancelled: false,
                arrivals: 0,
                wait_seq: 0,
            }),
            work_ready: Condvar::new(),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().expect("scheduler state poisoned")
    }

    /// Hand out the next job, blocking until one is eligible, the engine
    /// drains, or the run is cancelled.
    pub(crate) fn next_job(&self) -> NextJob<T> {
        let mut state = self.lock();

        loop {
            if state.cancelled {
                return NextJob::Shutdown;
            }

            let now = Instant::now();
            state.sweep_waiting(now);

            if let Some(domain) = state.pop_ready(now) {
                return NextJob::Job(state.dispatch(&domain, now));
            }

            // Nothing eligible: look ahead into the input for admissible
            // items, then try again before going to sleep.
            state.refill(now, self.config);

            if let Some(domain) = state.pop_ready(now) {
                return NextJob::Job(state.dispatch(&domain, now));
            }

            if state.is_finished() {
                log::debug!("scheduler drained, broadcasting shutdown");
                self.work_ready.notify_all();
                return NextJob::Shutdown;
            }

            state = match state.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    self.work_ready
                        .wait_timeout(state, timeout)
                        .expect("scheduler state poisoned")
                        .0
                }
                None => self
                    .work_ready
                    .wait(state)
                    .expect("scheduler state poisoned"),
            };
        }
    }

    /// Record the completion of a dispatched payload and arm the domain's
    /// throttle. The throttle duration is evaluated by the caller, outside
    /// this lock.
    pub(crate) fn complete(&self, domain: &str, throttle: Duration) {
        let mut state = self.lock();
        state.complete(domain, throttle);
        self.work_ready.notify_all();
    }

    /// Cancel the run: pending and staged items are abandoned and every
    /// worker receives `Shutdown` on its next call.
    pub(crate) fn cancel(&self) {
        let mut state = self.lock();
        if !state.cancelled {
            log::debug!("scheduler cancelled, abandoning {} buffered items", state.buffered);
            state.cancelled = true;
        }
        self.work_ready.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> (usize, usize, usize) {
        let state = self.lock();
        (state.buffered, state.in_flight_total, state.queues.len())
    }
}

impl<T> State<T> {
    /// Promote waiting domains whose throttle window has passed and
    /// collect queues that expired empty. Stale entries are re-armed at
    /// the queue's actual eligibility instant.
    fn sweep_waiting(&mut self, now: Instant) {
        loop {
            match self.waiting.peek() {
                Some(Reverse(entry)) if entry.at <= now => {}
                _ => break,
            }

            let Reverse(entry) = self.waiting.pop().expect("peeked waiting entry vanished");

            let Some(queue) = self.queues.get_mut(&entry.domain) else {
                continue;
            };
            queue.in_waiting = false;

            if queue.next_eligible_at() > now {
                // A completion moved the window since this entry was
                // pushed; re-arm at the real instant.
                queue.in_waiting = true;
                let seq = self.wait_seq;
                self.wait_seq += 1;
                self.waiting.push(Reverse(WaitEntry {
                    at: queue.next_eligible_at(),
                    seq,
                    domain: entry.domain,
                }));
                continue;
            }

            if queue.is_empty() && queue.in_flight() == 0 {
                log::trace!("collecting idle domain `{}`", entry.domain);
                self.queues.remove(&entry.domain);
                continue;
            }

            if queue.is_eligible(now) && !queue.in_ready {
                queue.in_ready = true;
                self.ready.push_back(entry.domain);
            }
        }
    }

    /// Pull admissible items out of staging into their domain queues.
    ///
    /// Admission follows the buffer rule: items are taken freely while the
    /// buffer has room, and one item past the cap is taken when it opens a
    /// domain the scheduler does not know yet, so that idle workers can
    /// find work even when the input is clustered by domain.
    fn refill(&mut self, now: Instant, config: SchedulerConfig) {
        loop {
            let (known_domain, over_cap) = {
                let Some(pending) = self.staging.peek() else {
                    break;
                };
                (
                    self.queues.contains_key(pending.domain()),
                    self.buffered >= config.buffer_size,
                )
            };

            if over_cap && known_domain {
                // Buffer full and the item would not open a new domain:
                // pause the input until a dispatch frees a slot.
                break;
            }

            let payload = self.staging.take().expect("peeked payload vanished");
            self.admit(payload, now, config);

            if over_cap {
                break;
            }
        }
    }

    /// Insert a payload into its domain queue, creating the queue on first
    /// contact, and index the queue as ready or waiting.
    fn admit(&mut self, payload: Payload<T>, now: Instant, config: SchedulerConfig) {
        let domain = payload.domain().to_string();

        let arrival = self.arrivals;
        let queue = match self.queues.entry(domain.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.arrivals += 1;
                // Items without a usable URL share the sentinel queue,
                // which is neither throttled nor capped.
                let parallelism = if domain.is_empty() {
                    usize::MAX
                } else {
                    config.domain_parallelism
                };
                log::trace!("opening domain queue `{domain}` (arrival {arrival})");
                entry.insert(DomainQueue::new(domain.clone(), parallelism, arrival, now))
            }
        };

        queue.enqueue(payload);
        self.buffered += 1;

        if queue.is_eligible(now) {
            if !queue.in_ready {
                queue.in_ready = true;
                self.ready.push_back(domain);
            }
        } else if queue.has_capacity() && !queue.in_waiting && !queue.in_ready {
            // Non-empty, under cap, but throttled: park until the window
            // passes. Queues at their cap are resurrected by completions.
            queue.in_waiting = true;
            let seq = self.wait_seq;
            self.wait_seq += 1;
            self.waiting.push(Reverse(WaitEntry {
                at: queue.next_eligible_at(),
                seq,
                domain,
            }));
        }
    }

    /// Pop the next ready domain, skipping entries invalidated since they
    /// were listed.
    fn pop_ready(&mut self, now: Instant) -> Option<String> {
        while let Some(domain) = self.ready.pop_front() {
            let Some(queue) = self.queues.get_mut(&domain) else {
                continue;
            };
            queue.in_ready = false;

            if queue.is_eligible(now) {
                return Some(domain);
            }

            if !queue.is_empty() && queue.has_capacity() && !queue.in_waiting {
                queue.in_waiting = true;
                let seq = self.wait_seq;
                self.wait_seq += 1;
                self.waiting.push(Reverse(WaitEntry {
                    at: queue.next_eligible_at(),
                    seq,
                    domain,
                }));
            }
        }

        None
    }

    /// Take the head item of a ready domain and account it as in flight.
    /// The domain goes back to the tail of the ready deque when it can
    /// serve another item right away, which round-robins eligible domains.
    fn dispatch(&mut self, domain: &str, now: Instant) -> Payload<T> {
        let queue = self
            .queues
            .get_mut(domain)
            .expect("ready domain missing from index");
        let payload = queue
            .dequeue()
            .expect("ready domain with an empty queue");

        queue.on_dispatch();
        self.buffered -= 1;
        self.in_flight_total += 1;

        log::trace!(
            "dispatching {} (domain `{domain}`, arrival {}, {} queued, {} in flight)",
            payload.raw_url().unwrap_or("<null>"),
            queue.arrival(),
            queue.len(),
            queue.in_flight(),
        );

        if queue.is_eligible(now) && !queue.in_ready {
            queue.in_ready = true;
            self.ready.push_back(domain.to_string());
        }

        payload
    }

    fn complete(&mut self, domain: &str, throttle: Duration) {
        let now = Instant::now();

        let Some(queue) = self.queues.get_mut(domain) else {
            log::error!(
                "scheduler invariant violated: completion for unknown domain `{domain}`"
            );
            panic!("scheduler invariant violated: completion for unknown domain");
        };

        queue.on_complete(now, throttle);
        self.in_flight_total -= 1;

        log::trace!(
            "completed job on `{domain}` at {:?}, {} still in flight",
            queue.last_completed_at(),
            queue.in_flight(),
        );

        if !queue.is_empty() {
            if queue.has_capacity() {
                if queue.is_eligible(now) {
                    if !queue.in_ready {
                        queue.in_ready = true;
                        self.ready.push_back(domain.to_string());
                    }
                } else if !queue.in_waiting {
                    queue.in_waiting = true;
                    let seq = self.wait_seq;
                    self.wait_seq += 1;
                    self.waiting.push(Reverse(WaitEntry {
                        at: queue.next_eligible_at(),
                        seq,
                        domain: domain.to_string(),
                    }));
                }
            }
        } else if queue.in_flight() == 0 {
            if queue.next_eligible_at() <= now {
                self.queues.remove(domain);
            } else if !queue.in_waiting {
                // Keep the empty queue around until its throttle window
                // passes; the sweep collects it then.
                queue.in_waiting = true;
                let seq = self.wait_seq;
                self.wait_seq += 1;
                self.waiting.push(Reverse(WaitEntry {
                    at: queue.next_eligible_at(),
                    seq,
                    domain: domain.to_string(),
                }));
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.peek().map(|Reverse(entry)| entry.at)
    }

    fn is_finished(&self) -> bool {
        self.staging.is_done() && self.buffered == 0 && self.in_flight_total == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;

    fn url_key() -> KeyFn<String> {
        Arc::new(|item: &String| Some(item.clone()))
    }

    fn scheduler(
        urls: Vec<String>,
        domain_parallelism: usize,
        buffer_size: usize,
    ) -> Scheduler<String> {
        Scheduler::new(
            Box::new(urls.into_iter()),
            Some(url_key()),
            SchedulerConfig {
                domain_parallelism,
                buffer_size,
            },
        )
    }

    fn expect_job(scheduler: &Scheduler<String>) -> Payload<String> {
        match scheduler.next_job() {
            NextJob::Job(payload) => payload,
            NextJob::Shutdown => panic!("expected a job, got shutdown"),
        }
    }

    #[test]
    fn test_empty_input_shuts_down() {
        let scheduler = scheduler(vec![], 1, 25);
        assert!(matches!(scheduler.next_job(), NextJob::Shutdown));
    }

    #[test]
    fn test_cancel_shuts_down() {
        let scheduler = scheduler(vec!["https://a.example/1".to_string()], 1, 25);
        scheduler.cancel();
        assert!(matches!(scheduler.next_job(), NextJob::Shutdown));
    }

    #[test]
    fn test_single_domain_respects_input_order() {
        let scheduler = scheduler(
            vec![
                "https://a.example/1".to_string(),
                "https://a.example/2".to_string(),
                "https://a.example/3".to_string(),
            ],
            1,
            25,
        );

        for expected in ["https://a.example/1", "https://a.example/2", "https://a.example/3"] {
            let payload = expect_job(&scheduler);
            assert_eq!(payload.raw_url(), Some(expected));
            scheduler.complete(payload.domain(), Duration::ZERO);
        }

        assert!(matches!(scheduler.next_job(), NextJob::Shutdown));
    }

    #[test]
    fn test_domains_are_served_round_robin() {
        let scheduler = scheduler(
            vec![
                "https://a.example/1".to_string(),
                "https://a.example/2".to_string(),
                "https://b.example/1".to_string(),
            ],
            1,
            25,
        );

        let first = expect_job(&scheduler);
        assert_eq!(first.domain(), "a.example");

        // Domain a is at its cap, so b must be served next even though a
        // arrived first.
        let second = expect_job(&scheduler);
        assert_eq!(second.domain(), "b.example");

        scheduler.complete("a.example", Duration::ZERO);
        let third = expect_job(&scheduler);
        assert_eq!(third.raw_url(), Some("https://a.example/2"));

        scheduler.complete("b.example", Duration::ZERO);
        scheduler.complete("a.example", Duration::ZERO);
        assert!(matches!(scheduler.next_job(), NextJob::Shutdown));
    }

    #[test]
    fn test_throttle_delays_next_dispatch() {
        let scheduler = scheduler(
            vec![
                "https://a.example/1".to_string(),
                "https://a.example/2".to_string(),
            ],
            1,
            25,
        );

        let first = expect_job(&scheduler);
        let completed_at = Instant::now();
        scheduler.complete(first.domain(), Duration::from_millis(50));

        let second = expect_job(&scheduler);
        assert!(completed_at.elapsed() >= Duration::from_millis(50));
        scheduler.complete(second.domain(), Duration::ZERO);
    }

    #[test]
    fn test_parallelism_cap_allows_overlap() {
        let scheduler = scheduler(
            vec![
                "https://a.example/1".to_string(),
                "https://a.example/2".to_string(),
                "https://a.example/3".to_string(),
            ],
            2,
            25,
        );

        // Two items may be in flight at once, the third needs a completion.
        let _first = expect_job(&scheduler);
        let _second = expect_job(&scheduler);
        let (_, in_flight, _) = scheduler.snapshot();
        assert_eq!(in_flight, 2);

        scheduler.complete("a.example", Duration::ZERO);
        let _third = expect_job(&scheduler);
        scheduler.complete("a.example", Duration::ZERO);
        scheduler.complete("a.example", Duration::ZERO);
    }

    #[test]
    fn test_blocked_worker_wakes_on_completion() {
        let scheduler = Arc::new(scheduler(
            vec![
                "https://a.example/1".to_string(),
                "https://a.example/2".to_string(),
            ],
            1,
            25,
        ));

        let first = expect_job(&scheduler);
        assert_eq!(first.raw_url(), Some("https://a.example/1"));

        let (tx, rx) = mpsc::channel();
        let worker = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                if let NextJob::Job(payload) = scheduler.next_job() {
                    tx.send(payload.raw_url().unwrap().to_string()).unwrap();
                    scheduler.complete("a.example", Duration::ZERO);
                }
            })
        };

        // The domain is at its cap, so the worker must stay blocked.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        scheduler.complete("a.example", Duration::ZERO);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            "https://a.example/2"
        );
        worker.join().unwrap();
    }

    #[test]
    fn test_buffer_stays_bounded() {
        let urls: Vec<String> = (0..200)
            .map(|n| format!("https://d.example/{n}"))
            .collect();
        let scheduler = scheduler(urls, 1, 10);

        let mut served = 0;
        loop {
            match scheduler.next_job() {
                NextJob::Shutdown => break,
                NextJob::Job(payload) => {
                    let (buffered, _, _) = scheduler.snapshot();
                    assert!(buffered <= 10, "buffered {buffered} items, cap is 10");
                    served += 1;
                    scheduler.complete(payload.domain(), Duration::ZERO);
                }
            }
        }

        assert_eq!(served, 200);
    }

    #[test]
    fn test_full_buffer_still_admits_new_domains() {
        let scheduler = scheduler(
            vec![
                "https://a.example/1".to_string(),
                "https://a.example/2".to_string(),
                "https://b.example/1".to_string(),
            ],
            1,
            1,
        );

        let first = expect_job(&scheduler);
        assert_eq!(first.domain(), "a.example");

        // The buffer (size 1) is saturated by a.example/2, but b.example
        // must still be discovered through the lookahead path.
        let second = expect_job(&scheduler);
        assert_eq!(second.domain(), "b.example");

        scheduler.complete("a.example", Duration::ZERO);
        scheduler.complete("b.example", Duration::ZERO);
        let third = expect_job(&scheduler);
        assert_eq!(third.raw_url(), Some("https://a.example/2"));
        scheduler.complete("a.example", Duration::ZERO);
        assert!(matches!(scheduler.next_job(), NextJob::Shutdown));
    }

    #[test]
    fn test_items_without_url_use_unconstrained_path() {
        let key: KeyFn<String> = Arc::new(|_| None);
        let scheduler: Scheduler<String> = Scheduler::new(
            Box::new(vec!["one".to_string(), "two".to_string()].into_iter()),
            Some(key),
            SchedulerConfig {
                domain_parallelism: 1,
                buffer_size: 25,
            },
        );

        // Both dispatch back to back despite domain_parallelism = 1,
        // because the sentinel queue is uncapped and unthrottled.
        let first = expect_job(&scheduler);
        let second = expect_job(&scheduler);
        assert_eq!(first.domain(), "");
        assert_eq!(second.domain(), "");

        scheduler.complete("", Duration::ZERO);
        scheduler.complete("", Duration::ZERO);
        assert!(matches!(scheduler.next_job(), NextJob::Shutdown));
    }

    #[test]
    fn test_drained_queues_are_collected() {
        let scheduler = scheduler(
            vec![
                "https://a.example/1".to_string(),
                "https://b.example/1".to_string(),
            ],
            1,
            25,
        );

        let first = expect_job(&scheduler);
        let second = expect_job(&scheduler);
        scheduler.complete(first.domain(), Duration::ZERO);
        scheduler.complete(second.domain(), Duration::ZERO);

        assert!(matches!(scheduler.next_job(), NextJob::Shutdown));
        let (buffered, in_flight, domains) = scheduler.snapshot();
        assert_eq!((buffered, in_flight, domains), (0, 0, 0));
    }

    #[test]
    fn test_throttle_survives_queue_emptiness() {
        let scheduler = scheduler(
            vec!["https://a.example/1".to_string()],
            1,
            25,
        );

        let first = expect_job(&scheduler);
        scheduler.complete(first.domain(), Duration::from_millis(80));

        // The queue is empty but its throttle window is still open, so the
        // domain must linger in the index until the window passes.
        let (_, _, domains) = scheduler.snapshot();
        assert_eq!(domains, 1);

        assert!(matches!(scheduler.next_job(), NextJob::Shutdown));
    }
}
