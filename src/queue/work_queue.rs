// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Deduplicating, delay-capable, rate-limited queue of identities.

use super::rate_limiter::{ExponentialBackoff, RateLimiter};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct State<K> {
    /// Handed out in FIFO order.
    queue: VecDeque<K>,
    /// Needs processing: either queued, or re-added while in flight.
    dirty: HashSet<K>,
    /// Handed out by `get` and not yet released by `done`.
    processing: HashSet<K>,
    /// Pending `add_after` deadlines.
    waiting: HashMap<K, Instant>,
    shutting_down: bool,
}

type DepthObserver = Arc<dyn Fn(usize) + Send + Sync>;

struct Shared<K> {
    state: Mutex<State<K>>,
    ready: Notify,
    limiter: Mutex<Box<dyn RateLimiter<K>>>,
    shutdown: CancellationToken,
    on_depth: Mutex<Option<DepthObserver>>,
}

/// Work queue with the in-flight guarantees the controller relies on.
///
/// An identity is never handed out twice concurrently: re-adding it while it
/// is being processed marks it dirty, and it is queued once more when
/// [`WorkQueue::done`] is called, however many adds arrived in between.
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    pub fn new(limiter: Box<dyn RateLimiter<K>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    waiting: HashMap::new(),
                    shutting_down: false,
                }),
                ready: Notify::new(),
                limiter: Mutex::new(limiter),
                shutdown: CancellationToken::new(),
                on_depth: Mutex::new(None),
            }),
        }
    }

    pub fn with_backoff(base: Duration, max: Duration) -> Self {
        Self::new(Box::new(ExponentialBackoff::new(base, max)))
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn limiter(&self) -> MutexGuard<'_, Box<dyn RateLimiter<K>>> {
        self.shared.limiter.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Report the number of ready identities to `observer`, now and after
    /// every change.
    pub fn on_depth<F>(&self, observer: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let observer: DepthObserver = Arc::new(observer);
        *self.shared.on_depth.lock().unwrap_or_else(|e| e.into_inner()) = Some(observer.clone());
        observer(self.len());
    }

    fn report_depth(&self, depth: usize) {
        let observer = self
            .shared
            .on_depth
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer(depth);
        }
    }

    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!("{:?} is in flight, coalescing", key);
            return;
        }
        state.queue.push_back(key);
        let depth = state.queue.len();
        drop(state);
        self.shared.ready.notify_one();
        self.report_depth(depth);
    }

    /// Add `key` once `delay` has elapsed. A pending earlier deadline wins.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            if state.waiting.get(&key).is_some_and(|existing| *existing <= deadline) {
                return;
            }
            state.waiting.insert(key.clone(), deadline);
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.shared.shutdown.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let due = {
                        let mut state = queue.state();
                        if state.waiting.get(&key) == Some(&deadline) {
                            state.waiting.remove(&key);
                            true
                        } else {
                            false
                        }
                    };
                    if due {
                        queue.add(key);
                    }
                }
            }
        });
    }

    /// Add `key` after its rate-limited backoff delay.
    pub fn add_rate_limited(&self, key: K) -> Duration {
        let delay = self.limiter().when(&key);
        self.add_after(key, delay);
        delay
    }

    /// Clear the backoff history of `key`.
    pub fn forget(&self, key: &K) {
        self.limiter().forget(key);
    }

    pub fn retries(&self, key: &K) -> u32 {
        self.limiter().retries(key)
    }

    /// Wait for the next identity and mark it in flight.
    ///
    /// Returns `None` once the queue is shut down, even if items remain.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let popped = {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                state.queue.pop_front().map(|key| {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    (key, state.queue.len())
                })
            };
            if let Some((key, depth)) = popped {
                self.report_depth(depth);
                return Some(key);
            }
            notified.await;
        }
    }

    /// Release the in-flight mark taken by `get`, re-queueing coalesced adds.
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            let depth = state.queue.len();
            drop(state);
            self.shared.ready.notify_one();
            self.report_depth(depth);
        }
    }

    /// Identities ready to be handed out.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self, key: &K) -> bool {
        self.state().processing.contains(key)
    }

    pub fn pending_delayed(&self) -> usize {
        self.state().waiting.len()
    }

    /// Refuse further `get` calls and wake the blocked ones.
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            state.waiting.clear();
        }
        self.shared.shutdown.cancel();
        self.shared.ready.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_queue() -> WorkQueue<&'static str> {
        WorkQueue::with_backoff(Duration::from_millis(5), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_add_deduplicates_queued_items() {
        let queue = make_queue();
        queue.add("a");
        queue.add("a");
        queue.add("b");

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
    }

    #[tokio::test]
    async fn test_adds_during_processing_coalesce_into_one() {
        let queue = make_queue();
        queue.add("a");
        let key = queue.get().await.unwrap();

        for _ in 0..10 {
            queue.add("a");
        }
        assert_eq!(queue.len(), 0);
        assert!(queue.is_processing(&"a"));

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = make_queue();
        queue.add("a");
        let key = queue.get().await.unwrap();
        queue.done(&key);
        assert!(queue.is_empty());
        assert!(!queue.is_processing(&"a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delivers_later() {
        let queue = make_queue();
        queue.add_after("a", Duration::from_secs(10));
        assert!(queue.is_empty());
        assert_eq!(queue.pending_delayed(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending_delayed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_keeps_earliest_deadline() {
        let queue = make_queue();
        queue.add_after("a", Duration::from_secs(5));
        queue.add_after("a", Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.len(), 1);
        let key = queue.get().await.unwrap();
        queue.done(&key);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_delays_grow_and_reset() {
        let queue = make_queue();
        assert_eq!(queue.add_rate_limited("a"), Duration::from_millis(5));
        assert_eq!(queue.add_rate_limited("a"), Duration::from_millis(10));
        assert_eq!(queue.retries(&"a"), 2);

        queue.forget(&"a");
        assert_eq!(queue.add_rate_limited("a"), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_depth_is_reported_on_every_change() {
        let queue = make_queue();
        let depths = Arc::new(Mutex::new(Vec::new()));
        let seen = depths.clone();
        queue.on_depth(move |depth| seen.lock().unwrap().push(depth));

        queue.add("a");
        queue.add("b");
        let key = queue.get().await.unwrap();
        queue.add("a");
        queue.done(&key);

        assert_eq!(*depths.lock().unwrap(), vec![0, 1, 2, 1, 2]);
    }

    #[tokio::test]
    async fn test_shut_down_wakes_blocked_get() {
        let queue = make_queue();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shut_down();

        assert_eq!(waiter.await.unwrap(), None);
        queue.add("a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_blocks_until_add() {
        let queue = make_queue();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add("a");
        assert_eq!(waiter.await.unwrap(), Some("a"));
    }
}
