//! Debounced, rate-limited path from events to scheduler wakeups.
//!
//! Signals against one cluster coalesce inside a debounce window; firing a
//! window consumes a token from a process-wide bucket, and an empty bucket
//! drops the wakeup (the periodic cycle is the safety net). Signals arriving
//! while a reconcile for the cluster is in flight collapse into at most one
//! follow-up window.
//!
//! Per-cluster states: Idle → Debouncing → Dispatching → (Idle, or back to
//! Debouncing when signalled during dispatch).

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use bosun_common::args::ReactiveArgs;

use crate::metrics;

enum SignalState {
    /// A window is open; the epoch invalidates stale timers.
    Debouncing { epoch: u64 },
    /// A reconcile for this cluster is in flight.
    Dispatching { pending: bool },
}

struct TriggerInner {
    states: Mutex<HashMap<Uuid, SignalState>>,
    bucket: Mutex<TokenBucket>,
    wake: Arc<Notify>,
    next_epoch: AtomicU64,
    fired: AtomicU64,
    dropped: AtomicU64,
    debounce: Duration,
    enabled: bool,
}

#[derive(Clone)]
pub struct ReactiveTrigger {
    inner: Arc<TriggerInner>,
}

impl ReactiveTrigger {
    pub fn new(args: &ReactiveArgs) -> Self {
        Self::with_settings(
            args.reactive_enabled,
            Duration::from_millis(args.reactive_debounce_ms),
            args.reactive_max_events_per_minute,
        )
    }

    pub fn with_settings(enabled: bool, debounce: Duration, max_events_per_minute: u32) -> Self {
        Self {
            inner: Arc::new(TriggerInner {
                states: Mutex::new(HashMap::new()),
                bucket: Mutex::new(TokenBucket::per_minute(max_events_per_minute)),
                wake: Arc::new(Notify::new()),
                next_epoch: AtomicU64::new(0),
                fired: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                debounce,
                enabled,
            }),
        }
    }

    /// The notifier the scheduler selects on.
    pub fn wakeup(&self) -> Arc<Notify> {
        self.inner.wake.clone()
    }

    /// Report a mutation or status event for a cluster. Safe to call from
    /// any task at any rate.
    pub fn signal(&self, cluster_id: Uuid) {
        if !self.inner.enabled {
            return;
        }
        metrics::reactive_signal();
        let mut states = self.inner.states.lock();
        match states.entry(cluster_id) {
            Entry::Vacant(entry) => {
                let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
                entry.insert(SignalState::Debouncing { epoch });
                drop(states);
                self.start_window(cluster_id, epoch);
            }
            Entry::Occupied(mut entry) => match entry.get_mut() {
                // Window already open: coalesce.
                SignalState::Debouncing { .. } => {}
                SignalState::Dispatching { pending } => *pending = true,
            },
        }
    }

    /// The scheduler is about to dispatch a reconcile for this cluster.
    pub fn dispatch_started(&self, cluster_id: Uuid) {
        if !self.inner.enabled {
            return;
        }
        let mut states = self.inner.states.lock();
        // An open window is subsumed: the dispatch reads current state. Its
        // timer will land in the Dispatching arm and schedule a follow-up.
        states.insert(cluster_id, SignalState::Dispatching { pending: false });
    }

    /// The dispatch completed. A signal seen in the meantime opens one
    /// fresh window; otherwise the cluster returns to idle.
    pub fn dispatch_finished(&self, cluster_id: Uuid) {
        if !self.inner.enabled {
            return;
        }
        let mut states = self.inner.states.lock();
        match states.remove(&cluster_id) {
            Some(SignalState::Dispatching { pending: true }) => {
                let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
                states.insert(cluster_id, SignalState::Debouncing { epoch });
                drop(states);
                self.start_window(cluster_id, epoch);
            }
            Some(SignalState::Dispatching { pending: false }) | None => {}
            // A newer window opened already; leave it running.
            Some(other) => {
                states.insert(cluster_id, other);
            }
        }
    }

    fn start_window(&self, cluster_id: Uuid, epoch: u64) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;

            enum Action {
                Fire,
                MarkPending,
                Ignore,
            }

            let mut states = inner.states.lock();
            let action = match states.get(&cluster_id) {
                Some(SignalState::Debouncing { epoch: current }) if *current == epoch => {
                    Action::Fire
                }
                // A dispatch swallowed the window; fold into its follow-up.
                Some(SignalState::Dispatching { .. }) => Action::MarkPending,
                // Stale timer for a superseded window, or pruned entry.
                _ => Action::Ignore,
            };
            match action {
                Action::Fire => {
                    states.remove(&cluster_id);
                    drop(states);
                    if inner.bucket.lock().try_acquire() {
                        inner.fired.fetch_add(1, Ordering::Relaxed);
                        metrics::reactive_fired();
                        inner.wake.notify_one();
                    } else {
                        inner.dropped.fetch_add(1, Ordering::Relaxed);
                        metrics::reactive_dropped();
                        tracing::debug!(%cluster_id, "reactive wakeup dropped by rate limit");
                    }
                }
                Action::MarkPending => {
                    if let Some(SignalState::Dispatching { pending }) =
                        states.get_mut(&cluster_id)
                    {
                        *pending = true;
                    }
                }
                Action::Ignore => {}
            }
        });
    }

    /// Wakeups actually delivered to the scheduler.
    #[allow(dead_code)]
    pub fn fired_count(&self) -> u64 {
        self.inner.fired.load(Ordering::Relaxed)
    }

    /// Wakeups suppressed by the rate limiter.
    #[allow(dead_code)]
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Process-local token bucket. Uses the tokio clock so tests can pause time.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: tokio::time::Instant,
}

impl TokenBucket {
    fn per_minute(events: u32) -> Self {
        let capacity = events as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last: tokio::time::Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_secs(2);

    fn trigger(max_per_minute: u32) -> ReactiveTrigger {
        ReactiveTrigger::with_settings(true, DEBOUNCE, max_per_minute)
    }

    async fn let_window_elapse() {
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_signals_fires_once() {
        let t = trigger(60);
        let id = Uuid::new_v4();
        for _ in 0..100 {
            t.signal(id);
        }
        let_window_elapse().await;
        assert_eq!(t.fired_count(), 1);
        assert_eq!(t.dropped_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_windows_fire_separately() {
        let t = trigger(60);
        let id = Uuid::new_v4();
        t.signal(id);
        let_window_elapse().await;
        t.signal(id);
        let_window_elapse().await;
        assert_eq!(t.fired_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_clusters_debounce_independently() {
        let t = trigger(60);
        t.signal(Uuid::new_v4());
        t.signal(Uuid::new_v4());
        let_window_elapse().await;
        assert_eq!(t.fired_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn signals_during_dispatch_collapse_to_one_follow_up() {
        let t = trigger(60);
        let id = Uuid::new_v4();

        t.dispatch_started(id);
        t.signal(id);
        t.signal(id);
        t.signal(id);
        let_window_elapse().await;
        // Still in flight: nothing fires yet.
        assert_eq!(t.fired_count(), 0);

        t.dispatch_finished(id);
        let_window_elapse().await;
        assert_eq!(t.fired_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_dispatch_returns_to_idle() {
        let t = trigger(60);
        let id = Uuid::new_v4();
        t.dispatch_started(id);
        t.dispatch_finished(id);
        let_window_elapse().await;
        assert_eq!(t.fired_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_drops_excess_wakeups() {
        let t = trigger(2);
        let id = Uuid::new_v4();
        for _ in 0..3 {
            t.signal(id);
            let_window_elapse().await;
        }
        assert_eq!(t.fired_count(), 2);
        assert_eq!(t.dropped_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_trigger_is_inert() {
        let t = ReactiveTrigger::with_settings(false, DEBOUNCE, 60);
        let id = Uuid::new_v4();
        t.signal(id);
        let_window_elapse().await;
        assert_eq!(t.fired_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wakeup_is_observable() {
        let t = trigger(60);
        let wake = t.wakeup();
        let id = Uuid::new_v4();
        t.signal(id);
        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(Duration::from_secs(10)) => panic!("wakeup never arrived"),
        }
    }
}
