use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::app::hdc::gateway::DeviceGateway;

const BACKOFF_START_MS: u64 = 200;
const BACKOFF_MAX_MS: u64 = 5_000;
const STOP_CHECK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    Added(String),
    Removed(String),
}

/// Turns successive `list targets` snapshots into add/remove events.
#[derive(Debug, Default)]
pub struct TargetListTracker {
    // `None` until the first snapshot, which only sets the baseline.
    last: Option<Vec<String>>,
}

impl TargetListTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_snapshot(&mut self, keys: Vec<String>) -> Vec<TargetEvent> {
        let Some(previous) = self.last.as_ref() else {
            self.last = Some(keys);
            return Vec::new();
        };
        if *previous == keys {
            return Vec::new();
        }
        let mut events: Vec<TargetEvent> = previous
            .iter()
            .filter(|key| !keys.contains(key))
            .map(|key| TargetEvent::Removed(key.clone()))
            .collect();
        events.extend(
            keys.iter()
                .filter(|key| !previous.contains(key))
                .map(|key| TargetEvent::Added(key.clone())),
        );
        self.last = Some(keys);
        events
    }

    pub fn current(&self) -> &[String] {
        self.last.as_deref().unwrap_or_default()
    }
}

/// Collapses a burst of notifications into one callback fired `delay` after the last one.
pub struct Debouncer {
    delay: Duration,
    generation: Arc<AtomicU64>,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Debouncer {
    pub fn new(delay: Duration, callback: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
            callback,
        }
    }

    pub fn notify(&self) {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = Arc::clone(&self.generation);
        let callback = Arc::clone(&self.callback);
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            if generation.load(Ordering::SeqCst) == ticket {
                callback();
            }
        });
    }

    /// Drops any pending callback.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct TargetTrackerHandle {
    stop_flag: Arc<AtomicBool>,
    debouncer: Arc<Debouncer>,
    join: JoinHandle<()>,
}

impl TargetTrackerHandle {
    pub fn stop(self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.debouncer.cancel();
        let _ = self.join.join();
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }
}

fn sleep_unless_stopped(stop_flag: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if stop_flag.load(Ordering::Relaxed) {
            return;
        }
        thread::sleep(STOP_CHECK.min(deadline.saturating_duration_since(Instant::now())));
    }
}

/// Polls the target list and calls `on_change` (debounced) whenever devices come or go.
pub fn start_target_tracker(
    gateway: Arc<dyn DeviceGateway>,
    poll_interval: Duration,
    debounce: Duration,
    trace_id: String,
    on_change: Arc<dyn Fn() + Send + Sync>,
) -> TargetTrackerHandle {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let debouncer = Arc::new(Debouncer::new(debounce, on_change));
    let stop_thread = Arc::clone(&stop_flag);
    let debouncer_thread = Arc::clone(&debouncer);

    let join = thread::spawn(move || {
        let mut tracker = TargetListTracker::new();
        let mut backoff_ms = BACKOFF_START_MS;
        while !stop_thread.load(Ordering::Relaxed) {
            match gateway.list_targets(&trace_id) {
                Ok(keys) => {
                    backoff_ms = BACKOFF_START_MS;
                    let events = tracker.push_snapshot(keys);
                    for event in &events {
                        info!(trace_id = %trace_id, event = ?event, "target change");
                    }
                    if !events.is_empty() {
                        debouncer_thread.notify();
                    }
                    sleep_unless_stopped(&stop_thread, poll_interval);
                }
                Err(err) => {
                    warn!(trace_id = %trace_id, error = %err, backoff_ms, "target tracking poll failed");
                    sleep_unless_stopped(&stop_thread, Duration::from_millis(backoff_ms));
                    backoff_ms = (backoff_ms * 2).min(BACKOFF_MAX_MS);
                }
            }
        }
    });

    TargetTrackerHandle {
        stop_flag,
        debouncer,
        join,
    }
}
