// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! The background delivery pipeline: a bounded, drop-oldest queue serviced
//! by one supervised consumer task.
//!
//! `minitrace::collector::global_collector` runs its collector loop on a
//! dedicated `std::thread` reached through a thread-local command channel.
//! This module keeps that "one dedicated worker, reached from any producer
//! thread without a shared lock on the hot path" shape but moves the worker
//! onto a supervised Tokio task (so `flush`/`shutdown` can suspend rather
//! than block an OS thread) and adds a circuit breaker and exponential
//! backoff restart that minitrace's collector does not need.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::stats::Statistics;

/// An opaque unit of work enqueued for asynchronous processing.
/// The crate does not prescribe an export wire format — `execute` is the
/// collaborator-supplied effect.
pub trait WorkItem: Send + 'static {
    fn operation_type(&self) -> &str;
    fn execute(self: Box<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Clone, Debug)]
pub struct BackgroundWorkerConfig {
    pub capacity: usize,
    pub max_restart_attempts: u32,
    pub base_restart_delay: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_reset_timeout: Duration,
}

impl Default for BackgroundWorkerConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            max_restart_attempts: 5,
            base_restart_delay: Duration::from_millis(50),
            circuit_failure_threshold: 8,
            circuit_reset_timeout: Duration::from_secs(5),
        }
    }
}

impl BackgroundWorkerConfig {
    /// Validates the constrained fields: `capacity >= 1`,
    /// `max_restart_attempts >= 0` (trivially true for `u32`),
    /// `base_restart_delay` in `[0, 5min]`.
    pub fn validate(&self) -> Result<(), crate::error::ValidationError> {
        if self.capacity == 0 {
            return Err(crate::error::ValidationError::InvalidCapacity);
        }
        if self.base_restart_delay > Duration::from_secs(300) {
            return Err(crate::error::ValidationError::InvalidCapacity);
        }
        Ok(())
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerPhase {
    Starting = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl From<u8> for WorkerPhase {
    fn from(v: u8) -> Self {
        match v {
            0 => WorkerPhase::Starting,
            1 => WorkerPhase::Running,
            2 => WorkerPhase::Draining,
            _ => WorkerPhase::Stopped,
        }
    }
}

/// An observability-only snapshot of the worker's state machine; reading it has no effect on behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerState {
    pub phase: WorkerPhase,
    pub circuit_open: bool,
}

/// Result of [`BackgroundWorker::flush`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushResult {
    pub success: bool,
    pub items_flushed: u64,
    pub items_remaining: u64,
    pub duration: Duration,
}

/// A token a caller can trigger to abort a waiting [`BackgroundWorker::flush`]
/// without affecting the item currently in flight.
#[derive(Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

struct Inner {
    queue: Mutex<VecDeque<Box<dyn WorkItem>>>,
    capacity: usize,
    notify: Notify,
    phase: AtomicU8,
    circuit_open: AtomicBool,
    consecutive_failures: AtomicU32,
    disposed: AtomicBool,
    stats: Arc<Statistics>,
    config: BackgroundWorkerConfig,
}

/// Single-consumer, bounded, lossy-on-overflow pipeline with self-healing
/// supervision. Cloning shares the same queue and consumer.
#[derive(Clone)]
pub struct BackgroundWorker {
    inner: Arc<Inner>,
}

impl BackgroundWorker {
    /// Spawns the consumer task. Must be called from within a Tokio runtime.
    pub fn spawn(config: BackgroundWorkerConfig, stats: Arc<Statistics>) -> Self {
        let worker = Self::new_inner(config, stats);
        tokio::spawn(worker.clone().supervise());
        worker
    }

    /// Builds the worker's state without spawning a consumer task. Used for
    /// the fallback no-op scope factory, which never reaches `try_enqueue`
    /// and so never needs a live consumer.
    pub fn new_detached(stats: Arc<Statistics>) -> Self {
        let worker = Self::new_inner(BackgroundWorkerConfig::default(), stats);
        worker.set_phase(WorkerPhase::Stopped);
        worker
    }

    fn new_inner(config: BackgroundWorkerConfig, stats: Arc<Statistics>) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::with_capacity(config.capacity.min(4096))),
            capacity: config.capacity,
            notify: Notify::new(),
            phase: AtomicU8::new(WorkerPhase::Starting as u8),
            circuit_open: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            disposed: AtomicBool::new(false),
            stats,
            config,
        });
        Self { inner }
    }

    fn phase(&self) -> WorkerPhase {
        WorkerPhase::from(self.inner.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: WorkerPhase) {
        self.inner.phase.store(phase as u8, Ordering::Release);
    }

    /// An observability snapshot; never affects behavior.
    pub fn state(&self) -> WorkerState {
        WorkerState {
            phase: self.phase(),
            circuit_open: self.inner.circuit_open.load(Ordering::Relaxed),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Non-blocking; `O(1)` regardless of queue depth. Returns `true` if the
    /// item was accepted (which may have required dropping the oldest queued
    /// item), `false` if the worker is shut down or the circuit is open.
    pub fn try_enqueue(&self, item: Box<dyn WorkItem>) -> bool {
        if self.inner.disposed.load(Ordering::Acquire) {
            return false;
        }
        match self.phase() {
            WorkerPhase::Draining | WorkerPhase::Stopped => return false,
            _ => {}
        }
        if self.inner.circuit_open.load(Ordering::Relaxed) {
            debug!(operation_type = item.operation_type(), "circuit open, rejecting item");
            return false;
        }

        let mut queue = self.inner.queue.lock();
        if queue.len() >= self.inner.capacity {
            if queue.pop_front().is_some() {
                self.inner.stats.record_item_dropped();
            }
        }
        queue.push_back(item);
        let depth = queue.len() as u64;
        drop(queue);

        self.inner.stats.record_item_enqueued();
        self.inner.stats.observe_queue_depth(depth);
        self.inner.notify.notify_one();
        true
    }

    /// Blocks (suspends) up to `timeout` while the consumer drains the
    /// queue. No new items are accepted once draining begins. `cancel`
    /// aborts waiting without affecting an in-flight item.
    pub async fn flush(&self, timeout: Duration, cancel: Cancel) -> FlushResult {
        let started_at = Instant::now();
        let processed_before = self.inner.stats.snapshot().items_processed;
        self.set_phase(WorkerPhase::Draining);
        self.inner.notify.notify_waiters();

        loop {
            let remaining = self.queue_len() as u64;
            let flushed = self.inner.stats.snapshot().items_processed - processed_before;
            if remaining == 0 {
                return FlushResult {
                    success: true,
                    items_flushed: flushed,
                    items_remaining: 0,
                    duration: started_at.elapsed(),
                };
            }
            if started_at.elapsed() >= timeout || cancel.is_triggered() {
                return FlushResult {
                    success: false,
                    items_flushed: flushed,
                    items_remaining: remaining,
                    duration: started_at.elapsed(),
                };
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Permanently stops the worker. Idempotent; items still queued are
    /// dropped without executing.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_phase(WorkerPhase::Stopped);
        self.inner.notify.notify_waiters();
        let dropped = self.inner.queue.lock().drain(..).count();
        for _ in 0..dropped {
            self.inner.stats.record_item_dropped();
        }
    }

    async fn supervise(self) {
        self.set_phase(WorkerPhase::Running);
        let mut attempt: u32 = 0;
        loop {
            let worker = self.clone();
            let handle = tokio::spawn(async move { worker.consume().await });
            match handle.await {
                Ok(()) => break,
                Err(join_err) => {
                    attempt += 1;
                    self.inner.stats.record_restart();
                    if attempt > self.inner.config.max_restart_attempts {
                        warn!(attempt, "consumer task exhausted restart attempts, stopping");
                        self.set_phase(WorkerPhase::Stopped);
                        break;
                    }
                    let backoff = self
                        .inner
                        .config
                        .base_restart_delay
                        .saturating_mul(1 << attempt.min(16));
                    warn!(attempt, ?backoff, error = %join_err, "consumer task crashed, restarting");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn consume(&self) {
        loop {
            if self.inner.disposed.load(Ordering::Acquire) {
                return;
            }
            if self.inner.circuit_open.load(Ordering::Relaxed) {
                // Paused while the circuit is open: nothing is pulled from
                // the queue. The cooldown task spawned by `note_failure`
                // flips this back to `false` and wakes us with `notify_one`,
                // at which point exactly the next popped item is the
                // half-open probe.
                self.inner.notify.notified().await;
                continue;
            }
            let item = self.inner.queue.lock().pop_front();
            let Some(item) = item else {
                if self.phase() == WorkerPhase::Draining {
                    return;
                }
                self.inner.notify.notified().await;
                continue;
            };

            let operation_type = item.operation_type().to_string();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| item.execute()));
            match result {
                Ok(Ok(())) => {
                    self.inner.stats.record_item_processed();
                    self.inner.consecutive_failures.store(0, Ordering::Relaxed);
                    if self.inner.circuit_open.swap(false, Ordering::Relaxed) {
                        info!(operation_type, "circuit closed after successful probe");
                    }
                }
                Ok(Err(err)) => {
                    debug!(operation_type, error = %err, "work item failed");
                    self.note_failure(&operation_type);
                }
                Err(_) => {
                    debug!(operation_type, "work item panicked");
                    self.inner.stats.record_internal_error();
                    self.note_failure(&operation_type);
                }
            }
        }
    }

    fn note_failure(&self, operation_type: &str) {
        let failures = self.inner.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.inner.config.circuit_failure_threshold
            && !self.inner.circuit_open.swap(true, Ordering::Relaxed)
        {
            warn!(operation_type, failures, "circuit opened");
            let worker = self.clone();
            let cooldown = self.inner.config.circuit_reset_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(cooldown).await;
                worker.inner.consecutive_failures.store(0, Ordering::Relaxed);
                info!("circuit cooldown elapsed, allowing a half-open probe");
                worker.inner.circuit_open.store(false, Ordering::Relaxed);
                worker.inner.notify.notify_one();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingItem {
        counter: Arc<AtomicUsize>,
    }

    impl WorkItem for CountingItem {
        fn operation_type(&self) -> &str {
            "test"
        }
        fn execute(self: Box<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn try_enqueue_never_blocks_and_accepts_overflow() {
        let stats = Arc::new(Statistics::new());
        let worker = BackgroundWorker::spawn(
            BackgroundWorkerConfig {
                capacity: 3,
                ..Default::default()
            },
            stats.clone(),
        );
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let accepted = worker.try_enqueue(Box::new(CountingItem {
                counter: counter.clone(),
            }));
            assert!(accepted);
        }
        let result = worker.flush(Duration::from_secs(1), Cancel::new()).await;
        assert!(result.success);
        assert!(stats.snapshot().items_dropped >= 1);
    }

    #[tokio::test]
    async fn flush_reports_partial_completion_on_timeout() {
        let stats = Arc::new(Statistics::new());
        let worker = BackgroundWorker::spawn(BackgroundWorkerConfig::default(), stats);

        struct SlowItem;
        impl WorkItem for SlowItem {
            fn operation_type(&self) -> &str {
                "slow"
            }
            fn execute(self: Box<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            }
        }
        for _ in 0..20 {
            worker.try_enqueue(Box::new(SlowItem));
        }
        let result = worker.flush(Duration::from_millis(20), Cancel::new()).await;
        assert!(!result.success);
        assert!(result.items_remaining > 0);
    }

    #[tokio::test]
    async fn consumer_pauses_backlog_while_circuit_is_open() {
        struct FailingItem {
            invocations: Arc<AtomicUsize>,
        }
        impl WorkItem for FailingItem {
            fn operation_type(&self) -> &str {
                "failing"
            }
            fn execute(self: Box<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
                self.invocations.fetch_add(1, Ordering::SeqCst);
                Err("always fails".into())
            }
        }

        let stats = Arc::new(Statistics::new());
        let worker = BackgroundWorker::spawn(
            BackgroundWorkerConfig {
                circuit_failure_threshold: 3,
                circuit_reset_timeout: Duration::from_millis(150),
                ..Default::default()
            },
            stats,
        );
        let invocations = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            assert!(worker.try_enqueue(Box::new(FailingItem {
                invocations: invocations.clone(),
            })));
        }

        // The first 3 items trip the breaker; give the consumer time to run
        // them, then confirm the remaining 2 stay queued, untouched, while
        // the circuit is open rather than being drained immediately.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert!(worker.state().circuit_open);
        assert_eq!(worker.queue_len(), 2);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 3, "still paused before cooldown elapses");

        // Past the cooldown the consumer resumes and drains the backlog.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn circuit_open_emits_a_warn_event() {
        use std::io::Write;
        use std::sync::Mutex as StdMutex;

        #[derive(Clone, Default)]
        struct BufWriter(Arc<StdMutex<Vec<u8>>>);
        impl Write for BufWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buf = BufWriter::default();
        let buf_for_writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || buf_for_writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        struct FailingItem;
        impl WorkItem for FailingItem {
            fn operation_type(&self) -> &str {
                "failing"
            }
            fn execute(self: Box<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
                Err("nope".into())
            }
        }

        let stats = Arc::new(Statistics::new());
        let worker = BackgroundWorker::spawn(
            BackgroundWorkerConfig {
                circuit_failure_threshold: 2,
                circuit_reset_timeout: Duration::from_secs(30),
                ..Default::default()
            },
            stats,
        );
        for _ in 0..2 {
            worker.try_enqueue(Box::new(FailingItem));
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let logged = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("circuit opened"), "log output was: {logged}");
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let stats = Arc::new(Statistics::new());
        let worker = BackgroundWorker::spawn(BackgroundWorkerConfig::default(), stats);
        worker.dispose();
        worker.dispose();
        assert_eq!(worker.state().phase, WorkerPhase::Stopped);
        assert!(!worker.try_enqueue(Box::new(CountingItem {
            counter: Arc::new(AtomicUsize::new(0)),
        })));
    }
}
