//! Overflow Disposal Policies
//!
//! Decide when the engine sheds overflow after a mutation. The engine only
//! exposes the disposal passes; the cadence lives here.
//!
//! | Policy             | Disposes                                        |
//! |--------------------|-------------------------------------------------|
//! | `ImmediatePolicy`  | after every mutation, on the caller's thread    |
//! | `TimedPolicy`      | at most once per interval, on the caller's thread|
//! | `BatchPolicy`      | every N mutations, on the caller's thread       |
//! | `BackgroundPolicy` | every N mutations, on a tokio worker            |
//! | `NoopPolicy`       | never; callers dispose explicitly               |

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{EvictionPolicy, OverflowDisposer};
use crate::error::{Error, Result};

// =============================================================================
// Immediate
// =============================================================================

/// Runs both disposal passes after every mutation
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediatePolicy;

impl EvictionPolicy for ImmediatePolicy {
    fn on_mutation(&self, disposer: &Arc<dyn OverflowDisposer>) -> Result<()> {
        disposer.dispose_overflow().map(|_| ())
    }

    fn name(&self) -> &'static str {
        "immediate"
    }
}

// =============================================================================
// Noop
// =============================================================================

/// Never disposes
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPolicy;

impl EvictionPolicy for NoopPolicy {
    fn on_mutation(&self, _disposer: &Arc<dyn OverflowDisposer>) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

// =============================================================================
// Timed
// =============================================================================

/// Disposes on a mutation only if `interval` passed since the last run
#[derive(Debug)]
pub struct TimedPolicy {
    interval: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl TimedPolicy {
    /// Dispose at most once per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: Mutex::new(None),
        }
    }

    /// Minimum time between disposals
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl EvictionPolicy for TimedPolicy {
    fn on_mutation(&self, disposer: &Arc<dyn OverflowDisposer>) -> Result<()> {
        {
            let mut last_run = self.last_run.lock();
            if matches!(*last_run, Some(at) if at.elapsed() < self.interval) {
                return Ok(());
            }
            *last_run = Some(Instant::now());
        }
        disposer.dispose_overflow().map(|_| ())
    }

    fn name(&self) -> &'static str {
        "timed"
    }
}

// =============================================================================
// Batch
// =============================================================================

/// Disposes on every `batch_size`-th mutation
#[derive(Debug)]
pub struct BatchPolicy {
    batch_size: usize,
    mutations: AtomicUsize,
}

impl BatchPolicy {
    /// `batch_size` of zero is treated as one
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Mutations per disposal
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl EvictionPolicy for BatchPolicy {
    fn on_mutation(&self, disposer: &Arc<dyn OverflowDisposer>) -> Result<()> {
        let seen = self.mutations.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % self.batch_size == 0 {
            disposer.dispose_overflow()?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "batch"
    }
}

// =============================================================================
// Background
// =============================================================================

/// Hands disposal to a tokio worker every `batch_size` mutations
///
/// At most one disposal is queued; triggers arriving while one is pending
/// are dropped. Disposal runs on the blocking pool since it may touch the
/// backing store. Failures are logged on the worker and never reach the
/// mutating caller.
pub struct BackgroundPolicy {
    batch_size: usize,
    mutations: AtomicUsize,
    sender: mpsc::Sender<Arc<dyn OverflowDisposer>>,
    cancel: CancellationToken,
    completed: Arc<AtomicU64>,
}

impl BackgroundPolicy {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn(batch_size: usize) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("background policy needs a tokio runtime: {}", e)))?;

        let (sender, mut receiver) = mpsc::channel::<Arc<dyn OverflowDisposer>>(1);
        let cancel = CancellationToken::new();
        let completed = Arc::new(AtomicU64::new(0));

        let token = cancel.clone();
        let runs = completed.clone();
        handle.spawn(async move {
            info!("background disposal worker started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = receiver.recv() => {
                        let Some(disposer) = next else { break };
                        match tokio::task::spawn_blocking(move || disposer.dispose_overflow()).await {
                            Ok(Ok(report)) => debug!(
                                moved = report.moved,
                                skipped = report.skipped,
                                freed_bytes = report.freed_bytes,
                                "background disposal finished"
                            ),
                            Ok(Err(e)) => warn!(error = %e, "background disposal failed"),
                            Err(e) => error!(error = %e, "background disposal task panicked"),
                        }
                        runs.fetch_add(1, Ordering::Release);
                    }
                }
            }
            info!("background disposal worker stopped");
        });

        Ok(Self {
            batch_size: batch_size.max(1),
            mutations: AtomicUsize::new(0),
            sender,
            cancel,
            completed,
        })
    }

    /// Disposal passes finished by the worker
    pub fn completed_runs(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Stop the worker; pending triggers are discarded
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// True once the worker has been told to stop
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl EvictionPolicy for BackgroundPolicy {
    fn on_mutation(&self, disposer: &Arc<dyn OverflowDisposer>) -> Result<()> {
        let seen = self.mutations.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % self.batch_size != 0 || self.is_shutdown() {
            return Ok(());
        }
        match self.sender.try_send(disposer.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => debug!("disposal already pending"),
            Err(mpsc::error::TrySendError::Closed(_)) => warn!("background disposal worker is gone"),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "background"
    }
}

impl Drop for BackgroundPolicy {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DisposalReport;

    #[derive(Default)]
    struct CountingDisposer {
        heap_runs: AtomicUsize,
        off_heap_runs: AtomicUsize,
    }

    impl CountingDisposer {
        fn runs(&self) -> usize {
            self.heap_runs.load(Ordering::SeqCst)
        }
    }

    impl OverflowDisposer for CountingDisposer {
        fn dispose_heap_overflow(&self) -> Result<DisposalReport> {
            self.heap_runs.fetch_add(1, Ordering::SeqCst);
            Ok(DisposalReport {
                moved: 1,
                ..Default::default()
            })
        }

        fn dispose_off_heap_overflow(&self) -> Result<DisposalReport> {
            self.off_heap_runs.fetch_add(1, Ordering::SeqCst);
            Ok(DisposalReport::default())
        }
    }

    fn disposer() -> (Arc<CountingDisposer>, Arc<dyn OverflowDisposer>) {
        let counting = Arc::new(CountingDisposer::default());
        let shared: Arc<dyn OverflowDisposer> = counting.clone();
        (counting, shared)
    }

    #[test]
    fn test_immediate_runs_both_passes() {
        let (counting, shared) = disposer();
        ImmediatePolicy.on_mutation(&shared).unwrap();
        ImmediatePolicy.on_mutation(&shared).unwrap();

        assert_eq!(counting.runs(), 2);
        assert_eq!(counting.off_heap_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_noop_never_runs() {
        let (counting, shared) = disposer();
        for _ in 0..10 {
            NoopPolicy.on_mutation(&shared).unwrap();
        }
        assert_eq!(counting.runs(), 0);
    }

    #[test]
    fn test_batch_runs_every_nth() {
        let (counting, shared) = disposer();
        let policy = BatchPolicy::new(3);
        for _ in 0..7 {
            policy.on_mutation(&shared).unwrap();
        }
        assert_eq!(counting.runs(), 2);
        assert_eq!(BatchPolicy::new(0).batch_size(), 1);
    }

    #[test]
    fn test_timed_throttles() {
        let (counting, shared) = disposer();
        let policy = TimedPolicy::new(Duration::from_millis(50));

        policy.on_mutation(&shared).unwrap();
        policy.on_mutation(&shared).unwrap();
        assert_eq!(counting.runs(), 1);

        std::thread::sleep(Duration::from_millis(70));
        policy.on_mutation(&shared).unwrap();
        assert_eq!(counting.runs(), 2);
    }

    #[test]
    fn test_background_requires_runtime() {
        assert!(matches!(BackgroundPolicy::spawn(1), Err(Error::Config(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_disposes_off_caller_thread() {
        let (counting, shared) = disposer();
        let policy = BackgroundPolicy::spawn(2).unwrap();

        policy.on_mutation(&shared).unwrap();
        assert_eq!(policy.completed_runs(), 0);
        policy.on_mutation(&shared).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while policy.completed_runs() == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(policy.completed_runs(), 1);
        assert_eq!(counting.runs(), 1);
    }

    #[tokio::test]
    async fn test_background_shutdown_stops_triggers() {
        let (counting, shared) = disposer();
        let policy = BackgroundPolicy::spawn(1).unwrap();
        policy.shutdown();
        assert!(policy.is_shutdown());

        policy.on_mutation(&shared).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counting.runs(), 0);
    }
}
