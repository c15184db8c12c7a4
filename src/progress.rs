//! Live progress tracking for a review run.
//!
//! A [`ProgressTracker`] is created per coordination run and dropped with
//! it. Task units report through [`ProgressTracker::emit`]; displays poll
//! [`ProgressTracker::snapshot`]. The optional [`ProgressRenderer`] redraws
//! indicatif bars from snapshots on its own schedule.

use crate::models::{ProgressEvent, TaskStatus};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long [`ProgressRenderer::stop`] waits for the render loop.
const RENDERER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A progress listener. Called synchronously on the emitting task, so it
/// should return quickly.
pub type Subscriber = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Current state of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageProgress {
    pub percentage: f64,
    pub status: TaskStatus,
    pub message: String,
}

impl StageProgress {
    fn pending() -> Self {
        Self {
            percentage: 0.0,
            status: TaskStatus::Pending,
            message: String::new(),
        }
    }
}

/// Aggregate view of a tracker.
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    /// Mean percentage over all stages.
    pub overall_percentage: f64,
    pub elapsed: Duration,
    pub stages: BTreeMap<String, StageProgress>,
}

/// Thread-safe per-stage progress with pluggable subscribers.
pub struct ProgressTracker {
    stages: Mutex<BTreeMap<String, StageProgress>>,
    subscribers: RwLock<Vec<Subscriber>>,
    started_at: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl ProgressTracker {
    /// Create a tracker with the given stages registered as pending.
    pub fn new<I, S>(stage_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stages = stage_ids
            .into_iter()
            .map(|id| (id.into(), StageProgress::pending()))
            .collect();

        Self {
            stages: Mutex::new(stages),
            subscribers: RwLock::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    /// Register a stage after construction. Existing stages are left alone.
    pub fn register_stage(&self, stage_id: impl Into<String>) {
        self.stages
            .lock()
            .entry(stage_id.into())
            .or_insert_with(StageProgress::pending);
    }

    /// Register a listener invoked on every event.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Arc::new(callback));
    }

    /// Record an event and notify subscribers.
    ///
    /// The stage map lock is released before any subscriber runs. A
    /// panicking subscriber is logged and skipped; the remaining
    /// subscribers still see the event.
    pub fn emit(&self, event: ProgressEvent) {
        {
            let mut stages = self.stages.lock();
            let stage = stages
                .entry(event.stage_id.clone())
                .or_insert_with(StageProgress::pending);
            stage.percentage = event.percentage;
            stage.status = event.status;
            stage.message = event.message.clone();
        }

        debug!(
            "Progress {}: {:.0}% ({}) {}",
            event.stage_id, event.percentage, event.status, event.message
        );

        let subscribers: Vec<Subscriber> = self.subscribers.read().clone();
        for (index, subscriber) in subscribers.iter().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| subscriber(&event))) {
                warn!(
                    "Progress subscriber {} panicked on stage {}: {}",
                    index,
                    event.stage_id,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Current state of every stage.
    pub fn snapshot(&self) -> BTreeMap<String, StageProgress> {
        self.stages.lock().clone()
    }

    /// Percentage per stage, for consumers that only need the numbers.
    pub fn percentages(&self) -> BTreeMap<String, f64> {
        self.stages
            .lock()
            .iter()
            .map(|(id, stage)| (id.clone(), stage.percentage))
            .collect()
    }

    pub fn summary(&self) -> ProgressSummary {
        let stages = self.snapshot();
        let overall_percentage = if stages.is_empty() {
            0.0
        } else {
            stages.values().map(|s| s.percentage).sum::<f64>() / stages.len() as f64
        };

        ProgressSummary {
            overall_percentage,
            elapsed: self.started_at.elapsed(),
            stages,
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Status marker used in progress bars and the console summary.
pub fn status_emoji(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "⏳",
        TaskStatus::Running => "⚡",
        TaskStatus::Completed => "✅",
        TaskStatus::Failed => "❌",
        TaskStatus::TimedOut => "⌛",
    }
}

/// Periodically redraws progress bars from a tracker snapshot.
pub struct ProgressRenderer {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressRenderer {
    /// Start rendering to stderr.
    pub fn start(tracker: Arc<ProgressTracker>, interval: Duration) -> Self {
        Self::start_with_target(tracker, interval, ProgressDrawTarget::stderr())
    }

    /// Start rendering to an explicit draw target.
    pub fn start_with_target(
        tracker: Arc<ProgressTracker>,
        interval: Duration,
        target: ProgressDrawTarget,
    ) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let interval = interval.max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            let multi = MultiProgress::with_draw_target(target);
            let style = ProgressStyle::with_template("{prefix:<18} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉░");
            let mut bars: HashMap<String, ProgressBar> = HashMap::new();
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        redraw(&tracker, &multi, &style, &mut bars);
                    }
                }
            }

            redraw(&tracker, &multi, &style, &mut bars);
            for bar in bars.values() {
                bar.finish();
            }
        });

        Self { stop, handle }
    }

    /// Stop the render loop, waiting at most one second for it to exit.
    pub async fn stop(self) {
        self.stop.cancel();
        if !join_or_abort(self.handle, RENDERER_JOIN_TIMEOUT).await {
            warn!("Progress renderer did not stop within {:?}", RENDERER_JOIN_TIMEOUT);
        }
    }
}

/// Wait up to `limit` for `handle`; abort it if it is still running.
/// Returns false when the task had to be aborted.
async fn join_or_abort(mut handle: JoinHandle<()>, limit: Duration) -> bool {
    if tokio::time::timeout(limit, &mut handle).await.is_ok() {
        return true;
    }
    handle.abort();
    false
}

fn redraw(
    tracker: &ProgressTracker,
    multi: &MultiProgress,
    style: &ProgressStyle,
    bars: &mut HashMap<String, ProgressBar>,
) {
    for (stage_id, stage) in tracker.snapshot() {
        let bar = bars.entry(stage_id.clone()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar
        });
        bar.set_prefix(format!("{} {}", status_emoji(stage.status), stage_id));
        bar.set_position(stage.percentage.round() as u64);
        bar.set_message(stage.status.to_string());
    }
}
