//! Concurrent fan-out of analysis tasks.
//!
//! The [`TaskCoordinator`] spawns one tokio task per collaborator and waits
//! until every task is terminal or the overall deadline passes. Units never
//! touch task state: they report `Started`/`Finished` messages over a
//! channel, and the coordinator applies transitions and emits the matching
//! progress events.

use crate::collaborator::{Analyzer, Collaborator};
use crate::error::{ReviewError, ReviewResult};
use crate::models::{AnalysisOutput, AnalysisTask, Document, ProgressEvent, TaskStatus};
use crate::progress::{panic_message, ProgressTracker};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stand-in deadline distance for budgets too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + budget`, capped instead of overflowing.
fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Timeout and isolation policy for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinationPolicy {
    /// Upper bound for a single collaborator call.
    pub per_task_timeout: Duration,
    /// Upper bound for the whole run.
    pub overall_timeout: Duration,
    /// When false, the first failure cancels every sibling.
    pub failure_tolerant: bool,
}

impl Default for CoordinationPolicy {
    fn default() -> Self {
        Self {
            per_task_timeout: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(60),
            failure_tolerant: true,
        }
    }
}

impl CoordinationPolicy {
    pub fn new(per_task_timeout: Duration, overall_timeout: Duration) -> Self {
        Self {
            per_task_timeout,
            overall_timeout,
            failure_tolerant: true,
        }
    }

    pub fn fail_fast(mut self) -> Self {
        self.failure_tolerant = false;
        self
    }

    pub fn validate(&self) -> ReviewResult<()> {
        if self.per_task_timeout.is_zero() {
            return Err(ReviewError::Validation(
                "per-task timeout must be positive".to_string(),
            ));
        }
        if self.overall_timeout.is_zero() {
            return Err(ReviewError::Validation(
                "overall timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Final task set of a run. Every task is terminal.
#[derive(Debug, Clone)]
pub struct CoordinationResult {
    /// In collaborator order.
    pub tasks: Vec<AnalysisTask>,
    pub all_succeeded: bool,
    pub elapsed: Duration,
    /// A failure cancelled the run in fail-fast mode.
    pub cancelled_early: bool,
    /// The overall deadline passed before every task finished.
    pub overall_timed_out: bool,
}

impl CoordinationResult {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Why the run ended before every task finished on its own, if it did.
    pub fn early_stop_reason(&self) -> Option<&'static str> {
        if self.overall_timed_out {
            Some("overall timeout reached before every analysis finished")
        } else if self.cancelled_early {
            Some("remaining analyses cancelled after a failure (fail-fast)")
        } else {
            None
        }
    }

    /// Tasks that did not complete.
    pub fn degraded(&self) -> impl Iterator<Item = &AnalysisTask> {
        self.tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
    }
}

/// How a unit ended, as seen from inside the unit.
#[derive(Debug)]
enum UnitOutcome {
    Completed(AnalysisOutput),
    Failed(String),
    TimedOut(String),
}

impl UnitOutcome {
    fn is_failure(&self) -> bool {
        !matches!(self, UnitOutcome::Completed(_))
    }
}

#[derive(Debug)]
enum UnitMessage {
    Started {
        index: usize,
        at: DateTime<Utc>,
    },
    Finished {
        index: usize,
        outcome: UnitOutcome,
        at: DateTime<Utc>,
    },
}

/// One spawned collaborator call.
struct TaskUnit {
    index: usize,
    analyzer: Arc<dyn Analyzer>,
    document: Arc<Document>,
    per_task_timeout: Duration,
    overall_deadline: Instant,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<UnitMessage>,
}

impl TaskUnit {
    async fn run(self) {
        let started = Instant::now();
        if self
            .tx
            .send(UnitMessage::Started {
                index: self.index,
                at: Utc::now(),
            })
            .is_err()
        {
            return;
        }

        let deadline = deadline_after(started, self.per_task_timeout).min(self.overall_deadline);
        let budget = deadline.saturating_duration_since(started);
        let analysis =
            AssertUnwindSafe(self.analyzer.analyze(&self.document, self.cancel.clone())).catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => UnitOutcome::Failed("cancelled".to_string()),
            result = timeout_at(deadline, analysis) => match result {
                Err(_) => {
                    self.cancel.cancel();
                    UnitOutcome::TimedOut(format!("no result within {:?}", budget))
                }
                Ok(Err(payload)) => UnitOutcome::Failed(format!(
                    "collaborator panicked: {}",
                    panic_message(payload.as_ref())
                )),
                Ok(Ok(Ok(output))) => UnitOutcome::Completed(output),
                Ok(Ok(Err(ReviewError::Timeout(after)))) => {
                    UnitOutcome::TimedOut(format!("collaborator timed out after {:?}", after))
                }
                Ok(Ok(Err(e))) => UnitOutcome::Failed(e.to_string()),
            },
        };

        // The coordinator may have stopped listening; nothing left to do then.
        let _ = self.tx.send(UnitMessage::Finished {
            index: self.index,
            outcome,
            at: Utc::now(),
        });
    }
}

/// Runs collaborators concurrently under a [`CoordinationPolicy`].
///
/// Holds no state across runs besides the tracker it reports to, so
/// independent coordinators can run side by side.
pub struct TaskCoordinator {
    tracker: Arc<ProgressTracker>,
}

impl TaskCoordinator {
    pub fn new(tracker: Arc<ProgressTracker>) -> Self {
        Self { tracker }
    }

    /// Run every collaborator against `document`.
    ///
    /// Returns `Err` only for invalid input, before anything is dispatched.
    /// Collaborator failures, panics and timeouts end up on the tasks.
    pub async fn coordinate(
        &self,
        document: Arc<Document>,
        collaborators: &[Collaborator],
        policy: &CoordinationPolicy,
    ) -> ReviewResult<CoordinationResult> {
        policy.validate()?;
        validate_collaborators(collaborators)?;

        let started = Instant::now();
        let overall_deadline = deadline_after(started, policy.overall_timeout);
        let run_token = CancellationToken::new();

        let mut tasks: Vec<AnalysisTask> = collaborators
            .iter()
            .map(|c| AnalysisTask::new(c.kind.clone()))
            .collect();
        for task in &tasks {
            self.tracker.register_stage(task.kind.label());
        }

        info!(
            "Dispatching {} analyses (per-task {:?}, overall {:?}, {})",
            tasks.len(),
            policy.per_task_timeout,
            policy.overall_timeout,
            if policy.failure_tolerant {
                "failure tolerant"
            } else {
                "fail fast"
            }
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handles: Vec<_> = collaborators
            .iter()
            .enumerate()
            .map(|(index, collaborator)| {
                let unit = TaskUnit {
                    index,
                    analyzer: Arc::clone(&collaborator.analyzer),
                    document: Arc::clone(&document),
                    per_task_timeout: policy.per_task_timeout,
                    overall_deadline,
                    cancel: run_token.child_token(),
                    tx: tx.clone(),
                };
                tokio::spawn(unit.run())
            })
            .collect();
        drop(tx);

        let overall = sleep_until(overall_deadline);
        tokio::pin!(overall);

        let mut remaining = tasks.len();
        let mut cancelled_early = false;
        let mut overall_timed_out = false;

        while remaining > 0 {
            tokio::select! {
                biased;
                message = rx.recv() => match message {
                    Some(UnitMessage::Started { index, at }) => {
                        self.apply_started(&mut tasks[index], collaborators[index].analyzer.name(), at);
                    }
                    Some(UnitMessage::Finished { index, outcome, at }) => {
                        let failure = outcome.is_failure();
                        if !self.apply_outcome(&mut tasks[index], outcome, at) {
                            continue;
                        }
                        remaining -= 1;
                        if failure && !policy.failure_tolerant {
                            warn!(
                                "{} analysis failed in fail-fast mode, cancelling {} remaining",
                                tasks[index].kind, remaining
                            );
                            run_token.cancel();
                            self.force_remaining(
                                &mut tasks,
                                UnitOutcome::Failed,
                                "cancelled after a sibling failed",
                            );
                            cancelled_early = remaining > 0;
                            break;
                        }
                    }
                    None => {
                        // Every unit is gone without reporting; only possible
                        // if a unit was aborted by the runtime.
                        self.force_remaining(
                            &mut tasks,
                            UnitOutcome::Failed,
                            "task unit exited without reporting",
                        );
                        break;
                    }
                },
                _ = &mut overall => {
                    warn!(
                        "Overall timeout of {:?} reached with {} analyses unfinished",
                        policy.overall_timeout, remaining
                    );
                    overall_timed_out = true;
                    run_token.cancel();
                    self.force_remaining(
                        &mut tasks,
                        UnitOutcome::TimedOut,
                        "overall timeout reached",
                    );
                    break;
                }
            }
        }

        // Release anything still in flight; finished units are unaffected.
        run_token.cancel();
        for handle in &handles {
            handle.abort();
        }

        let elapsed = started.elapsed();
        let all_succeeded = tasks.iter().all(|t| t.status == TaskStatus::Completed);
        info!(
            "Coordination finished in {:?}: {}/{} analyses completed",
            elapsed,
            tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
            tasks.len()
        );

        Ok(CoordinationResult {
            tasks,
            all_succeeded,
            elapsed,
            cancelled_early,
            overall_timed_out,
        })
    }

    fn apply_started(&self, task: &mut AnalysisTask, analyzer: &str, at: DateTime<Utc>) {
        if !task.mark_running(at) {
            debug!("Ignoring late start for {} ({})", task.kind, task.status);
            return;
        }
        self.tracker.emit(ProgressEvent::new(
            task.kind.label(),
            0.0,
            TaskStatus::Running,
            format!("{} started", analyzer),
        ));
    }

    /// Apply a terminal outcome. Returns false if the task was already terminal.
    fn apply_outcome(&self, task: &mut AnalysisTask, outcome: UnitOutcome, at: DateTime<Utc>) -> bool {
        let (applied, message) = match outcome {
            UnitOutcome::Completed(output) => {
                let message = format!(
                    "completed (score {:.2}, {} issues)",
                    output.score,
                    output.issue_count()
                );
                (task.complete(output, at), message)
            }
            UnitOutcome::Failed(detail) => {
                let message = format!("failed: {}", detail);
                (task.fail(detail, at), message)
            }
            UnitOutcome::TimedOut(detail) => {
                let message = format!("timed out: {}", detail);
                (task.time_out(detail, at), message)
            }
        };

        if !applied {
            debug!("Ignoring late result for {} ({})", task.kind, task.status);
            return false;
        }

        match task.status {
            TaskStatus::Completed => info!("{} analysis {}", task.kind, message),
            _ => warn!("{} analysis {}", task.kind, message),
        }
        self.tracker
            .emit(ProgressEvent::new(task.kind.label(), 100.0, task.status, message));
        true
    }

    fn force_remaining<F>(&self, tasks: &mut [AnalysisTask], outcome: F, detail: &str)
    where
        F: Fn(String) -> UnitOutcome,
    {
        let now = Utc::now();
        for task in tasks.iter_mut().filter(|t| !t.is_terminal()) {
            self.apply_outcome(task, outcome(detail.to_string()), now);
        }
    }
}

fn validate_collaborators(collaborators: &[Collaborator]) -> ReviewResult<()> {
    if collaborators.is_empty() {
        return Err(ReviewError::Validation(
            "at least one collaborator is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for collaborator in collaborators {
        // Stage ids and report keys are labels, so a custom kind may not
        // reuse a built-in name.
        if !seen.insert(collaborator.kind.label()) {
            return Err(ReviewError::Validation(format!(
                "collaborator kind '{}' registered twice",
                collaborator.kind
            )));
        }
    }
    Ok(())
}
