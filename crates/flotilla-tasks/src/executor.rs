//! Bounded fan-out/join executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{BatchError, TaskFailure};

/// Default per-task timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default number of tasks allowed to run at once.
pub const DEFAULT_MAX_PARALLEL: usize = 32;

type Work<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send + 'static>;

/// A unit of blocking work with a label naming the resource it acts on.
pub struct Task<T> {
    label: String,
    work: Work<T>,
}

impl<T> Task<T> {
    pub fn new<F>(label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            label: label.into(),
            work: Box::new(work),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Runs [`Task`]s on the blocking pool.
///
/// A task that exceeds the timeout is reported as failed. Its thread is
/// not interrupted: the blocking call keeps running in the background,
/// holding its parallelism slot, and its eventual result is dropped.
#[derive(Clone)]
pub struct TaskExecutor {
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_PARALLEL)
    }
}

impl TaskExecutor {
    pub fn new(timeout: Duration, max_parallel: usize) -> Self {
        Self {
            timeout,
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one task and wait for it.
    pub async fn run_single<T: Send + 'static>(&self, task: Task<T>) -> Result<T, TaskFailure> {
        let label = task.label.clone();
        run_one(self.permits.clone(), self.timeout, task)
            .await
            .map_err(|reason| TaskFailure { label, reason })
    }

    /// Run every task concurrently and wait for all of them.
    ///
    /// Results come back in submission order. A failing task does not
    /// cancel its siblings; if any failed, the whole batch is an error
    /// listing each failure.
    pub async fn run_batch<T: Send + 'static>(&self, tasks: Vec<Task<T>>) -> Result<Vec<T>, BatchError> {
        let count = tasks.len();
        if count == 0 {
            return Ok(Vec::new());
        }
        debug!(tasks = count, "dispatching task batch");

        let mut set = JoinSet::new();
        for (idx, task) in tasks.into_iter().enumerate() {
            let permits = self.permits.clone();
            let timeout = self.timeout;
            let label = task.label.clone();
            set.spawn(async move { (idx, label, run_one(permits, timeout, task).await) });
        }

        let mut values: Vec<Option<T>> = (0..count).map(|_| None).collect();
        let mut failures: Vec<(usize, TaskFailure)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, _, Ok(value))) => values[idx] = Some(value),
                Ok((idx, label, Err(reason))) => {
                    warn!(task = %label, %reason, "task failed");
                    failures.push((idx, TaskFailure { label, reason }));
                }
                Err(e) => {
                    // The wrapper future itself died; its index is lost.
                    failures.push((
                        usize::MAX,
                        TaskFailure {
                            label: "<unknown>".to_string(),
                            reason: e.to_string(),
                        },
                    ));
                }
            }
        }

        if !failures.is_empty() {
            failures.sort_by_key(|(idx, _)| *idx);
            return Err(BatchError {
                failures: failures.into_iter().map(|(_, f)| f).collect(),
            });
        }
        debug!(tasks = count, "task batch complete");
        Ok(values.into_iter().flatten().collect())
    }
}

async fn run_one<T: Send + 'static>(
    permits: Arc<Semaphore>,
    timeout: Duration,
    task: Task<T>,
) -> Result<T, String> {
    let permit = permits
        .acquire_owned()
        .await
        .map_err(|_| "task executor shut down".to_string())?;
    // The permit lives on the blocking thread so a timed-out task still
    // counts against the limit until its work returns.
    let work = task.work;
    let handle = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        work()
    });
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(format!("{e:#}")),
        Ok(Err(join)) if join.is_panic() => Err("task panicked".to_string()),
        Ok(Err(join)) => Err(join.to_string()),
        Err(_) => Err(format!("timed out after {}s", timeout.as_secs_f64())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;

    use super::*;

    #[tokio::test]
    async fn batch_returns_values_in_submission_order() {
        let exec = TaskExecutor::default();
        let tasks = (0..5u64)
            .map(|i| {
                Task::new(format!("t{i}"), move || {
                    std::thread::sleep(Duration::from_millis(20 * (5 - i)));
                    Ok(i)
                })
            })
            .collect();
        assert_eq!(exec.run_batch(tasks).await.unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failures_are_aggregated_and_siblings_finish() {
        let exec = TaskExecutor::default();
        let finished = Arc::new(AtomicUsize::new(0));
        let tasks = ["n1", "n2", "n3", "n4"]
            .into_iter()
            .map(|id| {
                let finished = finished.clone();
                Task::new(id, move || {
                    std::thread::sleep(Duration::from_millis(10));
                    finished.fetch_add(1, Ordering::SeqCst);
                    if id == "n2" || id == "n4" {
                        bail!("converge of {id} exited 1");
                    }
                    Ok(())
                })
            })
            .collect();

        let err = exec.run_batch(tasks).await.unwrap_err();
        assert_eq!(err.labels(), vec!["n2", "n4"]);
        assert_eq!(finished.load(Ordering::SeqCst), 4);
        assert!(err.to_string().contains("converge of n4 exited 1"));
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let exec = TaskExecutor::new(Duration::from_millis(50), 4);
        let err = exec
            .run_single(Task::new("slow", || {
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            }))
            .await
            .unwrap_err();
        assert_eq!(err.label, "slow");
        assert!(err.reason.starts_with("timed out"));
    }

    #[tokio::test]
    async fn timed_out_task_keeps_its_slot() {
        let exec = TaskExecutor::new(Duration::from_millis(50), 1);
        let slow_done = Arc::new(AtomicUsize::new(0));

        let done = slow_done.clone();
        let err = exec
            .run_single(Task::new("stuck", move || {
                std::thread::sleep(Duration::from_millis(300));
                done.store(1, Ordering::SeqCst);
                Ok(())
            }))
            .await
            .unwrap_err();
        assert!(err.reason.starts_with("timed out"));

        // Same single slot, longer timeout: the next task waits for the
        // stuck one to finish before it runs.
        let patient = TaskExecutor {
            timeout: Duration::from_secs(5),
            permits: exec.permits.clone(),
        };
        let seen = slow_done.clone();
        let observed = patient
            .run_single(Task::new("next", move || Ok(seen.load(Ordering::SeqCst))))
            .await
            .unwrap();
        assert_eq!(observed, 1);
    }

    #[tokio::test]
    async fn panic_is_a_failure() {
        let exec = TaskExecutor::default();
        let err = exec
            .run_single(Task::new("boom", || -> anyhow::Result<()> { panic!("boom") }))
            .await
            .unwrap_err();
        assert_eq!(err.reason, "task panicked");
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let exec = TaskExecutor::new(DEFAULT_TIMEOUT, 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks = (0..6)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                Task::new(format!("t{i}"), move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        exec.run_batch(tasks).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn empty_batch_is_ok() {
        let exec = TaskExecutor::default();
        let out: Vec<()> = exec.run_batch(Vec::new()).await.unwrap();
        assert!(out.is_empty());
    }
}
