// Structured task group: one cancellation token, one join barrier, first error wins

use crate::errors::CheckerError;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type TaskResult = Result<(), CheckerError>;

/// Group of named tasks sharing a cancellation signal
///
/// A task that returns an error, or panics, cancels the whole group. [`TaskGroup::wait`]
/// blocks until every spawned task has returned and yields the first error observed.
pub struct TaskGroup {
    token: CancellationToken,
    tasks: Mutex<JoinSet<TaskResult>>,
    spawned: Mutex<Vec<String>>,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
            spawned: Mutex::new(Vec::new()),
        }
    }

    /// Token every task should select on
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn `fut` into the group under `name`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.clone();
        let task_name = name.clone();

        let supervised = async move {
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(CheckerError::TaskPanicked {
                    task: task_name.clone(),
                    reason: panic_message(payload.as_ref()),
                }),
            };
            if let Err(e) = &result {
                error!(task = %task_name, error = %e, "Task failed, cancelling siblings");
                token.cancel();
            } else {
                debug!(task = %task_name, "Task exited");
            }
            result
        };

        lock(&self.tasks).spawn(supervised);
        lock(&self.spawned).push(name);
    }

    /// Raise the cancellation signal without waiting
    pub fn kill(&self) {
        self.token.cancel();
    }

    pub fn is_dying(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Names of every task spawned so far, in spawn order
    pub fn spawned_tasks(&self) -> Vec<String> {
        lock(&self.spawned).clone()
    }

    /// Block until every spawned task has returned
    pub async fn wait(&self) -> TaskResult {
        let mut tasks = std::mem::take(&mut *lock(&self.tasks));
        let mut first_error: Option<CheckerError> = None;

        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| CheckerError::TaskFailed {
                task: "unknown".to_string(),
                reason: e.to_string(),
            });
            if let Err(err) = result.and_then(|r| r) {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    warn!(error = %err, "Discarding error after the first task failure");
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // Guards are never held across a panic-prone section; recover from poisoning anyway
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_returns_ok_when_all_tasks_exit_cleanly() {
        let group = TaskGroup::new();
        let exited = Arc::new(AtomicUsize::new(0));

        for i in 0..4 {
            let token = group.token();
            let exited = Arc::clone(&exited);
            group.spawn(format!("worker-{}", i), async move {
                token.cancelled().await;
                exited.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        group.kill();
        assert!(group.wait().await.is_ok());
        assert_eq!(exited.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failing_task_cancels_siblings_and_surfaces_error() {
        let group = TaskGroup::new();
        let token = group.token();
        group.spawn("sibling", async move {
            token.cancelled().await;
            Ok(())
        });
        group.spawn("failing", async {
            Err(CheckerError::TaskFailed {
                task: "failing".to_string(),
                reason: "boom".to_string(),
            })
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, CheckerError::TaskFailed { .. }));
        assert!(group.is_dying());
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported_with_its_name() {
        let group = TaskGroup::new();
        let explode = true;
        group.spawn("panicker", async move {
            if explode {
                panic!("exploded");
            }
            Ok(())
        });

        match group.wait().await {
            Err(CheckerError::TaskPanicked { task, reason }) => {
                assert_eq!(task, "panicker");
                assert!(reason.contains("exploded"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawned_tasks_are_recorded_in_order() {
        let group = TaskGroup::new();
        group.spawn("a", async { Ok(()) });
        group.spawn("b", async { Ok(()) });
        assert_eq!(group.spawned_tasks(), vec!["a".to_string(), "b".to_string()]);
        assert!(group.wait().await.is_ok());
    }

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
