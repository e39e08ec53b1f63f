use futures::future::join_all;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Background job re-run on a fixed interval until [`Task::schedule`]
/// returns `None`.
#[async_trait::async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;
    fn schedule(&self) -> Option<Duration>;
    async fn execute(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Default)]
pub struct TaskManager {
    tasks: Mutex<Vec<Box<dyn Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_task(&self, task: impl Task + 'static) {
        self.tasks.lock().await.push(Box::new(task));
    }

    /// Spawns every queued task. Each runs once immediately, then after
    /// every interval.
    pub async fn start_tasks(&self) {
        let mut tasks = self.tasks.lock().await;
        let mut handles = self.handles.lock().await;

        for task in tasks.drain(..) {
            debug!("Starting task {}", task.name());
            let handle = tokio::spawn(async move {
                let mut task = task;
                while let Some(interval) = task.schedule() {
                    if let Err(e) = task.execute().await {
                        error!("Task {} failed: {}", task.name(), e);
                    }
                    tokio::time::sleep(interval).await;
                }
                debug!("Task {} finished", task.name());
            });
            handles.push(handle);
        }
    }

    pub async fn shutdown(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.iter_mut() {
            handle.abort();
        }
        join_all(handles.iter_mut()).await;
        handles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        runs: Arc<AtomicUsize>,
        limit: usize,
    }

    #[async_trait::async_trait]
    impl Task for Counter {
        fn name(&self) -> &str {
            "Counter"
        }

        fn schedule(&self) -> Option<Duration> {
            (self.runs.load(Ordering::SeqCst) < self.limit).then_some(Duration::from_millis(5))
        }

        async fn execute(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Err("counted".into())
        }
    }

    #[tokio::test]
    async fn tasks_run_until_unscheduled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let manager = TaskManager::new();
        manager
            .add_task(Counter {
                runs: Arc::clone(&runs),
                limit: 3,
            })
            .await;
        manager.start_tasks().await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_running_tasks() {
        let runs = Arc::new(AtomicUsize::new(0));
        let manager = TaskManager::new();
        manager
            .add_task(Counter {
                runs: Arc::clone(&runs),
                limit: usize::MAX,
            })
            .await;
        manager.start_tasks().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.shutdown().await;

        let after = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after);
    }
}
