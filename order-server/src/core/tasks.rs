//! Background task registry
//!
//! Every long-lived task is registered here so it can be watched and shut
//! down together.
//!
//! - [`TaskKind::Worker`] runs until shutdown (the ingestion consumer)
//! - [`TaskKind::Periodic`] ticks until shutdown (cache reconciliation)

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Worker,
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Worker => write!(f, "Worker"),
            TaskKind::Periodic => write!(f, "Periodic"),
        }
    }
}

struct RegisteredTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

struct TaskEntry {
    name: &'static str,
    kind: TaskKind,
    running: Arc<AtomicBool>,
}

/// One task as reported by [`TaskHealth::snapshot`]
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: &'static str,
    pub kind: TaskKind,
    pub running: bool,
}

/// Shared view of registered task liveness, read by the health endpoint
#[derive(Clone, Default)]
pub struct TaskHealth {
    entries: Arc<Mutex<Vec<TaskEntry>>>,
}

impl TaskHealth {
    pub fn snapshot(&self) -> Vec<TaskStatus> {
        self.entries
            .lock()
            .iter()
            .map(|e| TaskStatus {
                name: e.name,
                kind: e.kind,
                running: e.running.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Tasks that have exited; all of them are expected to run until shutdown
    pub fn stopped(&self) -> Vec<&'static str> {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.running.load(Ordering::SeqCst))
            .map(|e| e.name)
            .collect()
    }

    fn register(&self, name: &'static str, kind: TaskKind) -> Arc<AtomicBool> {
        let running = Arc::new(AtomicBool::new(true));
        self.entries.lock().push(TaskEntry {
            name,
            kind,
            running: running.clone(),
        });
        running
    }
}

/// Owns the background tasks and the token that stops them
///
/// ```ignore
/// let mut tasks = BackgroundTasks::new();
/// let token = tasks.shutdown_token();
/// tasks.spawn("order_consumer", TaskKind::Worker, async move {
///     consumer.run(token).await.ok();
/// });
/// tasks.shutdown().await;
/// ```
pub struct BackgroundTasks {
    tasks: Vec<RegisteredTask>,
    health: TaskHealth,
    shutdown: CancellationToken,
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::with_health(TaskHealth::default())
    }

    /// Registry that reports liveness into an existing [`TaskHealth`]
    pub fn with_health(health: TaskHealth) -> Self {
        Self {
            tasks: Vec::new(),
            health,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn health(&self) -> TaskHealth {
        self.health.clone()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown); tasks select on it
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn and register a task
    ///
    /// Panics are caught and logged. A task that returns before shutdown was
    /// requested is logged as unexpected and reported as stopped.
    pub fn spawn<F>(&mut self, name: &'static str, kind: TaskKind, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown.clone();
        let running = self.health.register(name, kind);
        let wrapped = async move {
            let outcome = AssertUnwindSafe(future).catch_unwind().await;
            running.store(false, Ordering::SeqCst);
            match outcome {
                Ok(()) => {
                    if !token.is_cancelled() {
                        tracing::warn!(task = %name, kind = %kind, "Background task completed unexpectedly");
                    }
                }
                Err(panic) => {
                    tracing::error!(
                        task = %name,
                        kind = %kind,
                        panic = %panic_message(panic.as_ref()),
                        "Background task panicked"
                    );
                }
            }
        };

        let handle = tokio::spawn(wrapped);
        tracing::debug!(task = %name, kind = %kind, "Registered background task");
        self.tasks.push(RegisteredTask { name, handle });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn log_summary(&self) {
        let tasks = self.health.snapshot();
        let worker = tasks.iter().filter(|t| t.kind == TaskKind::Worker).count();
        tracing::info!(
            total = tasks.len(),
            worker,
            periodic = tasks.len() - worker,
            "Background tasks registered"
        );
    }

    /// Cancel every task and wait for all of them
    pub async fn shutdown(self) {
        tracing::info!(count = self.tasks.len(), "Shutting down background tasks");
        self.shutdown.cancel();

        for task in self.tasks {
            match task.handle.await {
                Ok(()) => tracing::debug!(task = %task.name, "Task completed"),
                Err(e) if e.is_cancelled() => tracing::debug!(task = %task.name, "Task cancelled"),
                Err(e) => tracing::error!(task = %task.name, error = ?e, "Task join failed"),
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
