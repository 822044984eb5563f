//! One monitored path's lifecycle.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::config::{MonitorPathConfig, WatchMethod};
use crate::models::EventSource;
use crate::watch::WatchBackend;

/// `Created -> Running -> Stopping -> Stopped`. Stopped is terminal; a
/// restart always creates a new task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Created => "CREATED",
            TaskState::Running => "RUNNING",
            TaskState::Stopping => "STOPPING",
            TaskState::Stopped => "STOPPED",
        }
    }

    fn can_become(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Created, TaskState::Running)
                | (TaskState::Created, TaskState::Stopped)
                | (TaskState::Running, TaskState::Stopping)
                | (TaskState::Stopping, TaskState::Stopped)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub path_id: String,
    pub method: WatchMethod,
    pub from_default: bool,
    pub source: EventSource,
    pub state: TaskState,
}

pub struct MonitorTask {
    config: MonitorPathConfig,
    method: WatchMethod,
    from_default: bool,
    backend: Arc<dyn WatchBackend>,
    state: watch::Sender<TaskState>,
}

impl MonitorTask {
    /// `config.method` is already resolved; `from_default` records whether it
    /// came from the global method.
    pub(crate) fn new(config: MonitorPathConfig, from_default: bool, backend: Arc<dyn WatchBackend>) -> Self {
        let (state, _) = watch::channel(TaskState::Created);
        Self {
            method: config.method,
            config,
            from_default,
            backend,
            state,
        }
    }

    pub fn config(&self) -> &MonitorPathConfig {
        &self.config
    }

    pub fn path_id(&self) -> &str {
        &self.config.id
    }

    pub fn method(&self) -> WatchMethod {
        self.method
    }

    pub fn from_default(&self) -> bool {
        self.from_default
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            path_id: self.config.id.clone(),
            method: self.method,
            from_default: self.from_default,
            source: self.backend.source(),
            state: self.state(),
        }
    }

    /// Apply a legal transition. Returns false and leaves the state alone
    /// otherwise.
    pub(crate) fn transition(&self, next: TaskState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_become(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Stop accepting events and ask the backend to wind down.
    pub(crate) fn stop(&self) {
        let changed = match self.state() {
            TaskState::Created => self.transition(TaskState::Stopped),
            TaskState::Running => self.transition(TaskState::Stopping),
            TaskState::Stopping | TaskState::Stopped => false,
        };
        if changed {
            self.backend.stop();
        }
    }

    /// Wait until the backend has wound down and the task is terminal.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == TaskState::Stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeEvent;
    use crate::utils::errors::WatchError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct CountingBackend {
        stops: AtomicUsize,
    }

    impl WatchBackend for CountingBackend {
        fn source(&self) -> EventSource {
            EventSource::Polling
        }

        fn watch(&self, _target: crate::watch::WatchTarget, _tx: mpsc::Sender<ChangeEvent>) -> Result<(), WatchError> {
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn is_running(&self) -> bool {
            false
        }
    }

    fn task(backend: Arc<CountingBackend>) -> MonitorTask {
        let config = MonitorPathConfig::new("docs", "Docs", "/data", "/backup").with_method(WatchMethod::Polling);
        MonitorTask::new(config, false, backend)
    }

    #[test]
    fn test_state_machine_order() {
        let backend = Arc::new(CountingBackend::default());
        let task = task(backend.clone());
        assert_eq!(task.state(), TaskState::Created);

        assert!(!task.transition(TaskState::Stopping));
        assert!(task.transition(TaskState::Running));
        assert!(!task.transition(TaskState::Running));

        task.stop();
        task.stop();
        assert_eq!(task.state(), TaskState::Stopping);
        assert_eq!(backend.stops.load(Ordering::SeqCst), 1);

        assert!(task.transition(TaskState::Stopped));
        assert!(!task.transition(TaskState::Running));
        assert_eq!(task.state(), TaskState::Stopped);
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_terminal_state() {
        let task = Arc::new(task(Arc::new(CountingBackend::default())));
        task.transition(TaskState::Running);
        task.stop();

        let waiter = {
            let task = Arc::clone(&task);
            tokio::spawn(async move { task.stopped().await })
        };
        task.transition(TaskState::Stopped);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
