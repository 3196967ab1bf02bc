//! Task registry: run lifecycle and per-tenant mutual exclusion.
//!
//! One table guarded by a single lock so admission is atomic: two concurrent
//! `begin` calls for the same tenant cannot both win. A task moves
//! pending -> running -> {completed | failed | cancelled}; once terminal it is
//! never mutated again, and a new run for the tenant may start.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use claimgate_core::{PipelineTask, TaskState};

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("a validation run is already active for this tenant (task {task_id})")]
    TaskAlreadyRunning { task_id: String },

    #[error("unknown task: {0}")]
    UnknownTask(String),
}

struct TaskEntry {
    task: PipelineTask,
    cancel: Arc<AtomicBool>,
}

/// Cooperative cancellation flag handed to the run loop.
#[derive(Clone, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    tasks: HashMap<String, TaskEntry>,
    active_by_tenant: HashMap<String, String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new run for a tenant.
    ///
    /// Fails with [`TaskError::TaskAlreadyRunning`] naming the existing task
    /// if the tenant already has a non-terminal run. Admission and the
    /// active-tenant check happen under one lock.
    pub fn begin(&self, tenant_id: &str) -> Result<(PipelineTask, CancelToken), TaskError> {
        let mut inner = self.inner.write();

        if let Some(active_id) = inner.active_by_tenant.get(tenant_id) {
            return Err(TaskError::TaskAlreadyRunning {
                task_id: active_id.clone(),
            });
        }

        let task = PipelineTask::new(tenant_id);
        let cancel = Arc::new(AtomicBool::new(false));
        inner
            .active_by_tenant
            .insert(tenant_id.to_string(), task.task_id.clone());
        inner.tasks.insert(
            task.task_id.clone(),
            TaskEntry {
                task: task.clone(),
                cancel: Arc::clone(&cancel),
            },
        );

        Ok((task, CancelToken(cancel)))
    }

    /// Transition pending -> running and record the claim count.
    pub fn mark_running(&self, task_id: &str, total_claims: usize) -> Result<(), TaskError> {
        let mut inner = self.inner.write();
        let entry = entry_mut(&mut inner, task_id)?;
        if entry.task.state == TaskState::Pending {
            entry.task.state = TaskState::Running;
            entry.task.total_claims = total_claims;
        }
        Ok(())
    }

    /// Count one persisted claim. Ignored unless the task is running, so a
    /// late worker cannot move the counter of a finished task.
    pub fn record_processed(&self, task_id: &str) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.tasks.get_mut(task_id) {
            if entry.task.state == TaskState::Running {
                entry.task.processed_count += 1;
            }
        }
    }

    /// Move a task to a terminal state and release the tenant slot.
    ///
    /// A task that is already terminal stays as it is; the first terminal
    /// transition wins.
    pub fn finish(&self, task_id: &str, state: TaskState, error: Option<String>) {
        if !state.is_terminal() {
            warn!(task_id, %state, "ignoring finish with non-terminal state");
            return;
        }

        let mut inner = self.inner.write();
        let Some(entry) = inner.tasks.get_mut(task_id) else {
            return;
        };
        if entry.task.is_terminal() {
            return;
        }

        entry.task.state = state;
        entry.task.error = error;
        entry.task.finished_at = Some(Utc::now());

        let tenant_id = entry.task.tenant_id.clone();
        if inner.active_by_tenant.get(&tenant_id).map(String::as_str) == Some(task_id) {
            inner.active_by_tenant.remove(&tenant_id);
        }
    }

    /// Request cancellation. Returns false if the task is unknown or already
    /// terminal. The run loop observes the flag between claims; in-flight
    /// evaluations complete and their results are kept.
    pub fn cancel(&self, task_id: &str) -> bool {
        let inner = self.inner.read();
        match inner.tasks.get(task_id) {
            Some(entry) if !entry.task.is_terminal() => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self, task_id: &str) -> Option<PipelineTask> {
        self.inner.read().tasks.get(task_id).map(|e| e.task.clone())
    }

    /// Tasks for one tenant, most recent first.
    pub fn list(&self, tenant_id: &str) -> Vec<PipelineTask> {
        let inner = self.inner.read();
        let mut tasks: Vec<PipelineTask> = inner
            .tasks
            .values()
            .filter(|e| e.task.tenant_id == tenant_id)
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        tasks
    }
}

fn entry_mut<'a>(
    inner: &'a mut RegistryInner,
    task_id: &str,
) -> Result<&'a mut TaskEntry, TaskError> {
    inner
        .tasks
        .get_mut(task_id)
        .ok_or_else(|| TaskError::UnknownTask(task_id.to_string()))
}
