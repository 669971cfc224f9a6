//! Per-run single-writer locking
//!
//! Every apply-or-reset transaction holds the run's logical mutex for its
//! full duration; reads outside a transaction use immutable snapshots. The
//! owner id is recorded for diagnostics only, it carries no authority.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::execution::WorkflowExecution;

#[derive(Clone)]
struct RunLockEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    owner: Arc<Mutex<Option<String>>>,
}

/// Registry of per-run writer locks keyed by (namespace, workflow, run)
#[derive(Default)]
pub struct RunLockRegistry {
    entries: Mutex<HashMap<WorkflowExecution, RunLockEntry>>,
}

/// Held for the duration of one transaction; releases on drop
pub struct RunLockGuard {
    owner: Arc<Mutex<Option<String>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

impl RunLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the run's writer lock, waiting for the current holder
    pub async fn acquire(&self, execution: &WorkflowExecution, owner_id: &str) -> RunLockGuard {
        let entry = {
            let mut entries = self.entries.lock();
            entries
                .entry(execution.clone())
                .or_insert_with(|| RunLockEntry {
                    lock: Arc::new(tokio::sync::Mutex::new(())),
                    owner: Arc::new(Mutex::new(None)),
                })
                .clone()
        };

        let guard = entry.lock.clone().lock_owned().await;
        *entry.owner.lock() = Some(owner_id.to_string());
        RunLockGuard {
            owner: entry.owner,
            _guard: guard,
        }
    }

    /// Current holder of the run's lock, if any
    pub fn owner(&self, execution: &WorkflowExecution) -> Option<String> {
        let entries = self.entries.lock();
        entries
            .get(execution)
            .and_then(|entry| entry.owner.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run() -> WorkflowExecution {
        WorkflowExecution::new("ns", "wf", "run")
    }

    #[tokio::test]
    async fn test_single_writer() {
        let registry = Arc::new(RunLockRegistry::new());

        let guard = registry.acquire(&run(), "writer-1").await;
        assert_eq!(registry.owner(&run()).as_deref(), Some("writer-1"));

        let registry2 = registry.clone();
        let contender = tokio::spawn(async move {
            let _guard = registry2.acquire(&run(), "writer-2").await;
        });

        // the second writer stays blocked while the first holds the lock
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert_eq!(registry.owner(&run()), None);
    }

    #[tokio::test]
    async fn test_distinct_runs_do_not_contend() {
        let registry = RunLockRegistry::new();
        let _a = registry
            .acquire(&WorkflowExecution::new("ns", "wf", "run-a"), "w")
            .await;
        // acquiring a different run must not block
        let _b = registry
            .acquire(&WorkflowExecution::new("ns", "wf", "run-b"), "w")
            .await;
    }
}
