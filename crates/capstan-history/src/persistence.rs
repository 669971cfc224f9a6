//! Persistence interfaces and persisted-state layout
//!
//! Physical engines live elsewhere; the rebuilder sees storage through two
//! narrow async traits. Writes carry a [`WorkflowSnapshot`] plus the task
//! batches generated in the same transaction and a numeric `condition` used
//! for optimistic concurrency. Conflict-resolve writes additionally carry a
//! [`CurrentWorkflowCas`] guarding the current-workflow pointer.
//!
//! The in-memory implementations mirror the real engines' semantics closely
//! enough for tests to drive the resolver end to end.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoding::{self, EncodingType};
use crate::event::HistoryEvent;
use crate::execution::{WorkflowExecution, WorkflowState, FIRST_EVENT_ID};
use crate::mutable_state::infos::{
    ActivityInfo, ChildExecutionInfo, ExecutionInfo, RequestCancelInfo, SignalInfo, TimerInfo,
};
use crate::mutable_state::replication::Replication;
use crate::mutable_state::MutableState;
use crate::task::{ReplicationTask, TimerTask, TransferTask};

/// Default page size for branch reads
pub const DEFAULT_HISTORY_PAGE_SIZE: i32 = 100;

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("history branch not found")]
    BranchNotFound,

    /// Optimistic concurrency check on the numeric condition failed
    #[error("condition check failed: expected {expected}, got {actual}")]
    ConditionFailed { expected: i64, actual: i64 },

    /// Secondary CAS on the current-workflow pointer failed
    #[error("current workflow mismatch: {0}")]
    CurrentWorkflowMismatch(String),

    #[error("encoding error: {0}")]
    Encoding(#[from] encoding::EncodingError),

    #[error("storage error: {0}")]
    Storage(String),
}

// =============================================================================
// History branch reads
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ReadHistoryBranchRequest {
    pub branch_token: Vec<u8>,
    pub min_event_id: i64,
    /// Exclusive upper bound
    pub max_event_id: i64,
    pub page_size: i32,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadHistoryBranchResponse {
    pub events: Vec<HistoryEvent>,
    pub next_page_token: Option<Vec<u8>>,
    /// Encoded size of the returned page, for history-size accounting
    pub size: i64,
}

/// Paged reader over persisted history branches
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn read_history_branch(
        &self,
        request: ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchResponse, StoreError>;
}

// =============================================================================
// Execution writes
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub history_size: i64,
}

/// Full persisted image of a run, written atomically with its task batches
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSnapshot {
    pub execution_info: ExecutionInfo,
    pub execution_stats: ExecutionStats,
    pub replication: Replication,
    pub activity_infos: Vec<ActivityInfo>,
    pub timer_infos: Vec<TimerInfo>,
    pub child_execution_infos: Vec<ChildExecutionInfo>,
    pub request_cancel_infos: Vec<RequestCancelInfo>,
    pub signal_infos: Vec<SignalInfo>,
    pub signal_requested_ids: Vec<String>,
    pub transfer_tasks: Vec<TransferTask>,
    pub timer_tasks: Vec<TimerTask>,
    pub replication_tasks: Vec<ReplicationTask>,
    /// Optimistic concurrency token: the caller's last known update condition
    pub condition: i64,
}

impl WorkflowSnapshot {
    /// Snapshot a mutable state image with deterministic ordering
    pub fn from_mutable_state(state: &MutableState, condition: i64, history_size: i64) -> Self {
        let mut activity_infos: Vec<_> = state.pending_activities().values().cloned().collect();
        activity_infos.sort_by_key(|info| info.schedule_id);

        let mut timer_infos: Vec<_> = state.pending_timers().values().cloned().collect();
        timer_infos.sort_by(|a, b| a.timer_id.cmp(&b.timer_id));

        let mut child_execution_infos: Vec<_> =
            state.pending_children().values().cloned().collect();
        child_execution_infos.sort_by_key(|info| info.initiated_id);

        let mut request_cancel_infos: Vec<_> =
            state.pending_request_cancels().values().cloned().collect();
        request_cancel_infos.sort_by_key(|info| info.initiated_id);

        let mut signal_infos: Vec<_> = state.pending_signals().values().cloned().collect();
        signal_infos.sort_by_key(|info| info.initiated_id);

        Self {
            execution_info: state.execution_info().clone(),
            execution_stats: ExecutionStats { history_size },
            replication: state.replication().clone(),
            activity_infos,
            timer_infos,
            child_execution_infos,
            request_cancel_infos,
            signal_infos,
            signal_requested_ids: state.signal_requested_ids().iter().cloned().collect(),
            transfer_tasks: state.transfer_tasks().to_vec(),
            timer_tasks: state.timer_tasks().to_vec(),
            replication_tasks: state.replication_tasks().to_vec(),
            condition,
        }
    }
}

/// Guard on the current-workflow pointer for conflict-resolve writes
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentWorkflowCas {
    pub prev_run_id: String,
    pub prev_last_write_version: i64,
    pub prev_state: WorkflowState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolveRequest {
    pub current_workflow_cas: CurrentWorkflowCas,
    pub reset_snapshot: WorkflowSnapshot,
    /// Per-namespace encoding tag for the persisted blobs
    pub encoding: EncodingType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetWorkflowExecutionRequest {
    pub namespace_id: String,
    pub execution: WorkflowExecution,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetWorkflowExecutionResponse {
    pub state: WorkflowSnapshot,
}

/// Mutable-state reads and CAS writes
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn conflict_resolve_workflow_execution(
        &self,
        request: ConflictResolveRequest,
    ) -> Result<(), StoreError>;

    async fn get_workflow_execution(
        &self,
        request: GetWorkflowExecutionRequest,
    ) -> Result<GetWorkflowExecutionResponse, StoreError>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// In-memory history branches, paged like the real engine
#[derive(Default)]
pub struct InMemoryHistoryStore {
    branches: RwLock<HashMap<Vec<u8>, Vec<HistoryEvent>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_branch(&self, branch_token: Vec<u8>, events: Vec<HistoryEvent>) {
        self.branches.write().insert(branch_token, events);
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn read_history_branch(
        &self,
        request: ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchResponse, StoreError> {
        let branches = self.branches.read();
        let branch = branches
            .get(&request.branch_token)
            .ok_or(StoreError::BranchNotFound)?;

        let offset = match &request.next_page_token {
            Some(token) => {
                let bytes: [u8; 8] = token
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Storage("malformed page token".to_string()))?;
                u64::from_le_bytes(bytes) as usize
            }
            None => 0,
        };

        let in_range: Vec<_> = branch
            .iter()
            .filter(|event| {
                event.event_id >= request.min_event_id && event.event_id < request.max_event_id
            })
            .cloned()
            .collect();

        let page_size = request.page_size.max(1) as usize;
        let page: Vec<_> = in_range.iter().skip(offset).take(page_size).cloned().collect();
        let next_offset = offset + page.len();
        let next_page_token = if next_offset < in_range.len() {
            Some((next_offset as u64).to_le_bytes().to_vec())
        } else {
            None
        };

        let size = encoding::encode_events(EncodingType::Json, &page)?.len() as i64;

        Ok(ReadHistoryBranchResponse {
            events: page,
            next_page_token,
            size,
        })
    }
}

#[derive(Debug, Clone)]
struct CurrentWorkflowRecord {
    run_id: String,
    last_write_version: i64,
    state: WorkflowState,
}

/// In-memory execution records with real CAS semantics
#[derive(Default)]
pub struct InMemoryExecutionStore {
    current: RwLock<HashMap<(String, String), CurrentWorkflowRecord>>,
    executions: RwLock<HashMap<(String, String, String), WorkflowSnapshot>>,
    conflict_requests: RwLock<Vec<ConflictResolveRequest>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the current-workflow pointer, as the engine would have left it
    pub fn put_current_workflow(
        &self,
        namespace_id: &str,
        workflow_id: &str,
        run_id: &str,
        last_write_version: i64,
        state: WorkflowState,
    ) {
        self.current.write().insert(
            (namespace_id.to_string(), workflow_id.to_string()),
            CurrentWorkflowRecord {
                run_id: run_id.to_string(),
                last_write_version,
                state,
            },
        );
    }

    /// Conflict-resolve requests observed so far, oldest first
    pub fn conflict_requests(&self) -> Vec<ConflictResolveRequest> {
        self.conflict_requests.read().clone()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn conflict_resolve_workflow_execution(
        &self,
        request: ConflictResolveRequest,
    ) -> Result<(), StoreError> {
        let info = &request.reset_snapshot.execution_info;
        let namespace_id = info.namespace_id.clone();
        let workflow_id = info.workflow_id.clone();
        let run_id = info.run_id.clone();

        {
            let current = self.current.read();
            if let Some(record) = current.get(&(namespace_id.clone(), workflow_id.clone())) {
                let cas = &request.current_workflow_cas;
                if record.run_id != cas.prev_run_id
                    || record.last_write_version != cas.prev_last_write_version
                    || record.state != cas.prev_state
                {
                    return Err(StoreError::CurrentWorkflowMismatch(format!(
                        "expected run {} version {} state {}, found run {} version {} state {}",
                        cas.prev_run_id,
                        cas.prev_last_write_version,
                        cas.prev_state,
                        record.run_id,
                        record.last_write_version,
                        record.state,
                    )));
                }
            }
        }

        {
            let executions = self.executions.read();
            if let Some(existing) =
                executions.get(&(namespace_id.clone(), workflow_id.clone(), run_id.clone()))
            {
                if existing.condition != request.reset_snapshot.condition {
                    return Err(StoreError::ConditionFailed {
                        expected: request.reset_snapshot.condition,
                        actual: existing.condition,
                    });
                }
            }
        }

        let last_write_version = match &request.reset_snapshot.replication {
            Replication::Legacy(state) => state.last_write_version,
            Replication::VersionHistories(histories) => histories
                .current()
                .ok()
                .and_then(|history| history.last_item())
                .map(|item| item.version)
                .unwrap_or_default(),
        };
        self.current.write().insert(
            (namespace_id.clone(), workflow_id.clone()),
            CurrentWorkflowRecord {
                run_id: run_id.clone(),
                last_write_version,
                state: info.state,
            },
        );
        self.executions.write().insert(
            (namespace_id, workflow_id, run_id),
            request.reset_snapshot.clone(),
        );
        self.conflict_requests.write().push(request);
        Ok(())
    }

    async fn get_workflow_execution(
        &self,
        request: GetWorkflowExecutionRequest,
    ) -> Result<GetWorkflowExecutionResponse, StoreError> {
        let executions = self.executions.read();
        let key = (
            request.namespace_id.clone(),
            request.execution.workflow_id.clone(),
            request.execution.run_id.clone(),
        );
        executions
            .get(&key)
            .cloned()
            .map(|state| GetWorkflowExecutionResponse { state })
            .ok_or_else(|| {
                StoreError::WorkflowNotFound(format!(
                    "{}/{}",
                    request.execution.workflow_id, request.execution.run_id
                ))
            })
    }
}

/// Standard read request covering a whole branch prefix
pub fn read_branch_prefix_request(
    branch_token: Vec<u8>,
    max_event_id: i64,
    next_page_token: Option<Vec<u8>>,
) -> ReadHistoryBranchRequest {
    ReadHistoryBranchRequest {
        branch_token,
        min_event_id: FIRST_EVENT_ID,
        max_event_id,
        page_size: DEFAULT_HISTORY_PAGE_SIZE,
        next_page_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventAttributes, TimerFiredAttributes};

    fn sample_event(event_id: i64) -> HistoryEvent {
        HistoryEvent {
            event_id,
            version: 1,
            timestamp: event_id * 1_000,
            task_id: 0,
            attributes: EventAttributes::TimerFired(TimerFiredAttributes {
                timer_id: "t".to_string(),
                started_event_id: 1,
            }),
        }
    }

    #[tokio::test]
    async fn test_read_history_branch_pages() {
        let store = InMemoryHistoryStore::new();
        let branch = b"branch".to_vec();
        store.put_branch(branch.clone(), (1..=5).map(sample_event).collect());

        let mut request = ReadHistoryBranchRequest {
            branch_token: branch.clone(),
            min_event_id: 1,
            max_event_id: 5,
            page_size: 2,
            next_page_token: None,
        };

        let mut collected = vec![];
        loop {
            let response = store.read_history_branch(request.clone()).await.unwrap();
            assert!(response.size > 0);
            collected.extend(response.events);
            match response.next_page_token {
                Some(token) => request.next_page_token = Some(token),
                None => break,
            }
        }

        // max_event_id is exclusive
        let ids: Vec<_> = collected.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_read_unknown_branch() {
        let store = InMemoryHistoryStore::new();
        let err = store
            .read_history_branch(read_branch_prefix_request(b"nope".to_vec(), 10, None))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BranchNotFound));
    }

    #[tokio::test]
    async fn test_current_workflow_cas_mismatch() {
        let store = InMemoryExecutionStore::new();
        store.put_current_workflow("ns", "wf", "other-run", 99, WorkflowState::Running);

        let state = MutableState::with_replication_state(
            crate::namespace::NamespaceEntry::new("ns", "ns"),
        );
        let mut snapshot = WorkflowSnapshot::from_mutable_state(&state, 1, 0);
        snapshot.execution_info.namespace_id = "ns".to_string();
        snapshot.execution_info.workflow_id = "wf".to_string();
        snapshot.execution_info.run_id = "run".to_string();

        let err = store
            .conflict_resolve_workflow_execution(ConflictResolveRequest {
                current_workflow_cas: CurrentWorkflowCas {
                    prev_run_id: "expected-run".to_string(),
                    prev_last_write_version: 123,
                    prev_state: WorkflowState::Running,
                },
                reset_snapshot: snapshot,
                encoding: EncodingType::Json,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CurrentWorkflowMismatch(_)));
    }
}
