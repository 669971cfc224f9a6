//! Conflict resolution: rebuild mutable state from persisted history
//!
//! Used when an optimistic write is rejected or replication detects
//! divergence. The resolver re-reads the run's branch up to a target event
//! id, folds it through a fresh state builder, and writes the result with a
//! compare-and-set on both the caller's update condition and the
//! current-workflow pointer. It never retries: the caller's retry policy
//! owns that decision.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::error::StateError;
use crate::execution::{WorkflowExecution, WorkflowState};
use crate::mutable_state::infos::ExecutionInfo;
use crate::mutable_state::MutableState;
use crate::namespace::{ClusterMetadata, NamespaceRegistry};
use crate::persistence::{
    read_branch_prefix_request, ConflictResolveRequest, CurrentWorkflowCas, ExecutionStore,
    HistoryStore, StoreError, WorkflowSnapshot,
};
use crate::state_builder::StateBuilder;
use crate::task::TaskGenerator;

/// Errors from a conflict-resolution pass
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// Rebuilds and CAS-writes a run's state from its persisted branch
pub struct ConflictResolver<'a> {
    namespaces: &'a dyn NamespaceRegistry,
    clusters: &'a dyn ClusterMetadata,
    history_store: Arc<dyn HistoryStore>,
    execution_store: Arc<dyn ExecutionStore>,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(
        namespaces: &'a dyn NamespaceRegistry,
        clusters: &'a dyn ClusterMetadata,
        history_store: Arc<dyn HistoryStore>,
        execution_store: Arc<dyn ExecutionStore>,
    ) -> Self {
        Self {
            namespaces,
            clusters,
            history_store,
            execution_store,
        }
    }

    /// Rebuild state from branch history `[1, target_event_id]` and write it
    /// behind a CAS on `(prev_run_id, prev_last_write_version, prev_state)`
    /// and the caller's `condition`
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, execution_info), fields(
        workflow_id = %execution_info.workflow_id,
        run_id = %execution_info.run_id,
    ))]
    pub async fn reset(
        &self,
        prev_run_id: &str,
        prev_last_write_version: i64,
        prev_state: WorkflowState,
        create_request_id: &str,
        target_event_id: i64,
        execution_info: &ExecutionInfo,
        condition: i64,
    ) -> Result<MutableState, ResolverError> {
        let namespace = self
            .namespaces
            .namespace_by_id(&execution_info.namespace_id)?;
        let execution = WorkflowExecution::new(
            execution_info.namespace_id.clone(),
            execution_info.workflow_id.clone(),
            execution_info.run_id.clone(),
        );

        let mut builder = StateBuilder::new(
            self.namespaces,
            MutableState::with_replication_state(namespace.clone()),
        );

        let max_event_id = target_event_id + 1;
        let mut next_page_token = None;
        let mut history_size: i64 = 0;
        let mut last_event_time = None;

        loop {
            let response = self
                .history_store
                .read_history_branch(read_branch_prefix_request(
                    execution_info.branch_token.clone(),
                    max_event_id,
                    next_page_token,
                ))
                .await?;

            history_size += response.size;
            if let Some(last) = response.events.last() {
                last_event_time = Some(last.time());
            }
            if !response.events.is_empty() {
                builder.apply_events(
                    &execution_info.namespace_id,
                    create_request_id,
                    &execution,
                    &response.events,
                    &[],
                    false,
                )?;
            }

            next_page_token = response.next_page_token;
            if next_page_token.is_none() {
                break;
            }
        }

        let mut state = builder.into_mutable_state();
        let last_event_time = last_event_time.ok_or_else(StateError::history_size_zero)?;

        debug!(
            next_event_id = state.next_event_id(),
            history_size, "rebuilt mutable state from branch"
        );

        // remote-authored history carries its source cluster's watermark
        let legacy_watermark = state
            .replication()
            .as_legacy()
            .map(|r| (r.last_write_version, r.last_write_event_id));
        if let Some((last_write_version, last_write_event_id)) = legacy_watermark {
            let source_cluster = self
                .clusters
                .cluster_name_for_failover_version(last_write_version);
            if source_cluster != self.clusters.current_cluster_name() {
                if let Some(replication) = state.replication_legacy_mut() {
                    replication.record_cluster(
                        source_cluster,
                        last_write_version,
                        last_write_event_id,
                    );
                }
            }
        }

        // the rebuild keeps the stored branch and the run's original clock
        {
            let info = state.execution_info_mut();
            info.branch_token = execution_info.branch_token.clone();
            info.start_timestamp = execution_info.start_timestamp;
            info.last_updated_timestamp = execution_info.last_updated_timestamp;
        }

        // visibility must be refreshed after a reset
        TaskGenerator::new()
            .generate_workflow_search_attr_tasks(&mut state, last_event_time)
            .map_err(ResolverError::State)?;

        let snapshot = WorkflowSnapshot::from_mutable_state(&state, condition, history_size);
        let request = ConflictResolveRequest {
            current_workflow_cas: CurrentWorkflowCas {
                prev_run_id: prev_run_id.to_string(),
                prev_last_write_version,
                prev_state,
            },
            reset_snapshot: snapshot,
            encoding: namespace.encoding,
        };

        self.execution_store
            .conflict_resolve_workflow_execution(request)
            .await?;

        Ok(state)
    }
}
