//! Mutable state: the in-memory projection of a single workflow run
//!
//! Created when the run's first event is applied, mutated only through the
//! `replicate_*` methods below, and persisted atomically with the tasks the
//! fold generated. A replicate method that fails leaves the state poisoned;
//! callers must discard it.

pub mod infos;
pub mod replication;

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::error::StateError;
use crate::event::{
    ActivityTaskCancelRequestedAttributes, ActivityTaskScheduledAttributes,
    ActivityTaskStartedAttributes, ChildWorkflowExecutionStartedAttributes,
    ExternalWorkflowExecutionCancelRequestedAttributes,
    ExternalWorkflowExecutionSignaledAttributes, HistoryEvent,
    RequestCancelExternalWorkflowExecutionFailedAttributes,
    SignalExternalWorkflowExecutionFailedAttributes,
    SignalExternalWorkflowExecutionInitiatedAttributes,
    StartChildWorkflowExecutionFailedAttributes, StartChildWorkflowExecutionInitiatedAttributes,
    TimerStartedAttributes, UpsertWorkflowSearchAttributesAttributes,
    WorkflowExecutionCancelRequestedAttributes, WorkflowExecutionSignaledAttributes,
    WorkflowExecutionStartedAttributes,
};
use crate::execution::{WorkflowExecution, WorkflowState, WorkflowStatus, EMPTY_EVENT_ID};
use crate::namespace::NamespaceEntry;
use crate::task::{ReplicationTask, ReplicationTaskKind, TimerTask, TimerTaskKind, TransferTask, TransferTaskKind};

use infos::{
    ActivityInfo, ChildExecutionInfo, DecisionInfo, ExecutionInfo, RequestCancelInfo, SignalInfo,
    TimerInfo,
};
use replication::{
    Replication, ReplicationState, VersionHistories, VersionHistory, VersionHistoryItem,
};

/// Staged events of the current transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryBuilder {
    events: Vec<HistoryEvent>,
}

impl HistoryBuilder {
    pub fn from_events(events: Vec<HistoryEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }
}

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Mutable projection of one workflow run
#[derive(Debug, Clone)]
pub struct MutableState {
    execution_info: ExecutionInfo,
    namespace: NamespaceEntry,
    replication: Replication,
    current_version: i64,

    pending_activities: HashMap<i64, ActivityInfo>,
    activity_ids: HashMap<String, i64>,
    pending_timers: HashMap<String, TimerInfo>,
    pending_children: HashMap<i64, ChildExecutionInfo>,
    pending_request_cancels: HashMap<i64, RequestCancelInfo>,
    pending_signals: HashMap<i64, SignalInfo>,
    signal_requested_ids: BTreeSet<String>,

    history_builder: HistoryBuilder,

    transfer_tasks: Vec<TransferTask>,
    timer_tasks: Vec<TimerTask>,
    replication_tasks: Vec<ReplicationTask>,
    next_task_id: i64,
}

impl MutableState {
    /// New run state using the legacy replication scheme
    pub fn with_replication_state(namespace: NamespaceEntry) -> Self {
        let version = crate::execution::EMPTY_VERSION;
        Self::new(namespace, Replication::Legacy(ReplicationState::new(version)), version)
    }

    /// New run state using version histories
    pub fn with_version_histories(namespace: NamespaceEntry) -> Self {
        let version = crate::execution::EMPTY_VERSION;
        Self::new(
            namespace,
            Replication::VersionHistories(VersionHistories::new(VersionHistory::new(vec![]))),
            version,
        )
    }

    fn new(namespace: NamespaceEntry, replication: Replication, current_version: i64) -> Self {
        Self {
            execution_info: ExecutionInfo::new(
                namespace.id.clone(),
                String::new(),
                String::new(),
            ),
            namespace,
            replication,
            current_version,
            pending_activities: HashMap::new(),
            activity_ids: HashMap::new(),
            pending_timers: HashMap::new(),
            pending_children: HashMap::new(),
            pending_request_cancels: HashMap::new(),
            pending_signals: HashMap::new(),
            signal_requested_ids: BTreeSet::new(),
            history_builder: HistoryBuilder::default(),
            transfer_tasks: vec![],
            timer_tasks: vec![],
            replication_tasks: vec![],
            next_task_id: 1,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.execution_info
    }

    pub fn execution_info_mut(&mut self) -> &mut ExecutionInfo {
        &mut self.execution_info
    }

    pub fn namespace_entry(&self) -> &NamespaceEntry {
        &self.namespace
    }

    pub fn replication(&self) -> &Replication {
        &self.replication
    }

    pub fn replication_legacy_mut(&mut self) -> Option<&mut ReplicationState> {
        self.replication.as_legacy_mut()
    }

    pub fn current_version(&self) -> i64 {
        self.current_version
    }

    pub fn next_event_id(&self) -> i64 {
        self.execution_info.next_event_id
    }

    pub fn is_workflow_running(&self) -> bool {
        self.execution_info.state == WorkflowState::Running
    }

    pub fn pending_activities(&self) -> &HashMap<i64, ActivityInfo> {
        &self.pending_activities
    }

    pub fn pending_timers(&self) -> &HashMap<String, TimerInfo> {
        &self.pending_timers
    }

    pub fn pending_children(&self) -> &HashMap<i64, ChildExecutionInfo> {
        &self.pending_children
    }

    pub fn pending_request_cancels(&self) -> &HashMap<i64, RequestCancelInfo> {
        &self.pending_request_cancels
    }

    pub fn pending_signals(&self) -> &HashMap<i64, SignalInfo> {
        &self.pending_signals
    }

    pub fn signal_requested_ids(&self) -> &BTreeSet<String> {
        &self.signal_requested_ids
    }

    pub fn history_builder(&self) -> &HistoryBuilder {
        &self.history_builder
    }

    pub fn transfer_tasks(&self) -> &[TransferTask] {
        &self.transfer_tasks
    }

    pub fn timer_tasks(&self) -> &[TimerTask] {
        &self.timer_tasks
    }

    pub fn replication_tasks(&self) -> &[ReplicationTask] {
        &self.replication_tasks
    }

    // =========================================================================
    // Replication bookkeeping
    // =========================================================================

    /// Bump the legacy replication version for the event being applied
    pub fn update_replication_state_version(&mut self, version: i64) {
        self.current_version = version;
        if let Some(state) = self.replication.as_legacy_mut() {
            state.current_version = version;
        }
    }

    /// Record the final event of the slice on the legacy watermark
    pub fn update_replication_state_last_event(&mut self, last_version: i64, last_event_id: i64) {
        if let Some(state) = self.replication.as_legacy_mut() {
            state.update_last_event(last_version, last_event_id);
        }
    }

    /// Record the start version of a freshly started run
    pub fn set_replication_start_version(&mut self, version: i64) {
        if let Some(state) = self.replication.as_legacy_mut() {
            state.start_version = version;
        }
    }

    /// Advance the current version under version histories
    pub fn update_current_version(&mut self, version: i64) -> Result<(), StateError> {
        self.current_version = version;
        Ok(())
    }

    /// Append or advance the tip of the current version history branch
    pub fn add_version_history_item(&mut self, item: VersionHistoryItem) -> Result<(), StateError> {
        let histories = self
            .replication
            .as_version_histories_mut()
            .ok_or_else(|| StateError::Internal("no version histories on this run".to_string()))?;
        histories.current_mut()?.add_or_update_item(item)
    }

    pub fn set_last_event_task_id(&mut self, task_id: i64) {
        self.execution_info.last_event_task_id = task_id;
    }

    /// Install the history tree root for a new run
    pub fn set_history_tree(&mut self, run_id: &str) -> Result<(), StateError> {
        let branch_token = format!("tree:{run_id}").into_bytes();
        self.execution_info.branch_token = branch_token.clone();
        if let Some(histories) = self.replication.as_version_histories_mut() {
            histories.current_mut()?.branch_token = branch_token;
        }
        Ok(())
    }

    /// Sticky bindings never survive a passive fold
    pub fn clear_stickiness(&mut self) {
        self.execution_info.sticky_task_list.clear();
        self.execution_info.sticky_schedule_to_start_timeout = 0;
    }

    pub fn set_history_builder(&mut self, builder: HistoryBuilder) {
        self.history_builder = builder;
    }

    // =========================================================================
    // Workflow lifecycle
    // =========================================================================

    pub fn replicate_workflow_execution_started(
        &mut self,
        parent_namespace_id: String,
        execution: &WorkflowExecution,
        request_id: String,
        event: &HistoryEvent,
        attributes: &WorkflowExecutionStartedAttributes,
    ) -> Result<(), StateError> {
        if self.execution_info.state != WorkflowState::Created {
            return Err(StateError::Internal(
                "workflow execution already started".to_string(),
            ));
        }

        let info = &mut self.execution_info;
        info.workflow_id = execution.workflow_id.clone();
        info.run_id = execution.run_id.clone();
        info.parent_namespace_id = parent_namespace_id;
        info.parent_workflow_id = attributes.parent_workflow_id.clone();
        info.parent_run_id = attributes.parent_run_id.clone();
        info.initiated_id = if attributes.parent_workflow_id.is_empty() {
            EMPTY_EVENT_ID
        } else {
            attributes.parent_initiated_event_id
        };
        info.task_list = attributes.task_list.clone();
        info.workflow_type_name = attributes.workflow_type.clone();
        info.workflow_execution_timeout = attributes.workflow_execution_timeout_seconds;
        info.workflow_run_timeout = attributes.workflow_run_timeout_seconds;
        info.workflow_task_timeout = attributes.workflow_task_timeout_seconds;
        info.create_request_id = request_id;
        info.start_timestamp = event.timestamp;
        info.last_updated_timestamp = event.timestamp;
        info.state = WorkflowState::Running;
        info.status = WorkflowStatus::Running;
        Ok(())
    }

    fn set_workflow_closed(
        &mut self,
        first_event_id: i64,
        status: WorkflowStatus,
    ) -> Result<(), StateError> {
        if !self.is_workflow_running() {
            return Err(StateError::Internal(format!(
                "cannot close workflow in state {}",
                self.execution_info.state
            )));
        }
        self.execution_info.state = WorkflowState::Completed;
        self.execution_info.status = status;
        self.execution_info.completion_event_batch_id = first_event_id;
        Ok(())
    }

    pub fn replicate_workflow_execution_completed(
        &mut self,
        first_event_id: i64,
    ) -> Result<(), StateError> {
        self.set_workflow_closed(first_event_id, WorkflowStatus::Completed)
    }

    pub fn replicate_workflow_execution_failed(
        &mut self,
        first_event_id: i64,
    ) -> Result<(), StateError> {
        self.set_workflow_closed(first_event_id, WorkflowStatus::Failed)
    }

    pub fn replicate_workflow_execution_timed_out(
        &mut self,
        first_event_id: i64,
    ) -> Result<(), StateError> {
        self.set_workflow_closed(first_event_id, WorkflowStatus::TimedOut)
    }

    pub fn replicate_workflow_execution_canceled(
        &mut self,
        first_event_id: i64,
    ) -> Result<(), StateError> {
        self.set_workflow_closed(first_event_id, WorkflowStatus::Canceled)
    }

    pub fn replicate_workflow_execution_terminated(
        &mut self,
        first_event_id: i64,
    ) -> Result<(), StateError> {
        self.set_workflow_closed(first_event_id, WorkflowStatus::Terminated)
    }

    pub fn replicate_workflow_execution_continued_as_new(
        &mut self,
        first_event_id: i64,
    ) -> Result<(), StateError> {
        self.set_workflow_closed(first_event_id, WorkflowStatus::ContinuedAsNew)
    }

    pub fn replicate_workflow_execution_signaled(
        &mut self,
        _attributes: &WorkflowExecutionSignaledAttributes,
    ) -> Result<(), StateError> {
        self.execution_info.signal_count += 1;
        Ok(())
    }

    pub fn replicate_workflow_execution_cancel_requested(
        &mut self,
        _attributes: &WorkflowExecutionCancelRequestedAttributes,
    ) -> Result<(), StateError> {
        self.execution_info.cancel_requested = true;
        Ok(())
    }

    pub fn replicate_upsert_workflow_search_attributes(
        &mut self,
        attributes: &UpsertWorkflowSearchAttributesAttributes,
    ) {
        for (key, value) in &attributes.search_attributes {
            self.execution_info
                .search_attributes
                .insert(key.clone(), value.clone());
        }
    }

    /// Record an external signal-request id for dedupe
    pub fn add_signal_requested_id(&mut self, request_id: String) {
        self.signal_requested_ids.insert(request_id);
    }

    pub fn is_signal_requested(&self, request_id: &str) -> bool {
        self.signal_requested_ids.contains(request_id)
    }

    // =========================================================================
    // Decision state machine: none -> scheduled -> started -> terminal
    // =========================================================================

    pub fn has_pending_decision(&self) -> bool {
        self.execution_info.decision_schedule_id != EMPTY_EVENT_ID
    }

    pub fn has_in_flight_decision(&self) -> bool {
        self.execution_info.decision_started_id != EMPTY_EVENT_ID
    }

    pub fn decision_info(&self) -> Option<DecisionInfo> {
        if !self.has_pending_decision() {
            return None;
        }
        let info = &self.execution_info;
        Some(DecisionInfo {
            version: info.decision_version,
            schedule_id: info.decision_schedule_id,
            started_id: info.decision_started_id,
            request_id: info.decision_request_id.clone(),
            decision_timeout: info.decision_timeout,
            attempt: info.decision_attempt,
            started_timestamp: info.decision_started_timestamp,
            scheduled_timestamp: info.decision_scheduled_timestamp,
            original_scheduled_timestamp: info.decision_original_scheduled_timestamp,
            task_list: info.decision_task_list.clone(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn replicate_decision_task_scheduled(
        &mut self,
        version: i64,
        schedule_id: i64,
        task_list: String,
        start_to_close_timeout: i32,
        attempt: i64,
        scheduled_timestamp: i64,
        original_scheduled_timestamp: i64,
    ) -> Result<DecisionInfo, StateError> {
        if self.has_pending_decision() {
            return Err(StateError::Internal(format!(
                "decision {} already scheduled",
                self.execution_info.decision_schedule_id
            )));
        }

        let info = &mut self.execution_info;
        info.decision_version = version;
        info.decision_schedule_id = schedule_id;
        info.decision_started_id = EMPTY_EVENT_ID;
        info.decision_request_id = String::new();
        info.decision_timeout = start_to_close_timeout;
        info.decision_attempt = attempt;
        info.decision_started_timestamp = 0;
        info.decision_scheduled_timestamp = scheduled_timestamp;
        info.decision_original_scheduled_timestamp = original_scheduled_timestamp;
        info.decision_task_list = task_list;

        self.decision_info().ok_or_else(|| {
            StateError::Internal("decision missing after schedule".to_string())
        })
    }

    pub fn replicate_decision_task_started(
        &mut self,
        version: i64,
        schedule_id: i64,
        started_id: i64,
        request_id: String,
        started_timestamp: i64,
    ) -> Result<DecisionInfo, StateError> {
        if self.execution_info.decision_schedule_id != schedule_id {
            return Err(StateError::Internal(format!(
                "decision started for schedule id {} but {} is pending",
                schedule_id, self.execution_info.decision_schedule_id
            )));
        }
        if self.has_in_flight_decision() {
            return Err(StateError::Internal(format!(
                "decision {} already started",
                self.execution_info.decision_started_id
            )));
        }

        let info = &mut self.execution_info;
        info.decision_version = version;
        info.decision_started_id = started_id;
        info.decision_request_id = request_id;
        info.decision_started_timestamp = started_timestamp;
        self.decision_info().ok_or_else(|| {
            StateError::Internal("decision missing after start".to_string())
        })
    }

    fn clear_decision(&mut self, increment_attempt: bool) {
        let info = &mut self.execution_info;
        if increment_attempt {
            info.decision_attempt += 1;
        } else {
            info.decision_attempt = 0;
        }
        info.decision_version = crate::execution::EMPTY_VERSION;
        info.decision_schedule_id = EMPTY_EVENT_ID;
        info.decision_started_id = EMPTY_EVENT_ID;
        info.decision_request_id = String::new();
        info.decision_timeout = 0;
        info.decision_started_timestamp = 0;
        info.decision_scheduled_timestamp = 0;
        info.decision_original_scheduled_timestamp = 0;
        info.decision_task_list = String::new();
    }

    pub fn replicate_decision_task_completed(
        &mut self,
        started_event_id: i64,
    ) -> Result<(), StateError> {
        if !self.has_in_flight_decision() {
            return Err(StateError::Internal(
                "decision completed without a started decision".to_string(),
            ));
        }
        self.execution_info.last_processed_event = started_event_id;
        self.clear_decision(false);
        Ok(())
    }

    pub fn replicate_decision_task_timed_out(&mut self) -> Result<(), StateError> {
        if !self.has_pending_decision() {
            return Err(StateError::Internal(
                "decision timed out without a pending decision".to_string(),
            ));
        }
        self.clear_decision(true);
        Ok(())
    }

    pub fn replicate_decision_task_failed(&mut self) -> Result<(), StateError> {
        if !self.has_pending_decision() {
            return Err(StateError::Internal(
                "decision failed without a pending decision".to_string(),
            ));
        }
        self.clear_decision(true);
        Ok(())
    }

    /// Re-schedule a transient replacement decision after a failure or
    /// timeout, when the run has attempts outstanding
    ///
    /// The replacement is not backed by a persisted event; its schedule id is
    /// the run's next event id.
    pub fn replicate_transient_decision_task_scheduled(
        &mut self,
    ) -> Result<Option<DecisionInfo>, StateError> {
        if self.has_pending_decision() || self.execution_info.decision_attempt == 0 {
            return Ok(None);
        }

        let info = &mut self.execution_info;
        info.decision_version = self.current_version;
        info.decision_schedule_id = info.next_event_id;
        info.decision_started_id = EMPTY_EVENT_ID;
        info.decision_request_id = String::new();
        info.decision_timeout = info.workflow_task_timeout;
        info.decision_started_timestamp = 0;
        info.decision_scheduled_timestamp = 0;
        info.decision_original_scheduled_timestamp = 0;
        info.decision_task_list = info.task_list.clone();

        Ok(self.decision_info())
    }

    // =========================================================================
    // Activities
    // =========================================================================

    pub fn replicate_activity_task_scheduled(
        &mut self,
        event: &HistoryEvent,
        attributes: &ActivityTaskScheduledAttributes,
    ) -> Result<ActivityInfo, StateError> {
        let info = ActivityInfo {
            version: event.version,
            schedule_id: event.event_id,
            scheduled_timestamp: event.timestamp,
            started_id: EMPTY_EVENT_ID,
            started_timestamp: 0,
            activity_id: attributes.activity_id.clone(),
            activity_type: attributes.activity_type.clone(),
            task_list: attributes.task_list.clone(),
            schedule_to_start_timeout: attributes.schedule_to_start_timeout_seconds,
            schedule_to_close_timeout: attributes.schedule_to_close_timeout_seconds,
            start_to_close_timeout: attributes.start_to_close_timeout_seconds,
            heartbeat_timeout: attributes.heartbeat_timeout_seconds,
            attempt: 0,
            cancel_requested: false,
            cancel_request_id: EMPTY_EVENT_ID,
            last_heartbeat_timestamp: 0,
            timer_task_scheduled: false,
        };
        self.pending_activities.insert(event.event_id, info.clone());
        self.activity_ids
            .insert(attributes.activity_id.clone(), event.event_id);
        Ok(info)
    }

    fn pending_activity_mut(&mut self, schedule_id: i64) -> Result<&mut ActivityInfo, StateError> {
        self.pending_activities.get_mut(&schedule_id).ok_or_else(|| {
            StateError::Internal(format!(
                "unable to find pending activity for schedule id {schedule_id}"
            ))
        })
    }

    pub fn replicate_activity_task_started(
        &mut self,
        event: &HistoryEvent,
        attributes: &ActivityTaskStartedAttributes,
    ) -> Result<(), StateError> {
        let started_id = event.event_id;
        let started_timestamp = event.timestamp;
        let activity = self.pending_activity_mut(attributes.scheduled_event_id)?;
        activity.started_id = started_id;
        activity.started_timestamp = started_timestamp;
        activity.attempt = attributes.attempt;
        // a start changes the earliest deadline, so the timer sweep must
        // re-evaluate this activity
        activity.timer_task_scheduled = false;
        Ok(())
    }

    fn delete_pending_activity(&mut self, schedule_id: i64) -> Result<(), StateError> {
        let activity = self.pending_activities.remove(&schedule_id).ok_or_else(|| {
            StateError::Internal(format!(
                "unable to find pending activity for schedule id {schedule_id}"
            ))
        })?;
        self.activity_ids.remove(&activity.activity_id);
        Ok(())
    }

    pub fn replicate_activity_task_completed(
        &mut self,
        scheduled_event_id: i64,
    ) -> Result<(), StateError> {
        self.delete_pending_activity(scheduled_event_id)
    }

    pub fn replicate_activity_task_failed(
        &mut self,
        scheduled_event_id: i64,
    ) -> Result<(), StateError> {
        self.delete_pending_activity(scheduled_event_id)
    }

    pub fn replicate_activity_task_timed_out(
        &mut self,
        scheduled_event_id: i64,
    ) -> Result<(), StateError> {
        self.delete_pending_activity(scheduled_event_id)
    }

    pub fn replicate_activity_task_cancel_requested(
        &mut self,
        event: &HistoryEvent,
        attributes: &ActivityTaskCancelRequestedAttributes,
    ) -> Result<(), StateError> {
        let schedule_id = *self
            .activity_ids
            .get(&attributes.activity_id)
            .ok_or_else(|| {
                StateError::Internal(format!(
                    "unable to find pending activity {}",
                    attributes.activity_id
                ))
            })?;
        let cancel_request_id = event.event_id;
        let activity = self.pending_activity_mut(schedule_id)?;
        activity.cancel_requested = true;
        activity.cancel_request_id = cancel_request_id;
        Ok(())
    }

    pub fn replicate_activity_task_canceled(
        &mut self,
        scheduled_event_id: i64,
    ) -> Result<(), StateError> {
        self.delete_pending_activity(scheduled_event_id)
    }

    // =========================================================================
    // User timers
    // =========================================================================

    pub fn replicate_timer_started(
        &mut self,
        event: &HistoryEvent,
        attributes: &TimerStartedAttributes,
    ) -> Result<TimerInfo, StateError> {
        let info = TimerInfo {
            version: event.version,
            started_id: event.event_id,
            timer_id: attributes.timer_id.clone(),
            expiry_timestamp: event.timestamp
                + attributes.start_to_fire_timeout_seconds * NANOS_PER_SECOND,
            timer_task_scheduled: false,
        };
        self.pending_timers
            .insert(attributes.timer_id.clone(), info.clone());
        Ok(info)
    }

    fn delete_pending_timer(&mut self, timer_id: &str) -> Result<(), StateError> {
        self.pending_timers.remove(timer_id).ok_or_else(|| {
            StateError::Internal(format!("unable to find pending timer {timer_id}"))
        })?;
        Ok(())
    }

    pub fn replicate_timer_fired(&mut self, timer_id: &str) -> Result<(), StateError> {
        self.delete_pending_timer(timer_id)
    }

    pub fn replicate_timer_canceled(&mut self, timer_id: &str) -> Result<(), StateError> {
        self.delete_pending_timer(timer_id)
    }

    // =========================================================================
    // Child workflows
    // =========================================================================

    pub fn replicate_start_child_workflow_execution_initiated(
        &mut self,
        event: &HistoryEvent,
        attributes: &StartChildWorkflowExecutionInitiatedAttributes,
        create_request_id: String,
    ) -> Result<ChildExecutionInfo, StateError> {
        let info = ChildExecutionInfo {
            version: event.version,
            initiated_id: event.event_id,
            initiated_event_timestamp: event.timestamp,
            started_id: EMPTY_EVENT_ID,
            started_workflow_id: attributes.workflow_id.clone(),
            started_run_id: String::new(),
            create_request_id,
            namespace: attributes.namespace.clone(),
            workflow_type_name: attributes.workflow_type.clone(),
        };
        self.pending_children.insert(event.event_id, info.clone());
        Ok(info)
    }

    fn delete_pending_child(&mut self, initiated_id: i64) -> Result<(), StateError> {
        self.pending_children.remove(&initiated_id).ok_or_else(|| {
            StateError::Internal(format!(
                "unable to find pending child workflow for initiated id {initiated_id}"
            ))
        })?;
        Ok(())
    }

    pub fn replicate_start_child_workflow_execution_failed(
        &mut self,
        attributes: &StartChildWorkflowExecutionFailedAttributes,
    ) -> Result<(), StateError> {
        self.delete_pending_child(attributes.initiated_event_id)
    }

    pub fn replicate_child_workflow_execution_started(
        &mut self,
        event: &HistoryEvent,
        attributes: &ChildWorkflowExecutionStartedAttributes,
    ) -> Result<(), StateError> {
        let started_id = event.event_id;
        let child = self
            .pending_children
            .get_mut(&attributes.initiated_event_id)
            .ok_or_else(|| {
                StateError::Internal(format!(
                    "unable to find pending child workflow for initiated id {}",
                    attributes.initiated_event_id
                ))
            })?;
        child.started_id = started_id;
        child.started_workflow_id = attributes.execution.workflow_id.clone();
        child.started_run_id = attributes.execution.run_id.clone();
        Ok(())
    }

    pub fn replicate_child_workflow_execution_closed(
        &mut self,
        initiated_event_id: i64,
    ) -> Result<(), StateError> {
        self.delete_pending_child(initiated_event_id)
    }

    // =========================================================================
    // External cancels and signals
    // =========================================================================

    pub fn replicate_request_cancel_external_workflow_execution_initiated(
        &mut self,
        event: &HistoryEvent,
        cancel_request_id: String,
    ) -> Result<RequestCancelInfo, StateError> {
        let info = RequestCancelInfo {
            version: event.version,
            initiated_id: event.event_id,
            cancel_request_id,
        };
        self.pending_request_cancels
            .insert(event.event_id, info.clone());
        Ok(info)
    }

    fn delete_pending_request_cancel(&mut self, initiated_id: i64) -> Result<(), StateError> {
        self.pending_request_cancels
            .remove(&initiated_id)
            .ok_or_else(|| {
                StateError::Internal(format!(
                    "unable to find pending request cancel for initiated id {initiated_id}"
                ))
            })?;
        Ok(())
    }

    pub fn replicate_request_cancel_external_workflow_execution_failed(
        &mut self,
        attributes: &RequestCancelExternalWorkflowExecutionFailedAttributes,
    ) -> Result<(), StateError> {
        self.delete_pending_request_cancel(attributes.initiated_event_id)
    }

    pub fn replicate_external_workflow_execution_cancel_requested(
        &mut self,
        attributes: &ExternalWorkflowExecutionCancelRequestedAttributes,
    ) -> Result<(), StateError> {
        self.delete_pending_request_cancel(attributes.initiated_event_id)
    }

    pub fn replicate_signal_external_workflow_execution_initiated(
        &mut self,
        event: &HistoryEvent,
        attributes: &SignalExternalWorkflowExecutionInitiatedAttributes,
        signal_request_id: String,
    ) -> Result<SignalInfo, StateError> {
        let info = SignalInfo {
            version: event.version,
            initiated_id: event.event_id,
            signal_request_id,
            signal_name: attributes.signal_name.clone(),
            input: attributes.input.clone(),
            control: attributes.control.clone(),
        };
        self.pending_signals.insert(event.event_id, info.clone());
        Ok(info)
    }

    fn delete_pending_signal(&mut self, initiated_id: i64) -> Result<(), StateError> {
        self.pending_signals.remove(&initiated_id).ok_or_else(|| {
            StateError::Internal(format!(
                "unable to find pending signal for initiated id {initiated_id}"
            ))
        })?;
        Ok(())
    }

    pub fn replicate_signal_external_workflow_execution_failed(
        &mut self,
        attributes: &SignalExternalWorkflowExecutionFailedAttributes,
    ) -> Result<(), StateError> {
        self.delete_pending_signal(attributes.initiated_event_id)
    }

    pub fn replicate_external_workflow_execution_signaled(
        &mut self,
        attributes: &ExternalWorkflowExecutionSignaledAttributes,
    ) -> Result<(), StateError> {
        self.delete_pending_signal(attributes.initiated_event_id)
    }

    pub(crate) fn mark_activity_timer_task_scheduled(&mut self, schedule_id: i64) {
        if let Some(activity) = self.pending_activities.get_mut(&schedule_id) {
            activity.timer_task_scheduled = true;
        }
    }

    pub(crate) fn mark_user_timer_task_scheduled(&mut self, timer_id: &str) {
        if let Some(timer) = self.pending_timers.get_mut(timer_id) {
            timer.timer_task_scheduled = true;
        }
    }

    // =========================================================================
    // Task buffers
    // =========================================================================

    fn allocate_task_id(&mut self) -> i64 {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id
    }

    pub fn add_transfer_task(
        &mut self,
        visibility_timestamp: DateTime<Utc>,
        kind: TransferTaskKind,
    ) {
        let task_id = self.allocate_task_id();
        self.transfer_tasks.push(TransferTask {
            task_id,
            visibility_timestamp,
            version: self.current_version,
            kind,
        });
    }

    pub fn add_timer_task(&mut self, visibility_timestamp: DateTime<Utc>, kind: TimerTaskKind) {
        let task_id = self.allocate_task_id();
        self.timer_tasks.push(TimerTask {
            task_id,
            visibility_timestamp,
            version: self.current_version,
            kind,
        });
    }

    pub fn add_replication_task(
        &mut self,
        visibility_timestamp: DateTime<Utc>,
        kind: ReplicationTaskKind,
    ) {
        let task_id = self.allocate_task_id();
        self.replication_tasks.push(ReplicationTask {
            task_id,
            visibility_timestamp,
            version: self.current_version,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventAttributes;
    use crate::execution::FIRST_EVENT_ID;

    fn test_namespace() -> NamespaceEntry {
        NamespaceEntry::new("ns-id", "ns-name")
    }

    fn started_event(event_id: i64, version: i64) -> HistoryEvent {
        HistoryEvent {
            event_id,
            version,
            timestamp: 1_000,
            task_id: 0,
            attributes: EventAttributes::WorkflowExecutionStarted(
                WorkflowExecutionStartedAttributes {
                    workflow_type: "wt".to_string(),
                    task_list: "tl".to_string(),
                    workflow_execution_timeout_seconds: 60,
                    workflow_run_timeout_seconds: 60,
                    workflow_task_timeout_seconds: 10,
                    ..Default::default()
                },
            ),
        }
    }

    fn start(state: &mut MutableState) {
        let event = started_event(FIRST_EVENT_ID, 1);
        let EventAttributes::WorkflowExecutionStarted(attrs) = &event.attributes else {
            unreachable!()
        };
        state
            .replicate_workflow_execution_started(
                String::new(),
                &WorkflowExecution::new("ns-id", "wf", "run"),
                "request-id".to_string(),
                &event,
                attrs,
            )
            .unwrap();
    }

    #[test]
    fn test_started_event_initializes_run() {
        let mut state = MutableState::with_version_histories(test_namespace());
        start(&mut state);

        assert!(state.is_workflow_running());
        assert_eq!(state.execution_info().workflow_id, "wf");
        assert_eq!(state.execution_info().create_request_id, "request-id");
        assert_eq!(state.execution_info().start_timestamp, 1_000);
    }

    #[test]
    fn test_double_start_rejected() {
        let mut state = MutableState::with_version_histories(test_namespace());
        start(&mut state);

        let event = started_event(FIRST_EVENT_ID, 1);
        let EventAttributes::WorkflowExecutionStarted(attrs) = &event.attributes else {
            unreachable!()
        };
        let err = state
            .replicate_workflow_execution_started(
                String::new(),
                &WorkflowExecution::new("ns-id", "wf", "run"),
                "other".to_string(),
                &event,
                attrs,
            )
            .unwrap_err();
        assert!(matches!(err, StateError::Internal(_)));
    }

    #[test]
    fn test_decision_state_machine() {
        let mut state = MutableState::with_version_histories(test_namespace());
        start(&mut state);

        let decision = state
            .replicate_decision_task_scheduled(1, 2, "tl".to_string(), 10, 0, 2_000, 2_000)
            .unwrap();
        assert_eq!(decision.schedule_id, 2);
        assert!(state.has_pending_decision());
        assert!(!state.has_in_flight_decision());

        // double schedule rejected
        assert!(state
            .replicate_decision_task_scheduled(1, 3, "tl".to_string(), 10, 0, 0, 0)
            .is_err());

        state
            .replicate_decision_task_started(1, 2, 3, "req".to_string(), 3_000)
            .unwrap();
        assert!(state.has_in_flight_decision());

        state.replicate_decision_task_completed(3).unwrap();
        assert!(!state.has_pending_decision());
        assert_eq!(state.execution_info().last_processed_event, 3);
        assert_eq!(state.execution_info().decision_attempt, 0);
    }

    #[test]
    fn test_decision_failure_produces_transient_replacement() {
        let mut state = MutableState::with_version_histories(test_namespace());
        start(&mut state);
        state.execution_info_mut().next_event_id = 5;

        state
            .replicate_decision_task_scheduled(1, 2, "tl".to_string(), 10, 0, 0, 0)
            .unwrap();
        state
            .replicate_decision_task_started(1, 2, 3, "req".to_string(), 0)
            .unwrap();
        state.replicate_decision_task_failed().unwrap();
        assert_eq!(state.execution_info().decision_attempt, 1);

        let transient = state
            .replicate_transient_decision_task_scheduled()
            .unwrap()
            .expect("transient decision expected after failure");
        assert_eq!(transient.schedule_id, 5);
        assert_eq!(transient.attempt, 1);
        assert!(state.has_pending_decision());
    }

    #[test]
    fn test_no_transient_decision_on_first_attempt() {
        let mut state = MutableState::with_version_histories(test_namespace());
        start(&mut state);

        let transient = state.replicate_transient_decision_task_scheduled().unwrap();
        assert!(transient.is_none());
    }

    #[test]
    fn test_pending_activity_lifecycle() {
        let mut state = MutableState::with_version_histories(test_namespace());
        start(&mut state);

        let event = HistoryEvent {
            event_id: 5,
            version: 1,
            timestamp: 10_000,
            task_id: 0,
            attributes: EventAttributes::ActivityTaskScheduled(Default::default()),
        };
        let attrs = ActivityTaskScheduledAttributes {
            activity_id: "act-1".to_string(),
            activity_type: "charge-card".to_string(),
            schedule_to_start_timeout_seconds: 5,
            ..Default::default()
        };
        state.replicate_activity_task_scheduled(&event, &attrs).unwrap();
        assert!(state.pending_activities().contains_key(&5));

        let started = HistoryEvent {
            event_id: 6,
            version: 1,
            timestamp: 11_000,
            task_id: 0,
            attributes: EventAttributes::ActivityTaskStarted(Default::default()),
        };
        state
            .replicate_activity_task_started(
                &started,
                &ActivityTaskStartedAttributes {
                    scheduled_event_id: 5,
                    attempt: 1,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(state.pending_activities()[&5].started_id, 6);

        state.replicate_activity_task_completed(5).unwrap();
        assert!(state.pending_activities().is_empty());

        // terminal event without a pending entry is an error
        assert!(state.replicate_activity_task_completed(5).is_err());
    }

    #[test]
    fn test_timer_lifecycle() {
        let mut state = MutableState::with_version_histories(test_namespace());
        start(&mut state);

        let event = HistoryEvent {
            event_id: 5,
            version: 1,
            timestamp: 1_000_000_000,
            task_id: 0,
            attributes: EventAttributes::TimerStarted(Default::default()),
        };
        let info = state
            .replicate_timer_started(
                &event,
                &TimerStartedAttributes {
                    timer_id: "t1".to_string(),
                    start_to_fire_timeout_seconds: 30,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(info.expiry_timestamp, 1_000_000_000 + 30 * NANOS_PER_SECOND);

        state.replicate_timer_fired("t1").unwrap();
        assert!(state.pending_timers().is_empty());
        assert!(state.replicate_timer_fired("t1").is_err());
    }

    #[test]
    fn test_close_requires_running() {
        let mut state = MutableState::with_version_histories(test_namespace());
        // not yet started
        assert!(state.replicate_workflow_execution_completed(1).is_err());

        start(&mut state);
        state.replicate_workflow_execution_completed(4).unwrap();
        assert_eq!(state.execution_info().state, WorkflowState::Completed);
        assert_eq!(state.execution_info().completion_event_batch_id, 4);

        // second close rejected
        assert!(state.replicate_workflow_execution_terminated(5).is_err());
    }

    #[test]
    fn test_stickiness_cleared() {
        let mut state = MutableState::with_version_histories(test_namespace());
        state.execution_info_mut().sticky_task_list = "sticky".to_string();
        state.execution_info_mut().sticky_schedule_to_start_timeout = 5;

        state.clear_stickiness();
        assert!(state.execution_info().sticky_task_list.is_empty());
        assert_eq!(state.execution_info().sticky_schedule_to_start_timeout, 0);
    }

    #[test]
    fn test_signal_requested_dedupe() {
        let mut state = MutableState::with_version_histories(test_namespace());
        assert!(!state.is_signal_requested("req-1"));
        state.add_signal_requested_id("req-1".to_string());
        assert!(state.is_signal_requested("req-1"));
    }
}
