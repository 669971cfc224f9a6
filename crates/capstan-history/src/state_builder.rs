//! The event-application fold
//!
//! [`StateBuilder::apply_events`] folds an ordered batch of history events
//! into mutable state, invoking the task generator at the points each event
//! type demands. It is the single source of truth for what a run looks like
//! after any event sequence; both live replication and conflict-resolution
//! rebuilds go through it.
//!
//! The fold never does I/O: namespace resolution is a cache read, and all
//! persistence happens after the fold returns. A failed step aborts
//! immediately and poisons the state; the caller must not persist it.

use tracing::debug;
use uuid::Uuid;

use crate::error::StateError;
use crate::event::{EventAttributes, HistoryEvent};
use crate::execution::WorkflowExecution;
use crate::mutable_state::replication::VersionHistoryItem;
use crate::mutable_state::{HistoryBuilder, MutableState};
use crate::namespace::NamespaceRegistry;
use crate::task::TaskGenerator;

/// Folds history slices into a run's mutable state
pub struct StateBuilder<'a> {
    namespaces: &'a dyn NamespaceRegistry,
    task_generator: TaskGenerator,
    mutable_state: MutableState,
}

impl<'a> StateBuilder<'a> {
    pub fn new(namespaces: &'a dyn NamespaceRegistry, mutable_state: MutableState) -> Self {
        Self {
            namespaces,
            task_generator: TaskGenerator::new(),
            mutable_state,
        }
    }

    pub fn mutable_state(&self) -> &MutableState {
        &self.mutable_state
    }

    pub fn into_mutable_state(self) -> MutableState {
        self.mutable_state
    }

    /// Apply `events` in order, emitting derived tasks
    ///
    /// If the slice ends with a continue-as-new event and `new_run_events`
    /// is non-empty, a fresh mutable state for the new run is built and
    /// returned. The new-run fold never recurses further: it is always
    /// invoked with an empty new-run slice.
    pub fn apply_events(
        &mut self,
        namespace_id: &str,
        request_id: &str,
        execution: &WorkflowExecution,
        events: &[HistoryEvent],
        new_run_events: &[HistoryEvent],
        new_run_is_ndc: bool,
    ) -> Result<Option<MutableState>, StateError> {
        let first_event = events.first().ok_or_else(StateError::history_size_zero)?;
        let last_event = &events[events.len() - 1];

        if first_event.event_id != self.mutable_state.next_event_id() {
            return Err(StateError::InvalidArgument(format!(
                "first event id {} does not continue from next event id {}",
                first_event.event_id,
                self.mutable_state.next_event_id()
            )));
        }

        debug!(
            namespace_id,
            workflow_id = %execution.workflow_id,
            run_id = %execution.run_id,
            first_event_id = first_event.event_id,
            last_event_id = last_event.event_id,
            "applying events"
        );

        let mut new_run_state: Option<MutableState> = None;

        // passive application must never schedule sticky timeouts
        self.mutable_state.clear_stickiness();

        for event in events {
            // the version bookkeeping must run per event: the slice may span
            // a failover and carry more than one version
            if self.mutable_state.replication().as_legacy().is_some() {
                self.mutable_state
                    .update_replication_state_version(event.version);
                self.mutable_state
                    .update_replication_state_last_event(last_event.version, last_event.event_id);
            } else {
                self.mutable_state.update_current_version(event.version)?;
                self.mutable_state.add_version_history_item(
                    VersionHistoryItem::new(event.event_id, event.version),
                )?;
            }
            self.mutable_state.set_last_event_task_id(event.task_id);

            match &event.attributes {
                EventAttributes::WorkflowExecutionStarted(attributes) => {
                    let parent_namespace_id = if attributes.parent_workflow_namespace.is_empty() {
                        String::new()
                    } else {
                        self.namespaces
                            .namespace_by_name(&attributes.parent_workflow_namespace)?
                            .id
                    };

                    self.mutable_state.replicate_workflow_execution_started(
                        parent_namespace_id,
                        execution,
                        request_id.to_string(),
                        event,
                        attributes,
                    )?;

                    self.task_generator.generate_record_workflow_started_tasks(
                        &mut self.mutable_state,
                        event.time(),
                    )?;
                    self.task_generator
                        .generate_workflow_start_tasks(&mut self.mutable_state, event.time())?;

                    if attributes.first_decision_task_backoff_seconds > 0 {
                        self.task_generator.generate_delayed_decision_tasks(
                            &mut self.mutable_state,
                            event.time(),
                            attributes.first_decision_task_backoff_seconds,
                        )?;
                    }

                    self.mutable_state.set_history_tree(&execution.run_id)?;
                    self.mutable_state
                        .set_replication_start_version(event.version);
                }

                EventAttributes::DecisionTaskScheduled(attributes) => {
                    // the event timestamp doubles as the original scheduled
                    // time: no heartbeat is happening here
                    let decision = self.mutable_state.replicate_decision_task_scheduled(
                        event.version,
                        event.event_id,
                        attributes.task_list.clone(),
                        attributes.start_to_close_timeout_seconds,
                        attributes.attempt,
                        event.timestamp,
                        event.timestamp,
                    )?;

                    self.task_generator.generate_decision_schedule_tasks(
                        &mut self.mutable_state,
                        event.time(),
                        decision.schedule_id,
                    )?;
                }

                EventAttributes::DecisionTaskStarted(attributes) => {
                    let decision = self.mutable_state.replicate_decision_task_started(
                        event.version,
                        attributes.scheduled_event_id,
                        event.event_id,
                        attributes.request_id.clone(),
                        event.timestamp,
                    )?;

                    self.task_generator.generate_decision_start_tasks(
                        &mut self.mutable_state,
                        event.time(),
                        decision.schedule_id,
                    )?;
                }

                EventAttributes::DecisionTaskCompleted(attributes) => {
                    self.mutable_state
                        .replicate_decision_task_completed(attributes.started_event_id)?;
                }

                EventAttributes::DecisionTaskTimedOut(_) => {
                    self.mutable_state.replicate_decision_task_timed_out()?;
                    self.schedule_transient_decision(event)?;
                }

                EventAttributes::DecisionTaskFailed(_) => {
                    self.mutable_state.replicate_decision_task_failed()?;
                    self.schedule_transient_decision(event)?;
                }

                EventAttributes::ActivityTaskScheduled(attributes) => {
                    self.mutable_state
                        .replicate_activity_task_scheduled(event, attributes)?;

                    self.task_generator.generate_activity_transfer_tasks(
                        &mut self.mutable_state,
                        event.time(),
                        event.event_id,
                    )?;
                }

                EventAttributes::ActivityTaskStarted(attributes) => {
                    self.mutable_state
                        .replicate_activity_task_started(event, attributes)?;
                }

                EventAttributes::ActivityTaskCompleted(attributes) => {
                    self.mutable_state
                        .replicate_activity_task_completed(attributes.scheduled_event_id)?;
                }

                EventAttributes::ActivityTaskFailed(attributes) => {
                    self.mutable_state
                        .replicate_activity_task_failed(attributes.scheduled_event_id)?;
                }

                EventAttributes::ActivityTaskTimedOut(attributes) => {
                    self.mutable_state
                        .replicate_activity_task_timed_out(attributes.scheduled_event_id)?;
                }

                EventAttributes::ActivityTaskCancelRequested(attributes) => {
                    self.mutable_state
                        .replicate_activity_task_cancel_requested(event, attributes)?;
                }

                EventAttributes::ActivityTaskCanceled(attributes) => {
                    self.mutable_state
                        .replicate_activity_task_canceled(attributes.scheduled_event_id)?;
                }

                EventAttributes::RequestCancelActivityTaskFailed(_) => {
                    // no mutable state action is needed
                }

                EventAttributes::TimerStarted(attributes) => {
                    self.mutable_state.replicate_timer_started(event, attributes)?;
                }

                EventAttributes::TimerFired(attributes) => {
                    self.mutable_state.replicate_timer_fired(&attributes.timer_id)?;
                }

                EventAttributes::TimerCanceled(attributes) => {
                    self.mutable_state
                        .replicate_timer_canceled(&attributes.timer_id)?;
                }

                EventAttributes::CancelTimerFailed(_) => {
                    // no mutable state action is needed
                }

                EventAttributes::StartChildWorkflowExecutionInitiated(attributes) => {
                    // fresh request id for the transfer queue processor, in
                    // case the namespace fails over before dispatch
                    self.mutable_state
                        .replicate_start_child_workflow_execution_initiated(
                            event,
                            attributes,
                            Uuid::new_v4().to_string(),
                        )?;

                    self.task_generator.generate_child_workflow_tasks(
                        &mut self.mutable_state,
                        event.time(),
                        event.event_id,
                    )?;
                }

                EventAttributes::StartChildWorkflowExecutionFailed(attributes) => {
                    self.mutable_state
                        .replicate_start_child_workflow_execution_failed(attributes)?;
                }

                EventAttributes::ChildWorkflowExecutionStarted(attributes) => {
                    self.mutable_state
                        .replicate_child_workflow_execution_started(event, attributes)?;
                }

                EventAttributes::ChildWorkflowExecutionCompleted(attributes) => {
                    self.mutable_state
                        .replicate_child_workflow_execution_closed(attributes.initiated_event_id)?;
                }

                EventAttributes::ChildWorkflowExecutionFailed(attributes) => {
                    self.mutable_state
                        .replicate_child_workflow_execution_closed(attributes.initiated_event_id)?;
                }

                EventAttributes::ChildWorkflowExecutionCanceled(attributes) => {
                    self.mutable_state
                        .replicate_child_workflow_execution_closed(attributes.initiated_event_id)?;
                }

                EventAttributes::ChildWorkflowExecutionTimedOut(attributes) => {
                    self.mutable_state
                        .replicate_child_workflow_execution_closed(attributes.initiated_event_id)?;
                }

                EventAttributes::ChildWorkflowExecutionTerminated(attributes) => {
                    self.mutable_state
                        .replicate_child_workflow_execution_closed(attributes.initiated_event_id)?;
                }

                EventAttributes::RequestCancelExternalWorkflowExecutionInitiated(attributes) => {
                    self.mutable_state
                        .replicate_request_cancel_external_workflow_execution_initiated(
                            event,
                            Uuid::new_v4().to_string(),
                        )?;

                    self.task_generator.generate_request_cancel_external_tasks(
                        &mut self.mutable_state,
                        event.time(),
                        event.event_id,
                        attributes,
                    )?;
                }

                EventAttributes::RequestCancelExternalWorkflowExecutionFailed(attributes) => {
                    self.mutable_state
                        .replicate_request_cancel_external_workflow_execution_failed(attributes)?;
                }

                EventAttributes::ExternalWorkflowExecutionCancelRequested(attributes) => {
                    self.mutable_state
                        .replicate_external_workflow_execution_cancel_requested(attributes)?;
                }

                EventAttributes::SignalExternalWorkflowExecutionInitiated(attributes) => {
                    self.mutable_state
                        .replicate_signal_external_workflow_execution_initiated(
                            event,
                            attributes,
                            Uuid::new_v4().to_string(),
                        )?;

                    self.task_generator.generate_signal_external_tasks(
                        &mut self.mutable_state,
                        event.time(),
                        event.event_id,
                        attributes,
                    )?;
                }

                EventAttributes::SignalExternalWorkflowExecutionFailed(attributes) => {
                    self.mutable_state
                        .replicate_signal_external_workflow_execution_failed(attributes)?;
                }

                EventAttributes::ExternalWorkflowExecutionSignaled(attributes) => {
                    self.mutable_state
                        .replicate_external_workflow_execution_signaled(attributes)?;
                }

                EventAttributes::MarkerRecorded(_) => {
                    // no mutable state action is needed
                }

                EventAttributes::WorkflowExecutionSignaled(attributes) => {
                    self.mutable_state
                        .replicate_workflow_execution_signaled(attributes)?;
                }

                EventAttributes::WorkflowExecutionCancelRequested(attributes) => {
                    self.mutable_state
                        .replicate_workflow_execution_cancel_requested(attributes)?;
                }

                EventAttributes::UpsertWorkflowSearchAttributes(attributes) => {
                    self.mutable_state
                        .replicate_upsert_workflow_search_attributes(attributes);
                    self.task_generator.generate_workflow_search_attr_tasks(
                        &mut self.mutable_state,
                        event.time(),
                    )?;
                }

                EventAttributes::WorkflowExecutionCompleted(_) => {
                    self.mutable_state
                        .replicate_workflow_execution_completed(first_event.event_id)?;
                    self.task_generator
                        .generate_workflow_close_tasks(&mut self.mutable_state, event.time())?;
                }

                EventAttributes::WorkflowExecutionFailed(_) => {
                    self.mutable_state
                        .replicate_workflow_execution_failed(first_event.event_id)?;
                    self.task_generator
                        .generate_workflow_close_tasks(&mut self.mutable_state, event.time())?;
                }

                EventAttributes::WorkflowExecutionTimedOut(_) => {
                    self.mutable_state
                        .replicate_workflow_execution_timed_out(first_event.event_id)?;
                    self.task_generator
                        .generate_workflow_close_tasks(&mut self.mutable_state, event.time())?;
                }

                EventAttributes::WorkflowExecutionCanceled(_) => {
                    self.mutable_state
                        .replicate_workflow_execution_canceled(first_event.event_id)?;
                    self.task_generator
                        .generate_workflow_close_tasks(&mut self.mutable_state, event.time())?;
                }

                EventAttributes::WorkflowExecutionTerminated(_) => {
                    self.mutable_state
                        .replicate_workflow_execution_terminated(first_event.event_id)?;
                    self.task_generator
                        .generate_workflow_close_tasks(&mut self.mutable_state, event.time())?;
                }

                EventAttributes::WorkflowExecutionContinuedAsNew(attributes) => {
                    // the new-run slice may be empty on resend; the original
                    // run still closes either way
                    if !new_run_events.is_empty() {
                        let namespace = self.mutable_state.namespace_entry().clone();
                        let new_run_mutable_state = if new_run_is_ndc {
                            MutableState::with_version_histories(namespace)
                        } else {
                            MutableState::with_replication_state(namespace)
                        };

                        let mut new_run_builder =
                            StateBuilder::new(self.namespaces, new_run_mutable_state);
                        let new_execution = WorkflowExecution::new(
                            namespace_id,
                            execution.workflow_id.clone(),
                            attributes.new_execution_run_id.clone(),
                        );
                        new_run_builder.apply_events(
                            namespace_id,
                            &Uuid::new_v4().to_string(),
                            &new_execution,
                            new_run_events,
                            &[],
                            false,
                        )?;
                        new_run_state = Some(new_run_builder.into_mutable_state());
                    }

                    self.mutable_state
                        .replicate_workflow_execution_continued_as_new(first_event.event_id)?;
                    self.task_generator
                        .generate_workflow_close_tasks(&mut self.mutable_state, event.time())?;
                }

                EventAttributes::Unrecognized { event_type } => {
                    return Err(StateError::unknown_event_type(event_type));
                }
            }
        }

        // the activity timer / user timer sweeps must run at the very end
        self.task_generator
            .generate_activity_timer_tasks(&mut self.mutable_state, last_event.time())?;
        self.task_generator
            .generate_user_timer_tasks(&mut self.mutable_state, last_event.time())?;

        self.mutable_state.execution_info_mut().last_first_event_id = first_event.event_id;
        self.mutable_state.execution_info_mut().next_event_id = last_event.event_id + 1;

        self.mutable_state
            .set_history_builder(HistoryBuilder::from_events(events.to_vec()));

        Ok(new_run_state)
    }

    /// Decision failures and timeouts may produce a transient replacement
    /// that needs a schedule task of its own
    fn schedule_transient_decision(&mut self, event: &HistoryEvent) -> Result<(), StateError> {
        if let Some(decision) = self
            .mutable_state
            .replicate_transient_decision_task_scheduled()?
        {
            self.task_generator.generate_decision_schedule_tasks(
                &mut self.mutable_state,
                event.time(),
                decision.schedule_id,
            )?;
        }
        Ok(())
    }
}
