//! Side-task generation
//!
//! Every fold emits the transfer, timer, and replication tasks that queue
//! processors execute after the state mutation commits. Tasks are appended
//! to the mutable state's transaction-scoped buffers and persisted
//! atomically with it; task ids and visibility timestamps are assigned
//! here, never by callers. All fire times derive from event timestamps.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::event::{
    RequestCancelExternalWorkflowExecutionInitiatedAttributes,
    SignalExternalWorkflowExecutionInitiatedAttributes, TimeoutType,
};
use crate::execution::EMPTY_EVENT_ID;
use crate::mutable_state::MutableState;

/// Work handed to a background transfer-queue processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferTaskKind {
    /// Record the run in visibility storage
    RecordWorkflowStarted,

    /// Dispatch a decision task to matching
    DecisionTask { task_list: String, schedule_id: i64 },

    /// Dispatch an activity task to matching
    ActivityTask { task_list: String, schedule_id: i64 },

    /// Start an initiated child workflow
    StartChildExecution {
        target_namespace: String,
        target_workflow_id: String,
        initiated_id: i64,
    },

    /// Deliver a cancellation request to an external run
    CancelExternalExecution {
        target_namespace: String,
        target_workflow_id: String,
        target_run_id: String,
        initiated_id: i64,
        child_workflow_only: bool,
    },

    /// Deliver a signal to an external run
    SignalExternalExecution {
        target_namespace: String,
        target_workflow_id: String,
        target_run_id: String,
        initiated_id: i64,
        child_workflow_only: bool,
    },

    /// Push current search attributes to visibility storage
    UpsertWorkflowSearchAttributes,

    /// Close-processing: notify parent, record closure, release resources
    CloseExecution,
}

/// Work scheduled for a future fire time on the timer queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerTaskKind {
    /// Run-level timeout
    WorkflowRunTimeout,

    /// Delayed first decision after a start backoff
    WorkflowBackoff,

    /// Start-to-close timeout of a started decision
    DecisionTimeout { schedule_id: i64 },

    /// Earliest outstanding timeout of a pending activity
    ActivityTimeout {
        schedule_id: i64,
        timeout_type: TimeoutType,
    },

    /// Fire of a user timer
    UserTimer { timer_id: String },

    /// Retention-driven history cleanup after close
    DeleteHistory,
}

/// Work for the replication queue on the active side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationTaskKind {
    /// Ship an event range to passive clusters
    History {
        first_event_id: i64,
        next_event_id: i64,
    },
}

/// A generated transfer task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTask {
    pub task_id: i64,
    pub visibility_timestamp: DateTime<Utc>,
    pub version: i64,
    pub kind: TransferTaskKind,
}

/// A generated timer task; `visibility_timestamp` is the fire time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerTask {
    pub task_id: i64,
    pub visibility_timestamp: DateTime<Utc>,
    pub version: i64,
    pub kind: TimerTaskKind,
}

/// A generated replication task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationTask {
    pub task_id: i64,
    pub visibility_timestamp: DateTime<Utc>,
    pub version: i64,
    pub kind: ReplicationTaskKind,
}

/// Stateless façade producing tasks from mutable state and the triggering
/// event
///
/// The generator only sees the state through its accessor surface, so it can
/// be handed any run without holding a back-pointer to shard machinery.
#[derive(Debug, Default)]
pub struct TaskGenerator;

impl TaskGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_record_workflow_started_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StateError> {
        state.add_transfer_task(timestamp, TransferTaskKind::RecordWorkflowStarted);
        Ok(())
    }

    /// Run-timeout timer for a freshly started run
    pub fn generate_workflow_start_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let run_timeout = state.execution_info().workflow_run_timeout;
        let fire_time = timestamp + Duration::seconds(i64::from(run_timeout.max(0)));
        state.add_timer_task(fire_time, TimerTaskKind::WorkflowRunTimeout);
        Ok(())
    }

    /// Backoff timer that schedules the first decision later
    pub fn generate_delayed_decision_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
        backoff_seconds: i32,
    ) -> Result<(), StateError> {
        let fire_time = timestamp + Duration::seconds(i64::from(backoff_seconds));
        state.add_timer_task(fire_time, TimerTaskKind::WorkflowBackoff);
        Ok(())
    }

    pub fn generate_decision_schedule_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
        schedule_id: i64,
    ) -> Result<(), StateError> {
        let decision = state.decision_info().ok_or_else(|| {
            StateError::Internal(format!(
                "no pending decision for schedule id {schedule_id}"
            ))
        })?;
        if decision.schedule_id != schedule_id {
            return Err(StateError::Internal(format!(
                "pending decision {} does not match schedule id {}",
                decision.schedule_id, schedule_id
            )));
        }
        state.add_transfer_task(
            timestamp,
            TransferTaskKind::DecisionTask {
                task_list: decision.task_list,
                schedule_id,
            },
        );
        Ok(())
    }

    /// Start-to-close timeout for a started decision
    pub fn generate_decision_start_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
        schedule_id: i64,
    ) -> Result<(), StateError> {
        let decision = state.decision_info().ok_or_else(|| {
            StateError::Internal(format!(
                "no pending decision for schedule id {schedule_id}"
            ))
        })?;
        let fire_time = timestamp + Duration::seconds(i64::from(decision.decision_timeout.max(0)));
        state.add_timer_task(fire_time, TimerTaskKind::DecisionTimeout { schedule_id });
        Ok(())
    }

    pub fn generate_activity_transfer_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
        schedule_id: i64,
    ) -> Result<(), StateError> {
        let activity = state.pending_activities().get(&schedule_id).ok_or_else(|| {
            StateError::Internal(format!(
                "no pending activity for schedule id {schedule_id}"
            ))
        })?;
        let task_list = activity.task_list.clone();
        state.add_transfer_task(
            timestamp,
            TransferTaskKind::ActivityTask {
                task_list,
                schedule_id,
            },
        );
        Ok(())
    }

    pub fn generate_child_workflow_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
        initiated_id: i64,
    ) -> Result<(), StateError> {
        let child = state.pending_children().get(&initiated_id).ok_or_else(|| {
            StateError::Internal(format!(
                "no pending child workflow for initiated id {initiated_id}"
            ))
        })?;
        let target_namespace = child.namespace.clone();
        let target_workflow_id = child.started_workflow_id.clone();
        state.add_transfer_task(
            timestamp,
            TransferTaskKind::StartChildExecution {
                target_namespace,
                target_workflow_id,
                initiated_id,
            },
        );
        Ok(())
    }

    pub fn generate_request_cancel_external_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
        initiated_id: i64,
        attributes: &RequestCancelExternalWorkflowExecutionInitiatedAttributes,
    ) -> Result<(), StateError> {
        state.add_transfer_task(
            timestamp,
            TransferTaskKind::CancelExternalExecution {
                target_namespace: attributes.namespace.clone(),
                target_workflow_id: attributes.execution.workflow_id.clone(),
                target_run_id: attributes.execution.run_id.clone(),
                initiated_id,
                child_workflow_only: attributes.child_workflow_only,
            },
        );
        Ok(())
    }

    pub fn generate_signal_external_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
        initiated_id: i64,
        attributes: &SignalExternalWorkflowExecutionInitiatedAttributes,
    ) -> Result<(), StateError> {
        state.add_transfer_task(
            timestamp,
            TransferTaskKind::SignalExternalExecution {
                target_namespace: attributes.namespace.clone(),
                target_workflow_id: attributes.execution.workflow_id.clone(),
                target_run_id: attributes.execution.run_id.clone(),
                initiated_id,
                child_workflow_only: attributes.child_workflow_only,
            },
        );
        Ok(())
    }

    pub fn generate_workflow_search_attr_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StateError> {
        state.add_transfer_task(timestamp, TransferTaskKind::UpsertWorkflowSearchAttributes);
        Ok(())
    }

    /// Close-processing transfer task plus the retention cleanup timer
    pub fn generate_workflow_close_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StateError> {
        state.add_transfer_task(timestamp, TransferTaskKind::CloseExecution);
        let retention = Duration::days(i64::from(
            state.namespace_entry().retention_days.max(0),
        ));
        state.add_timer_task(timestamp + retention, TimerTaskKind::DeleteHistory);
        Ok(())
    }

    /// Replication of an applied event range to passive clusters
    pub fn generate_history_replication_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
        first_event_id: i64,
        next_event_id: i64,
    ) -> Result<(), StateError> {
        state.add_replication_task(
            timestamp,
            ReplicationTaskKind::History {
                first_event_id,
                next_event_id,
            },
        );
        Ok(())
    }

    /// Emit the earliest outstanding timeout per pending activity
    ///
    /// Called once at the end of a fold; entities that already carry a timer
    /// task are skipped, so one transaction yields at most one timer per
    /// activity.
    pub fn generate_activity_timer_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let mut due: Vec<(i64, DateTime<Utc>, TimeoutType)> = vec![];
        for (schedule_id, activity) in state.pending_activities() {
            if activity.timer_task_scheduled {
                continue;
            }

            let scheduled = Utc.timestamp_nanos(activity.scheduled_timestamp);
            let mut candidates: Vec<(DateTime<Utc>, TimeoutType)> = vec![];
            if activity.started_id == EMPTY_EVENT_ID {
                if activity.schedule_to_start_timeout > 0 {
                    candidates.push((
                        scheduled
                            + Duration::seconds(i64::from(activity.schedule_to_start_timeout)),
                        TimeoutType::ScheduleToStart,
                    ));
                }
            } else {
                let started = Utc.timestamp_nanos(activity.started_timestamp);
                if activity.start_to_close_timeout > 0 {
                    candidates.push((
                        started + Duration::seconds(i64::from(activity.start_to_close_timeout)),
                        TimeoutType::StartToClose,
                    ));
                }
                if activity.heartbeat_timeout > 0 {
                    let base = if activity.last_heartbeat_timestamp > 0 {
                        Utc.timestamp_nanos(activity.last_heartbeat_timestamp)
                    } else {
                        started
                    };
                    candidates.push((
                        base + Duration::seconds(i64::from(activity.heartbeat_timeout)),
                        TimeoutType::Heartbeat,
                    ));
                }
            }
            if activity.schedule_to_close_timeout > 0 {
                candidates.push((
                    scheduled + Duration::seconds(i64::from(activity.schedule_to_close_timeout)),
                    TimeoutType::ScheduleToClose,
                ));
            }

            if let Some((deadline, timeout_type)) =
                candidates.into_iter().min_by_key(|(deadline, _)| *deadline)
            {
                // expired deadlines fire immediately
                due.push((*schedule_id, deadline.max(timestamp), timeout_type));
            }
        }

        due.sort_by_key(|(schedule_id, _, _)| *schedule_id);
        for (schedule_id, fire_time, timeout_type) in due {
            state.add_timer_task(
                fire_time,
                TimerTaskKind::ActivityTimeout {
                    schedule_id,
                    timeout_type,
                },
            );
            state.mark_activity_timer_task_scheduled(schedule_id);
        }
        Ok(())
    }

    /// Emit the fire timer per pending user timer
    pub fn generate_user_timer_tasks(
        &self,
        state: &mut MutableState,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let mut due: Vec<(String, DateTime<Utc>)> = vec![];
        for (timer_id, timer) in state.pending_timers() {
            if timer.timer_task_scheduled {
                continue;
            }
            let expiry = Utc.timestamp_nanos(timer.expiry_timestamp);
            due.push((timer_id.clone(), expiry.max(timestamp)));
        }

        due.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (timer_id, fire_time) in due {
            state.add_timer_task(
                fire_time,
                TimerTaskKind::UserTimer {
                    timer_id: timer_id.clone(),
                },
            );
            state.mark_user_timer_task_scheduled(&timer_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        ActivityTaskScheduledAttributes, ActivityTaskStartedAttributes, EventAttributes,
        HistoryEvent, TimerStartedAttributes,
    };
    use crate::mutable_state::MutableState;
    use crate::namespace::NamespaceEntry;

    fn running_state() -> MutableState {
        let mut state = MutableState::with_version_histories(NamespaceEntry::new("ns", "ns"));
        let event = HistoryEvent {
            event_id: 1,
            version: 1,
            timestamp: 0,
            task_id: 0,
            attributes: EventAttributes::WorkflowExecutionStarted(Default::default()),
        };
        let EventAttributes::WorkflowExecutionStarted(attrs) = &event.attributes else {
            unreachable!()
        };
        state
            .replicate_workflow_execution_started(
                String::new(),
                &crate::execution::WorkflowExecution::new("ns", "wf", "run"),
                "req".to_string(),
                &event,
                attrs,
            )
            .unwrap();
        state
    }

    fn schedule_activity(state: &mut MutableState, schedule_id: i64, s2s: i32, s2c: i32) {
        let event = HistoryEvent {
            event_id: schedule_id,
            version: 1,
            timestamp: 1_000_000_000,
            task_id: 0,
            attributes: EventAttributes::ActivityTaskScheduled(Default::default()),
        };
        state
            .replicate_activity_task_scheduled(
                &event,
                &ActivityTaskScheduledAttributes {
                    activity_id: format!("act-{schedule_id}"),
                    task_list: "tl".to_string(),
                    schedule_to_start_timeout_seconds: s2s,
                    schedule_to_close_timeout_seconds: s2c,
                    start_to_close_timeout_seconds: 60,
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_delayed_decision_fire_time() {
        let mut state = running_state();
        let generator = TaskGenerator::new();
        let now = Utc.timestamp_nanos(1_000_000_000);

        generator
            .generate_delayed_decision_tasks(&mut state, now, 30)
            .unwrap();

        let task = &state.timer_tasks()[0];
        assert_eq!(task.kind, TimerTaskKind::WorkflowBackoff);
        assert_eq!(task.visibility_timestamp, now + Duration::seconds(30));
    }

    #[test]
    fn test_activity_timer_sweep_emits_earliest_per_entity() {
        let mut state = running_state();
        let generator = TaskGenerator::new();

        schedule_activity(&mut state, 5, 10, 60);
        schedule_activity(&mut state, 6, 0, 30);

        let now = Utc.timestamp_nanos(1_000_000_000);
        generator
            .generate_activity_timer_tasks(&mut state, now)
            .unwrap();

        let timers = state.timer_tasks();
        assert_eq!(timers.len(), 2);
        assert_eq!(
            timers[0].kind,
            TimerTaskKind::ActivityTimeout {
                schedule_id: 5,
                timeout_type: TimeoutType::ScheduleToStart,
            }
        );
        assert_eq!(timers[0].visibility_timestamp, now + Duration::seconds(10));
        assert_eq!(
            timers[1].kind,
            TimerTaskKind::ActivityTimeout {
                schedule_id: 6,
                timeout_type: TimeoutType::ScheduleToClose,
            }
        );
    }

    #[test]
    fn test_activity_timer_sweep_is_idempotent() {
        let mut state = running_state();
        let generator = TaskGenerator::new();
        schedule_activity(&mut state, 5, 10, 60);

        let now = Utc.timestamp_nanos(1_000_000_000);
        generator
            .generate_activity_timer_tasks(&mut state, now)
            .unwrap();
        generator
            .generate_activity_timer_tasks(&mut state, now)
            .unwrap();

        assert_eq!(state.timer_tasks().len(), 1);
    }

    #[test]
    fn test_activity_start_reschedules_timer() {
        let mut state = running_state();
        let generator = TaskGenerator::new();
        schedule_activity(&mut state, 5, 10, 600);

        let now = Utc.timestamp_nanos(1_000_000_000);
        generator
            .generate_activity_timer_tasks(&mut state, now)
            .unwrap();
        assert_eq!(state.timer_tasks().len(), 1);

        let started = HistoryEvent {
            event_id: 6,
            version: 1,
            timestamp: 2_000_000_000,
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

        generator
            .generate_activity_timer_tasks(&mut state, now)
            .unwrap();
        assert_eq!(state.timer_tasks().len(), 2);
        assert_eq!(
            state.timer_tasks()[1].kind,
            TimerTaskKind::ActivityTimeout {
                schedule_id: 5,
                timeout_type: TimeoutType::StartToClose,
            }
        );
    }

    #[test]
    fn test_user_timer_sweep() {
        let mut state = running_state();
        let generator = TaskGenerator::new();

        let event = HistoryEvent {
            event_id: 5,
            version: 1,
            timestamp: 1_000_000_000,
            task_id: 0,
            attributes: EventAttributes::TimerStarted(Default::default()),
        };
        state
            .replicate_timer_started(
                &event,
                &TimerStartedAttributes {
                    timer_id: "t1".to_string(),
                    start_to_fire_timeout_seconds: 30,
                    ..Default::default()
                },
            )
            .unwrap();

        let now = Utc.timestamp_nanos(1_000_000_000);
        generator.generate_user_timer_tasks(&mut state, now).unwrap();
        generator.generate_user_timer_tasks(&mut state, now).unwrap();

        let timers = state.timer_tasks();
        assert_eq!(timers.len(), 1);
        assert_eq!(
            timers[0].kind,
            TimerTaskKind::UserTimer {
                timer_id: "t1".to_string()
            }
        );
        assert_eq!(timers[0].visibility_timestamp, now + Duration::seconds(30));
    }

    #[test]
    fn test_close_tasks_include_retention_cleanup() {
        let mut state = running_state();
        let generator = TaskGenerator::new();
        let now = Utc.timestamp_nanos(0);

        generator
            .generate_workflow_close_tasks(&mut state, now)
            .unwrap();

        assert_eq!(
            state.transfer_tasks()[0].kind,
            TransferTaskKind::CloseExecution
        );
        assert_eq!(state.timer_tasks()[0].kind, TimerTaskKind::DeleteHistory);
        assert_eq!(
            state.timer_tasks()[0].visibility_timestamp,
            now + Duration::days(7)
        );
    }

    #[test]
    fn test_task_ids_are_sequential() {
        let mut state = running_state();
        let generator = TaskGenerator::new();
        let now = Utc.timestamp_nanos(0);

        generator
            .generate_record_workflow_started_tasks(&mut state, now)
            .unwrap();
        generator
            .generate_workflow_start_tasks(&mut state, now)
            .unwrap();
        generator
            .generate_history_replication_tasks(&mut state, now, 1, 2)
            .unwrap();

        assert_eq!(state.transfer_tasks()[0].task_id, 1);
        assert_eq!(state.timer_tasks()[0].task_id, 2);
        assert_eq!(state.replication_tasks()[0].task_id, 3);
    }
}
