//! History events for a workflow run
//!
//! A run's history is an append-only ordered sequence of immutable events.
//! Every state the service can report is a fold over this sequence, so the
//! event set is a closed enum: applying a payload the fold does not know is
//! an error, never a skip.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::WorkflowStatus;

/// Reference to another workflow run (child or external target)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecutionRef {
    pub workflow_id: String,
    pub run_id: String,
}

/// Types of timeouts that can fire for workflows, decisions and activities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutType {
    StartToClose,
    ScheduleToStart,
    ScheduleToClose,
    Heartbeat,
}

/// Wire failure record carried by failed events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFailure {
    pub reason: String,
    pub details: Option<serde_json::Value>,
}

/// A single immutable history record
///
/// `event_id` is monotonic within a run starting at 1. `version` is the
/// failover version of the cluster that authored the event. `timestamp` is
/// unix-nanos; task generation derives all fire times from it, never from
/// the wall clock. `task_id` is bookkeeping for the last applied event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i64,
    pub version: i64,
    pub timestamp: i64,
    pub task_id: i64,
    pub attributes: EventAttributes,
}

impl HistoryEvent {
    pub fn event_type(&self) -> EventType {
        self.attributes.event_type()
    }

    /// The event's timestamp as wall-clock time
    pub fn time(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.timestamp)
    }
}

// =============================================================================
// Attribute payloads
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionStartedAttributes {
    pub workflow_type: String,
    pub task_list: String,
    pub input: Option<serde_json::Value>,
    pub workflow_execution_timeout_seconds: i32,
    pub workflow_run_timeout_seconds: i32,
    pub workflow_task_timeout_seconds: i32,
    pub identity: String,
    /// Name of the parent namespace, when started as a child
    pub parent_workflow_namespace: String,
    pub parent_workflow_id: String,
    pub parent_run_id: String,
    pub parent_initiated_event_id: i64,
    /// Delay before the first decision task is scheduled
    pub first_decision_task_backoff_seconds: i32,
    pub continued_execution_run_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionTaskScheduledAttributes {
    pub task_list: String,
    pub start_to_close_timeout_seconds: i32,
    pub attempt: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionTaskStartedAttributes {
    pub scheduled_event_id: i64,
    pub request_id: String,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionTaskCompletedAttributes {
    pub scheduled_event_id: i64,
    pub started_event_id: i64,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTaskTimedOutAttributes {
    pub scheduled_event_id: i64,
    pub started_event_id: i64,
    pub timeout_type: TimeoutType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionTaskFailedAttributes {
    pub scheduled_event_id: i64,
    pub started_event_id: i64,
    pub cause: String,
    pub failure: Option<EventFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskScheduledAttributes {
    pub activity_id: String,
    pub activity_type: String,
    pub task_list: String,
    pub input: Option<serde_json::Value>,
    pub schedule_to_close_timeout_seconds: i32,
    pub schedule_to_start_timeout_seconds: i32,
    pub start_to_close_timeout_seconds: i32,
    pub heartbeat_timeout_seconds: i32,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskStartedAttributes {
    pub scheduled_event_id: i64,
    pub identity: String,
    pub request_id: String,
    pub attempt: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskCompletedAttributes {
    pub scheduled_event_id: i64,
    pub started_event_id: i64,
    pub result: Option<serde_json::Value>,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskFailedAttributes {
    pub scheduled_event_id: i64,
    pub started_event_id: i64,
    pub failure: Option<EventFailure>,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskTimedOutAttributes {
    pub scheduled_event_id: i64,
    pub started_event_id: i64,
    pub timeout_type: TimeoutType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskCancelRequestedAttributes {
    pub activity_id: String,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskCanceledAttributes {
    pub scheduled_event_id: i64,
    pub started_event_id: i64,
    pub latest_cancel_requested_event_id: i64,
    pub details: Option<serde_json::Value>,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestCancelActivityTaskFailedAttributes {
    pub activity_id: String,
    pub cause: String,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerStartedAttributes {
    pub timer_id: String,
    pub start_to_fire_timeout_seconds: i64,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerFiredAttributes {
    pub timer_id: String,
    pub started_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerCanceledAttributes {
    pub timer_id: String,
    pub started_event_id: i64,
    pub decision_task_completed_event_id: i64,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelTimerFailedAttributes {
    pub timer_id: String,
    pub cause: String,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartChildWorkflowExecutionInitiatedAttributes {
    pub namespace: String,
    pub workflow_id: String,
    pub workflow_type: String,
    pub task_list: String,
    pub input: Option<serde_json::Value>,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartChildWorkflowExecutionFailedAttributes {
    pub namespace: String,
    pub workflow_id: String,
    pub workflow_type: String,
    pub cause: String,
    pub initiated_event_id: i64,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildWorkflowExecutionStartedAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub workflow_type: String,
    pub initiated_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildWorkflowExecutionCompletedAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub workflow_type: String,
    pub initiated_event_id: i64,
    pub started_event_id: i64,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildWorkflowExecutionFailedAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub workflow_type: String,
    pub initiated_event_id: i64,
    pub started_event_id: i64,
    pub failure: Option<EventFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildWorkflowExecutionCanceledAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub workflow_type: String,
    pub initiated_event_id: i64,
    pub started_event_id: i64,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildWorkflowExecutionTimedOutAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub workflow_type: String,
    pub initiated_event_id: i64,
    pub started_event_id: i64,
    pub timeout_type: TimeoutType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildWorkflowExecutionTerminatedAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub workflow_type: String,
    pub initiated_event_id: i64,
    pub started_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestCancelExternalWorkflowExecutionInitiatedAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub decision_task_completed_event_id: i64,
    pub child_workflow_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestCancelExternalWorkflowExecutionFailedAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub cause: String,
    pub initiated_event_id: i64,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalWorkflowExecutionCancelRequestedAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub initiated_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalExternalWorkflowExecutionInitiatedAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub signal_name: String,
    pub input: Option<serde_json::Value>,
    pub control: String,
    pub decision_task_completed_event_id: i64,
    pub child_workflow_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalExternalWorkflowExecutionFailedAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub cause: String,
    pub initiated_event_id: i64,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalWorkflowExecutionSignaledAttributes {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub initiated_event_id: i64,
    pub control: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecordedAttributes {
    pub marker_name: String,
    pub details: Option<serde_json::Value>,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionSignaledAttributes {
    pub signal_name: String,
    pub input: Option<serde_json::Value>,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionCancelRequestedAttributes {
    pub cause: String,
    pub identity: String,
    pub external_initiated_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertWorkflowSearchAttributesAttributes {
    pub decision_task_completed_event_id: i64,
    pub search_attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionCompletedAttributes {
    pub result: Option<serde_json::Value>,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionFailedAttributes {
    pub failure: Option<EventFailure>,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionTimedOutAttributes {
    pub timeout_type: TimeoutType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionCanceledAttributes {
    pub details: Option<serde_json::Value>,
    pub decision_task_completed_event_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionTerminatedAttributes {
    pub reason: String,
    pub details: Option<serde_json::Value>,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionContinuedAsNewAttributes {
    pub new_execution_run_id: String,
    pub workflow_type: String,
    pub task_list: String,
    pub input: Option<serde_json::Value>,
    pub workflow_run_timeout_seconds: i32,
    pub workflow_task_timeout_seconds: i32,
    pub decision_task_completed_event_id: i64,
    pub backoff_start_interval_seconds: i32,
}

// =============================================================================
// The closed event enum
// =============================================================================

/// Type-specific payload of a history event
///
/// The event type is derived from the variant, so an event can never carry a
/// mismatched (type, attributes) pair. `Unrecognized` is produced by decode
/// layers for payloads written by a newer server version; the state builder
/// rejects it with an invalid-argument error naming the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventAttributes {
    WorkflowExecutionStarted(WorkflowExecutionStartedAttributes),
    DecisionTaskScheduled(DecisionTaskScheduledAttributes),
    DecisionTaskStarted(DecisionTaskStartedAttributes),
    DecisionTaskCompleted(DecisionTaskCompletedAttributes),
    DecisionTaskTimedOut(DecisionTaskTimedOutAttributes),
    DecisionTaskFailed(DecisionTaskFailedAttributes),
    ActivityTaskScheduled(ActivityTaskScheduledAttributes),
    ActivityTaskStarted(ActivityTaskStartedAttributes),
    ActivityTaskCompleted(ActivityTaskCompletedAttributes),
    ActivityTaskFailed(ActivityTaskFailedAttributes),
    ActivityTaskTimedOut(ActivityTaskTimedOutAttributes),
    ActivityTaskCancelRequested(ActivityTaskCancelRequestedAttributes),
    ActivityTaskCanceled(ActivityTaskCanceledAttributes),
    RequestCancelActivityTaskFailed(RequestCancelActivityTaskFailedAttributes),
    TimerStarted(TimerStartedAttributes),
    TimerFired(TimerFiredAttributes),
    TimerCanceled(TimerCanceledAttributes),
    CancelTimerFailed(CancelTimerFailedAttributes),
    StartChildWorkflowExecutionInitiated(StartChildWorkflowExecutionInitiatedAttributes),
    StartChildWorkflowExecutionFailed(StartChildWorkflowExecutionFailedAttributes),
    ChildWorkflowExecutionStarted(ChildWorkflowExecutionStartedAttributes),
    ChildWorkflowExecutionCompleted(ChildWorkflowExecutionCompletedAttributes),
    ChildWorkflowExecutionFailed(ChildWorkflowExecutionFailedAttributes),
    ChildWorkflowExecutionCanceled(ChildWorkflowExecutionCanceledAttributes),
    ChildWorkflowExecutionTimedOut(ChildWorkflowExecutionTimedOutAttributes),
    ChildWorkflowExecutionTerminated(ChildWorkflowExecutionTerminatedAttributes),
    RequestCancelExternalWorkflowExecutionInitiated(
        RequestCancelExternalWorkflowExecutionInitiatedAttributes,
    ),
    RequestCancelExternalWorkflowExecutionFailed(
        RequestCancelExternalWorkflowExecutionFailedAttributes,
    ),
    ExternalWorkflowExecutionCancelRequested(ExternalWorkflowExecutionCancelRequestedAttributes),
    SignalExternalWorkflowExecutionInitiated(SignalExternalWorkflowExecutionInitiatedAttributes),
    SignalExternalWorkflowExecutionFailed(SignalExternalWorkflowExecutionFailedAttributes),
    ExternalWorkflowExecutionSignaled(ExternalWorkflowExecutionSignaledAttributes),
    MarkerRecorded(MarkerRecordedAttributes),
    WorkflowExecutionSignaled(WorkflowExecutionSignaledAttributes),
    WorkflowExecutionCancelRequested(WorkflowExecutionCancelRequestedAttributes),
    UpsertWorkflowSearchAttributes(UpsertWorkflowSearchAttributesAttributes),
    WorkflowExecutionCompleted(WorkflowExecutionCompletedAttributes),
    WorkflowExecutionFailed(WorkflowExecutionFailedAttributes),
    WorkflowExecutionTimedOut(WorkflowExecutionTimedOutAttributes),
    WorkflowExecutionCanceled(WorkflowExecutionCanceledAttributes),
    WorkflowExecutionTerminated(WorkflowExecutionTerminatedAttributes),
    WorkflowExecutionContinuedAsNew(WorkflowExecutionContinuedAsNewAttributes),
    /// Payload written by a newer server version; carried for error reporting
    Unrecognized { event_type: String },
}

/// Discriminant of [`EventAttributes`], for matching and error messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowExecutionStarted,
    DecisionTaskScheduled,
    DecisionTaskStarted,
    DecisionTaskCompleted,
    DecisionTaskTimedOut,
    DecisionTaskFailed,
    ActivityTaskScheduled,
    ActivityTaskStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
    ActivityTaskTimedOut,
    ActivityTaskCancelRequested,
    ActivityTaskCanceled,
    RequestCancelActivityTaskFailed,
    TimerStarted,
    TimerFired,
    TimerCanceled,
    CancelTimerFailed,
    StartChildWorkflowExecutionInitiated,
    StartChildWorkflowExecutionFailed,
    ChildWorkflowExecutionStarted,
    ChildWorkflowExecutionCompleted,
    ChildWorkflowExecutionFailed,
    ChildWorkflowExecutionCanceled,
    ChildWorkflowExecutionTimedOut,
    ChildWorkflowExecutionTerminated,
    RequestCancelExternalWorkflowExecutionInitiated,
    RequestCancelExternalWorkflowExecutionFailed,
    ExternalWorkflowExecutionCancelRequested,
    SignalExternalWorkflowExecutionInitiated,
    SignalExternalWorkflowExecutionFailed,
    ExternalWorkflowExecutionSignaled,
    MarkerRecorded,
    WorkflowExecutionSignaled,
    WorkflowExecutionCancelRequested,
    UpsertWorkflowSearchAttributes,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionTimedOut,
    WorkflowExecutionCanceled,
    WorkflowExecutionTerminated,
    WorkflowExecutionContinuedAsNew,
    Unrecognized(String),
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unrecognized(name) => write!(f, "{name}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl EventAttributes {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::WorkflowExecutionStarted(_) => EventType::WorkflowExecutionStarted,
            Self::DecisionTaskScheduled(_) => EventType::DecisionTaskScheduled,
            Self::DecisionTaskStarted(_) => EventType::DecisionTaskStarted,
            Self::DecisionTaskCompleted(_) => EventType::DecisionTaskCompleted,
            Self::DecisionTaskTimedOut(_) => EventType::DecisionTaskTimedOut,
            Self::DecisionTaskFailed(_) => EventType::DecisionTaskFailed,
            Self::ActivityTaskScheduled(_) => EventType::ActivityTaskScheduled,
            Self::ActivityTaskStarted(_) => EventType::ActivityTaskStarted,
            Self::ActivityTaskCompleted(_) => EventType::ActivityTaskCompleted,
            Self::ActivityTaskFailed(_) => EventType::ActivityTaskFailed,
            Self::ActivityTaskTimedOut(_) => EventType::ActivityTaskTimedOut,
            Self::ActivityTaskCancelRequested(_) => EventType::ActivityTaskCancelRequested,
            Self::ActivityTaskCanceled(_) => EventType::ActivityTaskCanceled,
            Self::RequestCancelActivityTaskFailed(_) => EventType::RequestCancelActivityTaskFailed,
            Self::TimerStarted(_) => EventType::TimerStarted,
            Self::TimerFired(_) => EventType::TimerFired,
            Self::TimerCanceled(_) => EventType::TimerCanceled,
            Self::CancelTimerFailed(_) => EventType::CancelTimerFailed,
            Self::StartChildWorkflowExecutionInitiated(_) => {
                EventType::StartChildWorkflowExecutionInitiated
            }
            Self::StartChildWorkflowExecutionFailed(_) => {
                EventType::StartChildWorkflowExecutionFailed
            }
            Self::ChildWorkflowExecutionStarted(_) => EventType::ChildWorkflowExecutionStarted,
            Self::ChildWorkflowExecutionCompleted(_) => EventType::ChildWorkflowExecutionCompleted,
            Self::ChildWorkflowExecutionFailed(_) => EventType::ChildWorkflowExecutionFailed,
            Self::ChildWorkflowExecutionCanceled(_) => EventType::ChildWorkflowExecutionCanceled,
            Self::ChildWorkflowExecutionTimedOut(_) => EventType::ChildWorkflowExecutionTimedOut,
            Self::ChildWorkflowExecutionTerminated(_) => {
                EventType::ChildWorkflowExecutionTerminated
            }
            Self::RequestCancelExternalWorkflowExecutionInitiated(_) => {
                EventType::RequestCancelExternalWorkflowExecutionInitiated
            }
            Self::RequestCancelExternalWorkflowExecutionFailed(_) => {
                EventType::RequestCancelExternalWorkflowExecutionFailed
            }
            Self::ExternalWorkflowExecutionCancelRequested(_) => {
                EventType::ExternalWorkflowExecutionCancelRequested
            }
            Self::SignalExternalWorkflowExecutionInitiated(_) => {
                EventType::SignalExternalWorkflowExecutionInitiated
            }
            Self::SignalExternalWorkflowExecutionFailed(_) => {
                EventType::SignalExternalWorkflowExecutionFailed
            }
            Self::ExternalWorkflowExecutionSignaled(_) => {
                EventType::ExternalWorkflowExecutionSignaled
            }
            Self::MarkerRecorded(_) => EventType::MarkerRecorded,
            Self::WorkflowExecutionSignaled(_) => EventType::WorkflowExecutionSignaled,
            Self::WorkflowExecutionCancelRequested(_) => {
                EventType::WorkflowExecutionCancelRequested
            }
            Self::UpsertWorkflowSearchAttributes(_) => EventType::UpsertWorkflowSearchAttributes,
            Self::WorkflowExecutionCompleted(_) => EventType::WorkflowExecutionCompleted,
            Self::WorkflowExecutionFailed(_) => EventType::WorkflowExecutionFailed,
            Self::WorkflowExecutionTimedOut(_) => EventType::WorkflowExecutionTimedOut,
            Self::WorkflowExecutionCanceled(_) => EventType::WorkflowExecutionCanceled,
            Self::WorkflowExecutionTerminated(_) => EventType::WorkflowExecutionTerminated,
            Self::WorkflowExecutionContinuedAsNew(_) => EventType::WorkflowExecutionContinuedAsNew,
            Self::Unrecognized { event_type } => EventType::Unrecognized(event_type.clone()),
        }
    }

    /// Check if this event closes the run
    pub fn is_workflow_close(&self) -> bool {
        matches!(
            self,
            Self::WorkflowExecutionCompleted(_)
                | Self::WorkflowExecutionFailed(_)
                | Self::WorkflowExecutionTimedOut(_)
                | Self::WorkflowExecutionCanceled(_)
                | Self::WorkflowExecutionTerminated(_)
                | Self::WorkflowExecutionContinuedAsNew(_)
        )
    }

    /// Externally visible status implied by a close event, if any
    pub fn close_status(&self) -> Option<WorkflowStatus> {
        match self {
            Self::WorkflowExecutionCompleted(_) => Some(WorkflowStatus::Completed),
            Self::WorkflowExecutionFailed(_) => Some(WorkflowStatus::Failed),
            Self::WorkflowExecutionTimedOut(_) => Some(WorkflowStatus::TimedOut),
            Self::WorkflowExecutionCanceled(_) => Some(WorkflowStatus::Canceled),
            Self::WorkflowExecutionTerminated(_) => Some(WorkflowStatus::Terminated),
            Self::WorkflowExecutionContinuedAsNew(_) => Some(WorkflowStatus::ContinuedAsNew),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization_round_trip() {
        let event = HistoryEvent {
            event_id: 1,
            version: 12,
            timestamp: 1_000_000_000,
            task_id: 7,
            attributes: EventAttributes::WorkflowExecutionStarted(
                WorkflowExecutionStartedAttributes {
                    workflow_type: "order-workflow".to_string(),
                    task_list: "orders".to_string(),
                    input: Some(json!({"order_id": "123"})),
                    workflow_execution_timeout_seconds: 123,
                    workflow_run_timeout_seconds: 231,
                    workflow_task_timeout_seconds: 233,
                    identity: "starter".to_string(),
                    ..Default::default()
                },
            ),
        };

        let encoded = serde_json::to_string(&event).unwrap();
        assert!(encoded.contains("\"type\":\"workflow_execution_started\""));

        let decoded: HistoryEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.event_type(), EventType::WorkflowExecutionStarted);
    }

    #[test]
    fn test_event_type_matches_attributes() {
        let attrs = EventAttributes::TimerFired(TimerFiredAttributes {
            timer_id: "t1".to_string(),
            started_event_id: 4,
        });
        assert_eq!(attrs.event_type(), EventType::TimerFired);
        assert!(!attrs.is_workflow_close());
    }

    #[test]
    fn test_close_events() {
        let completed =
            EventAttributes::WorkflowExecutionCompleted(WorkflowExecutionCompletedAttributes {
                result: Some(json!({"ok": true})),
                decision_task_completed_event_id: 4,
            });
        assert!(completed.is_workflow_close());
        assert_eq!(completed.close_status(), Some(WorkflowStatus::Completed));

        let continued = EventAttributes::WorkflowExecutionContinuedAsNew(
            WorkflowExecutionContinuedAsNewAttributes::default(),
        );
        assert!(continued.is_workflow_close());
        assert_eq!(
            continued.close_status(),
            Some(WorkflowStatus::ContinuedAsNew)
        );
    }

    #[test]
    fn test_unrecognized_event_type_display() {
        let attrs = EventAttributes::Unrecognized {
            event_type: "some_future_event".to_string(),
        };
        assert_eq!(attrs.event_type().to_string(), "some_future_event");
    }
}
