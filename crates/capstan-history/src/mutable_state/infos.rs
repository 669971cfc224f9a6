//! Persisted projection records: execution info and pending-entity infos

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::execution::{WorkflowState, WorkflowStatus, EMPTY_EVENT_ID, EMPTY_VERSION, FIRST_EVENT_ID};

/// Core record of a single run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub namespace_id: String,
    pub workflow_id: String,
    pub run_id: String,

    pub parent_namespace_id: String,
    pub parent_workflow_id: String,
    pub parent_run_id: String,
    pub initiated_id: i64,

    pub task_list: String,
    pub workflow_type_name: String,
    pub workflow_execution_timeout: i32,
    pub workflow_run_timeout: i32,
    pub workflow_task_timeout: i32,

    pub state: WorkflowState,
    pub status: WorkflowStatus,

    pub last_first_event_id: i64,
    pub next_event_id: i64,
    pub last_processed_event: i64,
    pub last_event_task_id: i64,
    /// First event id of the batch that closed the run
    pub completion_event_batch_id: i64,

    pub start_timestamp: i64,
    pub last_updated_timestamp: i64,

    pub create_request_id: String,
    pub branch_token: Vec<u8>,

    pub decision_version: i64,
    pub decision_schedule_id: i64,
    pub decision_started_id: i64,
    pub decision_request_id: String,
    pub decision_timeout: i32,
    pub decision_attempt: i64,
    pub decision_started_timestamp: i64,
    pub decision_scheduled_timestamp: i64,
    pub decision_original_scheduled_timestamp: i64,
    pub decision_task_list: String,

    pub sticky_task_list: String,
    pub sticky_schedule_to_start_timeout: i32,

    pub cancel_requested: bool,

    pub search_attributes: HashMap<String, serde_json::Value>,
    pub signal_count: i64,
}

impl ExecutionInfo {
    pub fn new(namespace_id: String, workflow_id: String, run_id: String) -> Self {
        Self {
            namespace_id,
            workflow_id,
            run_id,
            parent_namespace_id: String::new(),
            parent_workflow_id: String::new(),
            parent_run_id: String::new(),
            initiated_id: EMPTY_EVENT_ID,
            task_list: String::new(),
            workflow_type_name: String::new(),
            workflow_execution_timeout: 0,
            workflow_run_timeout: 0,
            workflow_task_timeout: 0,
            state: WorkflowState::Created,
            status: WorkflowStatus::Running,
            last_first_event_id: EMPTY_EVENT_ID,
            next_event_id: FIRST_EVENT_ID,
            last_processed_event: EMPTY_EVENT_ID,
            last_event_task_id: 0,
            completion_event_batch_id: EMPTY_EVENT_ID,
            start_timestamp: 0,
            last_updated_timestamp: 0,
            create_request_id: String::new(),
            branch_token: vec![],
            decision_version: EMPTY_VERSION,
            decision_schedule_id: EMPTY_EVENT_ID,
            decision_started_id: EMPTY_EVENT_ID,
            decision_request_id: String::new(),
            decision_timeout: 0,
            decision_attempt: 0,
            decision_started_timestamp: 0,
            decision_scheduled_timestamp: 0,
            decision_original_scheduled_timestamp: 0,
            decision_task_list: String::new(),
            sticky_task_list: String::new(),
            sticky_schedule_to_start_timeout: 0,
            cancel_requested: false,
            search_attributes: HashMap::new(),
            signal_count: 0,
        }
    }
}

/// The in-flight decision task, when one exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionInfo {
    pub version: i64,
    pub schedule_id: i64,
    pub started_id: i64,
    pub request_id: String,
    pub decision_timeout: i32,
    pub attempt: i64,
    pub started_timestamp: i64,
    pub scheduled_timestamp: i64,
    /// Schedule time of the first attempt, preserved across retries
    pub original_scheduled_timestamp: i64,
    pub task_list: String,
}

/// A scheduled-but-not-terminal activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfo {
    pub version: i64,
    pub schedule_id: i64,
    pub scheduled_timestamp: i64,
    pub started_id: i64,
    pub started_timestamp: i64,
    pub activity_id: String,
    pub activity_type: String,
    pub task_list: String,
    pub schedule_to_start_timeout: i32,
    pub schedule_to_close_timeout: i32,
    pub start_to_close_timeout: i32,
    pub heartbeat_timeout: i32,
    pub attempt: i64,
    pub cancel_requested: bool,
    pub cancel_request_id: i64,
    pub last_heartbeat_timestamp: i64,
    /// Set once a timeout timer task has been emitted for this activity
    pub timer_task_scheduled: bool,
}

/// A started-but-not-terminal user timer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerInfo {
    pub version: i64,
    pub started_id: i64,
    pub timer_id: String,
    /// Absolute fire time, unix-nanos
    pub expiry_timestamp: i64,
    /// Set once a fire timer task has been emitted for this timer
    pub timer_task_scheduled: bool,
}

/// An initiated-but-not-terminal child workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildExecutionInfo {
    pub version: i64,
    pub initiated_id: i64,
    pub initiated_event_timestamp: i64,
    pub started_id: i64,
    pub started_workflow_id: String,
    pub started_run_id: String,
    /// Request id handed to the transfer queue processor
    pub create_request_id: String,
    pub namespace: String,
    pub workflow_type_name: String,
}

/// An initiated-but-not-terminal external-cancel request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCancelInfo {
    pub version: i64,
    pub initiated_id: i64,
    pub cancel_request_id: String,
}

/// An initiated-but-not-terminal external-signal request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub version: i64,
    pub initiated_id: i64,
    pub signal_request_id: String,
    pub signal_name: String,
    pub input: Option<serde_json::Value>,
    pub control: String,
}
