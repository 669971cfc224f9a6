//! Worker-facing RPC surface
//!
//! Request/response shapes for the polling protocol, plus the
//! [`FrontendClient`] seam the poller drives. Transport is someone else's
//! problem: implementations wrap whatever wire the deployment uses, tests
//! use in-memory fakes.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use capstan_history::event::{EventFailure, HistoryEvent, WorkflowExecutionRef};

use crate::failure::Failure;

/// Errors surfaced by the frontend
#[derive(Debug, Clone, Error)]
pub enum FrontendError {
    /// The task was already dispatched; benign, poll again
    #[error("duplicate task")]
    DuplicateTask,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidArgument(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Commands a worker produces to advance a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    ScheduleActivityTask {
        activity_id: String,
        activity_type: String,
        task_list: String,
        input: Option<serde_json::Value>,
        schedule_to_close_timeout_seconds: i32,
        schedule_to_start_timeout_seconds: i32,
        start_to_close_timeout_seconds: i32,
        heartbeat_timeout_seconds: i32,
    },
    RequestCancelActivityTask {
        activity_id: String,
    },
    StartTimer {
        timer_id: String,
        start_to_fire_timeout_seconds: i64,
    },
    CancelTimer {
        timer_id: String,
    },
    CompleteWorkflowExecution {
        result: Option<serde_json::Value>,
    },
    FailWorkflowExecution {
        failure: EventFailure,
    },
    CancelWorkflowExecution {
        details: Option<serde_json::Value>,
    },
    ContinueAsNewWorkflowExecution {
        workflow_type: String,
        task_list: String,
        input: Option<serde_json::Value>,
        backoff_start_interval_seconds: i32,
    },
    StartChildWorkflowExecution {
        namespace: String,
        workflow_id: String,
        workflow_type: String,
        task_list: String,
        input: Option<serde_json::Value>,
    },
    RequestCancelExternalWorkflowExecution {
        namespace: String,
        workflow_id: String,
        run_id: String,
        child_workflow_only: bool,
    },
    SignalExternalWorkflowExecution {
        namespace: String,
        execution: WorkflowExecutionRef,
        signal_name: String,
        input: Option<serde_json::Value>,
        child_workflow_only: bool,
    },
    RecordMarker {
        marker_name: String,
        details: Option<serde_json::Value>,
    },
    UpsertWorkflowSearchAttributes {
        search_attributes: HashMap<String, serde_json::Value>,
    },
}

/// Why a decision task is being failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTaskFailedCause {
    WorkflowWorkerUnhandledFailure,
    UnhandledDecision,
    BadRequest,
    ResetWorkflow,
}

/// An attached query the worker must answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowQuery {
    pub query_type: String,
    pub query_args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResultType {
    Answered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowQueryResult {
    pub result_type: QueryResultType,
    pub answer: Option<serde_json::Value>,
    pub error_message: String,
}

/// Sticky binding a worker offers when responding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickyExecutionAttributes {
    pub worker_task_list: String,
    pub schedule_to_start_timeout_seconds: i32,
}

/// History page wrapper
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub events: Vec<HistoryEvent>,
}

// =============================================================================
// Decision task RPCs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollForDecisionTaskRequest {
    pub namespace: String,
    pub task_list: String,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollForDecisionTaskResponse {
    pub task_token: Vec<u8>,
    pub workflow_execution: WorkflowExecutionRef,
    pub workflow_type: String,
    pub previous_started_event_id: i64,
    pub started_event_id: i64,
    pub attempt: i64,
    pub next_event_id: i64,
    pub history: Option<History>,
    pub next_page_token: Option<Vec<u8>>,
    pub query: Option<WorkflowQuery>,
    pub queries: HashMap<String, WorkflowQuery>,
    pub sticky_execution_enabled: bool,
    pub scheduled_timestamp: i64,
    pub started_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetWorkflowExecutionHistoryRequest {
    pub namespace: String,
    pub execution: WorkflowExecutionRef,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetWorkflowExecutionHistoryResponse {
    pub history: History,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondDecisionTaskCompletedRequest {
    pub task_token: Vec<u8>,
    pub identity: String,
    pub decisions: Vec<Decision>,
    pub sticky_attributes: Option<StickyExecutionAttributes>,
    pub return_new_decision_task: bool,
    pub force_create_new_decision_task: bool,
    pub query_results: HashMap<String, WorkflowQueryResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RespondDecisionTaskCompletedResponse {
    /// Chained next decision task, when the worker asked for one
    pub decision_task: Option<PollForDecisionTaskResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondDecisionTaskFailedRequest {
    pub task_token: Vec<u8>,
    pub cause: DecisionTaskFailedCause,
    pub failure: Failure,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondQueryTaskCompletedRequest {
    pub task_token: Vec<u8>,
    pub completed_type: QueryResultType,
    pub query_result: Option<serde_json::Value>,
    pub error_message: String,
}

// =============================================================================
// Activity task RPCs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollForActivityTaskRequest {
    pub namespace: String,
    pub task_list: String,
    pub identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollForActivityTaskResponse {
    pub task_token: Vec<u8>,
    pub workflow_execution: WorkflowExecutionRef,
    pub activity_type: String,
    pub activity_id: String,
    pub input: Option<serde_json::Value>,
    pub schedule_to_close_timeout_seconds: i32,
    pub start_to_close_timeout_seconds: i32,
    pub heartbeat_timeout_seconds: i32,
    pub attempt: i64,
    pub heartbeat_details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskCompletedRequest {
    pub task_token: Vec<u8>,
    pub identity: String,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskFailedRequest {
    pub task_token: Vec<u8>,
    pub failure: Failure,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskCanceledRequest {
    pub task_token: Vec<u8>,
    pub details: Option<serde_json::Value>,
    pub identity: String,
}

/// Addressing for the `…ById` response variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskAddress {
    pub namespace: String,
    pub workflow_id: String,
    pub run_id: String,
    pub activity_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskCompletedByIdRequest {
    pub address: ActivityTaskAddress,
    pub identity: String,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskFailedByIdRequest {
    pub address: ActivityTaskAddress,
    pub failure: Failure,
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskCanceledByIdRequest {
    pub address: ActivityTaskAddress,
    pub details: Option<serde_json::Value>,
    pub identity: String,
}

/// The front-end RPC set a worker polls against
#[async_trait]
pub trait FrontendClient: Send + Sync {
    async fn poll_for_decision_task(
        &self,
        request: PollForDecisionTaskRequest,
    ) -> Result<PollForDecisionTaskResponse, FrontendError>;

    async fn get_workflow_execution_history(
        &self,
        request: GetWorkflowExecutionHistoryRequest,
    ) -> Result<GetWorkflowExecutionHistoryResponse, FrontendError>;

    async fn respond_decision_task_completed(
        &self,
        request: RespondDecisionTaskCompletedRequest,
    ) -> Result<RespondDecisionTaskCompletedResponse, FrontendError>;

    async fn respond_decision_task_failed(
        &self,
        request: RespondDecisionTaskFailedRequest,
    ) -> Result<(), FrontendError>;

    async fn respond_query_task_completed(
        &self,
        request: RespondQueryTaskCompletedRequest,
    ) -> Result<(), FrontendError>;

    async fn poll_for_activity_task(
        &self,
        request: PollForActivityTaskRequest,
    ) -> Result<PollForActivityTaskResponse, FrontendError>;

    async fn respond_activity_task_completed(
        &self,
        request: RespondActivityTaskCompletedRequest,
    ) -> Result<(), FrontendError>;

    async fn respond_activity_task_failed(
        &self,
        request: RespondActivityTaskFailedRequest,
    ) -> Result<(), FrontendError>;

    async fn respond_activity_task_canceled(
        &self,
        request: RespondActivityTaskCanceledRequest,
    ) -> Result<(), FrontendError>;

    async fn respond_activity_task_completed_by_id(
        &self,
        request: RespondActivityTaskCompletedByIdRequest,
    ) -> Result<(), FrontendError>;

    async fn respond_activity_task_failed_by_id(
        &self,
        request: RespondActivityTaskFailedByIdRequest,
    ) -> Result<(), FrontendError>;

    async fn respond_activity_task_canceled_by_id(
        &self,
        request: RespondActivityTaskCanceledByIdRequest,
    ) -> Result<(), FrontendError>;
}
