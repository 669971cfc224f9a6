//! Matching-service RPC surface
//!
//! The history service hands decision and activity tasks to matching, and
//! task-list partitions forward among themselves. Every request carries the
//! task-list identity, a task-source tag, and the forwarding chain so a
//! partition can tell a fresh task from a forwarded one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use capstan_history::event::WorkflowExecutionRef;

use crate::api::FrontendError;

/// Where a task came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    /// Pushed directly by the history service
    History,

    /// Re-read from the persisted backlog
    DbBacklog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskListType {
    Decision,
    Activity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddDecisionTaskRequest {
    pub namespace_id: String,
    pub execution: WorkflowExecutionRef,
    pub task_list: String,
    pub schedule_id: i64,
    pub schedule_to_start_timeout_seconds: i32,
    pub source: TaskSource,
    /// Task list this request was forwarded from, empty at the origin
    pub forwarded_from: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddActivityTaskRequest {
    pub namespace_id: String,
    pub execution: WorkflowExecutionRef,
    pub task_list: String,
    pub schedule_id: i64,
    pub schedule_to_start_timeout_seconds: i32,
    pub source: TaskSource,
    pub forwarded_from: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryWorkflowRequest {
    pub namespace_id: String,
    pub task_list: String,
    pub query_type: String,
    pub query_args: Option<serde_json::Value>,
    pub forwarded_from: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryWorkflowResponse {
    pub query_result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeTaskListRequest {
    pub namespace_id: String,
    pub task_list: String,
    pub task_list_type: TaskListType,
    pub include_task_list_status: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerInfo {
    pub identity: String,
    pub last_access_timestamp: i64,
    pub rate_per_second: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskListStatus {
    pub backlog_count_hint: i64,
    pub read_level: i64,
    pub ack_level: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescribeTaskListResponse {
    pub pollers: Vec<PollerInfo>,
    pub task_list_status: Option<TaskListStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListTaskListPartitionsRequest {
    pub namespace_id: String,
    pub task_list: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskListPartitionMetadata {
    pub key: String,
    pub owner_host_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListTaskListPartitionsResponse {
    pub decision_task_list_partitions: Vec<TaskListPartitionMetadata>,
    pub activity_task_list_partitions: Vec<TaskListPartitionMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOutstandingPollRequest {
    pub namespace_id: String,
    pub task_list: String,
    pub task_list_type: TaskListType,
    pub poller_id: String,
}

/// Internal matching RPCs
#[async_trait]
pub trait MatchingClient: Send + Sync {
    async fn add_decision_task(&self, request: AddDecisionTaskRequest)
        -> Result<(), FrontendError>;

    async fn add_activity_task(&self, request: AddActivityTaskRequest)
        -> Result<(), FrontendError>;

    async fn query_workflow(
        &self,
        request: QueryWorkflowRequest,
    ) -> Result<QueryWorkflowResponse, FrontendError>;

    async fn describe_task_list(
        &self,
        request: DescribeTaskListRequest,
    ) -> Result<DescribeTaskListResponse, FrontendError>;

    async fn list_task_list_partitions(
        &self,
        request: ListTaskListPartitionsRequest,
    ) -> Result<ListTaskListPartitionsResponse, FrontendError>;

    async fn cancel_outstanding_poll(
        &self,
        request: CancelOutstandingPollRequest,
    ) -> Result<(), FrontendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_source_serialization() {
        let encoded = serde_json::to_string(&TaskSource::DbBacklog).unwrap();
        assert_eq!(encoded, "\"db_backlog\"");
        let decoded: TaskSource = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, TaskSource::DbBacklog);
    }

    #[test]
    fn test_forwarding_chain_round_trip() {
        let request = AddDecisionTaskRequest {
            namespace_id: "ns".to_string(),
            execution: WorkflowExecutionRef {
                workflow_id: "wf".to_string(),
                run_id: "run".to_string(),
            },
            task_list: "tl-partition-3".to_string(),
            schedule_id: 2,
            schedule_to_start_timeout_seconds: 10,
            source: TaskSource::History,
            forwarded_from: "tl-partition-1".to_string(),
        };

        let encoded = serde_json::to_vec(&request).unwrap();
        let decoded: AddDecisionTaskRequest = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(request, decoded);
    }
}
