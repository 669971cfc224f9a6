//! Workflow run identity and lifecycle state

use serde::{Deserialize, Serialize};

/// First valid event id in any run
pub const FIRST_EVENT_ID: i64 = 1;

/// Sentinel for an unset event id
pub const EMPTY_EVENT_ID: i64 = -23;

/// Sentinel for an unset failover version
pub const EMPTY_VERSION: i64 = -24;

/// Identity of a single workflow run
///
/// A continue-as-new produces a fresh run id under the same workflow id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub namespace_id: String,
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowExecution {
    pub fn new(
        namespace_id: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Internal lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Run record exists but no event has been applied yet
    Created,

    /// Run is accepting events
    Running,

    /// Run reached a close event; no further events are applicable
    Completed,
}

/// Externally visible status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Canceled,
    Terminated,
    ContinuedAsNew,
    TimedOut,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
            Self::Terminated => write!(f, "terminated"),
            Self::ContinuedAsNew => write!(f, "continued_as_new"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}
