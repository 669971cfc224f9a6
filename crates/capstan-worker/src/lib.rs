//! # Capstan worker protocol
//!
//! The externally visible polling surface of the workflow service: request
//! and response types for the worker-facing front end, the internal
//! matching RPCs, and a [`TaskPoller`] that drives the decision and
//! activity task cycles — fetching every history page before dispatch,
//! answering attached queries, retrying benign duplicate-task errors, and
//! translating handler errors into wire failure records.

pub mod api;
pub mod failure;
pub mod matching;
pub mod poller;

pub use api::{
    Decision, DecisionTaskFailedCause, FrontendClient, FrontendError, History,
    PollForActivityTaskRequest, PollForActivityTaskResponse, PollForDecisionTaskRequest,
    PollForDecisionTaskResponse, QueryResultType, RespondDecisionTaskCompletedRequest,
    RespondDecisionTaskCompletedResponse, StickyExecutionAttributes, WorkflowQuery,
    WorkflowQueryResult,
};
pub use failure::{
    application_failure, ApplicationError, ApplicationFailureInfo, Failure, FailureInfo,
    HandlerError, FAILURE_SOURCE,
};
pub use matching::{MatchingClient, TaskListType, TaskSource};
pub use poller::{
    ActivityOutcome, DecisionPollOptions, DecisionTaskOutcome, PollerError, TaskPoller,
    DEFAULT_POLL_RETRY_COUNT,
};
