//! The polling loop a worker drives against the front end
//!
//! A worker advances workflows by polling for decision tasks, running its
//! decision handler over the fetched history, and responding with the
//! resulting commands; activity tasks follow the same poll/dispatch/respond
//! cycle. Benign duplicate-task errors are retried transparently up to a
//! bounded attempt count.

use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use capstan_history::event::{EventAttributes, HistoryEvent, WorkflowExecutionRef};

use crate::api::{
    ActivityTaskAddress, Decision, DecisionTaskFailedCause, FrontendClient, FrontendError,
    GetWorkflowExecutionHistoryRequest, PollForActivityTaskRequest, PollForActivityTaskResponse,
    PollForDecisionTaskRequest, PollForDecisionTaskResponse, QueryResultType,
    RespondActivityTaskCanceledByIdRequest, RespondActivityTaskCanceledRequest,
    RespondActivityTaskCompletedByIdRequest, RespondActivityTaskCompletedRequest,
    RespondActivityTaskFailedByIdRequest, RespondActivityTaskFailedRequest,
    RespondDecisionTaskCompletedRequest, RespondDecisionTaskCompletedResponse,
    RespondDecisionTaskFailedRequest, RespondQueryTaskCompletedRequest,
    StickyExecutionAttributes, WorkflowQueryResult,
};
use crate::failure::{application_failure, HandlerError};

/// Bound on transparent duplicate-task retries
pub const DEFAULT_POLL_RETRY_COUNT: usize = 5;

/// Produces decisions from a fetched history slice
pub type DecisionHandler = Arc<
    dyn Fn(&WorkflowExecutionRef, &str, i64, i64, &[HistoryEvent]) -> Result<Vec<Decision>, HandlerError>
        + Send
        + Sync,
>;

/// Handles one activity task
pub type ActivityHandler = Arc<dyn Fn(&PollForActivityTaskResponse) -> ActivityOutcome + Send + Sync>;

/// Answers an attached query
pub type QueryHandler =
    Arc<dyn Fn(&PollForDecisionTaskResponse) -> Result<serde_json::Value, HandlerError> + Send + Sync>;

/// Exactly one response per activity task
#[derive(Debug, Clone)]
pub enum ActivityOutcome {
    Completed(Option<serde_json::Value>),
    Canceled(Option<serde_json::Value>),
    Failed(HandlerError),
}

/// Errors from a poll cycle
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("frontend error: {0}")]
    Frontend(#[from] FrontendError),

    /// Retry budget exhausted without receiving a task
    #[error("no tasks received after {0} attempts")]
    NoTasks(usize),

    /// A non-query, non-sticky response must carry history
    #[error("poll response carried no history")]
    MissingHistory,

    #[error("poll response carried an empty history")]
    EmptyHistory,

    /// Sticky query responses must carry no events and no next page token
    #[error("history is not empty for sticky query")]
    StickyQueryHistoryNotEmpty,

    #[error("decision schedule attempt mismatch: expected {expected}, got {actual}")]
    AttemptMismatch { expected: i64, actual: i64 },
}

/// Options for one decision-task cycle
#[derive(Clone)]
pub struct DecisionPollOptions {
    /// Poll the sticky task list instead of the global one
    pub poll_sticky: bool,

    /// Offer sticky attributes when responding
    pub respond_sticky: bool,

    /// When > 0, assert the fetched history's latest scheduled decision
    /// carries this attempt
    pub decision_attempt: i64,

    pub retry_count: usize,

    /// Ask the server to chain the next decision task into the response
    pub force_create_new_decision: bool,

    /// Result to attach for every query key the response carries
    pub query_result: Option<WorkflowQueryResult>,

    /// Poll and discard without responding
    pub drop_task: bool,
}

impl Default for DecisionPollOptions {
    fn default() -> Self {
        Self {
            poll_sticky: false,
            respond_sticky: false,
            decision_attempt: 0,
            retry_count: DEFAULT_POLL_RETRY_COUNT,
            force_create_new_decision: false,
            query_result: None,
            drop_task: false,
        }
    }
}

/// What a decision cycle produced
#[derive(Debug, Default)]
pub struct DecisionTaskOutcome {
    /// The poll carried a query instead of a decision task
    pub is_query_task: bool,

    /// The handler failed and a DecisionTaskFailed response was posted
    pub handler_failed: bool,

    /// Chained next decision task, when one was requested
    pub new_task: Option<RespondDecisionTaskCompletedResponse>,
}

/// Drives decision and activity task cycles against a front end
pub struct TaskPoller<C: FrontendClient> {
    client: Arc<C>,
    namespace: String,
    task_list: String,
    sticky_task_list: String,
    sticky_schedule_to_start_timeout_seconds: i32,
    identity: String,
    decision_handler: DecisionHandler,
    activity_handler: ActivityHandler,
    query_handler: QueryHandler,
}

impl<C: FrontendClient> TaskPoller<C> {
    pub fn new(
        client: Arc<C>,
        namespace: impl Into<String>,
        task_list: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            task_list: task_list.into(),
            sticky_task_list: String::new(),
            sticky_schedule_to_start_timeout_seconds: 0,
            identity: identity.into(),
            decision_handler: Arc::new(|_, _, _, _, _| Ok(vec![])),
            activity_handler: Arc::new(|_| ActivityOutcome::Completed(None)),
            query_handler: Arc::new(|_| Err(HandlerError::message("no query handler registered"))),
        }
    }

    pub fn with_sticky_task_list(
        mut self,
        task_list: impl Into<String>,
        schedule_to_start_timeout_seconds: i32,
    ) -> Self {
        self.sticky_task_list = task_list.into();
        self.sticky_schedule_to_start_timeout_seconds = schedule_to_start_timeout_seconds;
        self
    }

    pub fn with_decision_handler(mut self, handler: DecisionHandler) -> Self {
        self.decision_handler = handler;
        self
    }

    pub fn with_activity_handler(mut self, handler: ActivityHandler) -> Self {
        self.activity_handler = handler;
        self
    }

    pub fn with_query_handler(mut self, handler: QueryHandler) -> Self {
        self.query_handler = handler;
        self
    }

    /// One decision cycle with default options
    pub async fn poll_and_process_decision_task(
        &self,
    ) -> Result<DecisionTaskOutcome, PollerError> {
        self.poll_and_process_decision_task_with_options(DecisionPollOptions::default())
            .await
    }

    /// One decision cycle polling and responding sticky
    pub async fn poll_and_process_decision_task_with_sticky(
        &self,
    ) -> Result<DecisionTaskOutcome, PollerError> {
        self.poll_and_process_decision_task_with_options(DecisionPollOptions {
            poll_sticky: true,
            respond_sticky: true,
            ..Default::default()
        })
        .await
    }

    /// One decision cycle
    #[instrument(skip(self, options), fields(task_list = %self.task_list))]
    pub async fn poll_and_process_decision_task_with_options(
        &self,
        options: DecisionPollOptions,
    ) -> Result<DecisionTaskOutcome, PollerError> {
        for _attempt in 0..options.retry_count {
            let task_list = if options.poll_sticky {
                &self.sticky_task_list
            } else {
                &self.task_list
            };

            let response = match self
                .client
                .poll_for_decision_task(PollForDecisionTaskRequest {
                    namespace: self.namespace.clone(),
                    task_list: task_list.clone(),
                    identity: self.identity.clone(),
                })
                .await
            {
                Err(FrontendError::DuplicateTask) => {
                    info!("duplicate decision task, polling again");
                    continue;
                }
                Err(err) => return Err(err.into()),
                Ok(response) => response,
            };

            if response.task_token.is_empty() {
                info!("empty decision task, polling again");
                continue;
            }

            let events = self.fetch_decision_history(&response, &options).await?;

            if options.drop_task {
                info!("dropping decision task");
                return Ok(DecisionTaskOutcome::default());
            }

            // an attached query ends the cycle without decisions
            if response.query.is_some() {
                return self.answer_query(&response).await;
            }

            if options.decision_attempt > 0 {
                self.assert_schedule_attempt(&events, options.decision_attempt)?;
            }

            let decisions = match (self.decision_handler)(
                &response.workflow_execution,
                &response.workflow_type,
                response.previous_started_event_id,
                response.started_event_id,
                &events,
            ) {
                Ok(decisions) => decisions,
                Err(err) => {
                    error!(error = %err, "decision handler failed, failing decision task");
                    self.client
                        .respond_decision_task_failed(RespondDecisionTaskFailedRequest {
                            task_token: response.task_token.clone(),
                            cause: DecisionTaskFailedCause::WorkflowWorkerUnhandledFailure,
                            failure: application_failure(&err, false, None),
                            identity: self.identity.clone(),
                        })
                        .await?;
                    return Ok(DecisionTaskOutcome {
                        handler_failed: true,
                        ..Default::default()
                    });
                }
            };

            debug!(count = decisions.len(), "completing decision task");

            let sticky_attributes = if options.respond_sticky {
                Some(StickyExecutionAttributes {
                    worker_task_list: self.sticky_task_list.clone(),
                    schedule_to_start_timeout_seconds: self
                        .sticky_schedule_to_start_timeout_seconds,
                })
            } else {
                None
            };

            let query_results = response
                .queries
                .keys()
                .filter_map(|key| {
                    options
                        .query_result
                        .clone()
                        .map(|result| (key.clone(), result))
                })
                .collect();

            let completed = self
                .client
                .respond_decision_task_completed(RespondDecisionTaskCompletedRequest {
                    task_token: response.task_token.clone(),
                    identity: self.identity.clone(),
                    decisions,
                    sticky_attributes,
                    return_new_decision_task: options.force_create_new_decision,
                    force_create_new_decision_task: options.force_create_new_decision,
                    query_results,
                })
                .await?;

            return Ok(DecisionTaskOutcome {
                new_task: Some(completed),
                ..Default::default()
            });
        }

        Err(PollerError::NoTasks(options.retry_count))
    }

    /// Respond to a decision task the caller already holds, sticky and
    /// chaining the next decision
    pub async fn handle_partial_decision(
        &self,
        response: &PollForDecisionTaskResponse,
    ) -> Result<Option<RespondDecisionTaskCompletedResponse>, PollerError> {
        if response.task_token.is_empty() {
            info!("empty decision task, nothing to respond to");
            return Ok(None);
        }

        let history = response.history.as_ref().ok_or(PollerError::MissingHistory)?;
        if history.events.is_empty() {
            return Err(PollerError::EmptyHistory);
        }

        let decisions = match (self.decision_handler)(
            &response.workflow_execution,
            &response.workflow_type,
            response.previous_started_event_id,
            response.started_event_id,
            &history.events,
        ) {
            Ok(decisions) => decisions,
            Err(err) => {
                error!(error = %err, "decision handler failed, failing decision task");
                self.client
                    .respond_decision_task_failed(RespondDecisionTaskFailedRequest {
                        task_token: response.task_token.clone(),
                        cause: DecisionTaskFailedCause::WorkflowWorkerUnhandledFailure,
                        failure: application_failure(&err, false, None),
                        identity: self.identity.clone(),
                    })
                    .await?;
                return Ok(None);
            }
        };

        let completed = self
            .client
            .respond_decision_task_completed(RespondDecisionTaskCompletedRequest {
                task_token: response.task_token.clone(),
                identity: self.identity.clone(),
                decisions,
                sticky_attributes: Some(StickyExecutionAttributes {
                    worker_task_list: self.sticky_task_list.clone(),
                    schedule_to_start_timeout_seconds: self
                        .sticky_schedule_to_start_timeout_seconds,
                }),
                return_new_decision_task: true,
                force_create_new_decision_task: true,
                query_results: Default::default(),
            })
            .await?;

        Ok(Some(completed))
    }

    /// One activity cycle responding by task token
    #[instrument(skip(self), fields(task_list = %self.task_list))]
    pub async fn poll_and_process_activity_task(
        &self,
        drop_task: bool,
    ) -> Result<(), PollerError> {
        for _attempt in 0..DEFAULT_POLL_RETRY_COUNT {
            let response = match self.poll_activity().await {
                Err(FrontendError::DuplicateTask) => {
                    info!("duplicate activity task, polling again");
                    continue;
                }
                Err(err) => return Err(err.into()),
                Ok(response) => response,
            };

            if response.task_token.is_empty() {
                info!("empty activity task");
                return Ok(());
            }
            if drop_task {
                info!("dropping activity task");
                return Ok(());
            }

            match (self.activity_handler)(&response) {
                ActivityOutcome::Canceled(details) => {
                    info!("responding activity task canceled");
                    self.client
                        .respond_activity_task_canceled(RespondActivityTaskCanceledRequest {
                            task_token: response.task_token.clone(),
                            details,
                            identity: self.identity.clone(),
                        })
                        .await?;
                }
                ActivityOutcome::Failed(err) => {
                    self.client
                        .respond_activity_task_failed(RespondActivityTaskFailedRequest {
                            task_token: response.task_token.clone(),
                            failure: application_failure(&err, false, None),
                            identity: self.identity.clone(),
                        })
                        .await?;
                }
                ActivityOutcome::Completed(result) => {
                    self.client
                        .respond_activity_task_completed(RespondActivityTaskCompletedRequest {
                            task_token: response.task_token.clone(),
                            identity: self.identity.clone(),
                            result,
                        })
                        .await?;
                }
            }
            return Ok(());
        }

        Err(PollerError::NoTasks(DEFAULT_POLL_RETRY_COUNT))
    }

    /// One activity cycle responding by (workflow id, run id, activity id)
    #[instrument(skip(self), fields(task_list = %self.task_list))]
    pub async fn poll_and_process_activity_task_by_id(
        &self,
        drop_task: bool,
    ) -> Result<(), PollerError> {
        for _attempt in 0..DEFAULT_POLL_RETRY_COUNT {
            let response = match self.poll_activity().await {
                Err(FrontendError::DuplicateTask) => {
                    info!("duplicate activity task, polling again");
                    continue;
                }
                Err(err) => return Err(err.into()),
                Ok(response) => response,
            };

            if response.task_token.is_empty() {
                info!("empty activity task");
                return Ok(());
            }
            if response.activity_id.is_empty() {
                info!("empty activity id");
                return Ok(());
            }
            if drop_task {
                info!("dropping activity task");
                return Ok(());
            }

            let address = ActivityTaskAddress {
                namespace: self.namespace.clone(),
                workflow_id: response.workflow_execution.workflow_id.clone(),
                run_id: response.workflow_execution.run_id.clone(),
                activity_id: response.activity_id.clone(),
            };

            match (self.activity_handler)(&response) {
                ActivityOutcome::Canceled(details) => {
                    info!("responding activity task canceled by id");
                    self.client
                        .respond_activity_task_canceled_by_id(
                            RespondActivityTaskCanceledByIdRequest {
                                address,
                                details,
                                identity: self.identity.clone(),
                            },
                        )
                        .await?;
                }
                ActivityOutcome::Failed(err) => {
                    self.client
                        .respond_activity_task_failed_by_id(RespondActivityTaskFailedByIdRequest {
                            address,
                            failure: application_failure(&err, false, None),
                            identity: self.identity.clone(),
                        })
                        .await?;
                }
                ActivityOutcome::Completed(result) => {
                    self.client
                        .respond_activity_task_completed_by_id(
                            RespondActivityTaskCompletedByIdRequest {
                                address,
                                identity: self.identity.clone(),
                                result,
                            },
                        )
                        .await?;
                }
            }
            return Ok(());
        }

        Err(PollerError::NoTasks(DEFAULT_POLL_RETRY_COUNT))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn poll_activity(&self) -> Result<PollForActivityTaskResponse, FrontendError> {
        self.client
            .poll_for_activity_task(PollForActivityTaskRequest {
                namespace: self.namespace.clone(),
                task_list: self.task_list.clone(),
                identity: self.identity.clone(),
            })
            .await
    }

    /// Fetch all history pages before dispatch, or verify a sticky query
    /// carries none
    async fn fetch_decision_history(
        &self,
        response: &PollForDecisionTaskResponse,
        options: &DecisionPollOptions,
    ) -> Result<Vec<HistoryEvent>, PollerError> {
        if response.query.is_none() || !options.poll_sticky {
            // not a query task, or a non-sticky query: events are required
            let history = response.history.as_ref().ok_or(PollerError::MissingHistory)?;
            if history.events.is_empty() {
                return Err(PollerError::EmptyHistory);
            }

            let mut events = history.events.clone();
            let mut next_page_token = response.next_page_token.clone();
            while let Some(token) = next_page_token {
                let page = self
                    .client
                    .get_workflow_execution_history(GetWorkflowExecutionHistoryRequest {
                        namespace: self.namespace.clone(),
                        execution: response.workflow_execution.clone(),
                        next_page_token: Some(token),
                    })
                    .await?;
                events.extend(page.history.events);
                next_page_token = page.next_page_token;
            }
            Ok(events)
        } else {
            // sticky query: the worker already holds the state machine, the
            // server must not send events
            let empty = response
                .history
                .as_ref()
                .map(|history| history.events.is_empty())
                .unwrap_or(true)
                && response.next_page_token.is_none();
            if !empty {
                return Err(PollerError::StickyQueryHistoryNotEmpty);
            }
            Ok(vec![])
        }
    }

    async fn answer_query(
        &self,
        response: &PollForDecisionTaskResponse,
    ) -> Result<DecisionTaskOutcome, PollerError> {
        let request = match (self.query_handler)(response) {
            Ok(result) => RespondQueryTaskCompletedRequest {
                task_token: response.task_token.clone(),
                completed_type: QueryResultType::Answered,
                query_result: Some(result),
                error_message: String::new(),
            },
            Err(err) => RespondQueryTaskCompletedRequest {
                task_token: response.task_token.clone(),
                completed_type: QueryResultType::Failed,
                query_result: None,
                error_message: err.to_string(),
            },
        };

        self.client.respond_query_task_completed(request).await?;
        Ok(DecisionTaskOutcome {
            is_query_task: true,
            ..Default::default()
        })
    }

    fn assert_schedule_attempt(
        &self,
        events: &[HistoryEvent],
        expected: i64,
    ) -> Result<(), PollerError> {
        let last_scheduled = events.iter().rev().find_map(|event| match &event.attributes {
            EventAttributes::DecisionTaskScheduled(attributes) => Some(attributes),
            _ => None,
        });
        if let Some(attributes) = last_scheduled {
            if attributes.attempt != expected {
                return Err(PollerError::AttemptMismatch {
                    expected,
                    actual: attributes.attempt,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use capstan_history::event::{
        DecisionTaskScheduledAttributes, DecisionTaskStartedAttributes,
        WorkflowExecutionStartedAttributes,
    };

    use crate::api::{History, WorkflowQuery};
    use crate::failure::FailureInfo;

    #[derive(Default)]
    struct MockFrontend {
        decision_polls: Mutex<VecDeque<Result<PollForDecisionTaskResponse, FrontendError>>>,
        history_pages: Mutex<VecDeque<GetWorkflowExecutionHistoryResponse>>,
        activity_polls: Mutex<VecDeque<Result<PollForActivityTaskResponse, FrontendError>>>,
        completed: Mutex<Vec<RespondDecisionTaskCompletedRequest>>,
        failed: Mutex<Vec<RespondDecisionTaskFailedRequest>>,
        query_completed: Mutex<Vec<RespondQueryTaskCompletedRequest>>,
        activity_completed: Mutex<Vec<RespondActivityTaskCompletedRequest>>,
        activity_failed_by_id: Mutex<Vec<RespondActivityTaskFailedByIdRequest>>,
    }

    use crate::api::GetWorkflowExecutionHistoryResponse;

    #[async_trait::async_trait]
    impl FrontendClient for MockFrontend {
        async fn poll_for_decision_task(
            &self,
            _request: PollForDecisionTaskRequest,
        ) -> Result<PollForDecisionTaskResponse, FrontendError> {
            self.decision_polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FrontendError::Internal("no scripted poll".to_string())))
        }

        async fn get_workflow_execution_history(
            &self,
            _request: GetWorkflowExecutionHistoryRequest,
        ) -> Result<GetWorkflowExecutionHistoryResponse, FrontendError> {
            self.history_pages
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| FrontendError::Internal("no scripted history page".to_string()))
        }

        async fn respond_decision_task_completed(
            &self,
            request: RespondDecisionTaskCompletedRequest,
        ) -> Result<RespondDecisionTaskCompletedResponse, FrontendError> {
            self.completed.lock().unwrap().push(request);
            Ok(RespondDecisionTaskCompletedResponse::default())
        }

        async fn respond_decision_task_failed(
            &self,
            request: RespondDecisionTaskFailedRequest,
        ) -> Result<(), FrontendError> {
            self.failed.lock().unwrap().push(request);
            Ok(())
        }

        async fn respond_query_task_completed(
            &self,
            request: RespondQueryTaskCompletedRequest,
        ) -> Result<(), FrontendError> {
            self.query_completed.lock().unwrap().push(request);
            Ok(())
        }

        async fn poll_for_activity_task(
            &self,
            _request: PollForActivityTaskRequest,
        ) -> Result<PollForActivityTaskResponse, FrontendError> {
            self.activity_polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FrontendError::Internal("no scripted poll".to_string())))
        }

        async fn respond_activity_task_completed(
            &self,
            request: RespondActivityTaskCompletedRequest,
        ) -> Result<(), FrontendError> {
            self.activity_completed.lock().unwrap().push(request);
            Ok(())
        }

        async fn respond_activity_task_failed(
            &self,
            _request: RespondActivityTaskFailedRequest,
        ) -> Result<(), FrontendError> {
            Ok(())
        }

        async fn respond_activity_task_canceled(
            &self,
            _request: RespondActivityTaskCanceledRequest,
        ) -> Result<(), FrontendError> {
            Ok(())
        }

        async fn respond_activity_task_completed_by_id(
            &self,
            _request: RespondActivityTaskCompletedByIdRequest,
        ) -> Result<(), FrontendError> {
            Ok(())
        }

        async fn respond_activity_task_failed_by_id(
            &self,
            request: RespondActivityTaskFailedByIdRequest,
        ) -> Result<(), FrontendError> {
            self.activity_failed_by_id.lock().unwrap().push(request);
            Ok(())
        }

        async fn respond_activity_task_canceled_by_id(
            &self,
            _request: RespondActivityTaskCanceledByIdRequest,
        ) -> Result<(), FrontendError> {
            Ok(())
        }
    }

    fn event(event_id: i64, attributes: EventAttributes) -> HistoryEvent {
        HistoryEvent {
            event_id,
            version: 1,
            timestamp: event_id * 1_000,
            task_id: 0,
            attributes,
        }
    }

    fn decision_history(attempt: i64) -> Vec<HistoryEvent> {
        vec![
            event(
                1,
                EventAttributes::WorkflowExecutionStarted(
                    WorkflowExecutionStartedAttributes::default(),
                ),
            ),
            event(
                2,
                EventAttributes::DecisionTaskScheduled(DecisionTaskScheduledAttributes {
                    task_list: "tl".to_string(),
                    start_to_close_timeout_seconds: 10,
                    attempt,
                }),
            ),
            event(
                3,
                EventAttributes::DecisionTaskStarted(DecisionTaskStartedAttributes {
                    scheduled_event_id: 2,
                    request_id: "r".to_string(),
                    identity: "w".to_string(),
                }),
            ),
        ]
    }

    fn decision_task(events: Vec<HistoryEvent>) -> PollForDecisionTaskResponse {
        PollForDecisionTaskResponse {
            task_token: b"token".to_vec(),
            workflow_execution: WorkflowExecutionRef {
                workflow_id: "wf".to_string(),
                run_id: "run".to_string(),
            },
            workflow_type: "wt".to_string(),
            previous_started_event_id: 0,
            started_event_id: 3,
            history: Some(History { events }),
            ..Default::default()
        }
    }

    fn poller(client: Arc<MockFrontend>) -> TaskPoller<MockFrontend> {
        TaskPoller::new(client, "ns", "tl", "worker-identity")
            .with_sticky_task_list("tl-sticky", 5)
    }

    #[tokio::test]
    async fn test_duplicate_task_retried_transparently() {
        let client = Arc::new(MockFrontend::default());
        {
            let mut polls = client.decision_polls.lock().unwrap();
            polls.push_back(Err(FrontendError::DuplicateTask));
            polls.push_back(Err(FrontendError::DuplicateTask));
            polls.push_back(Ok(decision_task(decision_history(0))));
        }

        let outcome = poller(client.clone())
            .poll_and_process_decision_task()
            .await
            .unwrap();

        assert!(!outcome.is_query_task);
        assert!(!outcome.handler_failed);
        assert_eq!(client.completed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let client = Arc::new(MockFrontend::default());
        {
            let mut polls = client.decision_polls.lock().unwrap();
            for _ in 0..DEFAULT_POLL_RETRY_COUNT {
                polls.push_back(Err(FrontendError::DuplicateTask));
            }
        }

        let err = poller(client)
            .poll_and_process_decision_task()
            .await
            .unwrap_err();
        assert!(matches!(err, PollerError::NoTasks(5)));
    }

    #[tokio::test]
    async fn test_all_pages_fetched_before_dispatch() {
        let client = Arc::new(MockFrontend::default());
        let mut first_page = decision_task(decision_history(0));
        first_page.next_page_token = Some(b"page-2".to_vec());
        {
            client
                .decision_polls
                .lock()
                .unwrap()
                .push_back(Ok(first_page));
            client.history_pages.lock().unwrap().push_back(
                GetWorkflowExecutionHistoryResponse {
                    history: History {
                        events: vec![event(
                            4,
                            EventAttributes::DecisionTaskScheduled(
                                DecisionTaskScheduledAttributes {
                                    task_list: "tl".to_string(),
                                    start_to_close_timeout_seconds: 10,
                                    attempt: 0,
                                },
                            ),
                        )],
                    },
                    next_page_token: None,
                },
            );
        }

        let seen = Arc::new(Mutex::new(0usize));
        let seen_in_handler = seen.clone();
        let poller = poller(client.clone()).with_decision_handler(Arc::new(
            move |_, _, _, _, events| {
                *seen_in_handler.lock().unwrap() = events.len();
                Ok(vec![])
            },
        ));

        poller.poll_and_process_decision_task().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_missing_history_is_fatal() {
        let client = Arc::new(MockFrontend::default());
        let mut task = decision_task(vec![]);
        task.history = None;
        client.decision_polls.lock().unwrap().push_back(Ok(task));

        let err = poller(client)
            .poll_and_process_decision_task()
            .await
            .unwrap_err();
        assert!(matches!(err, PollerError::MissingHistory));
    }

    #[tokio::test]
    async fn test_sticky_query_with_history_is_fatal() {
        let client = Arc::new(MockFrontend::default());
        let mut task = decision_task(decision_history(0));
        task.query = Some(WorkflowQuery {
            query_type: "state".to_string(),
            query_args: None,
        });
        client.decision_polls.lock().unwrap().push_back(Ok(task));

        let err = poller(client)
            .poll_and_process_decision_task_with_options(DecisionPollOptions {
                poll_sticky: true,
                respond_sticky: true,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PollerError::StickyQueryHistoryNotEmpty));
    }

    #[tokio::test]
    async fn test_sticky_query_answered() {
        let client = Arc::new(MockFrontend::default());
        let mut task = decision_task(vec![]);
        task.history = Some(History { events: vec![] });
        task.query = Some(WorkflowQuery {
            query_type: "state".to_string(),
            query_args: None,
        });
        client.decision_polls.lock().unwrap().push_back(Ok(task));

        let poller = poller(client.clone())
            .with_query_handler(Arc::new(|_| Ok(serde_json::json!({"state": "running"}))));

        let outcome = poller
            .poll_and_process_decision_task_with_sticky()
            .await
            .unwrap();

        assert!(outcome.is_query_task);
        let responses = client.query_completed.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].completed_type, QueryResultType::Answered);
    }

    #[tokio::test]
    async fn test_handler_failure_posts_decision_task_failed() {
        let client = Arc::new(MockFrontend::default());
        client
            .decision_polls
            .lock()
            .unwrap()
            .push_back(Ok(decision_task(decision_history(0))));

        let poller = poller(client.clone()).with_decision_handler(Arc::new(|_, _, _, _, _| {
            Err(HandlerError::message("decision logic exploded"))
        }));

        let outcome = poller.poll_and_process_decision_task().await.unwrap();
        assert!(outcome.handler_failed);

        let failed = client.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].cause,
            DecisionTaskFailedCause::WorkflowWorkerUnhandledFailure
        );
        assert_eq!(failed[0].failure.message, "decision logic exploded");
        let FailureInfo::Application(info) = &failed[0].failure.info;
        assert!(!info.non_retryable);
    }

    #[tokio::test]
    async fn test_attempt_assertion() {
        let client = Arc::new(MockFrontend::default());
        client
            .decision_polls
            .lock()
            .unwrap()
            .push_back(Ok(decision_task(decision_history(2))));

        let err = poller(client)
            .poll_and_process_decision_task_with_options(DecisionPollOptions {
                decision_attempt: 3,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PollerError::AttemptMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_sticky_respond_carries_sticky_attributes() {
        let client = Arc::new(MockFrontend::default());
        client
            .decision_polls
            .lock()
            .unwrap()
            .push_back(Ok(decision_task(decision_history(0))));

        poller(client.clone())
            .poll_and_process_decision_task_with_options(DecisionPollOptions {
                respond_sticky: true,
                force_create_new_decision: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let completed = client.completed.lock().unwrap();
        let request = &completed[0];
        let sticky = request.sticky_attributes.as_ref().unwrap();
        assert_eq!(sticky.worker_task_list, "tl-sticky");
        assert_eq!(sticky.schedule_to_start_timeout_seconds, 5);
        assert!(request.return_new_decision_task);
        assert!(request.force_create_new_decision_task);
    }

    #[tokio::test]
    async fn test_activity_cycle_completes_by_token() {
        let client = Arc::new(MockFrontend::default());
        {
            let mut polls = client.activity_polls.lock().unwrap();
            polls.push_back(Err(FrontendError::DuplicateTask));
            polls.push_back(Ok(PollForActivityTaskResponse {
                task_token: b"token".to_vec(),
                activity_id: "act-1".to_string(),
                ..Default::default()
            }));
        }

        let poller = poller(client.clone()).with_activity_handler(Arc::new(|_| {
            ActivityOutcome::Completed(Some(serde_json::json!({"ok": true})))
        }));

        poller.poll_and_process_activity_task(false).await.unwrap();

        let completed = client.activity_completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(
            completed[0].result,
            Some(serde_json::json!({"ok": true}))
        );
    }

    #[tokio::test]
    async fn test_activity_failure_by_id_addresses_by_run() {
        let client = Arc::new(MockFrontend::default());
        client.activity_polls.lock().unwrap().push_back(Ok(
            PollForActivityTaskResponse {
                task_token: b"token".to_vec(),
                workflow_execution: WorkflowExecutionRef {
                    workflow_id: "wf".to_string(),
                    run_id: "run".to_string(),
                },
                activity_id: "act-1".to_string(),
                ..Default::default()
            },
        ));

        let poller = poller(client.clone()).with_activity_handler(Arc::new(|_| {
            ActivityOutcome::Failed(HandlerError::message("charge declined"))
        }));

        poller
            .poll_and_process_activity_task_by_id(false)
            .await
            .unwrap();

        let failed = client.activity_failed_by_id.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].address.workflow_id, "wf");
        assert_eq!(failed[0].address.run_id, "run");
        assert_eq!(failed[0].address.activity_id, "act-1");
        assert_eq!(failed[0].failure.message, "charge declined");
    }
}
