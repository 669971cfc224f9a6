//! # Capstan history core
//!
//! The replicated state-rebuilder at the heart of a durable
//! workflow-execution service. An ordered batch of history events, authored
//! locally or received from a peer cluster, is folded deterministically
//! into a run's mutable state, emitting the timer, transfer, and
//! replication tasks that queue processors execute later.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       StateBuilder                           │
//! │   (folds event slices, drives the TaskGenerator, handles    │
//! │    continue-as-new by building the new run's state)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MutableState                           │
//! │   (execution info, pending maps, decision state machine,    │
//! │    replication arm, staged history, task buffers)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               HistoryStore / ExecutionStore                  │
//! │   (paged branch reads, CAS snapshot writes)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`conflict_resolver`] rebuilds state from the persisted branch when
//! an optimistic write is rejected or replication detects divergence.

pub mod conflict_resolver;
pub mod encoding;
pub mod error;
pub mod event;
pub mod execution;
pub mod mutable_state;
pub mod namespace;
pub mod persistence;
pub mod run_lock;
pub mod state_builder;
pub mod task;

pub use conflict_resolver::{ConflictResolver, ResolverError};
pub use encoding::{DataBlob, EncodingType};
pub use error::StateError;
pub use event::{EventAttributes, EventType, HistoryEvent, TimeoutType, WorkflowExecutionRef};
pub use execution::{
    WorkflowExecution, WorkflowState, WorkflowStatus, EMPTY_EVENT_ID, EMPTY_VERSION,
    FIRST_EVENT_ID,
};
pub use mutable_state::{HistoryBuilder, MutableState};
pub use namespace::{
    ClusterMetadata, InMemoryNamespaceRegistry, NamespaceEntry, NamespaceRegistry,
    StaticClusterMetadata,
};
pub use persistence::{
    ConflictResolveRequest, CurrentWorkflowCas, ExecutionStore, HistoryStore, StoreError,
    WorkflowSnapshot, DEFAULT_HISTORY_PAGE_SIZE,
};
pub use run_lock::{RunLockGuard, RunLockRegistry};
pub use state_builder::StateBuilder;
pub use task::{
    ReplicationTask, ReplicationTaskKind, TaskGenerator, TimerTask, TimerTaskKind, TransferTask,
    TransferTaskKind,
};
