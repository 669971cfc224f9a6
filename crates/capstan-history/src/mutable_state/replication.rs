//! Cross-cluster replication bookkeeping
//!
//! A run carries exactly one of two replication schemes: the legacy
//! [`ReplicationState`] (per-cluster last-write watermarks) or
//! [`VersionHistories`] (branches of (event id, version) items proving
//! causal lineage). The sum type makes a both-populated record
//! unrepresentable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Per-cluster watermark in the legacy scheme
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationInfo {
    pub version: i64,
    pub last_event_id: i64,
}

/// Legacy replication bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationState {
    pub current_version: i64,
    pub start_version: i64,
    pub last_write_version: i64,
    pub last_write_event_id: i64,
    pub last_replication_info: HashMap<String, ReplicationInfo>,
}

impl ReplicationState {
    pub fn new(version: i64) -> Self {
        Self {
            current_version: version,
            start_version: version,
            last_write_version: version,
            last_write_event_id: 0,
            last_replication_info: HashMap::new(),
        }
    }

    /// Bump the current version; versions only move forward
    pub fn update_version(&mut self, version: i64) {
        if version > self.current_version {
            self.current_version = version;
        }
    }

    /// Record the last event of the slice being applied
    ///
    /// The whole slice is applied atomically, so the watermark always points
    /// at the slice's final event regardless of which event is in flight.
    pub fn update_last_event(&mut self, last_write_version: i64, last_event_id: i64) {
        self.last_write_version = last_write_version;
        self.last_write_event_id = last_event_id;
    }

    pub fn record_cluster(&mut self, cluster: impl Into<String>, version: i64, last_event_id: i64) {
        self.last_replication_info.insert(
            cluster.into(),
            ReplicationInfo {
                version,
                last_event_id,
            },
        );
    }
}

/// One (event id, version) point on a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryItem {
    pub event_id: i64,
    pub version: i64,
}

impl VersionHistoryItem {
    pub fn new(event_id: i64, version: i64) -> Self {
        Self { event_id, version }
    }
}

/// A single branch: ordered items with strictly increasing event ids and
/// non-decreasing versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistory {
    pub branch_token: Vec<u8>,
    pub items: Vec<VersionHistoryItem>,
}

impl VersionHistory {
    pub fn new(branch_token: Vec<u8>) -> Self {
        Self {
            branch_token,
            items: vec![],
        }
    }

    pub fn last_item(&self) -> Option<VersionHistoryItem> {
        self.items.last().copied()
    }

    /// Extend the tip with a new item, or advance the tip in place when the
    /// version is unchanged
    pub fn add_or_update_item(&mut self, item: VersionHistoryItem) -> Result<(), StateError> {
        let Some(last) = self.items.last_mut() else {
            self.items.push(item);
            return Ok(());
        };

        if item.version < last.version {
            return Err(StateError::InvalidArgument(format!(
                "version history item version moved backwards: {} < {}",
                item.version, last.version
            )));
        }
        if item.event_id <= last.event_id && item.version == last.version {
            // idempotent re-apply of an already recorded event
            if item.event_id == last.event_id {
                return Ok(());
            }
            return Err(StateError::InvalidArgument(format!(
                "version history item event id moved backwards: {} <= {}",
                item.event_id, last.event_id
            )));
        }

        if item.version == last.version {
            last.event_id = item.event_id;
        } else {
            self.items.push(item);
        }
        Ok(())
    }
}

/// All branches of a run, exactly one marked current
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistories {
    pub current_index: usize,
    pub histories: Vec<VersionHistory>,
}

impl VersionHistories {
    pub fn new(initial: VersionHistory) -> Self {
        Self {
            current_index: 0,
            histories: vec![initial],
        }
    }

    pub fn current(&self) -> Result<&VersionHistory, StateError> {
        self.histories
            .get(self.current_index)
            .ok_or_else(|| StateError::Internal("version histories current index out of range".to_string()))
    }

    pub fn current_mut(&mut self) -> Result<&mut VersionHistory, StateError> {
        self.histories
            .get_mut(self.current_index)
            .ok_or_else(|| StateError::Internal("version histories current index out of range".to_string()))
    }
}

/// The single active replication arm of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum Replication {
    Legacy(ReplicationState),
    VersionHistories(VersionHistories),
}

impl Replication {
    pub fn as_legacy(&self) -> Option<&ReplicationState> {
        match self {
            Self::Legacy(state) => Some(state),
            Self::VersionHistories(_) => None,
        }
    }

    pub fn as_legacy_mut(&mut self) -> Option<&mut ReplicationState> {
        match self {
            Self::Legacy(state) => Some(state),
            Self::VersionHistories(_) => None,
        }
    }

    pub fn as_version_histories(&self) -> Option<&VersionHistories> {
        match self {
            Self::Legacy(_) => None,
            Self::VersionHistories(histories) => Some(histories),
        }
    }

    pub fn as_version_histories_mut(&mut self) -> Option<&mut VersionHistories> {
        match self {
            Self::Legacy(_) => None,
            Self::VersionHistories(histories) => Some(histories),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_or_update_item() {
        let mut history = VersionHistory::new(b"branch".to_vec());

        history
            .add_or_update_item(VersionHistoryItem::new(1, 10))
            .unwrap();
        history
            .add_or_update_item(VersionHistoryItem::new(2, 10))
            .unwrap();
        assert_eq!(history.items.len(), 1);
        assert_eq!(history.last_item().unwrap(), VersionHistoryItem::new(2, 10));

        history
            .add_or_update_item(VersionHistoryItem::new(3, 12))
            .unwrap();
        assert_eq!(history.items.len(), 2);
        assert_eq!(history.last_item().unwrap(), VersionHistoryItem::new(3, 12));
    }

    #[test]
    fn test_version_moving_backwards_rejected() {
        let mut history = VersionHistory::new(vec![]);
        history
            .add_or_update_item(VersionHistoryItem::new(5, 10))
            .unwrap();
        let err = history
            .add_or_update_item(VersionHistoryItem::new(6, 9))
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidArgument(_)));
    }

    #[test]
    fn test_same_item_is_idempotent() {
        let mut history = VersionHistory::new(vec![]);
        history
            .add_or_update_item(VersionHistoryItem::new(5, 10))
            .unwrap();
        history
            .add_or_update_item(VersionHistoryItem::new(5, 10))
            .unwrap();
        assert_eq!(history.items.len(), 1);
    }

    #[test]
    fn test_replication_arms_are_exclusive() {
        let legacy = Replication::Legacy(ReplicationState::new(3));
        assert!(legacy.as_legacy().is_some());
        assert!(legacy.as_version_histories().is_none());

        let ndc =
            Replication::VersionHistories(VersionHistories::new(VersionHistory::new(vec![])));
        assert!(ndc.as_legacy().is_none());
        assert!(ndc.as_version_histories().is_some());
    }
}
