//! Namespace registry and cluster metadata capabilities
//!
//! Both are process-wide caches in the running service. The fold only ever
//! reads them, so they are exposed as narrow capability traits with
//! in-memory implementations that tests (and single-cluster deployments)
//! can use directly. Refresh happens outside the fold.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::encoding::EncodingType;
use crate::error::StateError;

/// Cached namespace record
#[derive(Debug, Clone)]
pub struct NamespaceEntry {
    pub id: String,
    pub name: String,
    pub retention_days: i32,
    /// Encoding tag used for this namespace's persisted blobs
    pub encoding: EncodingType,
}

impl NamespaceEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            retention_days: 7,
            encoding: EncodingType::Json,
        }
    }
}

/// Read-shared namespace cache
pub trait NamespaceRegistry: Send + Sync {
    fn namespace_by_name(&self, name: &str) -> Result<NamespaceEntry, StateError>;

    fn namespace_by_id(&self, id: &str) -> Result<NamespaceEntry, StateError>;
}

/// Cluster topology, used to resolve failover versions back to clusters
pub trait ClusterMetadata: Send + Sync {
    fn current_cluster_name(&self) -> &str;

    fn cluster_name_for_failover_version(&self, version: i64) -> String;
}

/// In-memory namespace registry
#[derive(Default)]
pub struct InMemoryNamespaceRegistry {
    by_name: RwLock<HashMap<String, NamespaceEntry>>,
    by_id: RwLock<HashMap<String, NamespaceEntry>>,
}

impl InMemoryNamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, entry: NamespaceEntry) {
        self.by_name
            .write()
            .insert(entry.name.clone(), entry.clone());
        self.by_id.write().insert(entry.id.clone(), entry);
    }
}

impl NamespaceRegistry for InMemoryNamespaceRegistry {
    fn namespace_by_name(&self, name: &str) -> Result<NamespaceEntry, StateError> {
        self.by_name
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StateError::NamespaceNotFound(name.to_string()))
    }

    fn namespace_by_id(&self, id: &str) -> Result<NamespaceEntry, StateError> {
        self.by_id
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::NamespaceNotFound(id.to_string()))
    }
}

/// Fixed cluster topology
///
/// Failover versions are assigned per cluster modulo the failover increment,
/// so the owning cluster of any version is `version % increment`.
pub struct StaticClusterMetadata {
    current: String,
    clusters: Vec<String>,
    failover_version_increment: i64,
}

impl StaticClusterMetadata {
    pub fn new(current: impl Into<String>, clusters: Vec<String>) -> Self {
        Self {
            current: current.into(),
            failover_version_increment: clusters.len().max(1) as i64,
            clusters,
        }
    }
}

impl ClusterMetadata for StaticClusterMetadata {
    fn current_cluster_name(&self) -> &str {
        &self.current
    }

    fn cluster_name_for_failover_version(&self, version: i64) -> String {
        if self.clusters.is_empty() || version < 0 {
            return self.current.clone();
        }
        let index = (version % self.failover_version_increment) as usize;
        self.clusters[index].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = InMemoryNamespaceRegistry::new();
        registry.put(NamespaceEntry::new("ns-id", "ns-name"));

        assert_eq!(registry.namespace_by_name("ns-name").unwrap().id, "ns-id");
        assert_eq!(registry.namespace_by_id("ns-id").unwrap().name, "ns-name");
        assert!(matches!(
            registry.namespace_by_id("missing"),
            Err(StateError::NamespaceNotFound(_))
        ));
    }

    #[test]
    fn test_failover_version_resolution() {
        let clusters = StaticClusterMetadata::new(
            "east",
            vec!["east".to_string(), "west".to_string()],
        );
        assert_eq!(clusters.cluster_name_for_failover_version(0), "east");
        assert_eq!(clusters.cluster_name_for_failover_version(1), "west");
        assert_eq!(clusters.cluster_name_for_failover_version(12), "east");
    }
}
