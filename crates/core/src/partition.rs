//! Partition addressing for event streams.

use serde::{Deserialize, Serialize};

use crate::id::AggregateId;

/// Group used when a caller does not name one.
pub const DEFAULT_GROUP: &str = "default";

/// Root partition (tenant) used when a caller does not name one.
pub const DEFAULT_ROOT_PARTITION_KEY: &str = "default";

/// Identifies one event stream: aggregate id + group (aggregate kind) + root partition (tenant).
///
/// Per-partition ordering and optimistic concurrency are both scoped to these keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKeys {
    aggregate_id: AggregateId,
    group: String,
    root_partition_key: String,
}

impl PartitionKeys {
    pub fn new(
        aggregate_id: AggregateId,
        group: impl Into<String>,
        root_partition_key: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_id,
            group: group.into(),
            root_partition_key: root_partition_key.into(),
        }
    }

    /// Keys for a brand new aggregate in `group`, under the default root partition.
    pub fn generate(group: impl Into<String>) -> Self {
        Self::new(AggregateId::new(), group, DEFAULT_ROOT_PARTITION_KEY)
    }

    /// Keys for an existing aggregate in `group`, under the default root partition.
    pub fn existing(aggregate_id: AggregateId, group: impl Into<String>) -> Self {
        Self::new(aggregate_id, group, DEFAULT_ROOT_PARTITION_KEY)
    }

    pub fn with_root_partition_key(mut self, root_partition_key: impl Into<String>) -> Self {
        self.root_partition_key = root_partition_key.into();
        self
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn root_partition_key(&self) -> &str {
        &self.root_partition_key
    }

    /// Composite storage key: `{root}#{group}#{aggregate_id}`.
    pub fn stream_key(&self) -> String {
        format!(
            "{}#{}#{}",
            self.root_partition_key, self.group, self.aggregate_id
        )
    }
}

impl core::fmt::Display for PartitionKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.stream_key())
    }
}
