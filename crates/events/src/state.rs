//! Versioned projection states.

use serde::{Deserialize, Serialize};

use sekiban_core::{EventId, PartitionKeys, SortableUniqueId};

use crate::event::Event;
use crate::projector::Projector;
use crate::runner::ProjectionError;

/// Root partition key of a multi-projection that folds every partition.
pub const ALL_ROOT_PARTITIONS: &str = "*";

/// State of a single aggregate: a pure fold over its partition from version 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate<P> {
    payload: P,
    partition_keys: PartitionKeys,
    version: u64,
    last_sortable_unique_id: Option<SortableUniqueId>,
    last_event_id: Option<EventId>,
    projector_name: String,
    projector_version: String,
}

impl<P> Aggregate<P> {
    pub fn empty<Pr>(projector: &Pr, partition_keys: PartitionKeys) -> Self
    where
        Pr: Projector<Payload = P>,
    {
        Self {
            payload: projector.initial_payload(),
            partition_keys,
            version: 0,
            last_sortable_unique_id: None,
            last_event_id: None,
            projector_name: projector.name().to_string(),
            projector_version: projector.version().to_string(),
        }
    }

    /// Reassemble a state from persisted parts (snapshot restore).
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        payload: P,
        partition_keys: PartitionKeys,
        version: u64,
        last_sortable_unique_id: Option<SortableUniqueId>,
        last_event_id: Option<EventId>,
        projector_name: impl Into<String>,
        projector_version: impl Into<String>,
    ) -> Self {
        Self {
            payload,
            partition_keys,
            version,
            last_sortable_unique_id,
            last_event_id,
            projector_name: projector_name.into(),
            projector_version: projector_version.into(),
        }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn partition_keys(&self) -> &PartitionKeys {
        &self.partition_keys
    }

    /// Number of events applied.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Watermark: sortable id of the last applied event.
    pub fn last_sortable_unique_id(&self) -> Option<&SortableUniqueId> {
        self.last_sortable_unique_id.as_ref()
    }

    pub fn last_event_id(&self) -> Option<EventId> {
        self.last_event_id
    }

    pub fn projector_name(&self) -> &str {
        &self.projector_name
    }

    pub fn projector_version(&self) -> &str {
        &self.projector_version
    }

    /// Whether this state was produced by the same projector name and version.
    pub fn is_compatible_with<Pr: Projector>(&self, projector: &Pr) -> bool {
        self.projector_name == projector.name() && self.projector_version == projector.version()
    }

    pub fn apply<Pr>(&mut self, projector: &Pr, event: &Event<Pr::Event>) -> Result<(), ProjectionError>
    where
        Pr: Projector<Payload = P>,
    {
        if event.partition_keys() != &self.partition_keys {
            return Err(ProjectionError::PartitionMismatch {
                expected: self.partition_keys.clone(),
                found: event.partition_keys().clone(),
            });
        }
        if let Some(last) = &self.last_sortable_unique_id {
            if event.sortable_unique_id() <= last {
                return Err(ProjectionError::NonMonotonic {
                    last: last.clone(),
                    found: event.sortable_unique_id().clone(),
                });
            }
        }
        if event.version() != self.version + 1 {
            return Err(ProjectionError::VersionGap {
                expected: self.version + 1,
                found: event.version(),
            });
        }

        let prior = std::mem::replace(&mut self.payload, projector.initial_payload());
        self.payload = projector.project(prior, event);
        self.version += 1;
        self.last_sortable_unique_id = Some(event.sortable_unique_id().clone());
        self.last_event_id = Some(event.id());
        Ok(())
    }

    /// Consuming form of [`apply`](Self::apply).
    pub fn project<Pr>(mut self, projector: &Pr, event: &Event<Pr::Event>) -> Result<Self, ProjectionError>
    where
        Pr: Projector<Payload = P>,
    {
        self.apply(projector, event)?;
        Ok(self)
    }
}

/// State of a cross-aggregate projection.
///
/// Unlike [`Aggregate`] it folds events of many partitions, ordered only by
/// sortable id; `version` counts applied events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiProjectionState<P> {
    payload: P,
    last_event_id: Option<EventId>,
    last_sortable_unique_id: Option<SortableUniqueId>,
    version: u64,
    applied_snapshot_version: u64,
    root_partition_key: String,
    projector_name: String,
    projector_version: String,
}

impl<P> MultiProjectionState<P> {
    pub fn initial<Pr>(projector: &Pr, root_partition_key: impl Into<String>) -> Self
    where
        Pr: Projector<Payload = P>,
    {
        Self {
            payload: projector.initial_payload(),
            last_event_id: None,
            last_sortable_unique_id: None,
            version: 0,
            applied_snapshot_version: 0,
            root_partition_key: root_partition_key.into(),
            projector_name: projector.name().to_string(),
            projector_version: projector.version().to_string(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        payload: P,
        last_event_id: Option<EventId>,
        last_sortable_unique_id: Option<SortableUniqueId>,
        version: u64,
        applied_snapshot_version: u64,
        root_partition_key: impl Into<String>,
        projector_name: impl Into<String>,
        projector_version: impl Into<String>,
    ) -> Self {
        Self {
            payload,
            last_event_id,
            last_sortable_unique_id,
            version,
            applied_snapshot_version,
            root_partition_key: root_partition_key.into(),
            projector_name: projector_name.into(),
            projector_version: projector_version.into(),
        }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn last_event_id(&self) -> Option<EventId> {
        self.last_event_id
    }

    pub fn last_sortable_unique_id(&self) -> Option<&SortableUniqueId> {
        self.last_sortable_unique_id.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version of the snapshot this state was last restored from or persisted as.
    pub fn applied_snapshot_version(&self) -> u64 {
        self.applied_snapshot_version
    }

    pub fn root_partition_key(&self) -> &str {
        &self.root_partition_key
    }

    pub fn projector_name(&self) -> &str {
        &self.projector_name
    }

    pub fn projector_version(&self) -> &str {
        &self.projector_version
    }

    pub fn is_compatible_with<Pr: Projector>(&self, projector: &Pr) -> bool {
        self.projector_name == projector.name() && self.projector_version == projector.version()
    }

    /// Whether events of `keys` belong to this projection.
    pub fn accepts(&self, keys: &PartitionKeys) -> bool {
        self.root_partition_key == ALL_ROOT_PARTITIONS
            || self.root_partition_key == keys.root_partition_key()
    }

    pub fn mark_snapshot_applied(&mut self) {
        self.applied_snapshot_version = self.version;
    }

    pub fn apply<Pr>(&mut self, projector: &Pr, event: &Event<Pr::Event>) -> Result<(), ProjectionError>
    where
        Pr: Projector<Payload = P>,
    {
        if let Some(last) = &self.last_sortable_unique_id {
            if event.sortable_unique_id() <= last {
                return Err(ProjectionError::NonMonotonic {
                    last: last.clone(),
                    found: event.sortable_unique_id().clone(),
                });
            }
        }

        let prior = std::mem::replace(&mut self.payload, projector.initial_payload());
        self.payload = projector.project(prior, event);
        self.version += 1;
        self.last_sortable_unique_id = Some(event.sortable_unique_id().clone());
        self.last_event_id = Some(event.id());
        Ok(())
    }
}
