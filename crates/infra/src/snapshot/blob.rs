//! Snapshot blob layout.
//!
//! The payload is gzip-compressed JSON; the bookkeeping fields stay readable so
//! a loader can reject a stale projector version without inflating anything.
//! The engine never sees this type: states are converted at the storage edge.

use std::io::Read;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use sekiban_core::{EventId, PartitionKeys, SortableUniqueId};
use sekiban_events::{Aggregate, MultiProjectionState, Projector};

use super::SnapshotError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBlob {
    pub payload_type_name: String,
    pub payload_version: String,
    pub compressed_payload: Vec<u8>,
    pub last_event_id: Option<EventId>,
    pub last_sortable_unique_id: Option<SortableUniqueId>,
    pub version: u64,
    pub root_partition_key: String,
}

/// Snapshot key of an aggregate.
pub fn aggregate_key(projector_name: &str, keys: &PartitionKeys) -> String {
    format!("aggregate#{projector_name}#{}", keys.stream_key())
}

/// Snapshot key of a multi-projection.
pub fn multi_projection_key(projector_name: &str, root_partition_key: &str) -> String {
    format!("multi#{projector_name}#{root_partition_key}")
}

impl SnapshotBlob {
    pub fn from_multi_projection<P: Serialize>(
        state: &MultiProjectionState<P>,
    ) -> Result<Self, SnapshotError> {
        Ok(Self {
            payload_type_name: state.projector_name().to_string(),
            payload_version: state.projector_version().to_string(),
            compressed_payload: compress(state.payload())?,
            last_event_id: state.last_event_id(),
            last_sortable_unique_id: state.last_sortable_unique_id().cloned(),
            version: state.version(),
            root_partition_key: state.root_partition_key().to_string(),
        })
    }

    /// Restore a multi-projection state; the result records this snapshot's version as applied.
    pub fn into_multi_projection<Pr: Projector>(
        self,
        projector: &Pr,
    ) -> Result<MultiProjectionState<Pr::Payload>, SnapshotError> {
        self.ensure_projector(projector)?;
        let payload = decompress(&self.compressed_payload)?;
        Ok(MultiProjectionState::restore(
            payload,
            self.last_event_id,
            self.last_sortable_unique_id,
            self.version,
            self.version,
            self.root_partition_key,
            self.payload_type_name,
            self.payload_version,
        ))
    }

    pub fn from_aggregate<P: Serialize>(state: &Aggregate<P>) -> Result<Self, SnapshotError> {
        Ok(Self {
            payload_type_name: state.projector_name().to_string(),
            payload_version: state.projector_version().to_string(),
            compressed_payload: compress(state.payload())?,
            last_event_id: state.last_event_id(),
            last_sortable_unique_id: state.last_sortable_unique_id().cloned(),
            version: state.version(),
            root_partition_key: state.partition_keys().root_partition_key().to_string(),
        })
    }

    pub fn into_aggregate<Pr: Projector>(
        self,
        projector: &Pr,
        partition_keys: PartitionKeys,
    ) -> Result<Aggregate<Pr::Payload>, SnapshotError> {
        self.ensure_projector(projector)?;
        if partition_keys.root_partition_key() != self.root_partition_key {
            return Err(SnapshotError::Decode(format!(
                "snapshot belongs to root partition '{}', requested '{}'",
                self.root_partition_key,
                partition_keys.root_partition_key()
            )));
        }
        let payload = decompress(&self.compressed_payload)?;
        Ok(Aggregate::restore(
            payload,
            partition_keys,
            self.version,
            self.last_sortable_unique_id,
            self.last_event_id,
            self.payload_type_name,
            self.payload_version,
        ))
    }

    /// Whether this snapshot was written by `projector` at its current version.
    pub fn is_compatible_with<Pr: Projector>(&self, projector: &Pr) -> bool {
        self.payload_type_name == projector.name() && self.payload_version == projector.version()
    }

    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec(self).map_err(|e| SnapshotError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        serde_json::from_slice(bytes).map_err(|e| SnapshotError::Decode(e.to_string()))
    }

    fn ensure_projector<Pr: Projector>(&self, projector: &Pr) -> Result<(), SnapshotError> {
        if self.is_compatible_with(projector) {
            return Ok(());
        }
        Err(SnapshotError::ProjectorMismatch {
            expected: format!("{}@{}", projector.name(), projector.version()),
            found: format!("{}@{}", self.payload_type_name, self.payload_version),
        })
    }
}

fn compress<T: Serialize>(value: &T) -> Result<Vec<u8>, SnapshotError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, value).map_err(|e| SnapshotError::Encode(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| SnapshotError::Encode(e.to_string()))
}

fn decompress<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SnapshotError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| SnapshotError::Decode(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| SnapshotError::Decode(e.to_string()))
}
