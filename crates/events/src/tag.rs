use serde::{Deserialize, Serialize};

use sekiban_core::SortableUniqueId;

use crate::event::Event;
use crate::projector::Projector;
use crate::runner::ProjectionError;

/// Latest state for one tag (e.g. one resource instance).
///
/// Same bookkeeping as an aggregate, keyed by an arbitrary tag string instead
/// of partition keys. Cached copies are only ever replaced by a state with a
/// newer watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagState<P> {
    tag: String,
    payload: P,
    version: u64,
    last_sortable_unique_id: Option<SortableUniqueId>,
    projector_name: String,
    projector_version: String,
}

impl<P> TagState<P> {
    pub fn empty<Pr>(projector: &Pr, tag: impl Into<String>) -> Self
    where
        Pr: Projector<Payload = P>,
    {
        Self {
            tag: tag.into(),
            payload: projector.initial_payload(),
            version: 0,
            last_sortable_unique_id: None,
            projector_name: projector.name().to_string(),
            projector_version: projector.version().to_string(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_sortable_unique_id(&self) -> Option<&SortableUniqueId> {
        self.last_sortable_unique_id.as_ref()
    }

    pub fn projector_version(&self) -> &str {
        &self.projector_version
    }

    pub fn is_compatible_with<Pr: Projector>(&self, projector: &Pr) -> bool {
        self.projector_name == projector.name() && self.projector_version == projector.version()
    }

    /// Whether `self` should replace `current` in a cache.
    pub fn supersedes(&self, current: &Self) -> bool {
        match (&self.last_sortable_unique_id, &current.last_sortable_unique_id) {
            (Some(mine), Some(theirs)) => mine > theirs,
            (Some(_), None) => true,
            (None, _) => false,
        }
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
        Ok(())
    }
}
