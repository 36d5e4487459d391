use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use sekiban_events::{EventTypeRegistry, Projector, TagState};

use crate::event_store::{EventStore, TagWriteResult};
use crate::repository::RepositoryError;
use crate::retry::RetryPolicy;

/// Cache of [`TagState`]s for one projector, refreshed incrementally from `read_events_by_tag`.
///
/// A cached state is only replaced by one with a newer watermark. A cached
/// state written by another projector version is discarded and recomputed.
pub struct TagStateActor<S, Pr>
where
    Pr: Projector,
{
    store: S,
    projector: Arc<Pr>,
    registry: Arc<EventTypeRegistry<Pr::Event>>,
    retry: RetryPolicy,
    cache: HashMap<String, TagState<Pr::Payload>>,
}

impl<S, Pr> core::fmt::Debug for TagStateActor<S, Pr>
where
    Pr: Projector,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TagStateActor")
            .field("projector", &self.projector.name())
            .field("cached_tags", &self.cache.len())
            .finish()
    }
}

impl<S, Pr> TagStateActor<S, Pr>
where
    S: EventStore,
    Pr: Projector,
{
    pub fn new(store: S, projector: Arc<Pr>, registry: Arc<EventTypeRegistry<Pr::Event>>, retry: RetryPolicy) -> Self {
        Self {
            store,
            projector,
            registry,
            retry,
            cache: HashMap::new(),
        }
    }

    pub fn cached(&self, tag: &str) -> Option<&TagState<Pr::Payload>> {
        self.cache.get(tag)
    }

    /// Whether a write result leaves the cached state of its tag behind.
    pub fn is_stale(&self, written: &TagWriteResult) -> bool {
        self.cache
            .get(&written.tag)
            .and_then(|s| s.last_sortable_unique_id())
            .is_none_or(|cached| cached < &written.last_sortable_unique_id)
    }

    /// Latest state of `tag`: the cached state plus every tagged event after it.
    pub async fn get_state(&mut self, tag: &str) -> Result<TagState<Pr::Payload>, RepositoryError> {
        let mut state = match self.cache.get(tag) {
            Some(cached) if cached.is_compatible_with(self.projector.as_ref()) => cached.clone(),
            Some(cached) => {
                info!(
                    projector = self.projector.name(),
                    tag,
                    found = cached.projector_version(),
                    "tag state written by another projector version, recomputing"
                );
                TagState::empty(self.projector.as_ref(), tag)
            }
            None => TagState::empty(self.projector.as_ref(), tag),
        };

        let store = &self.store;
        let since = state.last_sortable_unique_id().cloned();
        let since_ref = since.as_ref();
        let stored = self
            .retry
            .retry_transient("read_events_by_tag", move || store.read_events_by_tag(tag, since_ref))
            .await?;
        for event in self.registry.decode_all(&stored)? {
            state.apply(self.projector.as_ref(), &event)?;
        }
        debug!(projector = self.projector.name(), tag, version = state.version(), read = stored.len(), "tag state refreshed");

        self.update(state.clone());
        Ok(state)
    }

    /// Offer a state to the cache. Returns whether it replaced the cached one.
    pub fn update(&mut self, candidate: TagState<Pr::Payload>) -> bool {
        if !candidate.is_compatible_with(self.projector.as_ref()) {
            return false;
        }
        match self.cache.get(candidate.tag()) {
            Some(current)
                if current.is_compatible_with(self.projector.as_ref()) && !candidate.supersedes(current) =>
            {
                false
            }
            _ => {
                self.cache.insert(candidate.tag().to_string(), candidate);
                true
            }
        }
    }

    pub fn evict(&mut self, tag: &str) -> Option<TagState<Pr::Payload>> {
        self.cache.remove(tag)
    }
}
