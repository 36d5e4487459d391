//! Parameterized event retrieval.

use serde::{Deserialize, Serialize};

use sekiban_core::{AggregateId, PartitionKeys, SortableUniqueId};

use super::r#trait::StoredEvent;

/// Range condition on sortable ids.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortableIdCondition {
    #[default]
    None,
    /// Strictly after the id (resume cursor).
    Since(SortableUniqueId),
    /// Strictly after `after`, up to and including `until`.
    Between {
        after: SortableUniqueId,
        until: SortableUniqueId,
    },
}

impl SortableIdCondition {
    pub fn since(id: Option<&SortableUniqueId>) -> Self {
        match id {
            Some(id) => Self::Since(id.clone()),
            None => Self::None,
        }
    }

    pub fn matches(&self, id: &SortableUniqueId) -> bool {
        match self {
            SortableIdCondition::None => true,
            SortableIdCondition::Since(after) => id > after,
            SortableIdCondition::Between { after, until } => id > after && id <= until,
        }
    }
}

/// Filter criteria for [`EventStore::get_events`](super::EventStore::get_events).
///
/// Every `None` filter matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventRetrievalInfo {
    pub root_partition_key: Option<String>,
    pub group: Option<String>,
    pub aggregate_id: Option<AggregateId>,
    pub sortable_id_condition: SortableIdCondition,
    pub max_count: Option<usize>,
}

impl EventRetrievalInfo {
    pub fn all() -> Self {
        Self::default()
    }

    /// Exactly one partition's stream.
    pub fn for_partition(keys: &PartitionKeys) -> Self {
        Self {
            root_partition_key: Some(keys.root_partition_key().to_string()),
            group: Some(keys.group().to_string()),
            aggregate_id: Some(keys.aggregate_id()),
            ..Self::default()
        }
    }

    pub fn with_condition(mut self, condition: SortableIdCondition) -> Self {
        self.sortable_id_condition = condition;
        self
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn matches(&self, event: &StoredEvent) -> bool {
        let keys = &event.partition_keys;
        self.root_partition_key
            .as_deref()
            .is_none_or(|root| root == keys.root_partition_key())
            && self.group.as_deref().is_none_or(|g| g == keys.group())
            && self.aggregate_id.is_none_or(|id| id == keys.aggregate_id())
            && self.sortable_id_condition.matches(&event.sortable_unique_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn id(second: i64) -> SortableUniqueId {
        SortableUniqueId::generate(Utc.timestamp_opt(second, 0).unwrap(), Uuid::nil())
    }

    #[test]
    fn since_is_exclusive_between_is_half_open() {
        assert!(!SortableIdCondition::Since(id(5)).matches(&id(5)));
        assert!(SortableIdCondition::Since(id(5)).matches(&id(6)));

        let between = SortableIdCondition::Between {
            after: id(5),
            until: id(7),
        };
        assert!(!between.matches(&id(5)));
        assert!(between.matches(&id(7)));
        assert!(!between.matches(&id(8)));
    }

    #[test]
    fn since_none_means_from_the_beginning() {
        assert_eq!(SortableIdCondition::since(None), SortableIdCondition::None);
    }
}
