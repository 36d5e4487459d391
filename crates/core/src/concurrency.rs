//! Optimistic concurrency expectations for appends.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::sortable_id::SortableUniqueId;

/// Expected last sortable id of a partition at append time.
///
/// Races are detected at write time: the append succeeds only if the
/// partition's current last id still equals the expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedLastId {
    /// Skip the check (imports, migrations).
    Any,
    /// Require an exact last id; `None` means the partition must be empty.
    Exact(Option<SortableUniqueId>),
}

impl ExpectedLastId {
    /// Expect an empty partition.
    pub fn empty() -> Self {
        Self::Exact(None)
    }

    /// Expect `last` to be the partition's newest event id (`None` for empty).
    pub fn at(last: Option<SortableUniqueId>) -> Self {
        Self::Exact(last)
    }

    pub fn matches(&self, actual: Option<&SortableUniqueId>) -> bool {
        match self {
            ExpectedLastId::Any => true,
            ExpectedLastId::Exact(expected) => expected.as_ref() == actual,
        }
    }

    pub fn check(&self, actual: Option<&SortableUniqueId>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}
