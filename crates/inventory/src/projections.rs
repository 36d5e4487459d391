//! Read-side projections over the inventory log.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use sekiban_events::{Event, Projector};

use crate::item::InventoryEvent;

/// Stock on hand per item, across every partition the projection accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTotals {
    per_item: BTreeMap<String, i64>,
}

impl StockTotals {
    pub fn total(&self) -> i64 {
        self.per_item.values().sum()
    }

    pub fn item_count(&self) -> usize {
        self.per_item.len()
    }

    /// Stock of one item, keyed by its aggregate id.
    pub fn stock_of(&self, item: &str) -> Option<i64> {
        self.per_item.get(item).copied()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StockTotalsProjector;

impl Projector for StockTotalsProjector {
    type Event = InventoryEvent;
    type Payload = StockTotals;

    fn name(&self) -> &'static str {
        "stock-totals"
    }

    fn version(&self) -> &'static str {
        "1"
    }

    fn initial_payload(&self) -> StockTotals {
        StockTotals::default()
    }

    fn project(&self, mut totals: StockTotals, event: &Event<InventoryEvent>) -> StockTotals {
        let item = event.partition_keys().aggregate_id().to_string();
        match event.payload() {
            InventoryEvent::ItemCreated(_) => {
                totals.per_item.insert(item, 0);
            }
            InventoryEvent::StockAdjusted(e) => {
                *totals.per_item.entry(item).or_insert(0) += e.delta;
            }
        }
        totals
    }
}

/// Names of the items created in one warehouse; folded per warehouse tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarehouseItemsProjector;

impl Projector for WarehouseItemsProjector {
    type Event = InventoryEvent;
    type Payload = BTreeSet<String>;

    fn name(&self) -> &'static str {
        "warehouse-items"
    }

    fn version(&self) -> &'static str {
        "1"
    }

    fn initial_payload(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn project(&self, mut names: BTreeSet<String>, event: &Event<InventoryEvent>) -> BTreeSet<String> {
        if let InventoryEvent::ItemCreated(e) = event.payload() {
            names.insert(e.name.clone());
        }
        names
    }
}
