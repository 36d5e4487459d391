//! Sample domain: inventory items, their stock and two read-side projections.
//!
//! Small on purpose. It exercises every seam of the framework (commands,
//! aggregate projector, multi-projection, tag state) and backs the tests and
//! benches of `sekiban-infra`.

pub mod item;
pub mod projections;

pub use item::{
    ITEM_GROUP, InventoryCommand, InventoryEvent, InventoryItem, InventoryItemProjector, ItemCreated,
    StockAdjusted, command_handlers, event_registry, warehouse_tag,
};
pub use projections::{StockTotals, StockTotalsProjector, WarehouseItemsProjector};
