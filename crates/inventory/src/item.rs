use serde::{Deserialize, Serialize};

use sekiban_core::{AggregateId, DomainError, PartitionKeys};
use sekiban_events::{
    CommandContext, CommandHandlers, DomainCommand, Event, EventPayload, EventTypeRegistry, Projector,
};

/// Partition group of every inventory item stream.
pub const ITEM_GROUP: &str = "inventory-item";

/// Tag under which item creations are indexed per warehouse.
pub fn warehouse_tag(warehouse: &str) -> String {
    format!("warehouse:{warehouse}")
}

/// Event: ItemCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreated {
    pub name: String,
    pub warehouse: String,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InventoryEvent {
    ItemCreated(ItemCreated),
    StockAdjusted(StockAdjusted),
}

impl EventPayload for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ItemCreated(_) => "ItemCreated",
            InventoryEvent::StockAdjusted(_) => "StockAdjusted",
        }
    }

    fn tags(&self) -> Vec<String> {
        match self {
            InventoryEvent::ItemCreated(e) => vec![warehouse_tag(&e.warehouse)],
            InventoryEvent::StockAdjusted(_) => Vec::new(),
        }
    }
}

/// Decoders for every inventory event type.
pub fn event_registry() -> EventTypeRegistry<InventoryEvent> {
    EventTypeRegistry::new()
        .register("ItemCreated", InventoryEvent::ItemCreated)
        .register("StockAdjusted", InventoryEvent::StockAdjusted)
}

/// Aggregate payload: InventoryItem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    name: String,
    warehouse: String,
    stock: i64,
    created: bool,
}

impl InventoryItem {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn warehouse(&self) -> &str {
        &self.warehouse
    }

    pub fn stock(&self) -> i64 {
        self.stock
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryItemProjector;

impl Projector for InventoryItemProjector {
    type Event = InventoryEvent;
    type Payload = InventoryItem;

    fn name(&self) -> &'static str {
        ITEM_GROUP
    }

    fn version(&self) -> &'static str {
        "1"
    }

    fn initial_payload(&self) -> InventoryItem {
        InventoryItem::default()
    }

    fn project(&self, mut item: InventoryItem, event: &Event<InventoryEvent>) -> InventoryItem {
        match event.payload() {
            InventoryEvent::ItemCreated(e) => {
                item.name = e.name.clone();
                item.warehouse = e.warehouse.clone();
                item.stock = 0;
                item.created = true;
            }
            InventoryEvent::StockAdjusted(e) => {
                item.stock += e.delta;
            }
        }
        item
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryCommand {
    CreateItem {
        item: AggregateId,
        name: String,
        warehouse: String,
    },
    AdjustStock {
        item: AggregateId,
        delta: i64,
    },
}

impl InventoryCommand {
    pub fn create(item: AggregateId, name: impl Into<String>, warehouse: impl Into<String>) -> Self {
        Self::CreateItem {
            item,
            name: name.into(),
            warehouse: warehouse.into(),
        }
    }

    pub fn adjust(item: AggregateId, delta: i64) -> Self {
        Self::AdjustStock { item, delta }
    }

    fn item(&self) -> AggregateId {
        match self {
            Self::CreateItem { item, .. } | Self::AdjustStock { item, .. } => *item,
        }
    }
}

impl DomainCommand for InventoryCommand {
    fn command_type(&self) -> &'static str {
        match self {
            Self::CreateItem { .. } => "CreateItem",
            Self::AdjustStock { .. } => "AdjustStock",
        }
    }

    fn partition_keys(&self) -> PartitionKeys {
        PartitionKeys::existing(self.item(), ITEM_GROUP)
    }
}

/// Handler table for [`InventoryCommand`].
pub fn command_handlers() -> CommandHandlers<InventoryCommand, InventoryItemProjector> {
    CommandHandlers::new()
        .on("CreateItem", handle_create)
        .on("AdjustStock", handle_adjust)
}

fn handle_create(
    command: &InventoryCommand,
    ctx: &CommandContext<'_, InventoryItem>,
) -> Result<Vec<InventoryEvent>, DomainError> {
    let InventoryCommand::CreateItem { name, warehouse, .. } = command else {
        return Err(DomainError::validation("expected CreateItem"));
    };
    if ctx.payload().is_created() {
        return Err(DomainError::conflict("item already exists"));
    }
    if name.trim().is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    if warehouse.trim().is_empty() {
        return Err(DomainError::validation("warehouse cannot be empty"));
    }
    Ok(vec![InventoryEvent::ItemCreated(ItemCreated {
        name: name.clone(),
        warehouse: warehouse.clone(),
    })])
}

fn handle_adjust(
    command: &InventoryCommand,
    ctx: &CommandContext<'_, InventoryItem>,
) -> Result<Vec<InventoryEvent>, DomainError> {
    let InventoryCommand::AdjustStock { delta, .. } = command else {
        return Err(DomainError::validation("expected AdjustStock"));
    };
    let item = ctx.payload();
    if !item.is_created() {
        return Err(DomainError::not_found());
    }
    if *delta == 0 {
        return Err(DomainError::validation("delta cannot be zero"));
    }
    if item.stock() + delta < 0 {
        return Err(DomainError::invariant("stock cannot go negative"));
    }
    Ok(vec![InventoryEvent::StockAdjusted(StockAdjusted { delta: *delta })])
}
