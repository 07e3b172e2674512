//! Item definitions shared between client and server.

use serde::{Deserialize, Serialize};

/// Item definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDef {
    pub id: u32,
    pub name: String,
    pub item_type: ItemType,
    pub rarity: ItemRarity,
    pub max_stack: u32,
    /// Fixed charge count for consumables sold/dropped as a full stack
    #[serde(default)]
    pub charges: Option<u32>,
}

/// Item types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    Consumable,
    Weapon,
    Armor,
    Accessory,
    /// Crafting ingredient
    Material,
    Quest,
    Relic,
    Currency,
}

impl ItemType {
    /// Quest items and crafting ingredients never drop from monster kills
    pub fn is_kill_droppable(&self) -> bool {
        !matches!(self, Self::Quest | Self::Material)
    }
    
    /// Whether drops of this type appear in the world instead of going
    /// straight into the claimer's inventory
    pub fn drops_corporeally(&self) -> bool {
        matches!(self, Self::Weapon | Self::Armor | Self::Accessory | Self::Relic | Self::Currency)
    }
    
    /// Relics never carry an upgrade level
    pub fn rolls_plus(&self) -> bool {
        !matches!(self, Self::Relic | Self::Consumable | Self::Currency)
    }
}

/// Item rarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemRarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

/// Built-in item definitions for the prototype
pub fn get_item_definitions() -> Vec<ItemDef> {
    vec![
        ItemDef {
            id: 1,
            name: "Health Potion".into(),
            item_type: ItemType::Consumable,
            rarity: ItemRarity::Common,
            max_stack: 200,
            charges: Some(50),
        },
        ItemDef {
            id: 2,
            name: "Mana Potion".into(),
            item_type: ItemType::Consumable,
            rarity: ItemRarity::Common,
            max_stack: 200,
            charges: None,
        },
        ItemDef {
            id: 3,
            name: "Goblin Ear".into(),
            item_type: ItemType::Quest,
            rarity: ItemRarity::Common,
            max_stack: 99,
            charges: None,
        },
        ItemDef {
            id: 4,
            name: "Rusty Sword".into(),
            item_type: ItemType::Weapon,
            rarity: ItemRarity::Common,
            max_stack: 1,
            charges: None,
        },
        ItemDef {
            id: 5,
            name: "Iron Sword".into(),
            item_type: ItemType::Weapon,
            rarity: ItemRarity::Uncommon,
            max_stack: 1,
            charges: None,
        },
        ItemDef {
            id: 6,
            name: "Wolf Pelt".into(),
            item_type: ItemType::Material,
            rarity: ItemRarity::Common,
            max_stack: 99,
            charges: None,
        },
        ItemDef {
            id: 7,
            name: "Gold Pouch".into(),
            item_type: ItemType::Currency,
            rarity: ItemRarity::Common,
            max_stack: 1,
            charges: None,
        },
        ItemDef {
            id: 8,
            name: "Dragon God Relic".into(),
            item_type: ItemType::Relic,
            rarity: ItemRarity::Legendary,
            max_stack: 1,
            charges: None,
        },
    ]
}
