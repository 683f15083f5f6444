//! Static content registries: item definitions, affix definitions and loot
//! tables. All are owned structs; nothing here is process-global.

pub mod affix;
pub mod item;
pub mod loot_table;

pub use affix::{AffixDef, AffixRegistry, AffixStat, AffixType};
pub use item::{ItemCategory, ItemDef, ItemDefRegistry};
pub use loot_table::{LootDrop, LootEntry, LootTableDef, LootTables};
