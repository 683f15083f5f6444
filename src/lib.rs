//! Deterministic content core for a roguelike: item generation, loot and
//! enhancement pipelines, procedural enemy difficulty and encounters, and a
//! versioned save format that round-trips all of it.
//!
//! The crate is single-threaded cooperative: all state lives in owned
//! session objects ([`save::state::GameState`] plus the content registries)
//! and nothing here spawns threads or blocks beyond file I/O in the save
//! manager.

pub mod enemy;
pub mod hooks;
pub mod inventory;
pub mod items;
pub mod loot;
pub mod model;
pub mod rng;
pub mod save;
pub mod util;

// Re-export the types most shells touch directly.
pub use enemy::{AdaptiveController, DifficultyEngine, EncounterTemplates, ModifierRegistry};
pub use inventory::{InventoryEntries, QueryContext, QueryEngine, TagRuleSet, TagStore};
pub use items::{Enhancer, ItemPool, SlotHandle};
pub use loot::{generate_item, GenerationContext, RarityGovernor};
pub use model::{AffixRegistry, ItemDefRegistry, LootTables};
pub use save::state::GameState;
pub use save::SaveManager;
