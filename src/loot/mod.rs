//! Loot pipeline: rarity governance and the multi-pass generation entry.

pub mod generation;
pub mod rarity;

pub use generation::{generate_item, mix_seed, GeneratedItem, GenerationContext, QualityScalars};
pub use rarity::RarityGovernor;
