//! Procedural enemy engine: difficulty curves, adaptive scaling, encounter
//! composition, modifier rolling, and the integration layer that turns all
//! of it into spawned enemies.

pub mod adaptive;
pub mod difficulty;
pub mod encounter;
pub mod integration;
pub mod modifiers;
pub mod registry;

pub use adaptive::AdaptiveController;
pub use difficulty::{Archetype, DifficultyEngine, DifficultyParams, TierId};
pub use encounter::{EncounterComposition, EncounterTemplates, EncounterType};
pub use integration::{Enemy, EnemyTypeDecl, EnemyTypeMapping, RoomInfo, RoomTags};
pub use modifiers::{ModifierRegistry, ModifierSet};
pub use registry::{DamageOutcome, DamageType, EnemyRegistry};
