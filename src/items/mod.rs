//! Runtime item state: the fixed-capacity instance pool and the enhancement
//! engine that mutates it.

pub mod enhance;
pub mod pool;

pub use enhance::{EnhanceError, EnhanceMaterials, Enhancer, TemperOutcome};
pub use pool::{budget_max, ItemInstance, ItemPool, PoolError, SlotHandle};
