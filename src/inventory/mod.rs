//! Inventory aggregates: entry governance, tags/rules and the query engine.

pub mod entries;
pub mod query;
pub mod tags;

pub use entries::{EntryError, EntryLabels, InventoryEntries};
pub use query::{QueryContext, QueryEngine, SavedSearch};
pub use tags::{TagFlags, TagRuleSet, TagStore};
