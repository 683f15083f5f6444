//! Aggregate inventory entries: `def_index -> quantity` with compartment
//! labels, a unique-definition cap with optional mitigation handler, and
//! dirty-since-snapshot delta tracking.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Logical compartment labels; pure UI metadata, not storage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryLabels: u32 {
        const MATERIAL = 0x1;
        const QUEST = 0x2;
        const GEAR = 0x4;
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("unique definition cap reached")]
    UniqueCap,
    #[error("quantity overflow")]
    Overflow,
    #[error("no such entry")]
    NoEntry,
}

/// Cap-mitigation handler invoked when a pickup would exceed the unique
/// cap; returning `true` means mitigation happened and the pickup retries
/// once.
pub type CapHandler = Box<dyn FnMut(usize, u64) -> bool>;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    quantity: u64,
    labels: EntryLabels,
}

impl Entry {
    fn new() -> Self {
        Self {
            quantity: 0,
            labels: EntryLabels::empty(),
        }
    }
}

impl Default for EntryLabels {
    fn default() -> Self {
        EntryLabels::empty()
    }
}

/// The aggregate store. Iteration order is stable (sorted by def index) so
/// persistence output is deterministic.
#[derive(Default)]
pub struct InventoryEntries {
    entries: BTreeMap<usize, Entry>,
    unique_cap: usize,
    dirty: BTreeSet<usize>,
    cap_handler: Option<CapHandler>,
}

impl std::fmt::Debug for InventoryEntries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryEntries")
            .field("unique_count", &self.entries.len())
            .field("unique_cap", &self.unique_cap)
            .field("dirty", &self.dirty.len())
            .finish()
    }
}

impl InventoryEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.dirty.clear();
    }

    /// Soft cap on distinct definitions; 0 disables the cap.
    pub fn set_unique_cap(&mut self, cap: usize) {
        self.unique_cap = cap;
    }

    pub fn unique_cap(&self) -> usize {
        self.unique_cap
    }

    pub fn unique_count(&self) -> usize {
        self.entries.len()
    }

    pub fn quantity(&self, def_index: usize) -> u64 {
        self.entries.get(&def_index).map(|e| e.quantity).unwrap_or(0)
    }

    /// Cap pressure in [0, 1]; 0 when the cap is disabled.
    pub fn pressure(&self) -> f64 {
        if self.unique_cap == 0 {
            return 0.0;
        }
        self.entries.len() as f64 / self.unique_cap as f64
    }

    pub fn set_cap_handler(&mut self, handler: Option<CapHandler>) {
        self.cap_handler = handler;
    }

    /// Would a pickup of `add_qty` be accepted?
    pub fn can_accept(&self, def_index: usize, add_qty: u64) -> Result<(), EntryError> {
        if let Some(e) = self.entries.get(&def_index) {
            e.quantity.checked_add(add_qty).ok_or(EntryError::Overflow)?;
            return Ok(());
        }
        if self.unique_cap > 0 && self.entries.len() >= self.unique_cap {
            return Err(EntryError::UniqueCap);
        }
        Ok(())
    }

    /// Apply a pickup. A cap hit invokes the handler (when installed) and
    /// retries once if it reports mitigation.
    pub fn register_pickup(&mut self, def_index: usize, add_qty: u64) -> Result<(), EntryError> {
        if add_qty == 0 {
            return Ok(());
        }
        match self.can_accept(def_index, add_qty) {
            Ok(()) => {}
            Err(EntryError::UniqueCap) => {
                let mitigated = self
                    .cap_handler
                    .take()
                    .map(|mut h| {
                        let ok = h(def_index, add_qty);
                        self.cap_handler = Some(h);
                        ok
                    })
                    .unwrap_or(false);
                if !mitigated {
                    return Err(EntryError::UniqueCap);
                }
                self.can_accept(def_index, add_qty)?;
            }
            Err(e) => return Err(e),
        }
        let entry = self.entries.entry(def_index).or_insert_with(Entry::new);
        entry.quantity = entry
            .quantity
            .checked_add(add_qty)
            .ok_or(EntryError::Overflow)?;
        self.dirty.insert(def_index);
        Ok(())
    }

    /// Saturating removal; the distinct entry (and its labels) disappears
    /// at zero.
    pub fn register_remove(&mut self, def_index: usize, remove_qty: u64) -> Result<(), EntryError> {
        let Some(entry) = self.entries.get_mut(&def_index) else {
            return Err(EntryError::NoEntry);
        };
        entry.quantity = entry.quantity.saturating_sub(remove_qty);
        if entry.quantity == 0 {
            self.entries.remove(&def_index);
        }
        self.dirty.insert(def_index);
        Ok(())
    }

    /// Labels only exist on live entries.
    pub fn set_labels(&mut self, def_index: usize, labels: EntryLabels) -> Result<(), EntryError> {
        let entry = self.entries.get_mut(&def_index).ok_or(EntryError::NoEntry)?;
        entry.labels = labels;
        self.dirty.insert(def_index);
        Ok(())
    }

    pub fn labels(&self, def_index: usize) -> EntryLabels {
        self.entries
            .get(&def_index)
            .map(|e| e.labels)
            .unwrap_or(EntryLabels::empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u64, EntryLabels)> + '_ {
        self.entries
            .iter()
            .map(|(&def, e)| (def, e.quantity, e.labels))
    }

    /// Enumerate entries changed since the last snapshot (quantity 0 means
    /// removed). `None` resets the baseline without enumerating.
    pub fn dirty_pairs(&mut self, out: Option<&mut Vec<(usize, u64)>>) -> usize {
        let count = self.dirty.len();
        if let Some(out) = out {
            out.clear();
            for &def in &self.dirty {
                out.push((def, self.quantity(def)));
            }
        }
        self.dirty.clear();
        count
    }

    /// Treat current state as the baseline.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Loader path: install an entry verbatim without cap or dirty effects.
    pub(crate) fn install(&mut self, def_index: usize, quantity: u64, labels: EntryLabels) {
        if quantity == 0 {
            return;
        }
        self.entries.insert(def_index, Entry { quantity, labels });
    }
}
