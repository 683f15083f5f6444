//! Fixed-capacity item instance arena.
//!
//! Slots are addressed by generational handles: deactivating a slot bumps
//! its generation, so stale handles held across a despawn or fusion are
//! rejected instead of silently touching the reused slot. The first-free
//! scan, GUID derivation, socket roll and durability baseline all follow
//! the deterministic recipes the rest of the pipeline depends on.

use log::{debug, info, warn};
use thiserror::Error;

use crate::hooks::{LootFilter, LootObserver, NullObserver};
use crate::model::affix::{AffixRegistry, AffixStat, AffixType};
use crate::model::item::{ItemCategory, ItemDefRegistry};
use crate::rng::Lcg;

/// Default world despawn time when no per-rarity override is set.
pub const DEFAULT_DESPAWN_MS: u32 = 60_000;
/// World-space radius inside which identical stacks merge.
pub const STACK_MERGE_RADIUS: f32 = 0.75;
pub const MAX_SOCKETS: usize = 6;
pub const MAX_ITEM_LEVEL: i32 = 999;

/// Affix-value budget cap: `20 + 5*item_level + 10*rarity^2`.
pub fn budget_max(item_level: i32, rarity: u8) -> i32 {
    let level = item_level.max(1);
    let rarity = rarity.min(4) as i32;
    20 + level * 5 + rarity * rarity * 10
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("slot index out of range")]
    InvalidSlot,
    #[error("handle generation is stale")]
    StaleHandle,
    #[error("slot is not active")]
    InactiveSlot,
    #[error("slot already occupied")]
    SlotOccupied,
    #[error("slot is empty")]
    SlotEmpty,
    #[error("value out of range")]
    OutOfRange,
    #[error("item pool is full")]
    PoolFull,
    #[error("affix budget exceeded")]
    BudgetExceeded,
}

/// Generational handle into the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    pub index: u32,
    pub generation: u32,
}

/// One live item in the world or an inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemInstance {
    pub def_index: usize,
    pub quantity: i32,
    pub x: f32,
    pub y: f32,
    pub life_ms: f32,
    pub rarity: u8,
    pub item_level: i32,
    pub quality: i32,
    pub enchant_level: i32,
    pub prefix_index: i32,
    pub prefix_value: i32,
    pub suffix_index: i32,
    pub suffix_value: i32,
    pub socket_count: i32,
    pub sockets: [i32; MAX_SOCKETS],
    pub durability_cur: i32,
    pub durability_max: i32,
    pub fractured: bool,
    pub hidden_filter: bool,
    pub guid: u64,
    pub equip_hash_chain: u64,
    pub stored_affix_index: i32,
    pub stored_affix_value: i32,
    pub stored_affix_used: bool,
}

impl ItemInstance {
    /// Sum of present affix values.
    pub fn total_affix_weight(&self) -> i32 {
        let mut total = 0;
        if self.prefix_index >= 0 {
            total += self.prefix_value;
        }
        if self.suffix_index >= 0 {
            total += self.suffix_value;
        }
        total
    }

    pub fn budget_cap(&self) -> i32 {
        budget_max(self.item_level, self.rarity)
    }

    pub fn budget_ok(&self) -> bool {
        self.total_affix_weight() <= self.budget_cap()
    }
}

struct Slot {
    generation: u32,
    item: Option<ItemInstance>,
}

/// The arena. Capacity is fixed at construction; allocation is a first-free
/// scan and deactivation only clears the slot and bumps its generation.
pub struct ItemPool {
    slots: Vec<Slot>,
    observer: Box<dyn LootObserver>,
    pub suppress_spawn_log: bool,
}

impl ItemPool {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            generation: 0,
            item: None,
        });
        Self {
            slots,
            observer: Box::new(NullObserver),
            suppress_spawn_log: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn set_observer(&mut self, observer: Box<dyn LootObserver>) {
        self.observer = observer;
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.item.is_some()).count()
    }

    pub fn visible_count(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|s| s.item.as_ref())
            .filter(|it| !it.hidden_filter)
            .count()
    }

    /// Handle for an index if the slot is currently active.
    pub fn handle_at(&self, index: usize) -> Option<SlotHandle> {
        let slot = self.slots.get(index)?;
        slot.item.as_ref()?;
        Some(SlotHandle {
            index: index as u32,
            generation: slot.generation,
        })
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&ItemInstance> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.item.as_ref()
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut ItemInstance> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.item.as_mut()
    }

    fn checked(&self, handle: SlotHandle) -> Result<&ItemInstance, PoolError> {
        let slot = self
            .slots
            .get(handle.index as usize)
            .ok_or(PoolError::InvalidSlot)?;
        if slot.generation != handle.generation {
            return Err(PoolError::StaleHandle);
        }
        slot.item.as_ref().ok_or(PoolError::InactiveSlot)
    }

    fn checked_mut(&mut self, handle: SlotHandle) -> Result<&mut ItemInstance, PoolError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .ok_or(PoolError::InvalidSlot)?;
        if slot.generation != handle.generation {
            return Err(PoolError::StaleHandle);
        }
        slot.item.as_mut().ok_or(PoolError::InactiveSlot)
    }

    /// Distinct mutable borrows of two different slots.
    pub(crate) fn two_mut(
        &mut self,
        a: SlotHandle,
        b: SlotHandle,
    ) -> Result<(&mut ItemInstance, &mut ItemInstance), PoolError> {
        let (ia, ib) = (a.index as usize, b.index as usize);
        if ia == ib {
            return Err(PoolError::InvalidSlot);
        }
        if ia >= self.slots.len() || ib >= self.slots.len() {
            return Err(PoolError::InvalidSlot);
        }
        let (lo, hi) = if ia < ib { (ia, ib) } else { (ib, ia) };
        let (left, right) = self.slots.split_at_mut(hi);
        let (slot_lo, slot_hi) = (&mut left[lo], &mut right[0]);
        let (slot_a, slot_b) = if ia < ib {
            (slot_lo, slot_hi)
        } else {
            (slot_hi, slot_lo)
        };
        if slot_a.generation != a.generation || slot_b.generation != b.generation {
            return Err(PoolError::StaleHandle);
        }
        match (slot_a.item.as_mut(), slot_b.item.as_mut()) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(PoolError::InactiveSlot),
        }
    }

    /// Iterate active items with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (SlotHandle, &ItemInstance)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.item.as_ref().map(|it| {
                (
                    SlotHandle {
                        index: i as u32,
                        generation: s.generation,
                    },
                    it,
                )
            })
        })
    }

    /// Spawn a new instance into the first free slot.
    pub fn spawn(
        &mut self,
        def_index: usize,
        quantity: i32,
        x: f32,
        y: f32,
        defs: &ItemDefRegistry,
    ) -> Result<SlotHandle, PoolError> {
        if quantity <= 0 {
            debug!("spawn rejected: def={def_index} qty={quantity}");
            return Err(PoolError::OutOfRange);
        }
        let def = defs.get(def_index).ok_or(PoolError::OutOfRange)?;
        let index = self
            .slots
            .iter()
            .position(|s| s.item.is_none())
            .ok_or_else(|| {
                warn!(
                    "item pool full (cap={}) def={def_index} qty={quantity}",
                    self.slots.len()
                );
                PoolError::PoolFull
            })?;

        let rarity = def.rarity;
        let guid = (def_index as u64) << 32
            ^ ((index as u64 + 1).wrapping_mul(0x9E37_79B1_85EB_CA87))
            ^ (quantity as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);

        // Socket count rolled from a slot/def/position-derived seed so the
        // same drop always carries the same sockets.
        let mut socket_count = 0;
        let (socket_min, socket_max) = (def.socket_min, def.socket_max.min(MAX_SOCKETS as i32));
        if socket_max >= socket_min && socket_max > 0 {
            let mut seed = (index as u32).wrapping_mul(2_654_435_761)
                ^ def_index as u32
                ^ (x as i32 as u32).wrapping_mul(73_856_093)
                ^ (y as i32 as u32).wrapping_mul(19_349_663);
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let span = (socket_max - socket_min + 1) as u32;
            socket_count = (socket_min + (seed % span) as i32).min(MAX_SOCKETS as i32);
        }

        let durability = if matches!(def.category, ItemCategory::Weapon | ItemCategory::Armor) {
            50 + 25 * rarity as i32
        } else {
            0
        };

        let slot = &mut self.slots[index];
        slot.item = Some(ItemInstance {
            def_index,
            quantity,
            x,
            y,
            life_ms: 0.0,
            rarity,
            item_level: 1,
            quality: 0,
            enchant_level: 0,
            prefix_index: -1,
            prefix_value: 0,
            suffix_index: -1,
            suffix_value: 0,
            socket_count,
            sockets: [-1; MAX_SOCKETS],
            durability_cur: durability,
            durability_max: durability,
            fractured: false,
            hidden_filter: false,
            guid,
            equip_hash_chain: 0,
            stored_affix_index: -1,
            stored_affix_value: 0,
            stored_affix_used: false,
        });
        let handle = SlotHandle {
            index: index as u32,
            generation: slot.generation,
        };
        self.observer.on_spawn(index, x, y, rarity);
        if !self.suppress_spawn_log {
            info!(
                "loot spawn: def={def_index} qty={quantity} at ({x:.2},{y:.2}) slot={index} active={}",
                self.active_count()
            );
        }
        Ok(handle)
    }

    /// Deactivate a slot, bumping its generation.
    pub fn despawn(&mut self, handle: SlotHandle) -> Result<(), PoolError> {
        self.checked(handle)?;
        let slot = &mut self.slots[handle.index as usize];
        slot.item = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.observer.on_despawn(handle.index as usize);
        Ok(())
    }

    /// Loader path: place a deserialized instance into the first free slot,
    /// preserving its GUID and all recorded fields.
    pub fn restore(&mut self, item: ItemInstance) -> Result<SlotHandle, PoolError> {
        let index = self
            .slots
            .iter()
            .position(|s| s.item.is_none())
            .ok_or(PoolError::PoolFull)?;
        let slot = &mut self.slots[index];
        slot.item = Some(item);
        Ok(SlotHandle {
            index: index as u32,
            generation: slot.generation,
        })
    }

    /// Deactivate every slot (load path); generations advance so stale
    /// handles from the previous session are rejected.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            if slot.item.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }

    pub(crate) fn deactivate_silent(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.item = None;
            slot.generation = slot.generation.wrapping_add(1);
        }
    }

    /// Loader path: overwrite affix state without budget enforcement.
    pub fn apply_affixes(
        &mut self,
        handle: SlotHandle,
        rarity: u8,
        prefix_index: i32,
        prefix_value: i32,
        suffix_index: i32,
        suffix_value: i32,
    ) -> Result<(), PoolError> {
        let item = self.checked_mut(handle)?;
        if rarity <= 4 {
            item.rarity = rarity;
        }
        item.prefix_index = prefix_index;
        item.prefix_value = prefix_value;
        item.suffix_index = suffix_index;
        item.suffix_value = suffix_value;
        Ok(())
    }

    /// Roll affixes per the rarity rule: rarity >= 3 wants both, rarity 2
    /// wants exactly one chosen by rng parity, below that none. Over-budget
    /// rolls are clamped down by decrementing the larger value (tie reduces
    /// the prefix).
    pub fn generate_affixes(
        &mut self,
        handle: SlotHandle,
        rng: &mut Lcg,
        rarity: u8,
        affixes: &AffixRegistry,
    ) -> Result<(), PoolError> {
        self.checked(handle)?;
        let (mut want_prefix, mut want_suffix) = (false, false);
        if rarity >= 3 {
            want_prefix = true;
            want_suffix = true;
        } else if rarity == 2 {
            want_prefix = rng.state() & 1 == 0;
            want_suffix = !want_prefix;
        }
        let mut prefix = None;
        let mut suffix = None;
        if want_prefix {
            if let Some(idx) = affixes.roll(AffixType::Prefix, rarity, rng) {
                let value = affixes.roll_value(idx, rng);
                prefix = Some((idx as i32, value));
            }
        }
        if want_suffix {
            if let Some(idx) = affixes.roll(AffixType::Suffix, rarity, rng) {
                let value = affixes.roll_value(idx, rng);
                suffix = Some((idx as i32, value));
            }
        }
        let item = self.checked_mut(handle)?;
        if let Some((idx, value)) = prefix {
            item.prefix_index = idx;
            item.prefix_value = value;
        }
        if let Some((idx, value)) = suffix {
            item.suffix_index = idx;
            item.suffix_value = value;
        }
        clamp_to_budget(item);
        Ok(())
    }

    /// Raise item level (capped) and walk existing affix values toward the
    /// new budget with a coin-flip per step.
    pub fn upgrade_level(
        &mut self,
        handle: SlotHandle,
        levels: i32,
        rng: &mut Lcg,
    ) -> Result<(), PoolError> {
        if levels <= 0 {
            return Ok(());
        }
        let item = self.checked_mut(handle)?;
        item.item_level = (item.item_level + levels).min(MAX_ITEM_LEVEL);
        let cap = item.budget_cap();
        let mut total = item.total_affix_weight();
        while total < cap && (item.prefix_index >= 0 || item.suffix_index >= 0) {
            rng.next();
            let choose_prefix = if item.prefix_index >= 0 && item.suffix_index >= 0 {
                rng.state() & 1 != 0
            } else {
                item.suffix_index < 0
            };
            if choose_prefix && item.prefix_index >= 0 && item.prefix_value < cap {
                item.prefix_value += 1;
                total += 1;
            } else if item.suffix_index >= 0 && item.suffix_value < cap {
                item.suffix_value += 1;
                total += 1;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Advance lifetimes, expire drops past their despawn limit and merge
    /// neighbouring identical stacks. `despawn_override_ms` maps a rarity to
    /// its override (0 = default).
    pub fn update(
        &mut self,
        dt_ms: f32,
        defs: &ItemDefRegistry,
        despawn_override_ms: impl Fn(u8) -> u32,
    ) {
        for i in 0..self.slots.len() {
            let Some(item) = self.slots[i].item.as_mut() else {
                continue;
            };
            item.life_ms += dt_ms;
            let override_ms = despawn_override_ms(item.rarity);
            let limit = if override_ms > 0 {
                override_ms
            } else {
                DEFAULT_DESPAWN_MS
            };
            if item.life_ms >= limit as f32 {
                self.slots[i].item = None;
                self.slots[i].generation = self.slots[i].generation.wrapping_add(1);
                self.observer.on_despawn(i);
            }
        }
        // Stack-merge sweep. The cap is small; the quadratic scan is fine.
        for i in 0..self.slots.len() {
            if self.slots[i].item.is_none() {
                continue;
            }
            for j in (i + 1)..self.slots.len() {
                let Some((a, b)) = get_pair(&mut self.slots, i, j) else {
                    continue;
                };
                if a.def_index != b.def_index || a.rarity != b.rarity {
                    continue;
                }
                let dx = a.x - b.x;
                let dy = a.y - b.y;
                if dx * dx + dy * dy > STACK_MERGE_RADIUS * STACK_MERGE_RADIUS {
                    continue;
                }
                let stack_max = defs.get(a.def_index).map(|d| d.stack_max).unwrap_or(i32::MAX);
                let space = stack_max - a.quantity;
                if space <= 0 {
                    continue;
                }
                let moved = b.quantity.min(space);
                a.quantity += moved;
                b.quantity -= moved;
                if b.quantity <= 0 {
                    self.slots[j].item = None;
                    self.slots[j].generation = self.slots[j].generation.wrapping_add(1);
                }
            }
        }
    }

    pub fn damage_durability(&mut self, handle: SlotHandle, amount: i32) -> Result<i32, PoolError> {
        if amount <= 0 {
            return Ok(self.checked(handle)?.durability_cur);
        }
        let item = self.checked_mut(handle)?;
        if item.durability_max <= 0 {
            return Ok(item.durability_cur);
        }
        item.durability_cur = (item.durability_cur - amount).max(0);
        if item.durability_cur == 0 {
            item.fractured = true;
        }
        Ok(item.durability_cur)
    }

    pub fn repair_full(&mut self, handle: SlotHandle) -> Result<i32, PoolError> {
        let item = self.checked_mut(handle)?;
        if item.durability_max <= 0 {
            return Ok(0);
        }
        item.durability_cur = item.durability_max;
        item.fractured = false;
        Ok(item.durability_cur)
    }

    pub fn quality(&self, handle: SlotHandle) -> Result<i32, PoolError> {
        Ok(self.checked(handle)?.quality)
    }

    pub fn set_quality(&mut self, handle: SlotHandle, quality: i32) -> Result<i32, PoolError> {
        let item = self.checked_mut(handle)?;
        item.quality = quality.clamp(0, 20);
        Ok(item.quality)
    }

    pub fn improve_quality(&mut self, handle: SlotHandle, delta: i32) -> Result<i32, PoolError> {
        let item = self.checked_mut(handle)?;
        item.quality = (item.quality + delta).clamp(0, 20);
        Ok(item.quality)
    }

    pub fn socket_count(&self, handle: SlotHandle) -> Result<i32, PoolError> {
        Ok(self.checked(handle)?.socket_count)
    }

    pub fn socket(&self, handle: SlotHandle, slot: usize) -> Result<i32, PoolError> {
        let item = self.checked(handle)?;
        if slot >= item.socket_count as usize || slot >= MAX_SOCKETS {
            return Err(PoolError::OutOfRange);
        }
        Ok(item.sockets[slot])
    }

    pub fn socket_insert(
        &mut self,
        handle: SlotHandle,
        slot: usize,
        gem_def_index: i32,
    ) -> Result<(), PoolError> {
        if gem_def_index < 0 {
            return Err(PoolError::OutOfRange);
        }
        let item = self.checked_mut(handle)?;
        if slot >= item.socket_count as usize || slot >= MAX_SOCKETS {
            return Err(PoolError::OutOfRange);
        }
        if item.sockets[slot] >= 0 {
            return Err(PoolError::SlotOccupied);
        }
        item.sockets[slot] = gem_def_index;
        Ok(())
    }

    pub fn socket_remove(&mut self, handle: SlotHandle, slot: usize) -> Result<(), PoolError> {
        let item = self.checked_mut(handle)?;
        if slot >= item.socket_count as usize || slot >= MAX_SOCKETS {
            return Err(PoolError::OutOfRange);
        }
        if item.sockets[slot] < 0 {
            return Err(PoolError::SlotEmpty);
        }
        item.sockets[slot] = -1;
        Ok(())
    }

    /// Effective minimum damage: quality-scaled base plus flat-damage affix
    /// bonus, reduced to 60% when fractured.
    pub fn damage_min(
        &self,
        handle: SlotHandle,
        defs: &ItemDefRegistry,
        affixes: &AffixRegistry,
    ) -> i32 {
        self.damage_stat(handle, defs, affixes, |d| d.base_damage_min)
    }

    pub fn damage_max(
        &self,
        handle: SlotHandle,
        defs: &ItemDefRegistry,
        affixes: &AffixRegistry,
    ) -> i32 {
        self.damage_stat(handle, defs, affixes, |d| d.base_damage_max)
    }

    fn damage_stat(
        &self,
        handle: SlotHandle,
        defs: &ItemDefRegistry,
        affixes: &AffixRegistry,
        pick: impl Fn(&crate::model::item::ItemDef) -> i32,
    ) -> i32 {
        let Some(item) = self.get(handle) else { return 0 };
        let base = defs.get(item.def_index).map(&pick).unwrap_or(0);
        let base = apply_quality_scale(base, item.quality);
        let mut value = base + affix_damage_bonus(item, affixes);
        if item.fractured {
            value = (value as f32 * 0.6) as i32;
        }
        value
    }

    /// Re-evaluate the loot filter for every active item.
    pub fn reapply_filter(&mut self, defs: &ItemDefRegistry, filter: &dyn LootFilter) {
        for slot in &mut self.slots {
            if let Some(item) = slot.item.as_mut() {
                item.hidden_filter = defs
                    .get(item.def_index)
                    .map(|d| !filter.matches(d))
                    .unwrap_or(false);
            }
        }
    }

    /// Fold an equip transition into the instance's hash chain.
    pub fn update_equip_chain(&mut self, handle: SlotHandle, event: u64) -> Result<u64, PoolError> {
        let item = self.checked_mut(handle)?;
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&item.equip_hash_chain.to_le_bytes());
        bytes[8..].copy_from_slice(&event.to_le_bytes());
        item.equip_hash_chain = crate::rng::fnv1a64(&bytes, 0);
        Ok(item.equip_hash_chain)
    }
}

fn get_pair<'a>(
    slots: &'a mut [Slot],
    i: usize,
    j: usize,
) -> Option<(&'a mut ItemInstance, &'a mut ItemInstance)> {
    let (left, right) = slots.split_at_mut(j);
    match (left[i].item.as_mut(), right[0].item.as_mut()) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    }
}

/// Reduce the larger affix value until the budget holds; ties reduce the
/// prefix first.
pub(crate) fn clamp_to_budget(item: &mut ItemInstance) {
    let cap = item.budget_cap();
    let mut total = item.total_affix_weight();
    while total > cap {
        let reduce_prefix = if item.prefix_index >= 0 && item.suffix_index >= 0 {
            item.prefix_value >= item.suffix_value
        } else {
            item.prefix_index >= 0
        };
        if reduce_prefix && item.prefix_index >= 0 && item.prefix_value > 0 {
            item.prefix_value -= 1;
            total -= 1;
        } else if item.suffix_index >= 0 && item.suffix_value > 0 {
            item.suffix_value -= 1;
            total -= 1;
        } else {
            break;
        }
    }
}

/// Additive quality bonus: `ceil(base * quality * 0.006 + epsilon)`,
/// linear up to +12% at quality 20.
fn apply_quality_scale(base: i32, quality: i32) -> i32 {
    if quality <= 0 {
        return base;
    }
    let q = quality.min(20);
    let delta = (base as f32 * (q as f32 * 0.006) + 1e-6).ceil() as i32;
    base + delta.max(0)
}

fn affix_damage_bonus(item: &ItemInstance, affixes: &AffixRegistry) -> i32 {
    let mut bonus = 0;
    if item.prefix_index >= 0 {
        if let Some(a) = affixes.get(item.prefix_index as usize) {
            if a.stat == AffixStat::DamageFlat {
                bonus += item.prefix_value;
            }
        }
    }
    if item.suffix_index >= 0 {
        if let Some(a) = affixes.get(item.suffix_index as usize) {
            if a.stat == AffixStat::DamageFlat {
                bonus += item.suffix_value;
            }
        }
    }
    bonus
}
