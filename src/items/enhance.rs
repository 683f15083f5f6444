//! Enhancement pathways: imbue, temper, socket crafting, enchant, reforge,
//! affix extraction/orbs, fusion and upgrade stones.
//!
//! Every operation mutates one active item (and optionally consumes
//! another), must leave the affix budget invariant intact, and reports a
//! specific failure the UI layer can name. Gold and materials flow through
//! the installed [`EconomyHooks`]; successful mutations mark the player
//! stat cache dirty.

use thiserror::Error;

use crate::hooks::{EconomyHooks, StatCacheHooks};
use crate::items::pool::{clamp_to_budget, ItemPool, PoolError, SlotHandle, MAX_SOCKETS};
use crate::model::affix::{AffixRegistry, AffixType};
use crate::model::item::ItemDefRegistry;
use crate::rng::Lcg;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EnhanceError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("target affix slot is occupied")]
    SlotOccupied,
    #[error("no affix budget remaining")]
    NoBudget,
    #[error("affix roll produced no candidate")]
    RollFailed,
    #[error("required catalyst material is missing")]
    MissingCatalyst,
    #[error("required material is missing")]
    MissingMaterial,
    #[error("not enough gold")]
    InsufficientGold,
    #[error("nothing to do")]
    NothingToDo,
    #[error("item has no affix in that slot")]
    MissingAffix,
    #[error("intensity must be at least 1")]
    BadIntensity,
    #[error("sockets already at definition maximum")]
    SocketsAtMax,
    #[error("definition does not support sockets")]
    SocketsUnsupported,
    #[error("orb already stores an affix")]
    OrbOccupied,
    #[error("orb has no stored affix")]
    OrbEmpty,
    #[error("orb was already used")]
    OrbUsed,
    #[error("nothing to extract")]
    NothingToExtract,
    #[error("source and target are the same slot")]
    SameSlot,
    #[error("sacrifice item is not active")]
    InactiveSacrifice,
    #[error("sacrifice has nothing to transfer")]
    NothingToTransfer,
    #[error("no affix budget headroom on target")]
    NoBudgetHeadroom,
    #[error("both affix slots occupied on target")]
    BothSlotsOccupied,
}

/// Outcome of a temper attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperOutcome {
    /// Value raised; carries the new value.
    Improved(i32),
    /// Already at the budget cap; nothing changed.
    AtCap,
    /// Failure; durability damage applied (amount carried).
    Fractured(i32),
}

/// Material definitions the engine consumes. `None` disables the
/// corresponding requirement.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnhanceMaterials {
    /// Catalyst consumed by imbue when configured.
    pub imbue_catalyst: Option<usize>,
    /// Consumed by enchant when both affixes reroll.
    pub enchant_orb: Option<usize>,
    /// Always consumed by reforge.
    pub reforge_hammer: Option<usize>,
}

impl EnhanceMaterials {
    /// Resolve the conventional material ids from the definition registry.
    pub fn resolve(defs: &ItemDefRegistry) -> Self {
        Self {
            imbue_catalyst: defs.index_of("imbue_catalyst"),
            enchant_orb: defs.index_of("enchant_orb"),
            reforge_hammer: defs.index_of("reforge_hammer"),
        }
    }
}

/// Gold cost of an enchant: `50 + 5*item_level + 25*rarity^2 + 10*sockets`.
pub fn enchant_cost(item_level: i32, rarity: u8, sockets: i32) -> i64 {
    let level = item_level.max(1) as i64;
    let rarity = rarity.min(4) as i64;
    let sockets = sockets.max(0) as i64;
    50 + level * 5 + rarity * rarity * 25 + 10 * sockets
}

/// Reforge is twice the enchant cost.
pub fn reforge_cost(item_level: i32, rarity: u8, sockets: i32) -> i64 {
    enchant_cost(item_level, rarity, sockets) * 2
}

/// Borrowing facade over the pool, registries and shell hooks.
pub struct Enhancer<'a> {
    pub pool: &'a mut ItemPool,
    pub defs: &'a ItemDefRegistry,
    pub affixes: &'a AffixRegistry,
    pub economy: &'a mut dyn EconomyHooks,
    pub stat_cache: &'a mut dyn StatCacheHooks,
    pub materials: EnhanceMaterials,
}

impl<'a> Enhancer<'a> {
    /// Deterministic per-item stream: operations on the same slot and level
    /// replay identically.
    fn item_rng(&self, handle: SlotHandle, salt: u32) -> Result<Lcg, EnhanceError> {
        let item = self.pool.get(handle).ok_or(PoolError::InactiveSlot)?;
        let seed = handle
            .index
            .wrapping_mul(2_654_435_761)
            ^ item.item_level as u32
            ^ salt;
        Ok(Lcg::new(seed))
    }

    /// Add a new affix to an empty slot, honoring remaining budget and the
    /// optional catalyst requirement. Returns the affix index and value.
    pub fn imbue(
        &mut self,
        handle: SlotHandle,
        is_prefix: bool,
    ) -> Result<(usize, i32), EnhanceError> {
        let mut rng = self.item_rng(handle, 0x9E37_79B9)?;
        let item = self.pool.get(handle).ok_or(PoolError::InactiveSlot)?;
        let occupied = if is_prefix {
            item.prefix_index >= 0
        } else {
            item.suffix_index >= 0
        };
        if occupied {
            return Err(EnhanceError::SlotOccupied);
        }
        let headroom = item.budget_cap() - item.total_affix_weight();
        if headroom <= 0 {
            return Err(EnhanceError::NoBudget);
        }
        let rarity = item.rarity;
        if let Some(cat) = self.materials.imbue_catalyst {
            if self.economy.get_count(cat) == 0 {
                return Err(EnhanceError::MissingCatalyst);
            }
        }
        let kind = if is_prefix {
            AffixType::Prefix
        } else {
            AffixType::Suffix
        };
        let affix = self
            .affixes
            .roll(kind, rarity, &mut rng)
            .ok_or(EnhanceError::RollFailed)?;
        let value = self.affixes.roll_value(affix, &mut rng).min(headroom);
        if value <= 0 {
            return Err(EnhanceError::NoBudget);
        }
        if let Some(cat) = self.materials.imbue_catalyst {
            self.economy.consume(cat, 1);
        }
        let item = self.pool.get_mut(handle).ok_or(PoolError::InactiveSlot)?;
        if is_prefix {
            item.prefix_index = affix as i32;
            item.prefix_value = value;
        } else {
            item.suffix_index = affix as i32;
            item.suffix_value = value;
        }
        self.stat_cache.mark_dirty();
        Ok((affix, value))
    }

    /// Raise an existing affix value by up to `intensity` within budget.
    /// 80% success; failure applies `5 + intensity` durability damage.
    pub fn temper(
        &mut self,
        handle: SlotHandle,
        is_prefix: bool,
        intensity: i32,
    ) -> Result<TemperOutcome, EnhanceError> {
        if intensity < 1 {
            return Err(EnhanceError::BadIntensity);
        }
        let mut rng = self.item_rng(handle, 0x7E3D_11A5 ^ intensity as u32)?;
        let item = self.pool.get(handle).ok_or(PoolError::InactiveSlot)?;
        let present = if is_prefix {
            item.prefix_index >= 0
        } else {
            item.suffix_index >= 0
        };
        if !present {
            return Err(EnhanceError::MissingAffix);
        }
        let headroom = item.budget_cap() - item.total_affix_weight();
        if headroom <= 0 {
            return Ok(TemperOutcome::AtCap);
        }
        if rng.range(100) < 80 {
            let gain = intensity.min(headroom);
            let item = self.pool.get_mut(handle).ok_or(PoolError::InactiveSlot)?;
            let new_value = if is_prefix {
                item.prefix_value += gain;
                item.prefix_value
            } else {
                item.suffix_value += gain;
                item.suffix_value
            };
            self.stat_cache.mark_dirty();
            Ok(TemperOutcome::Improved(new_value))
        } else {
            let damage = 5 + intensity;
            self.pool.damage_durability(handle, damage)?;
            Ok(TemperOutcome::Fractured(damage))
        }
    }

    /// Add one socket if below the definition maximum.
    pub fn add_socket(&mut self, handle: SlotHandle) -> Result<i32, EnhanceError> {
        let item = self.pool.get(handle).ok_or(PoolError::InactiveSlot)?;
        let def = self.defs.get(item.def_index).ok_or(PoolError::OutOfRange)?;
        let max = def.socket_max.min(MAX_SOCKETS as i32);
        if max <= 0 {
            return Err(EnhanceError::SocketsUnsupported);
        }
        if item.socket_count >= max {
            return Err(EnhanceError::SocketsAtMax);
        }
        let item = self.pool.get_mut(handle).ok_or(PoolError::InactiveSlot)?;
        item.socket_count += 1;
        self.stat_cache.mark_dirty();
        Ok(item.socket_count)
    }

    /// Re-sample the socket count in `[socket_min, socket_max]`, clearing
    /// any inserted gems.
    pub fn reroll_sockets(&mut self, handle: SlotHandle) -> Result<i32, EnhanceError> {
        let mut rng = self.item_rng(handle, 0x50CC_E715)?;
        let item = self.pool.get(handle).ok_or(PoolError::InactiveSlot)?;
        let def = self.defs.get(item.def_index).ok_or(PoolError::OutOfRange)?;
        let max = def.socket_max.min(MAX_SOCKETS as i32);
        if max <= 0 || def.socket_min > max {
            return Err(EnhanceError::SocketsUnsupported);
        }
        let span = (max - def.socket_min + 1) as u32;
        let count = def.socket_min + rng.range(span) as i32;
        let item = self.pool.get_mut(handle).ok_or(PoolError::InactiveSlot)?;
        item.socket_count = count;
        item.sockets = [-1; MAX_SOCKETS];
        self.stat_cache.mark_dirty();
        Ok(count)
    }

    /// Reroll the selected existing affixes. Deducts gold and, when both
    /// affixes reroll, consumes one enchant orb. Returns the gold cost.
    pub fn enchant(
        &mut self,
        handle: SlotHandle,
        reroll_prefix: bool,
        reroll_suffix: bool,
    ) -> Result<i64, EnhanceError> {
        if !reroll_prefix && !reroll_suffix {
            return Err(EnhanceError::NothingToDo);
        }
        let mut rng = self.item_rng(handle, 0xBEEF_1234)?;
        let item = self.pool.get(handle).ok_or(PoolError::InactiveSlot)?;
        let has_prefix = item.prefix_index >= 0;
        let has_suffix = item.suffix_index >= 0;
        if !(reroll_prefix && has_prefix) && !(reroll_suffix && has_suffix) {
            return Err(EnhanceError::NothingToDo);
        }
        let cost = enchant_cost(item.item_level, item.rarity, item.socket_count);
        let rarity = item.rarity;
        let need_orb = reroll_prefix && reroll_suffix;
        if self.economy.gold() < cost {
            return Err(EnhanceError::InsufficientGold);
        }
        if need_orb {
            let orb = self.materials.enchant_orb.ok_or(EnhanceError::MissingMaterial)?;
            if self.economy.get_count(orb) == 0 {
                return Err(EnhanceError::MissingMaterial);
            }
            self.economy.consume(orb, 1);
        }
        self.economy.add_gold(-cost);
        let mut prefix = None;
        let mut suffix = None;
        if reroll_prefix && has_prefix {
            prefix = roll_one(self.affixes, AffixType::Prefix, rarity, &mut rng);
        }
        if reroll_suffix && has_suffix {
            suffix = roll_one(self.affixes, AffixType::Suffix, rarity, &mut rng);
        }
        let item = self.pool.get_mut(handle).ok_or(PoolError::InactiveSlot)?;
        if reroll_prefix && has_prefix {
            let (idx, value) = prefix.unwrap_or((-1, 0));
            item.prefix_index = idx;
            item.prefix_value = value;
        }
        if reroll_suffix && has_suffix {
            let (idx, value) = suffix.unwrap_or((-1, 0));
            item.suffix_index = idx;
            item.suffix_value = value;
        }
        clamp_to_budget(item);
        self.stat_cache.mark_dirty();
        Ok(cost)
    }

    /// Wipe both affixes and reroll per the generation rarity rule. Socket
    /// count, item level, rarity and quality are preserved; inserted gems
    /// are cleared. Consumes one reforge hammer and 2x the enchant cost.
    pub fn reforge(&mut self, handle: SlotHandle) -> Result<i64, EnhanceError> {
        let mut rng = self.item_rng(handle, 0x00C0_FFEE)?;
        let item = self.pool.get(handle).ok_or(PoolError::InactiveSlot)?;
        let cost = reforge_cost(item.item_level, item.rarity, item.socket_count);
        let rarity = item.rarity;
        if self.economy.gold() < cost {
            return Err(EnhanceError::InsufficientGold);
        }
        let hammer = self.materials.reforge_hammer.ok_or(EnhanceError::MissingMaterial)?;
        if self.economy.get_count(hammer) == 0 {
            return Err(EnhanceError::MissingMaterial);
        }
        self.economy.add_gold(-cost);
        self.economy.consume(hammer, 1);

        let mut prefix = None;
        let mut suffix = None;
        if rarity >= 3 {
            prefix = roll_one(self.affixes, AffixType::Prefix, rarity, &mut rng);
            suffix = roll_one(self.affixes, AffixType::Suffix, rarity, &mut rng);
        } else if rarity == 2 {
            if rng.state() & 1 == 0 {
                prefix = roll_one(self.affixes, AffixType::Prefix, rarity, &mut rng);
            } else {
                suffix = roll_one(self.affixes, AffixType::Suffix, rarity, &mut rng);
            }
        }
        let item = self.pool.get_mut(handle).ok_or(PoolError::InactiveSlot)?;
        let (pi, pv) = prefix.unwrap_or((-1, 0));
        let (si, sv) = suffix.unwrap_or((-1, 0));
        item.prefix_index = pi;
        item.prefix_value = pv;
        item.suffix_index = si;
        item.suffix_value = sv;
        for s in 0..item.socket_count.min(MAX_SOCKETS as i32) as usize {
            item.sockets[s] = -1;
        }
        clamp_to_budget(item);
        self.stat_cache.mark_dirty();
        Ok(cost)
    }

    /// Move an affix from `source` into the orb's one-shot storage.
    pub fn extract_affix(
        &mut self,
        source: SlotHandle,
        is_prefix: bool,
        orb: SlotHandle,
    ) -> Result<(), EnhanceError> {
        if source.index == orb.index {
            return Err(EnhanceError::SameSlot);
        }
        let (src, orb_item) = self.pool.two_mut(source, orb)?;
        if orb_item.stored_affix_index >= 0 {
            return Err(EnhanceError::OrbOccupied);
        }
        let (idx, value) = if is_prefix {
            (&mut src.prefix_index, &mut src.prefix_value)
        } else {
            (&mut src.suffix_index, &mut src.suffix_value)
        };
        if *idx < 0 {
            return Err(EnhanceError::NothingToExtract);
        }
        orb_item.stored_affix_index = *idx;
        orb_item.stored_affix_value = *value;
        orb_item.stored_affix_used = false;
        *idx = -1;
        *value = 0;
        self.stat_cache.mark_dirty();
        Ok(())
    }

    /// Apply the orb's stored affix to the target. The type-matching slot is
    /// preferred; when occupied the alternate vacant slot is used. The value
    /// is clamped to remaining budget and the orb is marked used.
    pub fn apply_orb(
        &mut self,
        orb: SlotHandle,
        target: SlotHandle,
    ) -> Result<(), EnhanceError> {
        if orb.index == target.index {
            return Err(EnhanceError::SameSlot);
        }
        let stored = {
            let orb_item = self.pool.get(orb).ok_or(PoolError::InactiveSlot)?;
            if orb_item.stored_affix_index < 0 {
                return Err(EnhanceError::OrbEmpty);
            }
            if orb_item.stored_affix_used {
                return Err(EnhanceError::OrbUsed);
            }
            (orb_item.stored_affix_index, orb_item.stored_affix_value)
        };
        let affix = self
            .affixes
            .get(stored.0 as usize)
            .ok_or(EnhanceError::OrbEmpty)?;
        let is_prefix = affix.kind == AffixType::Prefix;
        let (orb_item, tgt) = self.pool.two_mut(orb, target)?;
        let cap = tgt.budget_cap();
        let current = tgt.total_affix_weight();
        let allowed = cap - current;
        let primary_occupied = if is_prefix {
            tgt.prefix_index >= 0
        } else {
            tgt.suffix_index >= 0
        };
        let (slot_idx, slot_val) = if primary_occupied {
            let alt_occupied = if is_prefix {
                tgt.suffix_index >= 0
            } else {
                tgt.prefix_index >= 0
            };
            if alt_occupied {
                return Err(EnhanceError::BothSlotsOccupied);
            }
            if is_prefix {
                (&mut tgt.suffix_index, &mut tgt.suffix_value)
            } else {
                (&mut tgt.prefix_index, &mut tgt.prefix_value)
            }
        } else {
            if is_prefix {
                (&mut tgt.prefix_index, &mut tgt.prefix_value)
            } else {
                (&mut tgt.suffix_index, &mut tgt.suffix_value)
            }
        };
        if allowed <= 0 {
            return Err(EnhanceError::NoBudgetHeadroom);
        }
        *slot_idx = stored.0;
        *slot_val = stored.1.min(allowed);
        orb_item.stored_affix_used = true;
        self.stat_cache.mark_dirty();
        Ok(())
    }

    /// Transfer the sacrifice's highest-value affix into a vacant matching
    /// slot on the target, clamped to budget headroom. The sacrifice is
    /// deactivated on success.
    pub fn fusion(
        &mut self,
        target: SlotHandle,
        sacrifice: SlotHandle,
    ) -> Result<(), EnhanceError> {
        if target.index == sacrifice.index {
            return Err(EnhanceError::SameSlot);
        }
        if self.pool.get(sacrifice).is_none() {
            return Err(EnhanceError::InactiveSacrifice);
        }
        let (tgt, sac) = self.pool.two_mut(target, sacrifice)?;
        let mut candidates: Vec<(bool, i32, i32)> = Vec::with_capacity(2);
        if sac.prefix_index >= 0 {
            candidates.push((true, sac.prefix_index, sac.prefix_value));
        }
        if sac.suffix_index >= 0 {
            candidates.push((false, sac.suffix_index, sac.suffix_value));
        }
        if candidates.is_empty() {
            return Err(EnhanceError::NothingToTransfer);
        }
        let allowed = tgt.budget_cap() - tgt.total_affix_weight();
        if allowed <= 0 {
            return Err(EnhanceError::NoBudgetHeadroom);
        }
        let mut best: Option<(bool, i32, i32)> = None;
        for &(is_prefix, idx, value) in &candidates {
            let occupied = if is_prefix {
                tgt.prefix_index >= 0
            } else {
                tgt.suffix_index >= 0
            };
            if occupied {
                continue;
            }
            if best.map(|(_, _, bv)| value > bv).unwrap_or(true) {
                best = Some((is_prefix, idx, value));
            }
        }
        let (is_prefix, idx, value) = best.ok_or(EnhanceError::BothSlotsOccupied)?;
        let applied = value.min(allowed);
        if applied <= 0 {
            return Err(EnhanceError::NoBudgetHeadroom);
        }
        if is_prefix {
            tgt.prefix_index = idx;
            tgt.prefix_value = applied;
        } else {
            tgt.suffix_index = idx;
            tgt.suffix_value = applied;
        }
        self.pool.deactivate_silent(sacrifice.index as usize);
        self.stat_cache.mark_dirty();
        Ok(())
    }

    /// Upgrade-stone pathway: raise the item level by `tiers`.
    pub fn upgrade_stone(
        &mut self,
        handle: SlotHandle,
        tiers: i32,
        rng: &mut Lcg,
    ) -> Result<(), EnhanceError> {
        if tiers <= 0 {
            return Ok(());
        }
        self.pool.upgrade_level(handle, tiers, rng)?;
        self.stat_cache.mark_dirty();
        Ok(())
    }
}

fn roll_one(
    affixes: &AffixRegistry,
    kind: AffixType,
    rarity: u8,
    rng: &mut Lcg,
) -> Option<(i32, i32)> {
    let idx = affixes.roll(kind, rarity, rng)?;
    Some((idx as i32, affixes.roll_value(idx, rng)))
}
